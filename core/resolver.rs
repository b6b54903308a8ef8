//! Breadth-first resolution of dependency specs into an ordered, deduplicated bundle.

use crate::error::{AppError, Result};
use crate::registry::{DependencyRef, DependencyRegistry, DependencySpec};
use indexmap::IndexMap;
use log;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub logical_path: String,
    pub absolute_path: PathBuf,
    pub content: Vec<u8>,
}

/// Entries in first-seen order, unique by absolute path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedBundle {
    entries: IndexMap<PathBuf, BundleEntry>,
}

impl ResolvedBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry unless its absolute path is already present. Returns whether it was added.
    pub fn push(&mut self, entry: BundleEntry) -> bool {
        if self.entries.contains_key(&entry.absolute_path) {
            return false;
        }
        self.entries.insert(entry.absolute_path.clone(), entry);
        true
    }

    pub fn contains(&self, absolute_path: &Path) -> bool {
        self.entries.contains_key(absolute_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BundleEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.iter().map(|e| e.content.len() as u64).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingReason {
    NotInRegistry,
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    pub dependency: DependencyRef,
    pub requested_by: String,
    pub reason: MissingReason,
}

impl fmt::Display for MissingDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            MissingReason::NotInRegistry => write!(
                f,
                "{} (requested by {}) not found in registry",
                self.dependency, self.requested_by
            ),
            MissingReason::Unreadable(err) => write!(
                f,
                "{} (requested by {}) could not be read: {}",
                self.dependency, self.requested_by, err
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveWarning {
    /// An agent reference reached an agent that was already resolved. For a
    /// loop `chain` starts and ends with `agent`; otherwise it is the
    /// referencing agent followed by `agent`.
    CycleDetected { agent: String, chain: Vec<String> },
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveWarning::CycleDetected { agent, chain } => {
                write!(f, "cycle detected at agent '{}': {}", agent, chain.join(" -> "))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub bundle: ResolvedBundle,
    pub missing: Vec<MissingDependency>,
    pub warnings: Vec<ResolveWarning>,
}

impl Resolution {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
    }

    /// Strict mode: any missing dependency fails the whole resolution.
    pub fn into_strict(self) -> Result<ResolvedBundle> {
        if self.missing.is_empty() {
            Ok(self.bundle)
        } else {
            Err(AppError::MissingDependencies {
                count: self.missing.len(),
            })
        }
    }
}

struct Queued {
    dependency: DependencyRef,
    requested_by: String,
    /// Agent whose document declared this reference.
    from_agent: Option<String>,
}

struct Resolver<'r, R: DependencyRegistry + ?Sized> {
    registry: &'r R,
    resolution: Resolution,
    visited_agents: HashSet<String>,
    /// Agent references declared by each parsed agent document.
    agent_edges: HashMap<String, Vec<String>>,
    reported_agents: HashSet<String>,
    queue: VecDeque<Queued>,
}

/// Resolves `spec` against `registry`. The spec itself is not part of the bundle.
pub fn resolve<R: DependencyRegistry + ?Sized>(
    spec: &DependencySpec,
    registry: &R,
) -> Result<Resolution> {
    let label = spec.id.as_deref().unwrap_or("spec");
    let mut resolver = Resolver::new(registry);
    resolver.enqueue_spec(spec, &format!("spec:{label}"), None);
    resolver.run()
}

/// Resolves an agent: the agent file comes first, followed by everything it reaches.
pub fn resolve_agent<R: DependencyRegistry + ?Sized>(
    agent_id: &str,
    registry: &R,
) -> Result<Resolution> {
    let root = DependencyRef::Agent(strip_extension(agent_id).to_string());
    if registry.locate(&root).is_none() {
        return Err(AppError::Config(format!(
            "Agent '{}' not found in registry",
            agent_id
        )));
    }
    let mut resolver = Resolver::new(registry);
    resolver.queue.push_back(Queued {
        dependency: root,
        requested_by: "command line".to_string(),
        from_agent: None,
    });
    resolver.run()
}

/// Resolves a team: the team file comes first, then its agents and dependencies.
pub fn resolve_team<R: DependencyRegistry + ?Sized>(
    team_id: &str,
    registry: &R,
) -> Result<Resolution> {
    let path = registry.locate_team(team_id).ok_or_else(|| {
        AppError::Config(format!("Team '{}' not found in registry", team_id))
    })?;
    let spec = DependencySpec::from_path(&path)?;
    let mut resolver = Resolver::new(registry);
    let content = fs::read(&path).map_err(|e| AppError::FileRead {
        path: path.clone(),
        source: e,
    })?;
    let absolute_path = canonical(&path);
    resolver.resolution.bundle.push(BundleEntry {
        logical_path: registry.logical_path(&absolute_path),
        absolute_path,
        content,
    });
    resolver.enqueue_spec(&spec, &format!("teams:{team_id}"), None);
    resolver.run()
}

impl<'r, R: DependencyRegistry + ?Sized> Resolver<'r, R> {
    fn new(registry: &'r R) -> Self {
        Self {
            registry,
            resolution: Resolution::default(),
            visited_agents: HashSet::new(),
            agent_edges: HashMap::new(),
            reported_agents: HashSet::new(),
            queue: VecDeque::new(),
        }
    }

    fn enqueue_spec(&mut self, spec: &DependencySpec, requested_by: &str, from_agent: Option<&str>) {
        for dependency in &spec.refs {
            self.queue.push_back(Queued {
                dependency: normalize(dependency),
                requested_by: requested_by.to_string(),
                from_agent: from_agent.map(str::to_string),
            });
        }
    }

    fn run(mut self) -> Result<Resolution> {
        while let Some(item) = self.queue.pop_front() {
            self.visit(item)?;
        }
        log::info!(
            "Resolved {} file(s); {} missing, {} warning(s).",
            self.resolution.bundle.len(),
            self.resolution.missing.len(),
            self.resolution.warnings.len()
        );
        Ok(self.resolution)
    }

    fn visit(&mut self, item: Queued) -> Result<()> {
        let Queued {
            dependency,
            requested_by,
            from_agent,
        } = item;

        if let DependencyRef::Agent(id) = &dependency {
            if !self.visited_agents.insert(id.clone()) {
                match from_agent.as_deref() {
                    Some(from) => self.record_revisit(id, from),
                    None => log::debug!("Agent '{}' already resolved, skipping.", id),
                }
                return Ok(());
            }
        }

        let Some(path) = self.registry.locate(&dependency) else {
            let missing = MissingDependency {
                dependency,
                requested_by,
                reason: MissingReason::NotInRegistry,
            };
            log::warn!("Missing dependency: {}", missing);
            self.resolution.missing.push(missing);
            return Ok(());
        };

        let absolute_path = canonical(&path);
        if self.resolution.bundle.contains(&absolute_path) {
            log::debug!(
                "Duplicate reference {} -> {}, keeping first occurrence.",
                dependency,
                absolute_path.display()
            );
            return Ok(());
        }

        let content = match fs::read(&absolute_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                let missing = MissingDependency {
                    dependency,
                    requested_by,
                    reason: MissingReason::Unreadable(e.to_string()),
                };
                log::warn!("Missing dependency: {}", missing);
                self.resolution.missing.push(missing);
                return Ok(());
            }
        };

        if let DependencyRef::Agent(id) = &dependency {
            let text = String::from_utf8_lossy(&content);
            let spec = DependencySpec::from_agent_document(&text, &absolute_path)?;
            log::debug!("Agent '{}' declares {} reference(s).", id, spec.refs.len());
            let declared: Vec<String> = spec
                .refs
                .iter()
                .filter_map(|r| match normalize(r) {
                    DependencyRef::Agent(child) => Some(child),
                    _ => None,
                })
                .collect();
            self.agent_edges.insert(id.clone(), declared);
            self.enqueue_spec(&spec, &format!("agents:{id}"), Some(id));
        }

        log::trace!("Bundling {} from {}", dependency, absolute_path.display());
        self.resolution.bundle.push(BundleEntry {
            logical_path: self.registry.logical_path(&absolute_path),
            absolute_path,
            content,
        });
        Ok(())
    }

    /// `from` re-referenced the already resolved agent `target`. Warns once per
    /// agent; every member of a loop counts as reported with the loop.
    fn record_revisit(&mut self, target: &str, from: &str) {
        if self.reported_agents.contains(target) {
            log::debug!("Agent '{}' already resolved, skipping.", target);
            return;
        }
        let chain = match self.agent_path(target, from) {
            Some(mut path) => {
                path.push(target.to_string());
                self.reported_agents.extend(path.iter().cloned());
                path
            }
            None => {
                self.reported_agents.insert(target.to_string());
                vec![from.to_string(), target.to_string()]
            }
        };
        let warning = ResolveWarning::CycleDetected {
            agent: target.to_string(),
            chain,
        };
        log::warn!("{}", warning);
        self.resolution.warnings.push(warning);
    }

    /// Shortest chain of declared agent references from `start` to `end`, both included.
    fn agent_path(&self, start: &str, end: &str) -> Option<Vec<String>> {
        let mut previous: HashMap<&str, &str> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::from([start]);
        let mut queue: VecDeque<&str> = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            if node == end {
                let mut path = vec![node.to_string()];
                let mut cursor = node;
                while let Some(&prev) = previous.get(cursor) {
                    path.push(prev.to_string());
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            for next in self.agent_edges.get(node).into_iter().flatten() {
                if seen.insert(next.as_str()) {
                    previous.insert(next.as_str(), node);
                    queue.push_back(next.as_str());
                }
            }
        }
        None
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn strip_extension(id: &str) -> &str {
    match id.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && matches!(ext, "md" | "yaml" | "yml") => stem,
        _ => id,
    }
}

/// Agent ids are compared without their file extension so `dev` and `dev.md` meet.
fn normalize(dependency: &DependencyRef) -> DependencyRef {
    match dependency {
        DependencyRef::Agent(id) => DependencyRef::Agent(strip_extension(id).to_string()),
        other => other.clone(),
    }
}
