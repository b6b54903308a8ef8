use crate::config::{BundleConfig, KindDirectories, KindExtensions};
use crate::error::{AppError, Result};
use indexmap::IndexMap;
use log;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum DependencyKind {
    #[serde(rename = "tasks")]
    Task,
    #[serde(rename = "templates")]
    Template,
    #[serde(rename = "checklists")]
    Checklist,
    #[serde(rename = "data")]
    Data,
    #[serde(rename = "agents")]
    Agent,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Task => "tasks",
            DependencyKind::Template => "templates",
            DependencyKind::Checklist => "checklists",
            DependencyKind::Data => "data",
            DependencyKind::Agent => "agents",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyRef {
    Task(String),
    Template(String),
    Checklist(String),
    Data(String),
    Agent(String),
}

impl DependencyRef {
    pub fn new(kind: DependencyKind, id: impl Into<String>) -> Self {
        let id = id.into();
        match kind {
            DependencyKind::Task => DependencyRef::Task(id),
            DependencyKind::Template => DependencyRef::Template(id),
            DependencyKind::Checklist => DependencyRef::Checklist(id),
            DependencyKind::Data => DependencyRef::Data(id),
            DependencyKind::Agent => DependencyRef::Agent(id),
        }
    }

    pub fn kind(&self) -> DependencyKind {
        match self {
            DependencyRef::Task(_) => DependencyKind::Task,
            DependencyRef::Template(_) => DependencyKind::Template,
            DependencyRef::Checklist(_) => DependencyKind::Checklist,
            DependencyRef::Data(_) => DependencyKind::Data,
            DependencyRef::Agent(_) => DependencyKind::Agent,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            DependencyRef::Task(id)
            | DependencyRef::Template(id)
            | DependencyRef::Checklist(id)
            | DependencyRef::Data(id)
            | DependencyRef::Agent(id) => id,
        }
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.id())
    }
}

/// The declared dependencies of one agent or team, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencySpec {
    pub id: Option<String>,
    pub refs: Vec<DependencyRef>,
}

#[derive(Debug, Deserialize)]
struct RawSpec {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    agents: Option<Vec<String>>,
    #[serde(default)]
    dependencies: Option<IndexMap<DependencyKind, Option<Vec<String>>>>,
}

impl From<RawSpec> for DependencySpec {
    fn from(raw: RawSpec) -> Self {
        let mut refs: Vec<DependencyRef> = raw
            .agents
            .unwrap_or_default()
            .into_iter()
            .map(DependencyRef::Agent)
            .collect();
        for (kind, ids) in raw.dependencies.unwrap_or_default() {
            refs.extend(
                ids.unwrap_or_default()
                    .into_iter()
                    .map(|id| DependencyRef::new(kind, id)),
            );
        }
        DependencySpec { id: raw.id, refs }
    }
}

impl DependencySpec {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: RawSpec = serde_yml::from_str(content)?;
        Ok(raw.into())
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: RawSpec = serde_json::from_str(content)?;
        Ok(raw.into())
    }

    /// Loads a spec file, picking the parser from the extension (`.json` or YAML).
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| AppError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        };
        parsed.map_err(|e| {
            AppError::SpecParse(format!("Invalid dependency spec '{}': {}", path.display(), e))
        })
    }

    /// Extracts the spec embedded in an agent document: YAML front matter, else the
    /// first fenced yaml block, else (for `.yaml`/`.yml` files) the whole document.
    /// Documents with none of these declare no dependencies.
    pub fn from_agent_document(content: &str, path: &Path) -> Result<Self> {
        let is_yaml_file = path.extension().is_some_and(|ext| {
            ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml")
        });
        let block = front_matter(content)
            .or_else(|| fenced_yaml_block(content))
            .or(if is_yaml_file { Some(content) } else { None });
        match block {
            Some(yaml) => Self::from_yaml_str(yaml).map_err(|e| {
                AppError::SpecParse(format!(
                    "Invalid dependency block in agent '{}': {}",
                    path.display(),
                    e
                ))
            }),
            None => {
                log::trace!("No dependency block in {}", path.display());
                Ok(Self::default())
            }
        }
    }
}

fn front_matter(content: &str) -> Option<&str> {
    let body = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let end = body.find("\n---")?;
    Some(&body[..end])
}

fn fenced_yaml_block(content: &str) -> Option<&str> {
    let start = ["```yaml", "```yml"]
        .iter()
        .filter_map(|fence| content.find(fence).map(|i| i + fence.len()))
        .min()?;
    let after_fence = &content[start..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Maps dependency references to files. Implemented outside the resolver so the
/// packaging layout can change without touching resolution.
pub trait DependencyRegistry {
    /// Path of the file backing `dep`, or `None` when the registry has no such entry.
    fn locate(&self, dep: &DependencyRef) -> Option<PathBuf>;

    /// Path of a team file.
    fn locate_team(&self, id: &str) -> Option<PathBuf>;

    /// Stable, registry-relative name for a located file.
    fn logical_path(&self, path: &Path) -> String;
}

/// Registry laid out as `<root>/<kind dir>/<id>.<ext>`.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    root: PathBuf,
    directories: KindDirectories,
    extensions: KindExtensions,
}

impl DirectoryRegistry {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            directories: KindDirectories::default(),
            extensions: KindExtensions::default(),
        }
    }

    pub fn from_config(root: &Path, config: &BundleConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            directories: config.directories.clone(),
            extensions: config.extensions.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn section(&self, kind: DependencyKind) -> (&str, &[String]) {
        let (dir, exts) = match kind {
            DependencyKind::Task => (&self.directories.tasks, &self.extensions.tasks),
            DependencyKind::Template => (&self.directories.templates, &self.extensions.templates),
            DependencyKind::Checklist => {
                (&self.directories.checklists, &self.extensions.checklists)
            }
            DependencyKind::Data => (&self.directories.data, &self.extensions.data),
            DependencyKind::Agent => (&self.directories.agents, &self.extensions.agents),
        };
        (dir.as_str(), exts.as_slice())
    }

    fn find(&self, dir: &str, extensions: &[String], id: &str) -> Option<PathBuf> {
        if !is_plain_id(id) {
            log::warn!("Rejecting dependency id with path components: {}", id);
            return None;
        }
        let base = self.root.join(dir);
        let has_known_ext = Path::new(id)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)));
        if has_known_ext {
            let candidate = base.join(id);
            return candidate.is_file().then_some(candidate);
        }
        extensions
            .iter()
            .map(|ext| base.join(format!("{id}.{ext}")))
            .chain(std::iter::once(base.join(id)))
            .find(|candidate| candidate.is_file())
    }
}

impl DependencyRegistry for DirectoryRegistry {
    fn locate(&self, dep: &DependencyRef) -> Option<PathBuf> {
        let (dir, extensions) = self.section(dep.kind());
        let found = self.find(dir, extensions, dep.id());
        log::trace!("Registry lookup {} -> {:?}", dep, found);
        found
    }

    fn locate_team(&self, id: &str) -> Option<PathBuf> {
        self.find(&self.directories.teams, &self.extensions.teams, id)
    }

    fn logical_path(&self, path: &Path) -> String {
        let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        pathdiff::diff_paths(path, &root)
            .filter(|rel| !rel.starts_with(".."))
            .unwrap_or_else(|| path.to_path_buf())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn is_plain_id(id: &str) -> bool {
    let mut components = Path::new(id).components();
    !id.is_empty()
        && matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_spec_keeps_declaration_order() {
        let spec = DependencySpec::from_yaml_str(
            r#"
id: dev
dependencies:
  templates:
    - story-tmpl
  tasks:
    - create-doc.md
    - review
  data: []
  checklists:
"#,
        )
        .unwrap();
        assert_eq!(spec.id.as_deref(), Some("dev"));
        assert_eq!(
            spec.refs,
            vec![
                DependencyRef::Template("story-tmpl".into()),
                DependencyRef::Task("create-doc.md".into()),
                DependencyRef::Task("review".into()),
            ]
        );
    }

    #[test]
    fn team_agents_come_first() {
        let spec = DependencySpec::from_yaml_str(
            "bundle:\n  name: Team\nagents: [pm, dev]\ndependencies:\n  data: [kb]\n",
        )
        .unwrap();
        assert_eq!(
            spec.refs,
            vec![
                DependencyRef::Agent("pm".into()),
                DependencyRef::Agent("dev".into()),
                DependencyRef::Data("kb".into()),
            ]
        );
    }

    #[test]
    fn json_spec_is_supported() {
        let spec =
            DependencySpec::from_json_str(r#"{"dependencies": {"checklists": ["done"]}}"#).unwrap();
        assert_eq!(spec.refs, vec![DependencyRef::Checklist("done".into())]);
    }

    #[test]
    fn unknown_kind_is_a_spec_error() {
        let err = DependencySpec::from_yaml_str("dependencies:\n  widgets: [a]\n").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn agent_document_front_matter_and_fence() {
        let front = "---\ndependencies:\n  tasks: [a]\n---\n# Agent\n";
        let spec = DependencySpec::from_agent_document(front, Path::new("x.md")).unwrap();
        assert_eq!(spec.refs, vec![DependencyRef::Task("a".into())]);

        let fenced = "# Agent\n\n```yaml\nagent:\n  name: X\ndependencies:\n  templates: [t]\n```\nmore text\n";
        let spec = DependencySpec::from_agent_document(fenced, Path::new("x.md")).unwrap();
        assert_eq!(spec.refs, vec![DependencyRef::Template("t".into())]);

        let plain = "# Agent without deps\n";
        let spec = DependencySpec::from_agent_document(plain, Path::new("x.md")).unwrap();
        assert!(spec.refs.is_empty());
    }

    #[test]
    fn directory_registry_maps_kinds_to_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("templates")).unwrap();
        fs::create_dir_all(root.join("tasks")).unwrap();
        fs::write(root.join("templates/prd.yaml"), "t").unwrap();
        fs::write(root.join("tasks/create-doc.md"), "t").unwrap();

        let registry = DirectoryRegistry::new(root);
        let tmpl = registry
            .locate(&DependencyRef::Template("prd".into()))
            .unwrap();
        assert_eq!(tmpl, root.join("templates/prd.yaml"));
        assert!(
            registry
                .locate(&DependencyRef::Task("create-doc.md".into()))
                .is_some()
        );
        assert!(registry.locate(&DependencyRef::Task("missing".into())).is_none());
        assert!(
            registry
                .locate(&DependencyRef::Task("../templates/prd.yaml".into()))
                .is_none()
        );
        let canonical = tmpl.canonicalize().unwrap();
        assert_eq!(registry.logical_path(&canonical), "templates/prd.yaml");
    }

    #[test]
    fn display_uses_kind_prefix() {
        assert_eq!(DependencyRef::Agent("pm".into()).to_string(), "agents:pm");
    }
}
