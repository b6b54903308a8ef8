//! Gitignore-compatible ignore rules.
//!
//! An [`IgnoreRuleSet`] is a stack of scopes ordered root to leaf. Each scope
//! holds the rules defined by the ignore files of one directory, compiled into
//! a single [`Gitignore`] matcher in declaration order. Evaluation asks the
//! deepest applicable scope first; the first scope with a matching rule decides,
//! and within a scope the last matching rule wins.

use crate::builtin::get_builtin_ignore_patterns;
use crate::error::{AppError, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use log;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Ignore files picked up in every directory the walker enters.
pub const NESTED_IGNORE_FILES: &[&str] = &[".gitignore", ".ignore"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRule {
    pub pattern: String,
    pub is_negation: bool,
    pub is_dir_only: bool,
    pub is_anchored: bool,
    pub scope_depth: usize,
    pub origin: String,
}

/// Where a block of ignore patterns comes from.
#[derive(Debug, Clone)]
pub enum IgnoreSource {
    /// Patterns held in memory; `name` is only used in diagnostics.
    Text { name: String, content: String },
    /// An ignore file on disk. Must be readable.
    File(PathBuf),
}

impl IgnoreSource {
    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Self {
        IgnoreSource::Text {
            name: name.into(),
            content: content.into(),
        }
    }

    fn load(&self) -> Result<(String, Option<PathBuf>, String)> {
        match self {
            IgnoreSource::Text { name, content } => Ok((name.clone(), None, content.clone())),
            IgnoreSource::File(path) => {
                let content = fs::read_to_string(path).map_err(|e| {
                    AppError::Config(format!(
                        "Cannot read ignore file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok((path.display().to_string(), Some(path.clone()), content))
            }
        }
    }
}

#[derive(Debug)]
struct Scope {
    dir: PathBuf,
    depth: usize,
    rules: Vec<IgnoreRule>,
    matcher: Gitignore,
}

#[derive(Debug, Clone)]
pub struct IgnoreRuleSet {
    root: PathBuf,
    scopes: Vec<Arc<Scope>>,
}

impl IgnoreRuleSet {
    /// A rule set that excludes nothing.
    pub fn empty(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            scopes: Vec::new(),
        }
    }

    /// Compiles root-scope sources. Later sources take precedence over earlier ones.
    pub fn compile(root: &Path, sources: &[IgnoreSource]) -> Result<Self> {
        Self::empty(root).with_scope(Path::new(""), sources)
    }

    pub fn from_patterns(root: &Path, patterns: &[&str]) -> Result<Self> {
        Self::compile(root, &[IgnoreSource::text("<inline>", patterns.join("\n"))])
    }

    /// Returns a new rule set with an extra scope for `dir` (relative to the root).
    /// `self` is left untouched.
    pub fn with_scope(&self, dir: &Path, sources: &[IgnoreSource]) -> Result<Self> {
        let depth = normal_depth(dir);
        let abs_dir = self.root.join(dir);
        let mut builder = GitignoreBuilder::new(&abs_dir);
        let mut rules = Vec::new();

        for source in sources {
            let (origin, from, content) = source.load()?;
            for line in content.lines() {
                let Some(rule) = parse_rule(line, depth, &origin) else {
                    continue;
                };
                builder.add_line(from.clone(), line).map_err(|e| {
                    AppError::Config(format!(
                        "Malformed ignore pattern \"{}\" in {}: {}",
                        line.trim(),
                        origin,
                        e
                    ))
                })?;
                log::trace!("Compiled ignore rule {:?} (scope depth {})", rule.pattern, depth);
                rules.push(rule);
            }
        }

        let mut scopes = self.scopes.clone();
        if rules.is_empty() {
            return Ok(Self {
                root: self.root.clone(),
                scopes,
            });
        }

        let matcher = builder.build().map_err(|e| {
            AppError::Config(format!(
                "Failed to compile ignore rules for '{}': {}",
                abs_dir.display(),
                e
            ))
        })?;
        scopes.push(Arc::new(Scope {
            dir: dir.to_path_buf(),
            depth,
            rules,
            matcher,
        }));
        scopes.sort_by_key(|s| s.depth);
        Ok(Self {
            root: self.root.clone(),
            scopes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All rules in evaluation order (root scope first, declaration order within a scope).
    pub fn rules(&self) -> impl Iterator<Item = &IgnoreRule> {
        self.scopes.iter().flat_map(|s| s.rules.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Whether `relative_path` is excluded, taking excluded ancestor directories into
    /// account: once a directory is excluded nothing below it can be re-included.
    pub fn is_excluded(&self, relative_path: &Path, is_dir: bool) -> bool {
        let components: Vec<Component> = relative_path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        if components.is_empty() {
            return false;
        }
        let mut prefix = PathBuf::new();
        for component in &components[..components.len() - 1] {
            prefix.push(component);
            if self.matches_entry(&prefix, true) {
                return true;
            }
        }
        self.matches_entry(relative_path, is_dir)
    }

    /// Evaluates the rules against a single path without looking at its ancestors.
    /// The walker uses this because excluded ancestors are never descended into.
    pub(crate) fn matches_entry(&self, relative_path: &Path, is_dir: bool) -> bool {
        for scope in self.scopes.iter().rev() {
            let Ok(inner) = relative_path.strip_prefix(&scope.dir) else {
                continue;
            };
            if inner.as_os_str().is_empty() {
                continue;
            }
            let matched = scope.matcher.matched(inner, is_dir);
            if matched.is_ignore() {
                return true;
            }
            if matched.is_whitelist() {
                return false;
            }
        }
        false
    }
}

fn normal_depth(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

/// Describes one pattern line, or `None` for blank lines and comments.
fn parse_rule(line: &str, scope_depth: usize, origin: &str) -> Option<IgnoreRule> {
    let trimmed = trim_unescaped_trailing_spaces(line);
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (is_negation, body) = match trimmed.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let body = body
        .strip_prefix("\\#")
        .map(|rest| format!("#{rest}"))
        .or_else(|| body.strip_prefix("\\!").map(|rest| format!("!{rest}")))
        .unwrap_or_else(|| body.to_string());
    let is_dir_only = body.len() > 1 && body.ends_with('/');
    let core = body.trim_end_matches('/');
    let is_anchored = core.starts_with('/') || core.contains('/');
    Some(IgnoreRule {
        pattern: trimmed.to_string(),
        is_negation,
        is_dir_only,
        is_anchored,
        scope_depth,
        origin: origin.to_string(),
    })
}

fn trim_unescaped_trailing_spaces(line: &str) -> &str {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut end = line.len();
    while end > 0 && line.as_bytes()[end - 1] == b' ' {
        if end >= 2 && line.as_bytes()[end - 2] == b'\\' {
            break;
        }
        end -= 1;
    }
    &line[..end]
}

/// Root-scope sources in ascending precedence: built-in table, the project's own
/// ignore files, then custom ignore files in the order given.
pub fn collect_root_sources(
    root: &Path,
    use_gitignore: bool,
    use_builtin: bool,
    custom_files: &[PathBuf],
) -> Vec<IgnoreSource> {
    let mut sources = Vec::new();
    if use_builtin {
        sources.push(IgnoreSource::text(
            "<builtin>",
            get_builtin_ignore_patterns().patterns.join("\n"),
        ));
    }
    if use_gitignore {
        let exclude = root.join(".git").join("info").join("exclude");
        if exclude.is_file() {
            sources.push(IgnoreSource::File(exclude));
        }
        for name in NESTED_IGNORE_FILES {
            let candidate = root.join(name);
            if candidate.is_file() {
                sources.push(IgnoreSource::File(candidate));
            }
        }
    }
    sources.extend(custom_files.iter().cloned().map(IgnoreSource::File));
    log::debug!(
        "Collected {} root ignore source(s) (gitignore: {}, builtin: {})",
        sources.len(),
        use_gitignore,
        use_builtin
    );
    sources
}

/// Ignore files present in `dir`, in the order they are applied.
pub fn nested_sources(dir: &Path) -> Vec<IgnoreSource> {
    NESTED_IGNORE_FILES
        .iter()
        .map(|name| dir.join(name))
        .filter(|p| p.is_file())
        .map(IgnoreSource::File)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(patterns: &[&str]) -> IgnoreRuleSet {
        IgnoreRuleSet::from_patterns(Path::new("/project"), patterns).unwrap()
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let set = rules(&["# comment", "", "   ", "*.log"]);
        assert_eq!(set.rules().count(), 1);
        assert!(set.is_excluded(Path::new("debug.log"), false));
        assert!(!set.is_excluded(Path::new("debug.txt"), false));
    }

    #[test]
    fn rule_metadata_is_recorded() {
        let set = rules(&["!keep.log", "build/", "/top.txt", "docs/*.md"]);
        let all: Vec<_> = set.rules().collect();
        assert!(all[0].is_negation);
        assert!(all[1].is_dir_only && !all[1].is_anchored);
        assert!(all[2].is_anchored);
        assert!(all[3].is_anchored && !all[3].is_dir_only);
        assert!(all.iter().all(|r| r.scope_depth == 0));
    }

    #[test]
    fn last_matching_rule_wins() {
        let set = rules(&["*.log", "!important.log"]);
        assert!(set.is_excluded(Path::new("a/debug.log"), false));
        assert!(!set.is_excluded(Path::new("a/important.log"), false));

        let set = rules(&["!important.log", "*.log"]);
        assert!(set.is_excluded(Path::new("important.log"), false));
    }

    #[test]
    fn trailing_slash_only_matches_directories() {
        let set = rules(&["cache/"]);
        assert!(set.is_excluded(Path::new("cache"), true));
        assert!(!set.is_excluded(Path::new("cache"), false));
        assert!(set.is_excluded(Path::new("src/cache/item.bin"), false));
    }

    #[test]
    fn leading_slash_anchors_to_scope_root() {
        let set = rules(&["/todo.txt"]);
        assert!(set.is_excluded(Path::new("todo.txt"), false));
        assert!(!set.is_excluded(Path::new("sub/todo.txt"), false));
    }

    #[test]
    fn single_and_double_star() {
        let set = rules(&["src/*.tmp", "logs/**/trace.txt"]);
        assert!(set.is_excluded(Path::new("src/a.tmp"), false));
        assert!(!set.is_excluded(Path::new("src/nested/a.tmp"), false));
        assert!(set.is_excluded(Path::new("logs/trace.txt"), false));
        assert!(set.is_excluded(Path::new("logs/a/b/trace.txt"), false));
    }

    #[test]
    fn negation_cannot_reinclude_under_excluded_directory() {
        let set = rules(&["build/", "!build/keep.txt"]);
        assert!(set.is_excluded(Path::new("build"), true));
        assert!(set.is_excluded(Path::new("build/keep.txt"), false));
    }

    #[test]
    fn escaped_hash_and_bang_are_literal() {
        let set = rules(&["\\#notes.md", "\\!bang.txt"]);
        assert!(set.is_excluded(Path::new("#notes.md"), false));
        assert!(set.is_excluded(Path::new("!bang.txt"), false));
        assert!(set.rules().all(|r| !r.is_negation));
    }

    #[test]
    fn malformed_pattern_is_a_config_error() {
        let err = IgnoreRuleSet::from_patterns(Path::new("/project"), &["src/[abc"]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn missing_custom_ignore_file_is_a_config_error() {
        let err = IgnoreRuleSet::compile(
            Path::new("/project"),
            &[IgnoreSource::File(PathBuf::from("/definitely/not/here/.ignore"))],
        )
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn deeper_scope_overrides_root_scope() {
        let root = rules(&["*.gen"]);
        let nested = root
            .with_scope(
                Path::new("vendor"),
                &[IgnoreSource::text("vendor/.gitignore", "!*.gen\n/local.txt")],
            )
            .unwrap();
        assert!(nested.is_excluded(Path::new("a.gen"), false));
        assert!(!nested.is_excluded(Path::new("vendor/a.gen"), false));
        assert!(nested.is_excluded(Path::new("vendor/local.txt"), false));
        assert!(!nested.is_excluded(Path::new("vendor/x/local.txt"), false));
        assert!(!nested.is_excluded(Path::new("local.txt"), false));
        assert_eq!(nested.rules().filter(|r| r.scope_depth == 1).count(), 2);
        // The parent set is unchanged.
        assert!(root.is_excluded(Path::new("vendor/a.gen"), false));
    }

    #[test]
    fn evaluation_is_pure() {
        let set = rules(&["*.o", "!keep.o"]);
        for _ in 0..3 {
            assert!(set.is_excluded(Path::new("x.o"), false));
            assert!(!set.is_excluded(Path::new("keep.o"), false));
        }
    }

    #[test]
    fn root_sources_follow_precedence_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "*.txt\n").unwrap();
        let custom = dir.path().join("custom.ignore");
        fs::write(&custom, "!notes.txt\n").unwrap();

        let sources = collect_root_sources(dir.path(), true, true, &[custom]);
        assert_eq!(sources.len(), 3);
        let set = IgnoreRuleSet::compile(dir.path(), &sources).unwrap();
        assert!(set.is_excluded(Path::new("a.txt"), false));
        assert!(!set.is_excluded(Path::new("notes.txt"), false));
        assert!(set.is_excluded(Path::new("node_modules"), true));

        let no_git = collect_root_sources(dir.path(), false, false, &[]);
        assert!(no_git.is_empty());
    }
}
