//! End-to-end behavior of the flatten and bundle pipelines.

use ctxpack_core::{
    AppError, DependencyRef, DependencySpec, DirectoryRegistry, FlattenOptions, Flattener,
    IgnoreRuleSet, IgnoreSource, MissingReason, ResolveWarning, collect_root_sources,
    render_bundle, resolve, resolve_agent, resolve_team, split_bundle,
};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn canonical_tempdir() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

fn flatten_to_string(root: &Path, rules: &IgnoreRuleSet) -> (String, ctxpack_core::FlattenManifest) {
    let mut out = Vec::new();
    let manifest = Flattener::new(FlattenOptions::default())
        .flatten(root, rules, &mut out)
        .unwrap();
    (String::from_utf8(out).unwrap(), manifest)
}

fn included_paths(xml: &str) -> HashSet<String> {
    xml.lines()
        .filter_map(|line| line.strip_prefix("<file path=\""))
        .filter_map(|rest| rest.split('"').next())
        .map(str::to_string)
        .collect()
}

#[test]
fn three_text_files_and_an_image() {
    let (_dir, root) = canonical_tempdir();
    write(&root, "README.md", b"# Project\n");
    write(&root, "src/main.rs", b"fn main() {}\n");
    write(&root, "src/util.rs", b"pub fn util() {}\n");
    write(&root, "assets/image.png", &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);

    let (xml, manifest) = flatten_to_string(&root, &IgnoreRuleSet::empty(&root));
    assert_eq!(manifest.included, 3);
    assert_eq!(manifest.excluded_binary, 1);
    assert!(xml.contains("<binary path=\"assets/image.png\" size=\"8\" skipped=\"true\"/>"));
}

#[test]
fn negation_under_excluded_directory_stays_excluded() {
    let (_dir, root) = canonical_tempdir();
    write(&root, "build/keep.txt", b"keep me?");
    write(&root, "src/lib.rs", b"pub fn f() {}");
    let rules = IgnoreRuleSet::from_patterns(&root, &["build/", "!build/keep.txt"]).unwrap();

    assert!(rules.is_excluded(Path::new("build/keep.txt"), false));
    let (xml, _) = flatten_to_string(&root, &rules);
    assert!(!included_paths(&xml).contains("build/keep.txt"));
}

#[test]
fn excluded_paths_never_reach_the_output() {
    let (_dir, root) = canonical_tempdir();
    write(&root, ".gitignore", b"*.log\ntmp/\n/secret.env\n");
    write(&root, "app.log", b"log");
    write(&root, "tmp/cache.txt", b"cache");
    write(&root, "secret.env", b"KEY=1");
    write(&root, "nested/secret.env", b"KEY=2");
    write(&root, "nested/deeper/trace.log", b"log");
    write(&root, "nested/.gitignore", b"!trace.log\n");
    write(&root, "src/app.rs", b"fn app() {}");

    let sources = collect_root_sources(&root, true, false, &[]);
    let rules = IgnoreRuleSet::compile(&root, &sources).unwrap();
    let (xml, manifest) = flatten_to_string(&root, &rules);
    let included = included_paths(&xml);

    for path in included.iter().filter(|p| !p.starts_with("nested/")) {
        assert!(!rules.is_excluded(Path::new(path), false), "{path} is excluded");
    }
    assert!(!included.contains("app.log"));
    assert!(!included.contains("tmp/cache.txt"));
    assert!(!included.contains("secret.env"));
    assert!(included.contains("nested/secret.env"));
    // The nested scope re-includes what the root scope excluded.
    assert!(included.contains("nested/deeper/trace.log"));
    assert!(included.contains("src/app.rs"));
    assert_eq!(manifest.excluded_by_rule, 3);
}

#[test]
fn later_custom_ignore_file_overrides_earlier() {
    let (_dir, root) = canonical_tempdir();
    write(&root, "data.csv", b"a,b");
    write(&root, "notes.txt", b"n");
    let sources = vec![
        IgnoreSource::text("first", "*.csv\n*.txt\n"),
        IgnoreSource::text("second", "!notes.txt\n"),
    ];
    let rules = IgnoreRuleSet::compile(&root, &sources).unwrap();
    let (xml, _) = flatten_to_string(&root, &rules);
    let included = included_paths(&xml);
    assert!(included.contains("notes.txt"));
    assert!(!included.contains("data.csv"));
}

#[test]
fn flattening_twice_is_byte_identical() {
    let (_dir, root) = canonical_tempdir();
    for i in 0..40 {
        write(
            &root,
            &format!("pkg{}/mod{}/file{}.txt", i % 3, i % 5, i),
            format!("content {i}\n").as_bytes(),
        );
    }
    write(&root, "blob.bin", &[0, 1, 2, 3]);
    let rules = IgnoreRuleSet::empty(&root);
    let (first, _) = flatten_to_string(&root, &rules);
    let (second, _) = flatten_to_string(&root, &rules);
    assert_eq!(first, second);
}

#[test]
fn malformed_ignore_pattern_is_a_config_error() {
    let (_dir, root) = canonical_tempdir();
    let err = IgnoreRuleSet::compile(&root, &[IgnoreSource::text("bad", "src/[z-a\n")]).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

fn registry_fixture() -> (TempDir, std::path::PathBuf) {
    let (dir, root) = canonical_tempdir();
    write(
        &root,
        "agents/architect.md",
        b"---\nagent:\n  id: architect\ndependencies:\n  agents: [reviewer]\n  tasks: [design]\n  templates: [arch-tmpl]\n---\n# Architect\n",
    );
    write(
        &root,
        "agents/reviewer.md",
        b"# Reviewer\n\n```yaml\ndependencies:\n  agents: [architect]\n  tasks: [design, review]\n  checklists: [quality]\n```\n",
    );
    write(&root, "tasks/design.md", b"design task\n");
    write(&root, "tasks/review.md", b"review task\n");
    write(&root, "templates/arch-tmpl.yaml", b"template: arch\n");
    write(&root, "checklists/quality.md", b"- [ ] tests\n");
    write(
        &root,
        "teams/platform.yaml",
        b"bundle:\n  name: Platform\nagents: [architect, reviewer]\n",
    );
    (dir, root)
}

#[test]
fn transitive_agent_cycle_terminates_with_one_warning() {
    let (_dir, root) = registry_fixture();
    let registry = DirectoryRegistry::new(&root);
    let resolution = resolve_team("platform", &registry).unwrap();

    assert_eq!(resolution.warnings.len(), 1);
    let ResolveWarning::CycleDetected { agent, chain } = &resolution.warnings[0];
    assert_eq!(chain.first(), Some(agent));
    assert_eq!(chain.last(), Some(agent));
    assert!(chain.contains(&"architect".to_string()));
    assert!(chain.contains(&"reviewer".to_string()));
    let paths: Vec<&Path> = resolution
        .bundle
        .iter()
        .map(|e| e.absolute_path.as_path())
        .collect();
    let unique: HashSet<&Path> = paths.iter().copied().collect();
    assert_eq!(paths.len(), unique.len());
    let logical: Vec<&str> = resolution
        .bundle
        .iter()
        .map(|e| e.logical_path.as_str())
        .collect();
    assert_eq!(
        logical,
        vec![
            "teams/platform.yaml",
            "agents/architect.md",
            "agents/reviewer.md",
            "tasks/design.md",
            "templates/arch-tmpl.yaml",
            "tasks/review.md",
            "checklists/quality.md",
        ]
    );
}

#[test]
fn resolution_covers_every_reachable_ref() {
    let (_dir, root) = registry_fixture();
    let registry = DirectoryRegistry::new(&root);
    let resolution = resolve_agent("architect", &registry).unwrap();
    assert!(resolution.is_clean());
    let expected: HashSet<std::path::PathBuf> = [
        "agents/architect.md",
        "agents/reviewer.md",
        "tasks/design.md",
        "tasks/review.md",
        "templates/arch-tmpl.yaml",
        "checklists/quality.md",
    ]
    .iter()
    .map(|p| root.join(p))
    .collect();
    let got: HashSet<std::path::PathBuf> = resolution
        .bundle
        .iter()
        .map(|e| e.absolute_path.clone())
        .collect();
    assert_eq!(got, expected);
}

#[test]
fn missing_template_is_lenient_or_strict() {
    let (_dir, root) = registry_fixture();
    let registry = DirectoryRegistry::new(&root);
    let spec = DependencySpec::from_yaml_str(
        "id: adhoc\ndependencies:\n  tasks: [design]\n  templates: [does-not-exist]\n",
    )
    .unwrap();

    let lenient = resolve(&spec, &registry).unwrap();
    assert_eq!(lenient.bundle.len(), 1);
    assert_eq!(lenient.missing.len(), 1);
    assert_eq!(
        lenient.missing[0].dependency,
        DependencyRef::Template("does-not-exist".into())
    );
    assert_eq!(lenient.missing[0].reason, MissingReason::NotInRegistry);

    let strict = resolve(&spec, &registry).unwrap().into_strict();
    assert!(matches!(strict, Err(AppError::MissingDependencies { count: 1 })));
}

#[test]
fn bundle_splits_back_into_original_files() {
    let (_dir, root) = registry_fixture();
    let registry = DirectoryRegistry::new(&root);
    let resolution = resolve_agent("architect", &registry).unwrap();
    let rendered = render_bundle(&resolution.bundle).unwrap();
    assert_eq!(rendered, render_bundle(&resolution.bundle).unwrap());

    let split = split_bundle(&rendered).unwrap();
    assert_eq!(split.len(), resolution.bundle.len());
    for ((path, content), entry) in split.iter().zip(resolution.bundle.iter()) {
        assert_eq!(path, &entry.logical_path);
        assert_eq!(content, &fs::read(&entry.absolute_path).unwrap());
    }
}
