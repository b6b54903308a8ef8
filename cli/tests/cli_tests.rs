//! CLI integration tests driving the real ctxpack binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

#[allow(deprecated)]
fn ctxpack_cmd() -> Command {
    let mut cmd = Command::cargo_bin("ctxpack").unwrap();
    cmd.env_remove("PROJECT_ROOT");
    cmd
}

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn registry_workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    let reg = temp.path().join(".ctxpack/registry");
    write(
        &reg,
        "agents/dev.md",
        b"---\ndependencies:\n  tasks: [implement]\n  templates: [story-tmpl]\n---\n# Dev agent\n",
    );
    write(
        &reg,
        "agents/broken.md",
        b"---\ndependencies:\n  tasks: [implement]\n  templates: [ghost]\n---\n# Broken agent\n",
    );
    write(&reg, "tasks/implement.md", b"Implement the story.\n");
    write(&reg, "templates/story-tmpl.yaml", b"template: story\n");
    temp
}

#[test]
fn test_help_output() {
    ctxpack_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("flatten"))
        .stdout(predicate::str::contains("bundle"));
}

#[test]
fn test_unknown_flag_is_usage_error() {
    ctxpack_cmd()
        .args(["flatten", "--bogus"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_input_directory_is_usage_error() {
    let temp = TempDir::new().unwrap();
    ctxpack_cmd()
        .args(["flatten", "--input"])
        .arg(temp.path().join("nope"))
        .arg("--output")
        .arg(temp.path().join("out.xml"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not a directory"));
}

#[test]
fn test_flatten_clean_tree_exits_zero() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("project");
    write(&input, "src/main.rs", b"fn main() {}\n");
    write(&input, "README.md", b"# Readme\n");
    let output = temp.path().join("out.xml");

    ctxpack_cmd()
        .args(["--no-config", "flatten", "--no-builtin-ignore", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Flatten Summary"));

    let xml = fs::read_to_string(&output).unwrap();
    assert!(xml.contains("<file path=\"src/main.rs\""));
    assert!(xml.contains("status=\"complete\""));
}

#[test]
fn test_flatten_with_binary_exits_two() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("project");
    write(&input, "a.txt", b"a");
    write(&input, "b.txt", b"b");
    write(&input, "c.txt", b"c");
    write(&input, "image.png", &[0x89, b'P', b'N', b'G', 0]);
    let output = temp.path().join("out.xml");

    ctxpack_cmd()
        .args(["-q", "flatten", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .code(2);

    let xml = fs::read_to_string(&output).unwrap();
    assert!(xml.contains("included=\"3\""));
    assert!(xml.contains("excludedBinary=\"1\""));
}

#[test]
fn test_flatten_custom_ignore_file() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("project");
    write(&input, "keep.rs", b"fn keep() {}");
    write(&input, "drop.tmp", b"temp");
    let ignore = temp.path().join("extra.ignore");
    fs::write(&ignore, "*.tmp\n").unwrap();
    let output = temp.path().join("out.xml");

    ctxpack_cmd()
        .args(["-q", "flatten", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .arg("--ignore")
        .arg(&ignore)
        .assert()
        .code(2);

    let xml = fs::read_to_string(&output).unwrap();
    assert!(xml.contains("keep.rs"));
    assert!(!xml.contains("drop.tmp"));
}

#[test]
fn test_flatten_malformed_ignore_is_fatal() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("project");
    write(&input, "a.txt", b"a");
    let ignore = temp.path().join("bad.ignore");
    fs::write(&ignore, "src/[z-a\n").unwrap();
    let output = temp.path().join("out.xml");

    ctxpack_cmd()
        .args(["flatten", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .arg("--ignore")
        .arg(&ignore)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Malformed ignore pattern"));
    assert!(!output.exists());
}

#[test]
fn test_flatten_invalid_read_timeout() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "a.txt", b"a");
    ctxpack_cmd()
        .args(["flatten", "--read-timeout", "soon", "--input"])
        .arg(temp.path())
        .arg("--output")
        .arg(temp.path().join("out.xml"))
        .assert()
        .code(1);
}

#[test]
fn test_bundle_agent_exits_zero() {
    let temp = registry_workspace();
    let output = temp.path().join("dev.txt");

    ctxpack_cmd()
        .current_dir(temp.path())
        .args(["bundle", "--agent", "dev", "--output"])
        .arg(&output)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Bundle Summary"));

    let bundle = fs::read_to_string(&output).unwrap();
    assert_eq!(
        bundle,
        "=== agents/dev.md ===\n---\ndependencies:\n  tasks: [implement]\n  templates: [story-tmpl]\n---\n# Dev agent\n\n\
         === tasks/implement.md ===\nImplement the story.\n\n\
         === templates/story-tmpl.yaml ===\ntemplate: story\n\n"
    );
}

#[test]
fn test_bundle_missing_dependency_lenient_exits_two() {
    let temp = registry_workspace();
    let output = temp.path().join("broken.txt");

    ctxpack_cmd()
        .current_dir(temp.path())
        .args(["-v", "bundle", "--agent", "broken", "--output"])
        .arg(&output)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("templates:ghost"));

    let bundle = fs::read_to_string(&output).unwrap();
    assert!(bundle.contains("=== tasks/implement.md ==="));
}

#[test]
fn test_bundle_missing_dependency_strict_exits_three() {
    let temp = registry_workspace();
    let output = temp.path().join("broken.txt");

    ctxpack_cmd()
        .current_dir(temp.path())
        .args(["bundle", "--agent", "broken", "--strict", "--output"])
        .arg(&output)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Strict mode"));

    assert!(!output.exists());
}

#[test]
fn test_bundle_unknown_agent_is_fatal() {
    let temp = registry_workspace();
    ctxpack_cmd()
        .current_dir(temp.path())
        .args(["bundle", "--agent", "nobody", "--output"])
        .arg(temp.path().join("x.txt"))
        .assert()
        .code(3);
}

#[test]
fn test_bundle_spec_file_with_explicit_registry() {
    let temp = registry_workspace();
    let spec = temp.path().join("spec.json");
    fs::write(
        &spec,
        r#"{"id": "adhoc", "dependencies": {"templates": ["story-tmpl"]}}"#,
    )
    .unwrap();
    let output = temp.path().join("adhoc.txt");

    ctxpack_cmd()
        .args(["-q", "bundle", "--spec"])
        .arg(&spec)
        .arg("--registry")
        .arg(temp.path().join(".ctxpack/registry"))
        .arg("--output")
        .arg(&output)
        .assert()
        .code(0);

    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "=== templates/story-tmpl.yaml ===\ntemplate: story\n\n"
    );
}

#[test]
fn test_bundle_requires_exactly_one_target() {
    let temp = registry_workspace();
    ctxpack_cmd()
        .current_dir(temp.path())
        .args(["bundle", "--agent", "dev", "--team", "core", "--output", "x.txt"])
        .assert()
        .code(1);
}

#[test]
fn test_config_file_strict_setting() {
    let temp = registry_workspace();
    write(
        temp.path(),
        ".ctxpack/ctxpack.toml",
        b"[bundle]\nstrict = true\n",
    );
    let output = temp.path().join("broken.txt");
    ctxpack_cmd()
        .current_dir(temp.path())
        .args(["bundle", "--agent", "broken", "--output"])
        .arg(&output)
        .assert()
        .code(3);
    assert!(!output.exists());

    ctxpack_cmd()
        .current_dir(temp.path())
        .args(["--no-config", "bundle", "--agent", "broken", "--output"])
        .arg(&output)
        .assert()
        .code(2);
}
