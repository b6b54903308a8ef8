use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Default, Deserialize)]
pub struct BuiltinIgnores {
    #[serde(default)]
    pub patterns: Vec<String>,
}

static BUILTIN_IGNORE_PATTERNS: Lazy<BuiltinIgnores> = Lazy::new(|| {
    let yaml_content = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../data/builtin_ignores.yaml"
    ));
    serde_yml::from_str(yaml_content).expect("Failed to parse embedded data/builtin_ignores.yaml")
});

static BINARY_EXTENSIONS: Lazy<HashSet<String>> = Lazy::new(|| {
    let yaml_content = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../data/binary_extensions.yaml"
    ));
    let groups: BTreeMap<String, Vec<String>> = serde_yml::from_str(yaml_content)
        .expect("Failed to parse embedded data/binary_extensions.yaml");
    groups
        .into_values()
        .flatten()
        .map(|ext| ext.to_ascii_lowercase())
        .collect()
});

pub fn get_builtin_ignore_patterns() -> &'static BuiltinIgnores {
    &BUILTIN_IGNORE_PATTERNS
}

/// Lowercase extensions (without the dot) known to be binary.
pub fn get_binary_extensions() -> &'static HashSet<String> {
    &BINARY_EXTENSIONS
}
