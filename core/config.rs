use crate::error::{AppError, Result};
use log;
use parse_duration::parse;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_DIR: &str = ".ctxpack";
pub const DEFAULT_CONFIG_FILENAME: &str = "ctxpack.toml";
pub const DEFAULT_REGISTRY_DIR: &str = ".ctxpack/registry";
pub const DEFAULT_READ_TIMEOUT: &str = "10s";
pub const DEFAULT_PROGRESS_INTERVAL: &str = "250ms";
pub const DEFAULT_SAMPLE_BYTES: usize = 8000;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub flatten: FlattenConfig,
    #[serde(default)]
    pub bundle: BundleConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    #[serde(default = "default_true")]
    pub use_gitignore: bool,
    #[serde(default = "default_true")]
    pub enable_builtin_ignore: bool,
    #[serde(default = "default_true")]
    pub include_hidden: bool,
    #[serde(default = "default_false")]
    pub follow_symlinks: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FlattenConfig {
    #[serde(default)]
    pub ignore_files: Vec<PathBuf>,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: String,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: String,
    #[serde(default = "default_sample_bytes")]
    pub sample_bytes: usize,
    #[serde(default)]
    pub binary_extensions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BundleConfig {
    #[serde(default = "default_registry_root")]
    pub registry_root: PathBuf,
    #[serde(default = "default_false")]
    pub strict: bool,
    #[serde(default)]
    pub directories: KindDirectories,
    #[serde(default)]
    pub extensions: KindExtensions,
}

/// Registry sub-directory per section (agents, teams and the dependency kinds).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct KindDirectories {
    pub agents: String,
    pub teams: String,
    pub tasks: String,
    pub templates: String,
    pub checklists: String,
    pub data: String,
}

/// Candidate file extensions per section, tried in order.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct KindExtensions {
    pub agents: Vec<String>,
    pub teams: Vec<String>,
    pub tasks: Vec<String>,
    pub templates: Vec<String>,
    pub checklists: Vec<String>,
    pub data: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SummaryConfig {
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
}

fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_read_timeout() -> String {
    DEFAULT_READ_TIMEOUT.to_string()
}
fn default_progress_every() -> usize {
    100
}
fn default_progress_interval() -> String {
    DEFAULT_PROGRESS_INTERVAL.to_string()
}
fn default_sample_bytes() -> usize {
    DEFAULT_SAMPLE_BYTES
}
fn default_registry_root() -> PathBuf {
    PathBuf::from(DEFAULT_REGISTRY_DIR)
}
fn default_max_errors() -> usize {
    10
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            use_gitignore: default_true(),
            enable_builtin_ignore: default_true(),
            include_hidden: default_true(),
            follow_symlinks: default_false(),
        }
    }
}
impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            ignore_files: Vec::new(),
            read_timeout: default_read_timeout(),
            workers: None,
            progress_every: default_progress_every(),
            progress_interval: default_progress_interval(),
            sample_bytes: default_sample_bytes(),
            binary_extensions: Vec::new(),
        }
    }
}
impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            registry_root: default_registry_root(),
            strict: default_false(),
            directories: KindDirectories::default(),
            extensions: KindExtensions::default(),
        }
    }
}
impl Default for KindDirectories {
    fn default() -> Self {
        Self {
            agents: "agents".to_string(),
            teams: "teams".to_string(),
            tasks: "tasks".to_string(),
            templates: "templates".to_string(),
            checklists: "checklists".to_string(),
            data: "data".to_string(),
        }
    }
}
impl Default for KindExtensions {
    fn default() -> Self {
        let exts = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            agents: exts(&["md", "yaml", "yml"]),
            teams: exts(&["yaml", "yml"]),
            tasks: exts(&["md"]),
            templates: exts(&["yaml", "yml", "md"]),
            checklists: exts(&["md"]),
            data: exts(&["md", "yaml", "yml", "txt"]),
        }
    }
}
impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_errors: default_max_errors(),
        }
    }
}

impl Config {
    pub fn determine_project_root(cli_project_root: Option<&PathBuf>) -> Result<PathBuf> {
        let path_str_opt = cli_project_root
            .map(|p| p.to_string_lossy().to_string())
            .or_else(|| env::var("PROJECT_ROOT").ok().filter(|s| !s.is_empty()));

        let path_to_resolve = match path_str_opt {
            Some(p_str) => expand_path(&p_str),
            None => env::current_dir().map_err(AppError::Io)?,
        };

        path_to_resolve.canonicalize().map_err(|e| {
            AppError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to canonicalize project root '{}': {}",
                    path_to_resolve.display(),
                    e
                ),
            ))
        })
    }

    pub fn resolve_config_path(
        project_root: &Path,
        cli_config_file: Option<&PathBuf>,
        cli_disable_config: bool,
    ) -> Result<Option<PathBuf>> {
        if cli_disable_config {
            log::debug!("Config file loading disabled via CLI flag.");
            return Ok(None);
        }

        match cli_config_file {
            Some(p) => {
                let path = expand_path(&p.to_string_lossy());
                if !path.exists() {
                    return Err(AppError::Config(format!(
                        "Specified config file not found at path: {}",
                        path.display()
                    )));
                }
                log::debug!("Using specified config file path: {}", path.display());
                Ok(Some(path))
            }
            None => {
                let default_path = project_root
                    .join(DEFAULT_CONFIG_DIR)
                    .join(DEFAULT_CONFIG_FILENAME);
                if default_path.exists() {
                    log::debug!("Using default config file path: {}", default_path.display());
                    Ok(Some(default_path))
                } else {
                    log::debug!(
                        "No config file specified and default not found at: {}",
                        default_path.display()
                    );
                    Ok(None)
                }
            }
        }
    }

    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        log::info!("Loading configuration from: {}", config_path.display());
        let toml_content = fs::read_to_string(config_path).map_err(|e| AppError::FileRead {
            path: config_path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&toml_content).map_err(|e| {
            AppError::TomlParse(format!(
                "Error parsing config file '{}': {}. Check TOML syntax and structure.",
                config_path.display(),
                e
            ))
        })
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str::<Config>(content)
    }

    pub fn get_read_timeout(&self) -> Result<Duration> {
        parse(&self.flatten.read_timeout).map_err(|e| {
            AppError::DurationParse(format!(
                "Invalid read timeout '{}': {}. Use format like '500ms', '10s'.",
                self.flatten.read_timeout, e
            ))
        })
    }

    pub fn get_progress_interval(&self) -> Result<Duration> {
        parse(&self.flatten.progress_interval).map_err(|e| {
            AppError::DurationParse(format!(
                "Invalid progress interval '{}': {}. Use format like '250ms', '1s'.",
                self.flatten.progress_interval, e
            ))
        })
    }

    pub fn get_effective_workers(&self) -> usize {
        self.flatten
            .workers
            .unwrap_or_else(|| rayon::current_num_threads().min(8))
            .max(1)
    }

    /// Custom ignore files from config, made absolute against the project root.
    pub fn get_ignore_files(&self, project_root: &Path) -> Vec<PathBuf> {
        self.flatten
            .ignore_files
            .iter()
            .map(|p| absolutize(project_root, &expand_path(&p.to_string_lossy())))
            .collect()
    }

    pub fn get_registry_root(&self, project_root: &Path) -> PathBuf {
        absolutize(
            project_root,
            &expand_path(&self.bundle.registry_root.to_string_lossy()),
        )
    }
}

pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
