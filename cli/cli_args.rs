use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigFileOpts {
    #[arg(
        long,
        global = true,
        help = "Path of the TOML config file (default: <project>/.ctxpack/ctxpack.toml).",
        value_name = "FILE",
        conflicts_with = "no_config",
        help_heading = "Configuration"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Do not load any TOML config file.",
        help_heading = "Configuration"
    )]
    pub no_config: bool,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Flatten source trees and bundle agent dependencies into single documents.",
    long_about = "ctxpack turns a directory tree into one XML document (honoring ignore files and \nskipping binaries), or resolves an agent/team dependency graph into one text bundle.",
    help_template = "{about-section}\nUsage: {usage}\n\n{all-args}{after-help}",
    after_help = "EXAMPLES:\n  ctxpack flatten --input . --output codebase.xml\n  ctxpack bundle --agent dev --output dev.txt --strict\n\nEXIT CODES:\n  0 success, 1 invalid arguments, 2 completed with exclusions/errors or missing\n  dependencies, 3 fatal error",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase message verbosity (-v, -vv, -vvv).")]
    pub verbose: u8,

    #[arg(
        short,
        long,
        global = true,
        help = "Silence progress, summaries and log output."
    )]
    pub quiet: bool,

    #[clap(flatten)]
    pub config_file: ConfigFileOpts,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    #[command(
        visible_alias = "f",
        about = "Flatten a directory tree into one XML document."
    )]
    Flatten(FlattenArgs),

    #[command(
        visible_alias = "b",
        about = "Resolve an agent, team or spec and concatenate its dependencies."
    )]
    Bundle(BundleArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FlattenArgs {
    #[arg(
        short,
        long,
        value_name = "DIR",
        help = "Directory to flatten.",
        help_heading = "Input/Output"
    )]
    pub input: PathBuf,

    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path of the XML document to write.",
        help_heading = "Input/Output"
    )]
    pub output: PathBuf,

    #[arg(
        long = "ignore",
        value_name = "FILE",
        help = "Additional gitignore-style file; may be repeated, later files take precedence.",
        help_heading = "Filtering"
    )]
    pub ignore_files: Vec<PathBuf>,

    #[arg(
        long,
        help = "Do not read .gitignore/.ignore files or .git/info/exclude.",
        help_heading = "Filtering"
    )]
    pub no_gitignore: bool,

    #[arg(
        long,
        help = "Do not apply the built-in ignore patterns.",
        help_heading = "Filtering"
    )]
    pub no_builtin_ignore: bool,

    #[arg(
        long,
        value_name = "N",
        value_parser = clap::value_parser!(usize),
        help = "Number of file reader threads.",
        help_heading = "Performance"
    )]
    pub workers: Option<usize>,

    #[arg(
        long,
        value_name = "DURATION",
        help = "Per-file read timeout, e.g. '500ms' or '10s'.",
        help_heading = "Performance"
    )]
    pub read_timeout: Option<String>,
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct BundleTarget {
    #[arg(long, value_name = "ID", help = "Agent to bundle (agents/<ID>.md).")]
    pub agent: Option<String>,

    #[arg(long, value_name = "ID", help = "Team to bundle (teams/<ID>.yaml).")]
    pub team: Option<String>,

    #[arg(long, value_name = "FILE", help = "Standalone YAML/JSON dependency spec.")]
    pub spec: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct BundleArgs {
    #[clap(flatten)]
    pub target: BundleTarget,

    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path of the text bundle to write.",
        help_heading = "Input/Output"
    )]
    pub output: PathBuf,

    #[arg(
        long,
        value_name = "DIR",
        help = "Registry root (default from config: .ctxpack/registry).",
        help_heading = "Input/Output"
    )]
    pub registry: Option<PathBuf>,

    #[arg(
        long,
        help = "Fail without writing a bundle if any dependency is missing.",
        help_heading = "Resolution"
    )]
    pub strict: bool,
}
