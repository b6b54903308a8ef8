pub mod aggregate;
pub mod builtin;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod error;
pub mod flatten;
pub mod manifest;
pub mod patterns;
pub mod progress;
pub mod registry;
pub mod resolver;
pub mod sink;
pub mod walker;

pub use aggregate::{AggregateStats, aggregate, render_bundle, split_bundle};
pub use builtin::{BuiltinIgnores, get_binary_extensions, get_builtin_ignore_patterns};
pub use cancel::CancellationToken;
pub use classify::{Classification, FileClassifier, Verdict};
pub use config::Config;
pub use error::{AppError, Result};
pub use flatten::{FlattenOptions, Flattener};
pub use manifest::{ErrorRecord, FlattenManifest, RunStatus};
pub use patterns::{IgnoreRule, IgnoreRuleSet, IgnoreSource, collect_root_sources};
pub use progress::{Phase, ProgressReporter, ProgressSnapshot, ProgressThrottle};
pub use registry::{
    DependencyKind, DependencyRef, DependencyRegistry, DependencySpec, DirectoryRegistry,
};
pub use resolver::{
    BundleEntry, MissingDependency, MissingReason, Resolution, ResolveWarning, ResolvedBundle,
    resolve, resolve_agent, resolve_team,
};
pub use sink::OutputSink;
pub use walker::{FileEntry, TreeWalker, WalkEvent, WalkOptions, walk};
