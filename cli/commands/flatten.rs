use crate::cli_args::{ConfigFileOpts, FlattenArgs};
use crate::commands::RunContext;
use crate::progress::Spinner;
use crate::{EXIT_OK, EXIT_PARTIAL, load_config_for_command, output};
use anyhow::{Context, Result};
use ctxpack_core::config::expand_path;
use ctxpack_core::{
    AppError, Config, FileClassifier, FlattenOptions, Flattener, IgnoreRuleSet, ProgressReporter,
    WalkOptions, collect_root_sources,
};
use log;
use std::path::{Path, PathBuf};

pub fn handle_flatten_command(
    args: &FlattenArgs,
    config_opts: &ConfigFileOpts,
    ctx: &RunContext,
) -> Result<i32> {
    let input = expand_path(&args.input.to_string_lossy());
    if !input.is_dir() {
        return Err(AppError::InvalidArgument(format!(
            "Input is not a directory: {}",
            input.display()
        ))
        .into());
    }
    let input = Config::determine_project_root(Some(&input))
        .context("Failed to resolve input directory")?;
    let output_path = absolute(&args.output)?;
    log::info!(
        "Flattening {} into {}",
        input.display(),
        output_path.display()
    );

    let mut config = load_config_for_command(&input, config_opts)?;
    apply_overrides(&mut config, args)?;

    let mut ignore_files = config.get_ignore_files(&input);
    for file in &args.ignore_files {
        let path = absolute(&expand_path(&file.to_string_lossy()))?;
        if !path.is_file() {
            return Err(AppError::InvalidArgument(format!(
                "Ignore file not found: {}",
                path.display()
            ))
            .into());
        }
        ignore_files.push(path);
    }

    let sources = collect_root_sources(
        &input,
        config.general.use_gitignore,
        config.general.enable_builtin_ignore,
        &ignore_files,
    );
    let ruleset =
        IgnoreRuleSet::compile(&input, &sources).context("Failed to compile ignore rules")?;
    log::debug!("Compiled {} ignore rule(s).", ruleset.rules().count());

    let options = build_options(&config)?;
    let reporter = ProgressReporter::new();
    let spinner = Spinner::attach(&reporter, ctx.quiet);

    let result = Flattener::new(options)
        .with_progress(&reporter)
        .flatten_to_file(&input, &ruleset, &output_path);
    reporter.shutdown();
    spinner.finish();

    let manifest =
        result.with_context(|| format!("Failed to flatten {}", input.display()))?;

    if !ctx.quiet {
        output::print_flatten_summary(
            &manifest,
            &output_path,
            config.summary.max_errors,
            ctx.verbose,
        );
    }

    if manifest.has_exclusions_or_errors() {
        Ok(EXIT_PARTIAL)
    } else {
        Ok(EXIT_OK)
    }
}

fn apply_overrides(config: &mut Config, args: &FlattenArgs) -> Result<()> {
    if args.no_gitignore {
        config.general.use_gitignore = false;
    }
    if args.no_builtin_ignore {
        config.general.enable_builtin_ignore = false;
    }
    if let Some(workers) = args.workers {
        if workers == 0 {
            return Err(AppError::InvalidArgument("--workers must be at least 1".into()).into());
        }
        config.flatten.workers = Some(workers);
    }
    if let Some(timeout) = &args.read_timeout {
        config.flatten.read_timeout = timeout.clone();
    }
    Ok(())
}

fn build_options(config: &Config) -> Result<FlattenOptions> {
    let walk = WalkOptions {
        include_hidden: config.general.include_hidden,
        follow_symlinks: config.general.follow_symlinks,
        nested_ignore_files: config.general.use_gitignore,
        read_timeout: config.get_read_timeout()?,
        workers: config.get_effective_workers(),
        skip: Vec::new(),
    };
    Ok(FlattenOptions {
        walk,
        classifier: FileClassifier::new(
            config.flatten.sample_bytes,
            &config.flatten.binary_extensions,
        ),
        progress_every: config.flatten.progress_every,
        progress_interval: config.get_progress_interval()?,
    })
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .map_err(AppError::Io)
        .with_context(|| format!("Failed to resolve path {}", path.display()))
}
