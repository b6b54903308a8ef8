use crate::cli_args::{BundleArgs, ConfigFileOpts};
use crate::commands::RunContext;
use crate::progress::Spinner;
use crate::{EXIT_OK, EXIT_PARTIAL, load_config_for_command, output};
use anyhow::{Context, Result};
use ctxpack_core::config::expand_path;
use ctxpack_core::{
    AppError, Config, DependencySpec, DirectoryRegistry, OutputSink, ProgressReporter, Resolution,
    aggregate, resolve, resolve_agent, resolve_team,
};
use log;
use std::path::Path;

pub fn handle_bundle_command(
    args: &BundleArgs,
    config_opts: &ConfigFileOpts,
    ctx: &RunContext,
) -> Result<i32> {
    let project_root =
        Config::determine_project_root(None).context("Failed to determine project root")?;
    log::info!("Project root determined: {}", project_root.display());
    let config = load_config_for_command(&project_root, config_opts)?;

    let registry_root = match &args.registry {
        Some(dir) => {
            let dir = absolute(&expand_path(&dir.to_string_lossy()))?;
            if !dir.is_dir() {
                return Err(AppError::InvalidArgument(format!(
                    "Registry is not a directory: {}",
                    dir.display()
                ))
                .into());
            }
            dir
        }
        None => config.get_registry_root(&project_root),
    };
    if !registry_root.is_dir() {
        return Err(AppError::Config(format!(
            "Registry directory not found: {}",
            registry_root.display()
        ))
        .into());
    }
    let registry = DirectoryRegistry::from_config(&registry_root, &config.bundle);
    log::debug!("Using registry at {}", registry.root().display());

    let resolution = resolve_target(args, &registry)?;
    let strict = args.strict || config.bundle.strict;
    let output_path = absolute(&args.output)?;

    let Resolution {
        bundle,
        missing,
        warnings,
    } = resolution;

    if strict && !missing.is_empty() {
        if !ctx.quiet {
            output::print_resolution_problems(
                &missing,
                &warnings,
                config.summary.max_errors,
                ctx.verbose.max(1),
            );
        }
        return Err(AppError::MissingDependencies {
            count: missing.len(),
        })
        .context("Strict mode: bundle not written");
    }

    let reporter = ProgressReporter::new();
    let spinner = Spinner::attach(&reporter, ctx.quiet);
    let written = write_bundle(&bundle, &output_path, &reporter);
    reporter.shutdown();
    spinner.finish();
    let stats = written?;

    if !ctx.quiet {
        output::print_bundle_summary(
            &stats,
            &missing,
            &warnings,
            &output_path,
            config.summary.max_errors,
            ctx.verbose,
        );
    }

    if missing.is_empty() {
        Ok(EXIT_OK)
    } else {
        Ok(EXIT_PARTIAL)
    }
}

fn resolve_target(args: &BundleArgs, registry: &DirectoryRegistry) -> Result<Resolution> {
    let target = &args.target;
    let resolution = if let Some(agent) = &target.agent {
        log::info!("Resolving agent '{}'", agent);
        resolve_agent(agent, registry)
            .with_context(|| format!("Failed to resolve agent '{}'", agent))?
    } else if let Some(team) = &target.team {
        log::info!("Resolving team '{}'", team);
        resolve_team(team, registry).with_context(|| format!("Failed to resolve team '{}'", team))?
    } else if let Some(spec_path) = &target.spec {
        let spec_path = expand_path(&spec_path.to_string_lossy());
        if !spec_path.is_file() {
            return Err(AppError::InvalidArgument(format!(
                "Spec file not found: {}",
                spec_path.display()
            ))
            .into());
        }
        log::info!("Resolving spec {}", spec_path.display());
        let spec = DependencySpec::from_path(&spec_path)?;
        resolve(&spec, registry)?
    } else {
        return Err(AppError::InvalidArgument(
            "One of --agent, --team or --spec is required".into(),
        )
        .into());
    };
    Ok(resolution)
}

fn write_bundle(
    bundle: &ctxpack_core::ResolvedBundle,
    output_path: &Path,
    reporter: &ProgressReporter,
) -> Result<ctxpack_core::AggregateStats> {
    let mut sink = OutputSink::create(output_path)?;
    match aggregate(bundle, &mut sink, Some(reporter)) {
        Ok(stats) => {
            sink.commit()?;
            Ok(stats)
        }
        Err(e) => {
            sink.discard();
            Err(e).with_context(|| format!("Failed to write bundle {}", output_path.display()))
        }
    }
}

fn absolute(path: &Path) -> Result<std::path::PathBuf> {
    std::path::absolute(path)
        .map_err(AppError::Io)
        .with_context(|| format!("Failed to resolve path {}", path.display()))
}
