mod cli_args;
mod commands;
mod output;
mod progress;

use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use colored::*;
use log;
use std::path::Path;
use std::process;

use cli_args::{Cli, Commands, ConfigFileOpts};
use ctxpack_core::{AppError, Config};

pub const EXIT_OK: i32 = 0;
pub const EXIT_USAGE: i32 = 1;
pub const EXIT_PARTIAL: i32 = 2;
pub const EXIT_FATAL: i32 = 3;

fn main() {
    let cli_args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
                _ => EXIT_USAGE,
            };
            let _ = e.print();
            process::exit(code);
        }
    };

    setup_logging(cli_args.quiet, cli_args.verbose);

    let quiet = cli_args.quiet;

    log::debug!("CLI args parsed: {:?}", cli_args);

    let exit_code = match run_app(cli_args) {
        Ok(code) => {
            log::info!("Finished with exit code {}.", code);
            code
        }
        Err(e) => {
            let exit_code = exit_code_for(&e);
            if !quiet || exit_code == EXIT_USAGE {
                eprintln!("{} {:#}", "Error:".red().bold(), e);
            } else {
                log::error!("Application failed: {:#}", e);
            }
            exit_code
        }
    };
    log::debug!("Exiting with code {}", exit_code);
    process::exit(exit_code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<AppError>() {
        Some(AppError::InvalidArgument(_)) | Some(AppError::DurationParse(_)) => EXIT_USAGE,
        Some(_) => EXIT_FATAL,
        None => EXIT_FATAL,
    }
}

fn setup_logging(quiet: bool, verbose: u8) {
    let log_level = if quiet {
        log::LevelFilter::Off
    } else {
        match verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();
    log::trace!("Logger initialized with level: {:?}", log_level);
}

fn run_app(cli: Cli) -> Result<i32> {
    let ctx = commands::RunContext {
        quiet: cli.quiet,
        verbose: cli.verbose,
    };
    match &cli.command {
        Commands::Flatten(args) => {
            log::debug!("Executing 'flatten' command...");
            commands::flatten::handle_flatten_command(args, &cli.config_file, &ctx)
        }
        Commands::Bundle(args) => {
            log::debug!("Executing 'bundle' command...");
            commands::bundle::handle_bundle_command(args, &cli.config_file, &ctx)
        }
    }
}

/// Loads the config file for `project_root` honoring `--config` / `--no-config`.
pub fn load_config_for_command(project_root: &Path, opts: &ConfigFileOpts) -> Result<Config> {
    let config_path =
        Config::resolve_config_path(project_root, opts.config.as_ref(), opts.no_config)
            .context("Failed to resolve configuration path")?;

    let config = match &config_path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    log::trace!("Effective config: {:?}", config);
    Ok(config)
}
