//! `depscope` discovers the package managers used in a project tree, resolves
//! their dependency graphs concurrently and merges them into one report.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]).
//! 2. Load the global config ([`config::load_config`]) and curations ([`curation`]).
//! 3. Run the [`orchestrator`]: repository config, discovery ([`discovery`]),
//!    bounded resolution ([`scheduler`]), aggregation ([`aggregator`]) and
//!    version-control context ([`vcs`]).
//! 4. Render the requested report ([`report`]).
//! 5. Exit `0`, or `1` when the run failed or an analyzer reported an error.

mod aggregator;
mod analyzer;
mod cli;
mod config;
mod curation;
mod discovery;
mod environment;
mod error;
mod models;
mod orchestrator;
mod report;
mod scheduler;
mod vcs;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, ReportFormat};
use config::load_config;
use curation::FileCurationProvider;
use orchestrator::{Orchestrator, ProgressSink};
use report::progress::ProgressReporter;
use vcs::NoVcs;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let path = if cli.path.is_absolute() {
        cli.path.clone()
    } else {
        std::env::current_dir()
            .context("failed to determine the current directory")?
            .join(&cli.path)
    };

    let mut config = load_config(cli.config.as_deref())?.analyzer;
    if !cli.enable.is_empty() {
        config.enabled_package_managers = Some(cli.enable.clone());
    }
    config.disabled_package_managers.extend(cli.disable.iter().cloned());

    let show_progress = !cli.quiet && cli.report == ReportFormat::Terminal;
    let sink: Arc<dyn ProgressSink> = if show_progress {
        Arc::new(ProgressReporter::new()?)
    } else {
        Arc::new(ProgressReporter::hidden())
    };

    let mut orchestrator = Orchestrator::new(config).with_progress_sink(sink);
    if cli.no_vcs {
        orchestrator = orchestrator.with_vcs(Arc::new(NoVcs));
    }
    if let Some(file) = &cli.curations {
        let provider = FileCurationProvider::from_file(file)?;
        if provider.is_empty() {
            warn!(path = %file.display(), "curations file defines no curations");
        } else {
            info!(path = %file.display(), curations = provider.len(), "loaded curations");
        }
        orchestrator = orchestrator.with_curation_provider(Arc::new(provider));
    }

    let report = match orchestrator
        .analyze(&path, cli.repository_config.as_deref())
        .await
    {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    match cli.report {
        ReportFormat::Terminal => {
            report::terminal::render(&report, &path, cli.verbose, cli.quiet)?;
        }
        ReportFormat::Json => {
            report::write_json(&report, cli.output.as_deref())?;
        }
    }

    if report.analyzer.result.has_errors() {
        std::process::exit(1);
    }

    Ok(())
}
