//! Rendering of an [`AnalysisReport`](crate::models::AnalysisReport).
//!
//! - [`terminal`]: colored summary and tables; respects `--verbose` / `--quiet`.
//! - [`progress`]: progress bar fed by the orchestrator while a run is in flight.
//! - [`write_json`]: the full report as pretty JSON, to stdout or a file.

pub mod progress;
pub mod terminal;

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::models::AnalysisReport;

pub fn write_json(report: &AnalysisReport, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => std::fs::write(path, json + "\n")
            .with_context(|| format!("failed to write report to {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", json)?;
            Ok(())
        }
    }
}
