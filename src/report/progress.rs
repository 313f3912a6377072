use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

use crate::orchestrator::{ProgressSink, RunPhase};

/// Progress bar over the analyzers of a run, drawn on stderr.
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        Ok(Self { bar })
    }

    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl ProgressSink for ProgressReporter {
    fn phase(&self, phase: RunPhase) {
        match phase {
            RunPhase::Done => self.bar.finish_and_clear(),
            RunPhase::Failed => self.bar.abandon_with_message("failed"),
            other => self.bar.set_message(other.to_string()),
        }
    }

    fn files_discovered(&self, analyzers: usize, _files: usize) {
        self.bar.set_length(analyzers as u64);
    }

    fn analyzer_started(&self, analyzer: &str, files: usize) {
        self.bar.set_message(format!("{} ({} files)", analyzer, files));
    }

    fn analyzer_finished(&self, analyzer: &str, projects: usize) {
        self.bar.inc(1);
        self.bar
            .set_message(format!("{} done, {} projects", analyzer, projects));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_reporter_tracks_analyzers() {
        let reporter = ProgressReporter::hidden();
        reporter.phase(RunPhase::Init);
        reporter.files_discovered(3, 7);
        reporter.analyzer_started("Cargo", 2);
        reporter.analyzer_finished("Cargo", 2);
        assert_eq!(reporter.bar.length(), Some(3));
        assert_eq!(reporter.bar.position(), 1);
        reporter.phase(RunPhase::Done);
        assert!(reporter.bar.is_finished());
    }
}
