//! Bounded concurrent resolution of a [`ManagedFileSet`].
//!
//! Every analyzer gets one task. A per-run semaphore bounds how many
//! resolutions run at once; the resolution itself runs on the blocking pool
//! because analyzers do synchronous file I/O. Results are validated as they
//! complete and handed to the caller's fold in completion order. The first
//! failure aborts every other task.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::discovery::{ManagedFileSet, ManagedFiles};
use crate::error::AnalysisError;
use crate::models::{ProjectResolution, ResolutionMap};
use crate::orchestrator::ProgressSink;

/// Resolve every entry of `set` with at most `max_workers` resolutions in
/// flight, calling `on_resolved` for each validated result.
///
/// Returns only after every task has finished or been aborted, and the
/// semaphore has been closed.
#[instrument(skip_all, fields(analyzers = set.entries.len(), max_workers = max_workers))]
pub async fn resolve_managed_files<F>(
    set: ManagedFileSet,
    max_workers: usize,
    sink: Arc<dyn ProgressSink>,
    mut on_resolved: F,
) -> Result<(), AnalysisError>
where
    F: FnMut(ProjectResolution),
{
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut tasks = JoinSet::new();

    for ManagedFiles { analyzer, files } in set.entries {
        let semaphore = Arc::clone(&semaphore);
        let sink = Arc::clone(&sink);
        tasks.spawn(async move {
            let name = analyzer.ecosystem();
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| AnalysisError::TaskAborted {
                    analyzer: name.to_string(),
                    reason: e.to_string(),
                })?;

            info!(analyzer = name, files = files.len(), "resolving dependencies");
            sink.analyzer_started(name, files.len());

            let results = tokio::task::spawn_blocking(move || analyzer.resolve_dependencies(&files))
                .await
                .map_err(|e| AnalysisError::TaskAborted {
                    analyzer: name.to_string(),
                    reason: e.to_string(),
                })?
                .map_err(|e| AnalysisError::resolution(name, &e))?;

            validate(name, results)
        });
    }

    let outcome = loop {
        match tasks.join_next().await {
            None => break Ok(()),
            Some(Ok(Ok(resolution))) => {
                let projects: usize = resolution.results.values().map(Vec::len).sum();
                info!(analyzer = %resolution.analyzer, projects, "resolution finished");
                sink.analyzer_finished(&resolution.analyzer, projects);
                on_resolved(resolution);
            }
            Some(Ok(Err(e))) => break Err(e),
            Some(Err(e)) => {
                break Err(AnalysisError::TaskAborted {
                    analyzer: "resolution task".to_string(),
                    reason: e.to_string(),
                })
            }
        }
    };

    if let Err(e) = &outcome {
        warn!(error = %e, remaining = tasks.len(), "aborting remaining resolution tasks");
        tasks.shutdown().await;
    }
    semaphore.close();

    outcome
}

/// Check that every project carries the analyzer's ecosystem tag. Files
/// without any project are dropped.
fn validate(analyzer: &str, results: ResolutionMap) -> Result<ProjectResolution, AnalysisError> {
    let mut validated = ResolutionMap::new();
    for (file, entries) in results {
        if entries.is_empty() {
            debug!(analyzer, file = %file.display(), "definition file yielded no projects");
            continue;
        }
        if let Some(entry) = entries.iter().find(|entry| entry.project.id.kind != analyzer) {
            return Err(AnalysisError::EcosystemMismatch {
                analyzer: analyzer.to_string(),
                project: entry.project.id.to_coordinates(),
            });
        }
        validated.insert(file, entries);
    }

    Ok(ProjectResolution {
        analyzer: analyzer.to_string(),
        results: validated,
    })
}
