//! Drives one analysis run from a project root to an [`AnalysisReport`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::aggregator::ResolutionAccumulator;
use crate::analyzer::{all_factories, select_factories, AnalyzerFactory};
use crate::config::{load_repository_config, AnalyzerConfig};
use crate::curation::{CompositeCurationProvider, CurationProvider, FileCurationProvider, NoCurations};
use crate::discovery::{add_unmanaged_fallback, find_managed_files};
use crate::environment::Environment;
use crate::error::AnalysisError;
use crate::models::{AnalysisReport, AnalyzerRun, Repository, VcsContext};
use crate::scheduler::resolve_managed_files;
use crate::vcs::git::GitVcs;
use crate::vcs::{resolve_context, VersionControlSystem};

/// States of a run. `Failed` is terminal and reachable from every state
/// after `Init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    ConfigResolved,
    FilesDiscovered,
    Dispatched,
    Aggregated,
    ContextResolved,
    Done,
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunPhase::Init => "initializing",
            RunPhase::ConfigResolved => "configuration resolved",
            RunPhase::FilesDiscovered => "definition files discovered",
            RunPhase::Dispatched => "resolving dependencies",
            RunPhase::Aggregated => "results aggregated",
            RunPhase::ContextResolved => "repository context resolved",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

/// Receives progress of a run. All methods default to doing nothing.
pub trait ProgressSink: Send + Sync {
    fn phase(&self, _phase: RunPhase) {}

    fn files_discovered(&self, _analyzers: usize, _files: usize) {}

    fn analyzer_started(&self, _analyzer: &str, _files: usize) {}

    fn analyzer_finished(&self, _analyzer: &str, _projects: usize) {}
}

pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Runs analyses with a fixed configuration and set of collaborators.
///
/// ```ignore
/// let report = Orchestrator::new(config)
///     .with_curation_provider(Arc::new(curations))
///     .analyze(Path::new("/work/project"), None)
///     .await?;
/// ```
pub struct Orchestrator {
    config: AnalyzerConfig,
    factories: Option<Vec<Arc<dyn AnalyzerFactory>>>,
    curation: Option<Arc<dyn CurationProvider>>,
    vcs: Arc<dyn VersionControlSystem>,
    sink: Arc<dyn ProgressSink>,
}

impl Orchestrator {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            factories: None,
            curation: None,
            vcs: Arc::new(GitVcs),
            sink: Arc::new(NoProgress),
        }
    }

    /// Candidate factories, in order. Defaults to [`all_factories`].
    #[allow(dead_code)]
    pub fn with_factories(mut self, factories: Vec<Arc<dyn AnalyzerFactory>>) -> Self {
        self.factories = Some(factories);
        self
    }

    pub fn with_curation_provider(mut self, provider: Arc<dyn CurationProvider>) -> Self {
        self.curation = Some(provider);
        self
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn VersionControlSystem>) -> Self {
        self.vcs = vcs;
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Analyze the tree at `root`, which must be an absolute path.
    ///
    /// `repository_config_file` overrides the `.depscope.toml` lookup in the
    /// root. Any failure ends the run without a report.
    pub async fn analyze(
        &self,
        root: &Path,
        repository_config_file: Option<&Path>,
    ) -> Result<AnalysisReport, AnalysisError> {
        let start_time = Utc::now();
        self.enter(RunPhase::Init);

        match self.run(root, repository_config_file, start_time).await {
            Ok(report) => {
                self.enter(RunPhase::Done);
                Ok(report)
            }
            Err(e) => {
                error!(
                    root = %root.display(),
                    precondition = e.is_precondition(),
                    error = %e,
                    "analysis failed"
                );
                self.enter(RunPhase::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        root: &Path,
        repository_config_file: Option<&Path>,
        start_time: chrono::DateTime<Utc>,
    ) -> Result<AnalysisReport, AnalysisError> {
        let root = check_root(root)?;
        let config_dir = if root.is_file() {
            root.parent().unwrap_or(&root).to_path_buf()
        } else {
            root.clone()
        };

        let repository = load_repository_config(&config_dir, repository_config_file)
            .map_err(|e| AnalysisError::Config(format!("{:#}", e)))?;
        let config = self.config.with_repository_overrides(&repository);
        config
            .validate()
            .map_err(|e| AnalysisError::Config(format!("{:#}", e)))?;
        self.enter(RunPhase::ConfigResolved);

        let candidates = self.factories.clone().unwrap_or_else(all_factories);
        let factories = select_factories(candidates, &config)?;
        let mut managed = find_managed_files(&root, &factories, &config, &repository)?;
        if add_unmanaged_fallback(&mut managed, &config, &repository) {
            info!(root = %managed.analysis_dir.display(), "added unmanaged project");
        }
        self.sink
            .files_discovered(managed.entries.len(), managed.file_count());
        self.enter(RunPhase::FilesDiscovered);

        let vcs = Arc::clone(&self.vcs);
        let context_dir = managed.analysis_dir.clone();
        let context_task =
            tokio::task::spawn_blocking(move || resolve_context(&context_dir, vcs.as_ref()));

        let curations = self.curation_provider(&repository);
        let mut accumulator = ResolutionAccumulator::new();
        self.enter(RunPhase::Dispatched);
        let dispatched = resolve_managed_files(
            managed,
            config.max_concurrent_resolutions,
            Arc::clone(&self.sink),
            |resolution| accumulator.add(resolution, curations.as_ref()),
        )
        .await;
        if let Err(e) = dispatched {
            // A lookup that already started cannot be cancelled; wait for it.
            context_task.abort();
            let _ = context_task.await;
            return Err(e);
        }
        info!(
            projects = accumulator.project_count(),
            packages = accumulator.package_count(),
            "aggregated resolutions"
        );
        let result = accumulator.finalize();
        self.enter(RunPhase::Aggregated);

        let context = context_task.await.unwrap_or_else(|e| {
            warn!(error = %e, "version-control lookup did not complete");
            VcsContext::default()
        });
        self.enter(RunPhase::ContextResolved);

        Ok(AnalysisReport {
            repository: Repository {
                context,
                config: repository,
            },
            analyzer: AnalyzerRun {
                start_time,
                end_time: Utc::now(),
                environment: Environment::collect(),
                config,
                result,
            },
        })
    }

    /// Repository curations first, then the injected provider.
    fn curation_provider(&self, repository: &crate::config::RepositoryConfig) -> Arc<dyn CurationProvider> {
        let mut providers: Vec<Arc<dyn CurationProvider>> = Vec::new();
        if !repository.curations.is_empty() {
            providers.push(Arc::new(FileCurationProvider::new(
                repository.curations.iter().cloned(),
            )));
        }
        if let Some(provider) = &self.curation {
            providers.push(Arc::clone(provider));
        }

        match providers.len() {
            0 => Arc::new(NoCurations),
            1 => providers.remove(0),
            _ => Arc::new(CompositeCurationProvider::new(providers)),
        }
    }

    fn enter(&self, phase: RunPhase) {
        info!(phase = %phase, "analysis phase");
        self.sink.phase(phase);
    }
}

fn check_root(root: &Path) -> Result<PathBuf, AnalysisError> {
    if !root.is_absolute() {
        return Err(AnalysisError::RelativeRoot(root.to_path_buf()));
    }
    root.canonicalize()
        .map_err(|_| AnalysisError::MissingRoot(root.to_path_buf()))
}
