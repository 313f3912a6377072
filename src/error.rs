use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions that end an analysis run without a result.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("project root '{}' is not an absolute path", .0.display())]
    RelativeRoot(PathBuf),

    #[error("project root '{}' does not exist", .0.display())]
    MissingRoot(PathBuf),

    #[error(
        "project root '{}' is a file; single-file analysis needs exactly one enabled package manager, found {active}",
        path.display()
    )]
    FileRoot { path: PathBuf, active: usize },

    #[error("unknown package manager '{0}'")]
    UnknownPackageManager(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to walk '{}': {source}", path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// A project's identifier type does not match the analyzer that resolved it.
    #[error("{analyzer} returned project '{project}' whose identifier type is not '{analyzer}'")]
    EcosystemMismatch { analyzer: String, project: String },

    #[error("{analyzer} failed to resolve dependencies: {message}")]
    Resolution { analyzer: String, message: String },

    #[error("{analyzer} resolution task did not complete: {reason}")]
    TaskAborted { analyzer: String, reason: String },
}

impl AnalysisError {
    pub fn resolution(analyzer: &str, err: &anyhow::Error) -> Self {
        AnalysisError::Resolution {
            analyzer: analyzer.to_string(),
            message: format!("{:#}", err),
        }
    }

    /// Precondition violations are programming or input errors rather than
    /// failures of an external resolver.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            AnalysisError::RelativeRoot(_)
                | AnalysisError::MissingRoot(_)
                | AnalysisError::FileRoot { .. }
                | AnalysisError::EcosystemMismatch { .. }
        )
    }
}
