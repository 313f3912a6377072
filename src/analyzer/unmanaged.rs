use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::config::{AnalyzerConfig, RepositoryConfig};
use crate::models::{Identifier, Project, ProjectAnalyzerResult};

pub const ECOSYSTEM: &str = "Unmanaged";

/// Factory for the fallback analyzer. It claims nothing by itself; discovery
/// hands it the project root when no ecosystem covers it.
pub struct UnmanagedFactory;

impl super::AnalyzerFactory for UnmanagedFactory {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    fn definition_file_patterns(&self) -> &'static [&'static str] {
        &[]
    }

    fn create(
        &self,
        root: &Path,
        _config: &AnalyzerConfig,
        _repository: &RepositoryConfig,
    ) -> Arc<dyn super::PackageManager> {
        Arc::new(UnmanagedAnalyzer::new(root))
    }
}

/// Treats the whole tree as one project without external dependencies.
pub struct UnmanagedAnalyzer {
    root: PathBuf,
}

impl UnmanagedAnalyzer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl super::PackageManager for UnmanagedAnalyzer {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    fn resolve_definition_file(&self, definition_file: &Path) -> Result<Vec<ProjectAnalyzerResult>> {
        let name = definition_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let project = Project::new(
            Identifier::new(ECOSYSTEM, "", name, ""),
            super::relative_path(&self.root, definition_file),
        );
        Ok(vec![ProjectAnalyzerResult::new(project)])
    }
}
