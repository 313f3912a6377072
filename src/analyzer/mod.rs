//! Package-manager analyzers and the registry that selects them.
//!
//! An [`AnalyzerFactory`] recognizes definition files and creates a
//! [`PackageManager`] bound to a project root. The registry in
//! [`all_factories`] has a fixed order; the unmanaged analyzer is not part of
//! it and is only used as a fallback by discovery.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use glob::Pattern;

use crate::config::{AnalyzerConfig, RepositoryConfig};
use crate::error::AnalysisError;
use crate::models::{ProjectAnalyzerResult, ResolutionMap};

pub mod cargo;
pub mod gradle;
pub mod maven;
pub mod npm;
pub mod pip;
pub mod unmanaged;

/// Recognizes an ecosystem's definition files and creates its analyzer.
pub trait AnalyzerFactory: Send + Sync {
    /// Ecosystem name, also the identifier type of every project it resolves.
    fn ecosystem(&self) -> &'static str;

    /// File-name glob patterns of the definition files of this ecosystem.
    fn definition_file_patterns(&self) -> &'static [&'static str];

    /// Return the subset of `files` this ecosystem recognizes. Pure.
    fn claims(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        let patterns: Vec<Pattern> = self
            .definition_file_patterns()
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();

        files
            .iter()
            .filter(|file| {
                file.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| patterns.iter().any(|p| p.matches(name)))
            })
            .cloned()
            .collect()
    }

    fn create(
        &self,
        root: &Path,
        config: &AnalyzerConfig,
        repository: &RepositoryConfig,
    ) -> Arc<dyn PackageManager>;
}

/// An analyzer instance bound to a project root.
pub trait PackageManager: Send + Sync {
    fn ecosystem(&self) -> &'static str;

    /// Reduce, reorder or regroup claimed files. Must only read the filesystem.
    fn map_definition_files(&self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        files
    }

    /// Resolve the projects declared in a single definition file.
    fn resolve_definition_file(&self, definition_file: &Path) -> Result<Vec<ProjectAnalyzerResult>>;

    /// Resolve all definition files, one after the other.
    fn resolve_dependencies(&self, definition_files: &[PathBuf]) -> Result<ResolutionMap> {
        let mut results = ResolutionMap::new();
        for file in definition_files {
            results.insert(file.clone(), self.resolve_definition_file(file)?);
        }
        Ok(results)
    }
}

impl std::fmt::Debug for dyn PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PackageManager({})", self.ecosystem())
    }
}

impl std::fmt::Debug for dyn AnalyzerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AnalyzerFactory({})", self.ecosystem())
    }
}

/// Every supported ecosystem, in registry order.
pub fn all_factories() -> Vec<Arc<dyn AnalyzerFactory>> {
    vec![
        Arc::new(cargo::CargoFactory),
        Arc::new(npm::NpmFactory),
        Arc::new(pip::PipFactory),
        Arc::new(maven::MavenFactory),
        Arc::new(gradle::GradleFactory),
    ]
}

/// Narrow `factories` to the enabled and not disabled package managers.
/// Names compare case-insensitively; unknown names are an error.
pub fn select_factories(
    factories: Vec<Arc<dyn AnalyzerFactory>>,
    config: &AnalyzerConfig,
) -> Result<Vec<Arc<dyn AnalyzerFactory>>, AnalysisError> {
    let known = |name: &str| {
        factories
            .iter()
            .any(|f| f.ecosystem().eq_ignore_ascii_case(name))
    };

    let requested = config
        .enabled_package_managers
        .iter()
        .flatten()
        .chain(&config.disabled_package_managers);
    for name in requested {
        if !known(name) {
            return Err(AnalysisError::UnknownPackageManager(name.clone()));
        }
    }

    let contains = |names: &[String], ecosystem: &str| {
        names.iter().any(|n| n.eq_ignore_ascii_case(ecosystem))
    };

    Ok(factories
        .into_iter()
        .filter(|f| match &config.enabled_package_managers {
            Some(enabled) => contains(enabled, f.ecosystem()),
            None => true,
        })
        .filter(|f| !contains(&config.disabled_package_managers, f.ecosystem()))
        .collect())
}

/// Path of `file` relative to `root`, with `/` separators.
pub(crate) fn relative_path(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Name of the directory containing `file`, used when a manifest carries no name.
pub(crate) fn directory_name(file: &Path) -> String {
    file.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
