//! Finding definition files and assigning them to analyzers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::Pattern;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::analyzer::unmanaged::UnmanagedFactory;
use crate::analyzer::{relative_path, AnalyzerFactory, PackageManager};
use crate::config::{AnalyzerConfig, RepositoryConfig};
use crate::error::AnalysisError;

/// Directories holding version-control metadata; never descended into.
const VCS_DIRECTORIES: &[&str] = &[".git", ".hg", ".svn", "CVS", ".repo"];

/// An analyzer and the definition files it will resolve.
#[derive(Debug)]
pub struct ManagedFiles {
    pub analyzer: Arc<dyn PackageManager>,
    pub files: Vec<PathBuf>,
}

/// The outcome of discovery, consumed once by the scheduler.
#[derive(Debug)]
pub struct ManagedFileSet {
    pub entries: Vec<ManagedFiles>,
    /// The directory analyzers are bound to. Equals the project root unless
    /// the root is a single file.
    pub analysis_dir: PathBuf,
    /// Whether a retained file sits directly in `analysis_dir`.
    pub covers_root: bool,
}

impl ManagedFileSet {
    pub fn file_count(&self) -> usize {
        self.entries.iter().map(|e| e.files.len()).sum()
    }

    pub fn needs_fallback(&self) -> bool {
        self.entries.is_empty() || !self.covers_root
    }
}

/// Build the [`ManagedFileSet`] for `root`, which must be absolute and exist.
///
/// With exactly one factory and a file as root, that file is the sole
/// definition file, whatever its name.
pub fn find_managed_files(
    root: &Path,
    factories: &[Arc<dyn AnalyzerFactory>],
    config: &AnalyzerConfig,
    repository: &RepositoryConfig,
) -> Result<ManagedFileSet, AnalysisError> {
    if root.is_file() {
        let [factory] = factories else {
            return Err(AnalysisError::FileRoot {
                path: root.to_path_buf(),
                active: factories.len(),
            });
        };
        let analysis_dir = root.parent().unwrap_or(root).to_path_buf();
        let analyzer = factory.create(&analysis_dir, config, repository);
        debug!(
            file = %root.display(),
            analyzer = analyzer.ecosystem(),
            "analyzing a single definition file"
        );
        return Ok(ManagedFileSet {
            entries: vec![ManagedFiles {
                analyzer,
                files: vec![root.to_path_buf()],
            }],
            analysis_dir,
            covers_root: true,
        });
    }

    let excludes = if config.skip_excluded {
        repository
            .excludes
            .matchers()
            .map_err(|e| AnalysisError::Config(format!("{:#}", e)))?
    } else {
        Vec::new()
    };

    let candidates = collect_files(root, &excludes)?;
    debug!(root = %root.display(), files = candidates.len(), "enumerated project tree");

    let mut entries = Vec::new();
    for factory in factories {
        let claimed = factory.claims(&candidates);
        if claimed.is_empty() {
            continue;
        }

        let analyzer = factory.create(root, config, repository);
        let files = analyzer.map_definition_files(claimed);
        if files.is_empty() {
            debug!(analyzer = factory.ecosystem(), "all claimed files were dropped by mapping");
            continue;
        }

        debug!(analyzer = factory.ecosystem(), files = files.len(), "assigned definition files");
        entries.push(ManagedFiles { analyzer, files });
    }

    let covers_root = entries
        .iter()
        .flat_map(|entry| &entry.files)
        .any(|file| file.parent() == Some(root));

    Ok(ManagedFileSet {
        entries,
        analysis_dir: root.to_path_buf(),
        covers_root,
    })
}

/// Add the unmanaged pseudo-analyzer when nothing was claimed or nothing
/// covers the analysis directory. Returns whether it was added.
pub fn add_unmanaged_fallback(
    set: &mut ManagedFileSet,
    config: &AnalyzerConfig,
    repository: &RepositoryConfig,
) -> bool {
    if !set.needs_fallback() {
        return false;
    }

    let analyzer = UnmanagedFactory.create(&set.analysis_dir, config, repository);
    debug!(root = %set.analysis_dir.display(), "no analyzer covers the project root, adding unmanaged project");
    set.entries.push(ManagedFiles {
        analyzer,
        files: vec![set.analysis_dir.clone()],
    });
    true
}

fn collect_files(root: &Path, excludes: &[Pattern]) -> Result<Vec<PathBuf>, AnalysisError> {
    let is_excluded = |entry: &DirEntry| {
        if excludes.is_empty() || entry.depth() == 0 {
            return false;
        }
        let relative = relative_path(root, entry.path());
        excludes.iter().any(|pattern| pattern.matches(&relative))
    };

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_vcs_directory(entry) && !is_excluded(entry));

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(AnalysisError::Discovery {
                    path: root.to_path_buf(),
                    source: e,
                });
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable path");
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_vcs_directory(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| VCS_DIRECTORIES.contains(&name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::all_factories;
    use crate::config::{Excludes, PathExclude};
    use tempfile::TempDir;

    fn project() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn ecosystems(set: &ManagedFileSet) -> Vec<&'static str> {
        set.entries.iter().map(|e| e.analyzer.ecosystem()).collect()
    }

    #[test]
    fn test_empty_tree_needs_fallback() {
        let (_dir, root) = project();
        write(&root, "README.md", "# nothing to see");

        let mut set = find_managed_files(
            &root,
            &all_factories(),
            &AnalyzerConfig::default(),
            &RepositoryConfig::default(),
        )
        .unwrap();
        assert!(set.entries.is_empty());
        assert!(add_unmanaged_fallback(&mut set, &AnalyzerConfig::default(), &RepositoryConfig::default()));
        assert_eq!(ecosystems(&set), vec!["Unmanaged"]);
        assert_eq!(set.entries[0].files, vec![root.clone()]);
    }

    #[test]
    fn test_root_manifest_covers_root() {
        let (_dir, root) = project();
        write(&root, "Cargo.toml", "[package]\nname = \"app\"\nversion = \"0.1.0\"\n");
        write(&root, "web/client/package.json", r#"{"name": "client", "version": "1.0.0"}"#);

        let mut set = find_managed_files(
            &root,
            &all_factories(),
            &AnalyzerConfig::default(),
            &RepositoryConfig::default(),
        )
        .unwrap();
        assert!(set.covers_root);
        assert_eq!(ecosystems(&set), vec!["Cargo", "NPM"]);
        assert!(!add_unmanaged_fallback(&mut set, &AnalyzerConfig::default(), &RepositoryConfig::default()));
        assert_eq!(set.entries.len(), 2);
    }

    #[test]
    fn test_nested_only_manifests_get_fallback_alongside() {
        let (_dir, root) = project();
        write(&root, "services/api/pom.xml", "<project><artifactId>api</artifactId></project>");

        let mut set = find_managed_files(
            &root,
            &all_factories(),
            &AnalyzerConfig::default(),
            &RepositoryConfig::default(),
        )
        .unwrap();
        assert!(!set.covers_root);
        assert!(add_unmanaged_fallback(&mut set, &AnalyzerConfig::default(), &RepositoryConfig::default()));
        assert_eq!(ecosystems(&set), vec!["Maven", "Unmanaged"]);
    }

    #[test]
    fn test_vcs_metadata_is_skipped() {
        let (_dir, root) = project();
        write(&root, ".git/package.json", "{}");
        write(&root, "package.json", r#"{"name": "a"}"#);

        let set = find_managed_files(
            &root,
            &all_factories(),
            &AnalyzerConfig::default(),
            &RepositoryConfig::default(),
        )
        .unwrap();
        assert_eq!(set.entries[0].files, vec![root.join("package.json")]);
    }

    #[test]
    fn test_excluded_paths_are_skipped_when_enabled() {
        let (_dir, root) = project();
        write(&root, "requirements.txt", "requests==2.31.0\n");
        write(&root, "vendor/lib/requirements.txt", "six==1.16.0\n");

        let repository = RepositoryConfig {
            excludes: Excludes {
                paths: vec![PathExclude {
                    pattern: "vendor/**".to_string(),
                    reason: "OTHER".to_string(),
                    comment: String::new(),
                }],
            },
            ..Default::default()
        };

        let all = find_managed_files(&root, &all_factories(), &AnalyzerConfig::default(), &repository)
            .unwrap();
        assert_eq!(all.file_count(), 2);

        let config = AnalyzerConfig {
            skip_excluded: true,
            ..Default::default()
        };
        let skipped = find_managed_files(&root, &all_factories(), &config, &repository).unwrap();
        assert_eq!(skipped.entries[0].files, vec![root.join("requirements.txt")]);
    }

    #[test]
    fn test_file_claimed_by_several_factories() {
        struct JsonFactory;

        impl AnalyzerFactory for JsonFactory {
            fn ecosystem(&self) -> &'static str {
                "NPM"
            }

            fn definition_file_patterns(&self) -> &'static [&'static str] {
                &["*.json"]
            }

            fn create(
                &self,
                root: &Path,
                _config: &AnalyzerConfig,
                _repository: &RepositoryConfig,
            ) -> Arc<dyn PackageManager> {
                Arc::new(crate::analyzer::npm::NpmAnalyzer::new(root))
            }
        }

        let (_dir, root) = project();
        write(&root, "package.json", "{}");

        let factories: Vec<Arc<dyn AnalyzerFactory>> =
            vec![Arc::new(crate::analyzer::npm::NpmFactory), Arc::new(JsonFactory)];
        let set = find_managed_files(
            &root,
            &factories,
            &AnalyzerConfig::default(),
            &RepositoryConfig::default(),
        )
        .unwrap();
        assert_eq!(set.entries.len(), 2);
        assert!(set.entries.iter().all(|e| e.files == vec![root.join("package.json")]));
    }

    #[test]
    fn test_single_file_mode_ignores_file_name() {
        let (_dir, root) = project();
        write(&root, "deps/prod.lst", "requests==2.31.0\n");
        let file = root.join("deps/prod.lst");

        let factories: Vec<Arc<dyn AnalyzerFactory>> = vec![Arc::new(crate::analyzer::pip::PipFactory)];
        let mut set = find_managed_files(
            &file,
            &factories,
            &AnalyzerConfig::default(),
            &RepositoryConfig::default(),
        )
        .unwrap();
        assert_eq!(set.entries[0].files, vec![file]);
        assert_eq!(set.analysis_dir, root.join("deps"));
        assert!(!add_unmanaged_fallback(&mut set, &AnalyzerConfig::default(), &RepositoryConfig::default()));
    }

    #[test]
    fn test_file_root_with_several_factories_fails() {
        let (_dir, root) = project();
        write(&root, "package.json", "{}");

        let err = find_managed_files(
            &root.join("package.json"),
            &all_factories(),
            &AnalyzerConfig::default(),
            &RepositoryConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::FileRoot { active: 5, .. }));
    }
}
