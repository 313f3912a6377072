use std::path::Path;

use anyhow::{bail, Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::curation::PackageCuration;

/// Conventional name of the repository configuration file inside a project root.
pub const REPOSITORY_CONFIG_FILENAME: &str = ".depscope.toml";

/// Number of resolution tasks that may run at the same time.
pub const DEFAULT_MAX_CONCURRENT_RESOLUTIONS: usize = 5;

/// Root of the global configuration file, `~/.config/depscope/config.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

/// Global analyzer settings. The copy recorded in a run has the repository
/// overrides applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Package managers to run, by name. `None` enables every registered one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled_package_managers: Option<Vec<String>>,
    /// Package managers to leave out even if enabled.
    pub disabled_package_managers: Vec<String>,
    /// Skip definition files matching the repository's path excludes.
    pub skip_excluded: bool,
    /// Size of the per-run resolution worker pool.
    pub max_concurrent_resolutions: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            enabled_package_managers: None,
            disabled_package_managers: Vec::new(),
            skip_excluded: false,
            max_concurrent_resolutions: DEFAULT_MAX_CONCURRENT_RESOLUTIONS,
        }
    }
}

impl AnalyzerConfig {
    /// Apply the `[analyzer]` section of a repository configuration.
    pub fn with_repository_overrides(&self, repository: &RepositoryConfig) -> AnalyzerConfig {
        let mut effective = self.clone();
        if let Some(overrides) = &repository.analyzer {
            if let Some(enabled) = &overrides.enabled_package_managers {
                effective.enabled_package_managers = Some(enabled.clone());
            }
            if let Some(disabled) = &overrides.disabled_package_managers {
                effective.disabled_package_managers = disabled.clone();
            }
            if let Some(skip) = overrides.skip_excluded {
                effective.skip_excluded = skip;
            }
        }
        effective
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_resolutions == 0 {
            bail!("max_concurrent_resolutions must be at least 1");
        }
        Ok(())
    }
}

/// Settings that live with the analyzed project in `.depscope.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub excludes: Excludes,
    /// Curations that take precedence over any external curation provider.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub curations: Vec<PackageCuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<RepositoryAnalyzerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryAnalyzerConfig {
    pub enabled_package_managers: Option<Vec<String>>,
    pub disabled_package_managers: Option<Vec<String>>,
    pub skip_excluded: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Excludes {
    pub paths: Vec<PathExclude>,
}

/// A glob pattern, relative to the project root, of paths that are not part
/// of the shipped product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathExclude {
    pub pattern: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

impl Excludes {
    /// Compile all path patterns.
    pub fn matchers(&self) -> Result<Vec<Pattern>> {
        self.paths
            .iter()
            .map(|exclude| {
                Pattern::new(&exclude.pattern)
                    .with_context(|| format!("invalid exclude pattern '{}'", exclude.pattern))
            })
            .collect()
    }
}

/// Load the global configuration, searching in order:
///
/// 1. `config_override`, the path passed via `--config`
/// 2. `~/.config/depscope/config.toml`
/// 3. Built-in [`Config::default`]
pub fn load_config(config_override: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_override {
        return read_config(path);
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".config").join("depscope").join("config.toml");
        if home_config.exists() {
            return read_config(&home_config);
        }
    }

    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    config.analyzer.validate()?;
    debug!(path = %path.display(), "loaded global configuration");
    Ok(config)
}

/// Load the repository configuration for `project_root`.
///
/// Reads `config_file` if given, `<project_root>/.depscope.toml` otherwise.
/// A missing file yields [`RepositoryConfig::default`].
pub fn load_repository_config(
    project_root: &Path,
    config_file: Option<&Path>,
) -> Result<RepositoryConfig> {
    let path = match config_file {
        Some(path) => path.to_path_buf(),
        None => project_root.join(REPOSITORY_CONFIG_FILENAME),
    };

    if !path.is_file() {
        if config_file.is_some() {
            warn!(path = %path.display(), "repository configuration not found, using defaults");
        }
        return Ok(RepositoryConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: RepositoryConfig =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    config.excludes.matchers()?;
    debug!(path = %path.display(), "loaded repository configuration");
    Ok(config)
}
