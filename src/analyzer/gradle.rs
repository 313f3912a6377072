use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::{AnalyzerConfig, RepositoryConfig};
use crate::models::{
    Identifier, Package, PackageReference, Project, ProjectAnalyzerResult, Scope,
};

const ECOSYSTEM: &str = "Gradle";
const PACKAGE_TYPE: &str = "Maven";

pub struct GradleFactory;

impl super::AnalyzerFactory for GradleFactory {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    fn definition_file_patterns(&self) -> &'static [&'static str] {
        &["build.gradle", "build.gradle.kts"]
    }

    fn create(
        &self,
        root: &Path,
        _config: &AnalyzerConfig,
        _repository: &RepositoryConfig,
    ) -> Arc<dyn super::PackageManager> {
        Arc::new(GradleAnalyzer::new(root))
    }
}

/// Analyzer for Gradle builds (Groovy or Kotlin DSL).
///
/// Dependency notations are read from the build script with regexes; a
/// sibling `gradle.lockfile` overrides the declared versions.
pub struct GradleAnalyzer {
    root: PathBuf,
}

impl GradleAnalyzer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl super::PackageManager for GradleAnalyzer {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    /// One build script per directory; the Kotlin DSL wins if both exist.
    fn map_definition_files(&self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut by_dir: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
        for file in files {
            let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
            let is_kts = file.extension().is_some_and(|ext| ext == "kts");
            let keep_existing = by_dir.get(&dir).is_some_and(|existing| {
                !is_kts || existing.extension().is_some_and(|ext| ext == "kts")
            });
            if !keep_existing {
                by_dir.insert(dir, file);
            }
        }
        by_dir.into_values().collect()
    }

    fn resolve_definition_file(&self, definition_file: &Path) -> Result<Vec<ProjectAnalyzerResult>> {
        let declared = parse_build_gradle(definition_file)?;

        let lockfile = definition_file
            .parent()
            .unwrap_or(&self.root)
            .join("gradle.lockfile");
        let locked = if lockfile.is_file() {
            parse_gradle_lockfile(&lockfile)?
        } else {
            Vec::new()
        };

        let project = Project::new(
            Identifier::new(ECOSYSTEM, "", super::directory_name(definition_file), ""),
            super::relative_path(&self.root, definition_file),
        );
        Ok(vec![build_result(project, declared, locked)])
    }
}

/// `group:artifact:version` declared under a configuration such as `implementation`.
#[derive(Debug, Clone, PartialEq)]
struct GradleDependency {
    configuration: String,
    group: String,
    artifact: String,
    version: String,
}

/// Parse `build.gradle` or `build.gradle.kts` with regex.
fn parse_build_gradle(path: &Path) -> Result<Vec<GradleDependency>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut deps = Vec::new();

    // Matches: implementation 'group:artifact:version'
    //          implementation("group:artifact:version")
    let re_shorthand = Regex::new(
        r#"(implementation|api|compileOnly|runtimeOnly|testImplementation)\s*\(?\s*['"]([^'":]+):([^'":]+):([^'"]+)['"]"#,
    )?;

    for caps in re_shorthand.captures_iter(&content) {
        deps.push(GradleDependency {
            configuration: caps[1].to_string(),
            group: caps[2].to_string(),
            artifact: caps[3].to_string(),
            version: caps[4].to_string(),
        });
    }

    // Matches: implementation group: 'com.example', name: 'foo', version: '1.0'
    let re_map = Regex::new(
        r#"(implementation|api|compileOnly|runtimeOnly|testImplementation)\s+group:\s*['"]([^'"]+)['"]\s*,\s*name:\s*['"]([^'"]+)['"]\s*,\s*version:\s*['"]([^'"]+)['"]"#,
    )?;

    for caps in re_map.captures_iter(&content) {
        deps.push(GradleDependency {
            configuration: caps[1].to_string(),
            group: caps[2].to_string(),
            artifact: caps[3].to_string(),
            version: caps[4].to_string(),
        });
    }

    Ok(deps)
}

/// Parse `gradle.lockfile`, lines of `group:artifact:version=configurations`
fn parse_gradle_lockfile(path: &Path) -> Result<Vec<(String, String, String)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let re = Regex::new(r"^([^:]+):([^:]+):([^=\s]+)")?;
    let mut locked = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("empty=") {
            continue;
        }
        if let Some(caps) = re.captures(line) {
            locked.push((caps[1].to_string(), caps[2].to_string(), caps[3].to_string()));
        }
    }

    Ok(locked)
}

fn build_result(
    mut project: Project,
    declared: Vec<GradleDependency>,
    locked: Vec<(String, String, String)>,
) -> ProjectAnalyzerResult {
    let pinned: HashMap<(String, String), String> = locked
        .into_iter()
        .map(|(group, artifact, version)| ((group, artifact), version))
        .collect();

    let mut packages = BTreeSet::new();
    let mut scopes: BTreeMap<String, BTreeSet<PackageReference>> = BTreeMap::new();

    for dep in declared {
        let version = pinned
            .get(&(dep.group.clone(), dep.artifact.clone()))
            .cloned()
            .unwrap_or(dep.version);
        let id = Identifier::new(PACKAGE_TYPE, dep.group, dep.artifact, version);
        packages.insert(Package::new(id.clone()));
        scopes
            .entry(dep.configuration)
            .or_default()
            .insert(PackageReference::new(id));
    }

    project.scopes = scopes
        .into_iter()
        .map(|(name, dependencies)| Scope { name, dependencies })
        .collect();

    ProjectAnalyzerResult {
        project,
        packages,
        issues: Vec::new(),
    }
}
