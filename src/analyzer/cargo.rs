use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::{AnalyzerConfig, RepositoryConfig};
use crate::models::{
    Identifier, Issue, Package, PackageReference, Project, ProjectAnalyzerResult, Scope, VcsInfo,
    VcsType,
};

const ECOSYSTEM: &str = "Cargo";
const PACKAGE_TYPE: &str = "Crate";

/// Dependency tables of a manifest and the scope each one maps to.
const SCOPES: &[&str] = &["dependencies", "dev-dependencies", "build-dependencies"];

#[derive(Debug, Deserialize)]
struct CargoManifest {
    package: Option<ManifestPackage>,
    #[serde(default)]
    dependencies: BTreeMap<String, toml::Value>,
    #[serde(default, rename = "dev-dependencies")]
    dev_dependencies: BTreeMap<String, toml::Value>,
    #[serde(default, rename = "build-dependencies")]
    build_dependencies: BTreeMap<String, toml::Value>,
}

impl CargoManifest {
    fn table(&self, scope: &str) -> &BTreeMap<String, toml::Value> {
        match scope {
            "dev-dependencies" => &self.dev_dependencies,
            "build-dependencies" => &self.build_dependencies,
            _ => &self.dependencies,
        }
    }
}

/// Fields may be plain strings or `{ workspace = true }`; only strings are used.
#[derive(Debug, Deserialize)]
struct ManifestPackage {
    name: String,
    version: Option<toml::Value>,
    license: Option<toml::Value>,
    description: Option<toml::Value>,
    homepage: Option<toml::Value>,
    repository: Option<toml::Value>,
}

fn text(value: &Option<toml::Value>) -> String {
    value
        .as_ref()
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Deserialize)]
struct CargoLock {
    #[serde(default)]
    package: Vec<CargoLockPackage>,
}

#[derive(Debug, Clone, Deserialize)]
struct CargoLockPackage {
    name: String,
    version: String,
    /// Packages without a `source` field are local workspace members.
    source: Option<String>,
    /// Entries are `name`, `name version` or `name version (source)`.
    #[serde(default)]
    dependencies: Vec<String>,
}

pub struct CargoFactory;

impl super::AnalyzerFactory for CargoFactory {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    fn definition_file_patterns(&self) -> &'static [&'static str] {
        &["Cargo.toml"]
    }

    fn create(
        &self,
        root: &Path,
        _config: &AnalyzerConfig,
        _repository: &RepositoryConfig,
    ) -> Arc<dyn super::PackageManager> {
        Arc::new(CargoAnalyzer::new(root))
    }
}

/// Analyzer for Rust projects.
///
/// Project metadata comes from `Cargo.toml`; the dependency tree from the
/// nearest `Cargo.lock` at or above the manifest, but not above the root.
pub struct CargoAnalyzer {
    root: PathBuf,
}

impl CargoAnalyzer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn find_lockfile(&self, manifest: &Path) -> Option<PathBuf> {
        manifest
            .parent()?
            .ancestors()
            .take_while(|dir| dir.starts_with(&self.root))
            .map(|dir| dir.join("Cargo.lock"))
            .find(|lock| lock.is_file())
    }
}

impl super::PackageManager for CargoAnalyzer {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    /// Manifests inside build output directories are vendored copies.
    fn map_definition_files(&self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        files
            .into_iter()
            .filter(|file| {
                let relative = file.strip_prefix(&self.root).unwrap_or(file);
                !relative
                    .components()
                    .any(|c| c == Component::Normal("target".as_ref()))
            })
            .collect()
    }

    fn resolve_definition_file(&self, manifest_path: &Path) -> Result<Vec<ProjectAnalyzerResult>> {
        let content = std::fs::read_to_string(manifest_path)
            .with_context(|| format!("failed to read {}", manifest_path.display()))?;
        let manifest: CargoManifest = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", manifest_path.display()))?;

        let definition_file = super::relative_path(&self.root, manifest_path);

        let Some(package) = &manifest.package else {
            // Virtual workspace manifest: members are resolved from their own manifests.
            let id = Identifier::new(ECOSYSTEM, "", super::directory_name(manifest_path), "");
            return Ok(vec![ProjectAnalyzerResult::new(Project::new(id, definition_file))]);
        };

        let version = text(&package.version);
        let mut project = Project::new(
            Identifier::new(ECOSYSTEM, "", package.name.clone(), version.clone()),
            definition_file,
        );
        let license = text(&package.license);
        if !license.is_empty() {
            project.declared_licenses.insert(license);
        }
        project.description = text(&package.description);
        project.homepage_url = text(&package.homepage);
        let repository = text(&package.repository);
        if !repository.is_empty() {
            project.vcs = VcsInfo {
                vcs_type: VcsType::Git,
                url: repository,
                ..Default::default()
            };
        }

        let mut result = match self.find_lockfile(manifest_path) {
            Some(lock_path) => {
                let content = std::fs::read_to_string(&lock_path)
                    .with_context(|| format!("failed to read {}", lock_path.display()))?;
                let lock: CargoLock = toml::from_str(&content)
                    .with_context(|| format!("failed to parse {}", lock_path.display()))?;
                resolve_from_lock(project, &manifest, &package.name, &version, &lock)
            }
            None => {
                let mut result = resolve_declared(project, &manifest);
                result.issues.push(Issue::warning(
                    ECOSYSTEM,
                    format!(
                        "No Cargo.lock found for '{}', dependency versions are unresolved requirements.",
                        manifest_path.display()
                    ),
                ));
                result
            }
        };
        result.project.scopes.retain(|scope| !scope.dependencies.is_empty());

        Ok(vec![result])
    }
}

/// Name of the crate a dependency entry refers to, honoring `package = "..."` renames.
fn crate_name(key: &str, value: &toml::Value) -> String {
    value
        .get("package")
        .and_then(|p| p.as_str())
        .unwrap_or(key)
        .to_string()
}

fn is_path_dependency(value: &toml::Value) -> bool {
    value.get("path").is_some() || value.get("workspace").is_some()
}

fn resolve_declared(mut project: Project, manifest: &CargoManifest) -> ProjectAnalyzerResult {
    let mut packages = BTreeSet::new();

    for scope in SCOPES {
        let mut dependencies = BTreeSet::new();
        for (key, value) in manifest.table(scope) {
            if is_path_dependency(value) {
                continue;
            }
            let requirement = value
                .as_str()
                .or_else(|| value.get("version").and_then(|v| v.as_str()))
                .unwrap_or("*");
            let id = Identifier::new(PACKAGE_TYPE, "", crate_name(key, value), requirement);
            packages.insert(Package::new(id.clone()));
            dependencies.insert(PackageReference::new(id));
        }
        project.scopes.insert(Scope {
            name: scope.to_string(),
            dependencies,
        });
    }

    ProjectAnalyzerResult {
        project,
        packages,
        issues: Vec::new(),
    }
}

/// Builds package references from `Cargo.lock`, sharing subtrees between parents.
struct LockGraph<'a> {
    by_key: HashMap<(&'a str, &'a str), &'a CargoLockPackage>,
    by_name: HashMap<&'a str, Vec<&'a CargoLockPackage>>,
    built: HashMap<(&'a str, &'a str), PackageReference>,
    packages: BTreeMap<Identifier, Package>,
}

impl<'a> LockGraph<'a> {
    fn new(lock: &'a CargoLock) -> Self {
        let mut by_key = HashMap::new();
        let mut by_name: HashMap<&str, Vec<&CargoLockPackage>> = HashMap::new();
        for p in &lock.package {
            by_key.insert((p.name.as_str(), p.version.as_str()), p);
            by_name.entry(p.name.as_str()).or_default().push(p);
        }
        Self {
            by_key,
            by_name,
            built: HashMap::new(),
            packages: BTreeMap::new(),
        }
    }

    fn lookup(&self, spec: &str) -> Option<&'a CargoLockPackage> {
        let mut parts = spec.split_whitespace();
        let name = parts.next()?;
        match parts.next() {
            Some(version) => self.by_key.get(&(name, version)).copied(),
            None => match self.by_name.get(name)?.as_slice() {
                [single] => Some(*single),
                _ => None,
            },
        }
    }

    fn reference(&mut self, entry: &'a CargoLockPackage, stack: &mut HashSet<(&'a str, &'a str)>) -> PackageReference {
        let key = (entry.name.as_str(), entry.version.as_str());
        if let Some(done) = self.built.get(&key) {
            return done.clone();
        }

        let id = Identifier::new(PACKAGE_TYPE, "", entry.name.clone(), entry.version.clone());
        self.packages
            .entry(id.clone())
            .or_insert_with(|| lock_package(entry, id.clone()));

        let mut reference = PackageReference::new(id);
        if !stack.insert(key) {
            // Cycle through dev-dependencies; stop here.
            return reference;
        }
        for spec in &entry.dependencies {
            if let Some(child) = self.lookup(spec) {
                if child.source.is_some() {
                    reference.dependencies.insert(self.reference(child, stack));
                }
            }
        }
        stack.remove(&key);

        self.built.insert(key, reference.clone());
        reference
    }
}

fn lock_package(entry: &CargoLockPackage, id: Identifier) -> Package {
    let mut package = Package::new(id);
    if let Some(git) = entry.source.as_deref().and_then(|s| s.strip_prefix("git+")) {
        let (url, revision) = git.split_once('#').unwrap_or((git, ""));
        let url = url.split('?').next().unwrap_or(url);
        package.vcs = VcsInfo {
            vcs_type: VcsType::Git,
            url: url.to_string(),
            revision: revision.to_string(),
            path: String::new(),
        };
    }
    package
}

fn resolve_from_lock(
    mut project: Project,
    manifest: &CargoManifest,
    name: &str,
    version: &str,
    lock: &CargoLock,
) -> ProjectAnalyzerResult {
    let mut graph = LockGraph::new(lock);

    // The project itself is a source-less entry; an inherited version may be unknown here.
    let own_entry = lock
        .package
        .iter()
        .find(|p| p.name == name && p.source.is_none() && (version.is_empty() || p.version == version));

    let direct: Vec<&CargoLockPackage> = own_entry
        .map(|entry| {
            entry
                .dependencies
                .iter()
                .filter_map(|spec| graph.lookup(spec))
                .filter(|child| child.source.is_some())
                .collect()
        })
        .unwrap_or_default();

    if project.id.version.is_empty() {
        if let Some(entry) = own_entry {
            project.id.version = entry.version.clone();
        }
    }

    for scope in SCOPES {
        let declared: HashSet<String> = manifest
            .table(scope)
            .iter()
            .map(|(key, value)| crate_name(key, value))
            .collect();

        let mut dependencies = BTreeSet::new();
        for entry in direct.iter().filter(|e| declared.contains(&e.name)) {
            let mut stack = HashSet::new();
            dependencies.insert(graph.reference(entry, &mut stack));
        }
        project.scopes.insert(Scope {
            name: scope.to_string(),
            dependencies,
        });
    }

    ProjectAnalyzerResult {
        project,
        packages: graph.packages.into_values().collect(),
        issues: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::PackageManager;
    use tempfile::TempDir;

    const LOCK: &str = r#"
version = 3

[[package]]
name = "my-app"
version = "0.1.0"
dependencies = [
 "serde",
 "serde_json",
 "tempfile",
]

[[package]]
name = "serde"
version = "1.0.150"
source = "registry+https://github.com/rust-lang/crates.io-index"
checksum = "abc123"

[[package]]
name = "serde_json"
version = "1.0.90"
source = "registry+https://github.com/rust-lang/crates.io-index"
dependencies = [
 "itoa",
 "serde",
]

[[package]]
name = "itoa"
version = "1.0.5"
source = "git+https://github.com/dtolnay/itoa?branch=master#0123abcd"

[[package]]
name = "tempfile"
version = "3.3.0"
source = "registry+https://github.com/rust-lang/crates.io-index"
"#;

    const MANIFEST: &str = r#"
[package]
name = "my-app"
version = "0.1.0"
license = "MIT"
description = "An app"

[dependencies]
serde = "1"
json = { package = "serde_json", version = "1" }

[dev-dependencies]
tempfile = "3"
"#;

    #[test]
    fn test_parse_cargo_lock() {
        let lock: CargoLock = toml::from_str(LOCK).unwrap();
        let external: Vec<_> = lock.package.iter().filter(|p| p.source.is_some()).collect();
        assert_eq!(external.len(), 4);
        assert_eq!(external[0].name, "serde");
    }

    #[test]
    fn test_resolve_with_lockfile() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), MANIFEST).unwrap();
        std::fs::write(dir.path().join("Cargo.lock"), LOCK).unwrap();

        let analyzer = CargoAnalyzer::new(dir.path());
        let results = analyzer
            .resolve_definition_file(&dir.path().join("Cargo.toml"))
            .unwrap();
        assert_eq!(results.len(), 1);

        let result = &results[0];
        assert_eq!(result.project.id.to_coordinates(), "Cargo::my-app:0.1.0");
        assert_eq!(result.project.definition_file_path, "Cargo.toml");
        assert!(result.project.declared_licenses.contains("MIT"));
        assert_eq!(result.packages.len(), 4);
        assert!(result.issues.is_empty());

        let scopes: Vec<&str> = result.project.scopes.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(scopes, vec!["dependencies", "dev-dependencies"]);

        let deps = &result
            .project
            .scopes
            .iter()
            .find(|s| s.name == "dependencies")
            .unwrap()
            .dependencies;
        let json = deps.iter().find(|r| r.id.name == "serde_json").unwrap();
        assert_eq!(json.dependencies.len(), 2);

        let itoa = result.packages.iter().find(|p| p.id.name == "itoa").unwrap();
        assert_eq!(itoa.vcs.url, "https://github.com/dtolnay/itoa");
        assert_eq!(itoa.vcs.revision, "0123abcd");
    }

    #[test]
    fn test_resolve_without_lockfile_warns() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), MANIFEST).unwrap();

        let analyzer = CargoAnalyzer::new(dir.path());
        let results = analyzer
            .resolve_definition_file(&dir.path().join("Cargo.toml"))
            .unwrap();
        let result = &results[0];
        assert_eq!(result.issues.len(), 1);
        assert!(result
            .packages
            .iter()
            .any(|p| p.id.to_coordinates() == "Crate::serde_json:1"));
    }

    #[test]
    fn test_virtual_manifest_and_target_filter() {
        let dir = TempDir::new().unwrap();
        let ws = dir.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join("Cargo.toml"), "[workspace]\nmembers = [\"a\"]\n").unwrap();

        let analyzer = CargoAnalyzer::new(dir.path());
        let results = analyzer.resolve_definition_file(&ws.join("Cargo.toml")).unwrap();
        assert_eq!(results[0].project.id.to_coordinates(), "Cargo::ws:");

        let mapped = analyzer.map_definition_files(vec![
            ws.join("Cargo.toml"),
            dir.path().join("target/package/x/Cargo.toml"),
        ]);
        assert_eq!(mapped, vec![ws.join("Cargo.toml")]);
    }

    #[test]
    fn test_malformed_manifest_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package\nname=").unwrap();
        let analyzer = CargoAnalyzer::new(dir.path());
        assert!(analyzer
            .resolve_definition_file(&dir.path().join("Cargo.toml"))
            .is_err());
    }
}
