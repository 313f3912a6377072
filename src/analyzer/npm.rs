use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;

use crate::config::{AnalyzerConfig, RepositoryConfig};
use crate::models::{
    Identifier, Issue, Package, PackageReference, Project, ProjectAnalyzerResult, Scope, VcsInfo,
    VcsType,
};

const ECOSYSTEM: &str = "NPM";

const SCOPES: &[&str] = &["dependencies", "devDependencies", "optionalDependencies"];

pub struct NpmFactory;

impl super::AnalyzerFactory for NpmFactory {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    fn definition_file_patterns(&self) -> &'static [&'static str] {
        &["package.json"]
    }

    fn create(
        &self,
        root: &Path,
        _config: &AnalyzerConfig,
        _repository: &RepositoryConfig,
    ) -> Arc<dyn super::PackageManager> {
        Arc::new(NpmAnalyzer::new(root))
    }
}

/// Analyzer for Node projects.
///
/// Reads `package.json` and pins versions from, in priority order,
/// `package-lock.json` (v2/v3, full tree), `yarn.lock` (direct dependencies)
/// or, failing both, the declared version ranges.
pub struct NpmAnalyzer {
    root: PathBuf,
}

impl NpmAnalyzer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl super::PackageManager for NpmAnalyzer {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    /// Installed packages are not projects.
    fn map_definition_files(&self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        files
            .into_iter()
            .filter(|file| {
                let relative = file.strip_prefix(&self.root).unwrap_or(file);
                !relative
                    .components()
                    .any(|c| c == Component::Normal("node_modules".as_ref()))
            })
            .collect()
    }

    fn resolve_definition_file(&self, definition_file: &Path) -> Result<Vec<ProjectAnalyzerResult>> {
        let content = std::fs::read_to_string(definition_file)
            .with_context(|| format!("failed to read {}", definition_file.display()))?;
        let json: Value = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", definition_file.display()))?;

        let project = project_from_package_json(&json, definition_file, &self.root);
        let declared = declared_dependencies(&json);
        let dir = definition_file.parent().unwrap_or(&self.root);

        let lock = dir.join("package-lock.json");
        let yarn = dir.join("yarn.lock");

        let result = if lock.is_file() {
            let content = std::fs::read_to_string(&lock)
                .with_context(|| format!("failed to read {}", lock.display()))?;
            let lock_json: Value = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", lock.display()))?;
            resolve_from_package_lock(project, &declared, &lock_json, dir)
        } else if yarn.is_file() {
            let pinned = parse_yarn_lock(&yarn)?;
            resolve_pinned(project, &declared, &pinned)
        } else {
            let mut result = resolve_pinned(project, &declared, &HashMap::new());
            if !declared.values().all(BTreeMap::is_empty) {
                result.issues.push(Issue::warning(
                    ECOSYSTEM,
                    format!(
                        "No lockfile found next to '{}', dependency versions are declared ranges.",
                        definition_file.display()
                    ),
                ));
            }
            result
        };

        Ok(vec![result])
    }
}

/// `@scope/name` → (`@scope`, `name`).
fn split_name(full: &str) -> (String, String) {
    match full.strip_prefix('@').and_then(|rest| rest.split_once('/')) {
        Some((scope, name)) => (format!("@{}", scope), name.to_string()),
        None => (String::new(), full.to_string()),
    }
}

fn package_id(full_name: &str, version: &str) -> Identifier {
    let (namespace, name) = split_name(full_name);
    Identifier::new(ECOSYSTEM, namespace, name, version)
}

/// `license` is either a string or a legacy `{ "type": ... }` object.
fn license_of(json: &Value) -> Option<String> {
    let license = json.get("license")?;
    license
        .as_str()
        .or_else(|| license.get("type").and_then(|t| t.as_str()))
        .map(str::to_string)
}

fn vcs_of(json: &Value) -> VcsInfo {
    let url = json.get("repository").and_then(|r| {
        r.as_str()
            .or_else(|| r.get("url").and_then(|u| u.as_str()))
    });
    match url {
        Some(url) => VcsInfo {
            vcs_type: VcsType::Git,
            url: url.trim_start_matches("git+").to_string(),
            ..Default::default()
        },
        None => VcsInfo::default(),
    }
}

fn str_field(json: &Value, key: &str) -> String {
    json.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn project_from_package_json(json: &Value, definition_file: &Path, root: &Path) -> Project {
    let full_name = json
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| super::directory_name(definition_file));
    let version = str_field(json, "version");

    let mut project = Project::new(
        package_id(&full_name, &version),
        super::relative_path(root, definition_file),
    );
    project.declared_licenses.extend(license_of(json));
    project.description = str_field(json, "description");
    project.homepage_url = str_field(json, "homepage");
    project.vcs = vcs_of(json);
    project
}

/// Declared dependencies per scope: name → version range.
fn declared_dependencies(json: &Value) -> BTreeMap<&'static str, BTreeMap<String, String>> {
    SCOPES
        .iter()
        .map(|scope| {
            let deps: BTreeMap<String, String> = json
                .get(*scope)
                .and_then(|v| v.as_object())
                .map(|pkgs| {
                    pkgs.iter()
                        .map(|(name, range)| {
                            (name.clone(), range.as_str().unwrap_or("*").to_string())
                        })
                        .collect()
                })
                .unwrap_or_default();
            (*scope, deps)
        })
        .collect()
}

fn insert_scopes(
    project: &mut Project,
    scopes: BTreeMap<&'static str, BTreeSet<PackageReference>>,
) {
    for (name, dependencies) in scopes {
        if !dependencies.is_empty() {
            project.scopes.insert(Scope {
                name: name.to_string(),
                dependencies,
            });
        }
    }
}

/// Direct dependencies only, using `pinned` versions where known and the
/// declared range otherwise.
fn resolve_pinned(
    mut project: Project,
    declared: &BTreeMap<&'static str, BTreeMap<String, String>>,
    pinned: &HashMap<String, String>,
) -> ProjectAnalyzerResult {
    let mut packages = BTreeSet::new();
    let mut scopes = BTreeMap::new();

    for (scope, deps) in declared {
        let refs: BTreeSet<PackageReference> = deps
            .iter()
            .map(|(name, range)| {
                let version = pinned
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| strip_range(range));
                let id = package_id(name, &version);
                packages.insert(Package::new(id.clone()));
                PackageReference::new(id)
            })
            .collect();
        scopes.insert(*scope, refs);
    }
    insert_scopes(&mut project, scopes);

    ProjectAnalyzerResult {
        project,
        packages,
        issues: Vec::new(),
    }
}

fn strip_range(range: &str) -> String {
    range
        .trim_start_matches(|c: char| !c.is_ascii_digit() && c != '*')
        .to_string()
}

/// Walks the `packages` map of a v2/v3 lockfile the way Node resolves modules:
/// nearest `node_modules` first, then each enclosing one.
struct LockTree<'a> {
    packages: &'a serde_json::Map<String, Value>,
    project_dir: &'a Path,
    built: HashMap<String, PackageReference>,
    found: BTreeMap<Identifier, Package>,
}

impl<'a> LockTree<'a> {
    fn locate(&self, from: &str, name: &str) -> Option<String> {
        let mut base = from.to_string();
        loop {
            let candidate = if base.is_empty() {
                format!("node_modules/{}", name)
            } else {
                format!("{}/node_modules/{}", base, name)
            };
            if self.packages.contains_key(&candidate) {
                return Some(candidate);
            }
            if base.is_empty() {
                return None;
            }
            base = match base.rfind("/node_modules/") {
                Some(idx) => base[..idx].to_string(),
                None => String::new(),
            };
        }
    }

    fn reference(&mut self, location: &str, stack: &mut HashSet<String>) -> Option<PackageReference> {
        if let Some(done) = self.built.get(location) {
            return Some(done.clone());
        }
        let packages = self.packages;
        let info = packages.get(location)?;
        if info.get("link").and_then(Value::as_bool).unwrap_or(false) {
            return None;
        }

        let full_name = info
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| package_name_from_location(location));
        let version = info
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or("*")
            .to_string();
        let id = package_id(&full_name, &version);

        if !self.found.contains_key(&id) {
            let mut package = Package::new(id.clone());
            let license = license_of(info).or_else(|| {
                read_license_from_package_json(&self.project_dir.join(location).join("package.json"))
            });
            package.declared_licenses.extend(license);
            if let Some(resolved) = info.get("resolved").and_then(|v| v.as_str()) {
                if resolved.starts_with("git") {
                    package.vcs = VcsInfo {
                        vcs_type: VcsType::Git,
                        url: resolved.trim_start_matches("git+").to_string(),
                        ..Default::default()
                    };
                }
            }
            self.found.insert(id.clone(), package);
        }

        let mut reference = PackageReference::new(id);
        if !stack.insert(location.to_string()) {
            return Some(reference);
        }
        let children: Vec<String> = ["dependencies", "optionalDependencies"]
            .iter()
            .filter_map(|key| info.get(*key).and_then(|v| v.as_object()))
            .flat_map(|deps| deps.keys().cloned())
            .collect();
        for child in children {
            if let Some(child_location) = self.locate(location, &child) {
                if let Some(child_ref) = self.reference(&child_location, stack) {
                    reference.dependencies.insert(child_ref);
                }
            }
        }
        stack.remove(location);

        self.built.insert(location.to_string(), reference.clone());
        Some(reference)
    }
}

/// `node_modules/a/node_modules/@s/b` → `@s/b`.
fn package_name_from_location(location: &str) -> String {
    location
        .rsplit_once("node_modules/")
        .map(|(_, name)| name)
        .unwrap_or(location)
        .to_string()
}

fn resolve_from_package_lock(
    mut project: Project,
    declared: &BTreeMap<&'static str, BTreeMap<String, String>>,
    lock: &Value,
    project_dir: &Path,
) -> ProjectAnalyzerResult {
    let empty = serde_json::Map::new();
    let packages = lock
        .get("packages")
        .and_then(|v| v.as_object())
        .unwrap_or(&empty);

    let mut tree = LockTree {
        packages,
        project_dir,
        built: HashMap::new(),
        found: BTreeMap::new(),
    };
    let mut issues = Vec::new();
    let mut scopes = BTreeMap::new();

    for (scope, deps) in declared {
        let mut refs = BTreeSet::new();
        for name in deps.keys() {
            let resolved = tree
                .locate("", name)
                .and_then(|location| tree.reference(&location, &mut HashSet::new()));
            match resolved {
                Some(reference) => {
                    refs.insert(reference);
                }
                None => issues.push(Issue::warning(
                    ECOSYSTEM,
                    format!("'{}' is declared in {} but missing from package-lock.json.", name, scope),
                )),
            }
        }
        scopes.insert(*scope, refs);
    }
    insert_scopes(&mut project, scopes);

    ProjectAnalyzerResult {
        project,
        packages: tree.found.into_values().collect(),
        issues,
    }
}

fn read_license_from_package_json(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let json: Value = serde_json::from_str(&content).ok()?;
    license_of(&json)
}

/// Parse `yarn.lock` into name → pinned version (first entry wins).
fn parse_yarn_lock(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut pinned = HashMap::new();
    let mut lines = content.lines().peekable();

    // Header like: "foo@^1.0.0:" or "@scope/foo@^1.0.0, @scope/foo@^1.1.0:"
    let header_re = Regex::new(r#"^"?(@?[^@"]+)@[^:"]+"?:$"#)?;
    let version_re = Regex::new(r#"^\s+version:?\s+"?([^"\s]+)"?"#)?;

    while let Some(line) = lines.next() {
        if line.is_empty() || line.starts_with('#') || line.starts_with(' ') || line.starts_with('\t') {
            continue;
        }

        let trimmed = line.trim_end_matches(':').trim_matches('"');
        let first_spec = trimmed.split(", ").next().unwrap_or(trimmed);

        if let Some(caps) = header_re.captures(&format!("{}:", first_spec.trim_end_matches(':'))) {
            let name = caps[1].to_string();
            while let Some(next) = lines.peek() {
                if next.is_empty() {
                    break;
                }
                if let Some(vcaps) = version_re.captures(next) {
                    pinned.entry(name.clone()).or_insert_with(|| vcaps[1].to_string());
                    lines.next();
                    break;
                }
                lines.next();
            }
        }
    }

    Ok(pinned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::PackageManager;
    use tempfile::TempDir;

    const PACKAGE_JSON: &str = r#"{
  "name": "@acme/my-app",
  "version": "1.0.0",
  "license": "Apache-2.0",
  "repository": { "type": "git", "url": "git+https://github.com/acme/my-app.git" },
  "dependencies": {
    "express": "^4.18.2",
    "lodash": "^4.17.21"
  },
  "devDependencies": {
    "jest": "^29.0.0"
  }
}"#;

    const PACKAGE_LOCK: &str = r#"{
  "name": "@acme/my-app",
  "lockfileVersion": 3,
  "packages": {
    "": { "name": "@acme/my-app", "version": "1.0.0" },
    "node_modules/express": {
      "version": "4.18.2",
      "license": "MIT",
      "dependencies": { "debug": "2.6.9" }
    },
    "node_modules/express/node_modules/debug": {
      "version": "2.6.9",
      "license": "MIT",
      "dependencies": { "ms": "2.0.0" }
    },
    "node_modules/ms": { "version": "2.0.0", "license": "MIT" },
    "node_modules/lodash": { "version": "4.17.21", "license": "MIT" }
  }
}"#;

    #[test]
    fn test_resolve_with_package_lock() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), PACKAGE_JSON).unwrap();
        std::fs::write(dir.path().join("package-lock.json"), PACKAGE_LOCK).unwrap();

        let analyzer = NpmAnalyzer::new(dir.path());
        let results = analyzer
            .resolve_definition_file(&dir.path().join("package.json"))
            .unwrap();
        let result = &results[0];

        assert_eq!(result.project.id.to_coordinates(), "NPM:@acme:my-app:1.0.0");
        assert_eq!(result.project.vcs.url, "https://github.com/acme/my-app.git");
        assert_eq!(result.packages.len(), 4);
        // jest is declared but not locked
        assert_eq!(result.issues.len(), 1);

        let deps = &result.project.scopes.iter().next().unwrap().dependencies;
        let express = deps.iter().find(|r| r.id.name == "express").unwrap();
        let debug = express.dependencies.iter().next().unwrap();
        assert_eq!(debug.id.version, "2.6.9");
        assert_eq!(debug.dependencies.iter().next().unwrap().id.name, "ms");
    }

    #[test]
    fn test_resolve_without_lockfile() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), PACKAGE_JSON).unwrap();

        let analyzer = NpmAnalyzer::new(dir.path());
        let results = analyzer
            .resolve_definition_file(&dir.path().join("package.json"))
            .unwrap();
        let result = &results[0];
        assert_eq!(result.packages.len(), 3);
        assert!(result
            .packages
            .iter()
            .any(|p| p.id.to_coordinates() == "NPM::express:4.18.2"));
        assert_eq!(result.issues.len(), 1);
        let scopes: Vec<&str> = result.project.scopes.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(scopes, vec!["dependencies", "devDependencies"]);
    }

    #[test]
    fn test_parse_yarn_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("yarn.lock");
        std::fs::write(
            &path,
            r#"# yarn lockfile v1

"@babel/core@^7.0.0", "@babel/core@^7.1.0":
  version "7.20.5"
  resolved "https://registry.yarnpkg.com/@babel/core/-/core-7.20.5.tgz"

lodash@^4.17.21:
  version "4.17.21"
"#,
        )
        .unwrap();

        let pinned = parse_yarn_lock(&path).unwrap();
        assert_eq!(pinned.get("@babel/core").map(String::as_str), Some("7.20.5"));
        assert_eq!(pinned.get("lodash").map(String::as_str), Some("4.17.21"));
    }

    #[test]
    fn test_node_modules_manifests_are_dropped() {
        let analyzer = NpmAnalyzer::new(Path::new("/p"));
        let mapped = analyzer.map_definition_files(vec![
            PathBuf::from("/p/package.json"),
            PathBuf::from("/p/node_modules/lodash/package.json"),
        ]);
        assert_eq!(mapped, vec![PathBuf::from("/p/package.json")]);
    }
}
