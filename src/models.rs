use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{AnalyzerConfig, RepositoryConfig};
use crate::environment::Environment;

/// Coordinates of a project or package: `type:namespace:name:version`.
///
/// `kind` is the ecosystem tag. For projects it must equal the name of the
/// analyzer that resolved them.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl Identifier {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn to_coordinates(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.kind, self.namespace, self.name, self.version
        )
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_coordinates())
    }
}

impl std::str::FromStr for Identifier {
    type Err = String;

    /// Parse `type:namespace:name:version`; the version keeps any further colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(4, ':').collect();
        match parts.as_slice() {
            [kind, namespace, name, version] if !kind.is_empty() && !name.is_empty() => {
                Ok(Identifier::new(*kind, *namespace, *name, *version))
            }
            _ => Err(format!(
                "invalid identifier '{}', expected 'type:namespace:name:version'",
                s
            )),
        }
    }
}

impl TryFrom<String> for Identifier {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.to_coordinates()
    }
}

/// A node in a dependency tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageReference {
    pub id: Identifier,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub dependencies: BTreeSet<PackageReference>,
}

impl PackageReference {
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            dependencies: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub dependencies: BTreeSet<PackageReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VcsType {
    Git,
    #[default]
    #[serde(rename = "")]
    Unknown,
}

impl std::fmt::Display for VcsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VcsType::Git => write!(f, "Git"),
            VcsType::Unknown => write!(f, ""),
        }
    }
}

/// Version-control descriptor. The default value means "not under version control".
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VcsInfo {
    #[serde(rename = "type")]
    pub vcs_type: VcsType,
    pub url: String,
    pub revision: String,
    pub path: String,
}

impl VcsInfo {
    pub fn is_empty(&self) -> bool {
        *self == VcsInfo::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Project {
    pub id: Identifier,
    /// Path of the definition file relative to the analyzer root, using `/`.
    pub definition_file_path: String,
    #[serde(default)]
    pub declared_licenses: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub homepage_url: String,
    #[serde(default, skip_serializing_if = "VcsInfo::is_empty")]
    pub vcs: VcsInfo,
    #[serde(default)]
    pub scopes: BTreeSet<Scope>,
}

impl Project {
    pub fn new(id: Identifier, definition_file_path: impl Into<String>) -> Self {
        Self {
            id,
            definition_file_path: definition_file_path.into(),
            declared_licenses: BTreeSet::new(),
            description: String::new(),
            homepage_url: String::new(),
            vcs: VcsInfo::default(),
            scopes: BTreeSet::new(),
        }
    }

    /// Number of distinct identifiers reachable from any scope.
    pub fn dependency_count(&self) -> usize {
        fn collect<'a>(refs: &'a BTreeSet<PackageReference>, seen: &mut BTreeSet<&'a Identifier>) {
            for r in refs {
                if seen.insert(&r.id) {
                    collect(&r.dependencies, seen);
                }
            }
        }

        let mut seen = BTreeSet::new();
        for scope in &self.scopes {
            collect(&scope.dependencies, &mut seen);
        }
        seen.len()
    }

    /// Combine two resolutions of the same project.
    ///
    /// Sets are unioned and for text fields the smallest non-empty value wins,
    /// so the result does not depend on argument order.
    pub fn merge(self, other: Project) -> Project {
        let mut scopes: BTreeMap<String, BTreeSet<PackageReference>> = BTreeMap::new();
        for scope in self.scopes.into_iter().chain(other.scopes) {
            scopes.entry(scope.name).or_default().extend(scope.dependencies);
        }

        Project {
            id: self.id,
            definition_file_path: pick_text(self.definition_file_path, other.definition_file_path),
            declared_licenses: self
                .declared_licenses
                .into_iter()
                .chain(other.declared_licenses)
                .collect(),
            description: pick_text(self.description, other.description),
            homepage_url: pick_text(self.homepage_url, other.homepage_url),
            vcs: pick_vcs(self.vcs, other.vcs),
            scopes: scopes
                .into_iter()
                .map(|(name, dependencies)| Scope { name, dependencies })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Package {
    pub id: Identifier,
    #[serde(default)]
    pub declared_licenses: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concluded_license: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub homepage_url: String,
    #[serde(default, skip_serializing_if = "VcsInfo::is_empty")]
    pub vcs: VcsInfo,
}

impl Package {
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            declared_licenses: BTreeSet::new(),
            concluded_license: None,
            description: String::new(),
            homepage_url: String::new(),
            vcs: VcsInfo::default(),
        }
    }

    /// Combine two sightings of the same package; see [`Project::merge`].
    pub fn merge(self, other: Package) -> Package {
        Package {
            id: self.id,
            declared_licenses: self
                .declared_licenses
                .into_iter()
                .chain(other.declared_licenses)
                .collect(),
            concluded_license: match (self.concluded_license, other.concluded_license) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
            description: pick_text(self.description, other.description),
            homepage_url: pick_text(self.homepage_url, other.homepage_url),
            vcs: pick_vcs(self.vcs, other.vcs),
        }
    }
}

fn pick_text(a: String, b: String) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b,
        (_, true) => a,
        _ => a.min(b),
    }
}

fn pick_vcs(a: VcsInfo, b: VcsInfo) -> VcsInfo {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b,
        (_, true) => a,
        _ => a.min(b),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Hint,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Hint => write!(f, "hint"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Issue {
    pub source: String,
    pub message: String,
    pub severity: Severity,
}

impl Issue {
    pub fn warning(source: &str, message: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

/// One project found in a definition file, with the packages its graph references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAnalyzerResult {
    pub project: Project,
    pub packages: BTreeSet<Package>,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl ProjectAnalyzerResult {
    pub fn new(project: Project) -> Self {
        Self {
            project,
            packages: BTreeSet::new(),
            issues: Vec::new(),
        }
    }
}

/// What an analyzer returns: results per definition file.
pub type ResolutionMap = BTreeMap<PathBuf, Vec<ProjectAnalyzerResult>>;

/// A validated [`ResolutionMap`] tagged with the analyzer that produced it.
#[derive(Debug, Clone)]
pub struct ProjectResolution {
    pub analyzer: String,
    pub results: ResolutionMap,
}

/// A package after curation, with the curations that were applied to it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CuratedPackage {
    pub package: Package,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub curations: BTreeSet<crate::curation::CurationData>,
}

impl CuratedPackage {
    pub fn merge(self, other: CuratedPackage) -> CuratedPackage {
        CuratedPackage {
            package: self.package.merge(other.package),
            curations: self.curations.into_iter().chain(other.curations).collect(),
        }
    }
}

/// The merged outcome of all resolution tasks of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerResult {
    pub projects: BTreeSet<Project>,
    pub packages: BTreeSet<CuratedPackage>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub issues: BTreeMap<Identifier, BTreeSet<Issue>>,
}

impl AnalyzerResult {
    pub fn has_errors(&self) -> bool {
        self.issues
            .values()
            .flatten()
            .any(|issue| issue.severity == Severity::Error)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsContext {
    pub vcs: VcsInfo,
    /// Nested repositories, keyed by path relative to the working-tree root.
    pub nested_repositories: BTreeMap<String, VcsInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    #[serde(flatten)]
    pub context: VcsContext,
    pub config: RepositoryConfig,
}

/// Record of a single analyzer run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerRun {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub environment: Environment,
    pub config: AnalyzerConfig,
    pub result: AnalyzerResult,
}

/// Everything a successful run produces.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub repository: Repository,
    pub analyzer: AnalyzerRun,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_parse() {
        let id: Identifier = "Maven:org.apache:commons-lang3:3.12.0".parse().unwrap();
        assert_eq!(id.kind, "Maven");
        assert_eq!(id.namespace, "org.apache");
        assert_eq!(id.name, "commons-lang3");
        assert_eq!(id.version, "3.12.0");

        let id: Identifier = "NPM::left-pad:1.0.0:extra".parse().unwrap();
        assert_eq!(id.version, "1.0.0:extra");

        assert!("NPM:left-pad".parse::<Identifier>().is_err());
        assert!(":ns:name:1".parse::<Identifier>().is_err());
    }

    #[test]
    fn test_identifier_serializes_as_string() {
        let id = Identifier::new("Crate", "", "serde", "1.0.0");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"Crate::serde:1.0.0\"");
    }

    #[test]
    fn test_package_merge_is_symmetric() {
        let id = Identifier::new("NPM", "", "lodash", "4.17.21");
        let mut a = Package::new(id.clone());
        a.description = "Lodash modular utilities".to_string();
        a.declared_licenses.insert("MIT".to_string());
        let mut b = Package::new(id);
        b.homepage_url = "https://lodash.com".to_string();
        b.declared_licenses.insert("CC0-1.0".to_string());
        b.description = "A utility library".to_string();

        let ab = a.clone().merge(b.clone());
        let ba = b.merge(a);
        assert_eq!(ab, ba);
        assert_eq!(ab.declared_licenses.len(), 2);
        assert_eq!(ab.description, "A utility library");
        assert_eq!(ab.homepage_url, "https://lodash.com");
    }

    #[test]
    fn test_dependency_count_follows_tree() {
        let mut leaf = PackageReference::new(Identifier::new("Crate", "", "itoa", "1.0.0"));
        leaf.dependencies.clear();
        let mut root = PackageReference::new(Identifier::new("Crate", "", "serde_json", "1.0.0"));
        root.dependencies.insert(leaf.clone());

        let mut project = Project::new(Identifier::new("Cargo", "", "app", "0.1.0"), "Cargo.toml");
        project.scopes.insert(Scope {
            name: "dependencies".to_string(),
            dependencies: [root, leaf].into_iter().collect(),
        });
        assert_eq!(project.dependency_count(), 2);
    }
}
