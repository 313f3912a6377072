use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::config::{AnalyzerConfig, RepositoryConfig};
use crate::models::{
    Identifier, Issue, Package, PackageReference, Project, ProjectAnalyzerResult, Scope, VcsInfo,
    VcsType,
};

const ECOSYSTEM: &str = "Maven";

pub struct MavenFactory;

impl super::AnalyzerFactory for MavenFactory {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    fn definition_file_patterns(&self) -> &'static [&'static str] {
        &["pom.xml"]
    }

    fn create(
        &self,
        root: &Path,
        _config: &AnalyzerConfig,
        _repository: &RepositoryConfig,
    ) -> Arc<dyn super::PackageManager> {
        Arc::new(MavenAnalyzer::new(root))
    }
}

/// Analyzer for Maven projects.
///
/// Reads the project coordinates and the direct `<dependencies>` of a
/// `pom.xml`. Dependencies in `<dependencyManagement>`, plugins and profiles
/// are not part of the project's graph.
pub struct MavenAnalyzer {
    root: PathBuf,
}

impl MavenAnalyzer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl super::PackageManager for MavenAnalyzer {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    fn resolve_definition_file(&self, definition_file: &Path) -> Result<Vec<ProjectAnalyzerResult>> {
        let pom = parse_pom_xml(definition_file)?;
        Ok(vec![pom.into_result(super::relative_path(&self.root, definition_file))])
    }
}

#[derive(Debug, Default)]
struct PomDependency {
    group_id: String,
    artifact_id: String,
    version: String,
    scope: String,
}

#[derive(Debug, Default)]
struct Pom {
    group_id: String,
    artifact_id: String,
    version: String,
    parent_group_id: String,
    parent_version: String,
    name: String,
    description: String,
    url: String,
    scm_url: String,
    licenses: Vec<String>,
    properties: HashMap<String, String>,
    dependencies: Vec<PomDependency>,
}

impl Pom {
    /// Replace `${...}` references to properties and project coordinates.
    fn interpolate(&self, value: &str) -> String {
        let mut result = value.to_string();
        // Bounded so self-referencing properties cannot loop forever.
        for _ in 0..16 {
            let Some(start) = result.find("${") else {
                break;
            };
            let Some(len) = result[start..].find('}') else {
                break;
            };
            let key = &result[start + 2..start + len];
            let replacement = match key {
                "project.version" | "pom.version" => self.effective_version(),
                "project.groupId" | "pom.groupId" => self.effective_group_id(),
                _ => match self.properties.get(key) {
                    Some(v) => v.clone(),
                    None => break,
                },
            };
            result.replace_range(start..start + len + 1, &replacement);
        }
        result
    }

    fn effective_group_id(&self) -> String {
        if self.group_id.is_empty() {
            self.parent_group_id.clone()
        } else {
            self.group_id.clone()
        }
    }

    fn effective_version(&self) -> String {
        if self.version.is_empty() {
            self.parent_version.clone()
        } else {
            self.version.clone()
        }
    }

    fn into_result(self, definition_file: String) -> ProjectAnalyzerResult {
        let id = Identifier::new(
            ECOSYSTEM,
            self.interpolate(&self.effective_group_id()),
            self.artifact_id.clone(),
            self.interpolate(&self.effective_version()),
        );
        let mut project = Project::new(id, definition_file);
        project.declared_licenses.extend(self.licenses.iter().cloned());
        project.description = if self.description.is_empty() {
            self.name.clone()
        } else {
            self.description.clone()
        };
        project.homepage_url = self.url.clone();
        if !self.scm_url.is_empty() {
            project.vcs = VcsInfo {
                vcs_type: VcsType::Git,
                url: self.scm_url.trim_start_matches("scm:git:").to_string(),
                ..Default::default()
            };
        }

        let mut packages = BTreeSet::new();
        let mut scopes: BTreeMap<String, BTreeSet<PackageReference>> = BTreeMap::new();
        let mut unversioned = Vec::new();

        for dep in &self.dependencies {
            let version = self.interpolate(&dep.version);
            if version.is_empty() {
                unversioned.push(format!("{}:{}", dep.group_id, dep.artifact_id));
            }
            let id = Identifier::new(
                ECOSYSTEM,
                self.interpolate(&dep.group_id),
                dep.artifact_id.clone(),
                version,
            );
            let scope = if dep.scope.is_empty() {
                "compile".to_string()
            } else {
                dep.scope.clone()
            };
            packages.insert(Package::new(id.clone()));
            scopes
                .entry(scope)
                .or_default()
                .insert(PackageReference::new(id));
        }

        project.scopes = scopes
            .into_iter()
            .map(|(name, dependencies)| Scope { name, dependencies })
            .collect();

        let mut issues = Vec::new();
        if !unversioned.is_empty() {
            issues.push(Issue::warning(
                ECOSYSTEM,
                format!(
                    "Dependencies without a version (managed by a parent POM?): {}.",
                    unversioned.join(", ")
                ),
            ));
        }

        ProjectAnalyzerResult {
            project,
            packages,
            issues,
        }
    }
}

/// Parse `pom.xml` using quick-xml event API.
fn parse_pom_xml(path: &Path) -> Result<Pom> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    let mut pom = Pom::default();
    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<PomDependency> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                stack.push(name);
                if stack == ["project", "dependencies", "dependency"] {
                    current = Some(PomDependency::default());
                }
            }
            Ok(Event::End(_)) => {
                if stack == ["project", "dependencies", "dependency"] {
                    if let Some(dep) = current.take() {
                        if !dep.artifact_id.is_empty() {
                            pom.dependencies.push(dep);
                        }
                    }
                }
                stack.pop();
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().into_owned();
                let location: Vec<&str> = stack.iter().map(String::as_str).collect();
                match location.as_slice() {
                    ["project", "groupId"] => pom.group_id = text,
                    ["project", "artifactId"] => pom.artifact_id = text,
                    ["project", "version"] => pom.version = text,
                    ["project", "name"] => pom.name = text,
                    ["project", "description"] => pom.description = text,
                    ["project", "url"] => pom.url = text,
                    ["project", "parent", "groupId"] => pom.parent_group_id = text,
                    ["project", "parent", "version"] => pom.parent_version = text,
                    ["project", "scm", "connection"] => pom.scm_url = text,
                    ["project", "licenses", "license", "name"] => pom.licenses.push(text),
                    ["project", "properties", key] => {
                        pom.properties.insert(key.to_string(), text);
                    }
                    ["project", "dependencies", "dependency", field] => {
                        if let Some(dep) = current.as_mut() {
                            match *field {
                                "groupId" => dep.group_id = text,
                                "artifactId" => dep.artifact_id = text,
                                "version" => dep.version = text,
                                "scope" => dep.scope = text,
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to parse {} at position {}: {}",
                    path.display(),
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    if pom.artifact_id.is_empty() {
        anyhow::bail!("{} has no <artifactId>", path.display());
    }

    Ok(pom)
}
