use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::config::{AnalyzerConfig, RepositoryConfig};
use crate::models::{
    Identifier, Issue, Package, PackageReference, Project, ProjectAnalyzerResult, Scope,
};

const ECOSYSTEM: &str = "PIP";
const PACKAGE_TYPE: &str = "PyPI";
const SCOPE: &str = "install";

pub struct PipFactory;

impl super::AnalyzerFactory for PipFactory {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    fn definition_file_patterns(&self) -> &'static [&'static str] {
        &["requirements*.txt", "pyproject.toml"]
    }

    fn create(
        &self,
        root: &Path,
        _config: &AnalyzerConfig,
        _repository: &RepositoryConfig,
    ) -> Arc<dyn super::PackageManager> {
        Arc::new(PipAnalyzer::new(root))
    }
}

/// Analyzer for Python projects.
///
/// A directory is one project: `requirements.txt` is preferred, then
/// `pyproject.toml`, then any other `requirements*.txt`. A sibling
/// `Pipfile.lock` pins versions the definition file leaves open.
pub struct PipAnalyzer {
    root: PathBuf,
}

impl PipAnalyzer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl super::PackageManager for PipAnalyzer {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    fn map_definition_files(&self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for file in files {
            let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
            by_dir.entry(dir).or_default().push(file);
        }

        let mut mapped = Vec::new();
        for (dir, mut candidates) in by_dir {
            candidates.sort();
            let preferred = ["requirements.txt", "pyproject.toml"]
                .iter()
                .map(|name| dir.join(name))
                .find(|path| candidates.contains(path));
            match preferred {
                Some(path) => mapped.push(path),
                None => mapped.extend(candidates),
            }
        }
        mapped
    }

    fn resolve_definition_file(&self, definition_file: &Path) -> Result<Vec<ProjectAnalyzerResult>> {
        let dir = definition_file.parent().unwrap_or(&self.root);
        let is_pyproject = definition_file
            .file_name()
            .is_some_and(|name| name == "pyproject.toml");

        let (name, version, requirements): (String, String, Vec<Requirement>) = if is_pyproject {
            let pyproject = parse_pyproject_toml(definition_file)?;
            let project = pyproject.project.unwrap_or_default();
            let re = requirement_regex()?;
            (
                project.name.unwrap_or_else(|| super::directory_name(definition_file)),
                project.version.unwrap_or_default(),
                project
                    .dependencies
                    .iter()
                    .filter_map(|spec| parse_requirement(&re, spec))
                    .collect(),
            )
        } else {
            (
                super::directory_name(definition_file),
                String::new(),
                parse_requirements_txt(definition_file)?,
            )
        };

        let pipfile_lock = dir.join("Pipfile.lock");
        let pins = if pipfile_lock.is_file() {
            parse_pipfile_lock(&pipfile_lock)?
        } else {
            HashMap::new()
        };

        let project = Project::new(
            Identifier::new(ECOSYSTEM, "", name, version),
            super::relative_path(&self.root, definition_file),
        );
        Ok(vec![build_result(project, requirements, &pins)])
    }
}

/// A requirement line reduced to its name and exact pin, if any.
#[derive(Debug, Clone, PartialEq)]
struct Requirement {
    name: String,
    pinned: Option<String>,
}

fn requirement_regex() -> Result<Regex> {
    // name, optional [extras], optional `== version`
    Ok(Regex::new(
        r"^([A-Za-z0-9][A-Za-z0-9_\-\.]*)\s*(?:\[[^\]]*\])?\s*(?:==\s*([^\s;,]+))?",
    )?)
}

fn parse_requirement(re: &Regex, spec: &str) -> Option<Requirement> {
    let caps = re.captures(spec.trim())?;
    Some(Requirement {
        name: caps[1].to_string(),
        pinned: caps.get(2).map(|m| m.as_str().to_string()),
    })
}

/// Parse `requirements.txt`; options (`-r`, `--index-url`) and comments are skipped.
fn parse_requirements_txt(path: &Path) -> Result<Vec<Requirement>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let re = requirement_regex()?;
    let mut requirements = Vec::new();

    for line in content.lines() {
        let line = line.split(" #").next().unwrap_or(line).trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
            continue;
        }
        requirements.extend(parse_requirement(&re, line));
    }

    Ok(requirements)
}

/// Parse `Pipfile.lock`, JSON with `default` and `develop` sections.
fn parse_pipfile_lock(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let mut pins = HashMap::new();

    for section in &["default", "develop"] {
        if let Some(pkgs) = json.get(section).and_then(|v| v.as_object()) {
            for (name, info) in pkgs {
                if let Some(version) = info.get("version").and_then(|v| v.as_str()) {
                    pins.entry(name.to_lowercase())
                        .or_insert_with(|| version.trim_start_matches("==").to_string());
                }
            }
        }
    }

    Ok(pins)
}

#[derive(Debug, Default, Deserialize)]
struct Pyproject {
    project: Option<PyprojectProject>,
}

#[derive(Debug, Default, Deserialize)]
struct PyprojectProject {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

fn parse_pyproject_toml(path: &Path) -> Result<Pyproject> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn build_result(
    mut project: Project,
    requirements: Vec<Requirement>,
    pins: &HashMap<String, String>,
) -> ProjectAnalyzerResult {
    let mut packages = BTreeSet::new();
    let mut dependencies = BTreeSet::new();
    let mut unpinned = Vec::new();

    for requirement in requirements {
        let version = requirement
            .pinned
            .or_else(|| pins.get(&requirement.name.to_lowercase()).cloned());
        if version.is_none() {
            unpinned.push(requirement.name.clone());
        }
        let id = Identifier::new(PACKAGE_TYPE, "", requirement.name, version.unwrap_or_default());
        packages.insert(Package::new(id.clone()));
        dependencies.insert(PackageReference::new(id));
    }

    if !dependencies.is_empty() {
        project.scopes.insert(Scope {
            name: SCOPE.to_string(),
            dependencies,
        });
    }

    let mut issues = Vec::new();
    if !unpinned.is_empty() {
        issues.push(Issue::warning(
            ECOSYSTEM,
            format!(
                "Requirements without an exact version in '{}': {}.",
                project.definition_file_path,
                unpinned.join(", ")
            ),
        ));
    }

    ProjectAnalyzerResult {
        project,
        packages,
        issues,
    }
}
