use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::curation::{curate, CurationData, CurationProvider};
use crate::models::{
    AnalyzerResult, CuratedPackage, Identifier, Issue, Project, ProjectResolution, Severity,
};

/// Folds [`ProjectResolution`]s into one [`AnalyzerResult`].
///
/// Projects and packages are keyed by identifier. Two sightings of the same
/// identifier are combined with the commutative merges of the model types, so
/// the final result does not depend on the order resolutions arrive in.
///
/// Two different definition files yielding the same project identifier are
/// not merged: the project from the smallest path is kept and the others are
/// reported as errors.
#[derive(Debug, Default)]
pub struct ResolutionAccumulator {
    projects: BTreeMap<Identifier, Project>,
    packages: BTreeMap<Identifier, CuratedPackage>,
    issues: BTreeMap<Identifier, BTreeSet<Issue>>,
    curations: HashMap<Identifier, Option<CurationData>>,
    /// Definition files whose project lost to another one with the same id.
    shadowed: BTreeMap<Identifier, BTreeSet<String>>,
}

impl ResolutionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Add one analyzer's results, curating each package on the way in.
    /// `provider` is asked at most once per distinct package identifier.
    pub fn add(&mut self, resolution: ProjectResolution, provider: &dyn CurationProvider) {
        debug!(
            analyzer = %resolution.analyzer,
            files = resolution.results.len(),
            "aggregating resolution"
        );

        for result in resolution.results.into_values().flatten() {
            let project_id = result.project.id.clone();

            if !result.issues.is_empty() {
                self.issues
                    .entry(project_id.clone())
                    .or_default()
                    .extend(result.issues);
            }

            self.add_project(result.project);

            for package in result.packages {
                let curation = self
                    .curations
                    .entry(package.id.clone())
                    .or_insert_with(|| provider.curation_for(&package.id));
                let curated = curate(package, curation.as_ref());
                insert_merged(
                    &mut self.packages,
                    curated.package.id.clone(),
                    curated,
                    CuratedPackage::merge,
                );
            }
        }
    }

    fn add_project(&mut self, project: Project) {
        let Some(existing) = self.projects.remove(&project.id) else {
            self.projects.insert(project.id.clone(), project);
            return;
        };

        if existing.definition_file_path == project.definition_file_path {
            self.projects.insert(project.id.clone(), existing.merge(project));
            return;
        }

        let (kept, dropped) = if project.definition_file_path < existing.definition_file_path {
            (project, existing)
        } else {
            (existing, project)
        };
        debug!(
            project = %kept.id,
            kept = %kept.definition_file_path,
            dropped = %dropped.definition_file_path,
            "duplicate project identifier"
        );
        self.shadowed
            .entry(kept.id.clone())
            .or_default()
            .insert(dropped.definition_file_path);
        self.projects.insert(kept.id.clone(), kept);
    }

    /// Combine two accumulators; `a.merge(b)` and `b.merge(a)` finalize to
    /// the same result.
    #[allow(dead_code)]
    pub fn merge(mut self, other: ResolutionAccumulator) -> ResolutionAccumulator {
        for (_, project) in other.projects {
            self.add_project(project);
        }
        for (id, paths) in other.shadowed {
            self.shadowed.entry(id).or_default().extend(paths);
        }
        for (id, package) in other.packages {
            insert_merged(&mut self.packages, id, package, CuratedPackage::merge);
        }
        for (id, issues) in other.issues {
            self.issues.entry(id).or_default().extend(issues);
        }
        for (id, curation) in other.curations {
            self.curations.entry(id).or_insert(curation);
        }
        self
    }

    pub fn finalize(mut self) -> AnalyzerResult {
        for (id, paths) in self.shadowed {
            let kept = self
                .projects
                .get(&id)
                .map(|p| p.definition_file_path.clone())
                .unwrap_or_default();
            let issues = self.issues.entry(id.clone()).or_default();
            for path in paths {
                issues.insert(Issue {
                    source: id.kind.clone(),
                    message: format!(
                        "Multiple projects with the same id '{}' found. Not adding the project defined in '{}', '{}' defines it as well.",
                        id, path, kept
                    ),
                    severity: Severity::Error,
                });
            }
        }

        AnalyzerResult {
            projects: self.projects.into_values().collect(),
            packages: self.packages.into_values().collect(),
            issues: self.issues,
        }
    }
}

fn insert_merged<T>(map: &mut BTreeMap<Identifier, T>, id: Identifier, value: T, merge: fn(T, T) -> T) {
    let merged = match map.remove(&id) {
        Some(existing) => merge(existing, value),
        None => value,
    };
    map.insert(id, merged);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curation::{FileCurationProvider, NoCurations, PackageCuration};
    use crate::models::{Package, PackageReference, ProjectAnalyzerResult, ResolutionMap, Scope};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn package(kind: &str, namespace: &str, name: &str, version: &str) -> Package {
        Package::new(Identifier::new(kind, namespace, name, version))
    }

    fn resolution(
        analyzer: &str,
        file: &str,
        project_name: &str,
        packages: Vec<Package>,
        issues: Vec<Issue>,
    ) -> ProjectResolution {
        let mut project = Project::new(Identifier::new(analyzer, "", project_name, "1.0.0"), file);
        project.scopes.insert(Scope {
            name: "main".to_string(),
            dependencies: packages
                .iter()
                .map(|p| PackageReference::new(p.id.clone()))
                .collect(),
        });
        let mut results = ResolutionMap::new();
        results.insert(
            PathBuf::from(file),
            vec![ProjectAnalyzerResult {
                project,
                packages: packages.into_iter().collect(),
                issues,
            }],
        );
        ProjectResolution {
            analyzer: analyzer.to_string(),
            results,
        }
    }

    fn sample() -> Vec<ProjectResolution> {
        let mut described = package("Maven", "org.slf4j", "slf4j-api", "2.0.5");
        described.description = "Simple Logging Facade".to_string();
        let mut licensed = package("Maven", "org.slf4j", "slf4j-api", "2.0.5");
        licensed.declared_licenses.insert("MIT".to_string());

        vec![
            resolution("Maven", "pom.xml", "service", vec![described], Vec::new()),
            resolution(
                "Gradle",
                "app/build.gradle",
                "app",
                vec![licensed, package("Maven", "junit", "junit", "4.13.2")],
                vec![Issue::warning("Gradle", "no lockfile")],
            ),
            resolution(
                "NPM",
                "web/package.json",
                "web",
                vec![package("NPM", "", "lodash", "4.17.21")],
                Vec::new(),
            ),
        ]
    }

    fn aggregate(order: &[usize]) -> AnalyzerResult {
        let resolutions = sample();
        let mut accumulator = ResolutionAccumulator::new();
        for &i in order {
            accumulator.add(resolutions[i].clone(), &NoCurations);
        }
        accumulator.finalize()
    }

    #[test]
    fn test_order_does_not_matter() {
        let expected = aggregate(&[0, 1, 2]);
        for order in [[0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
            assert_eq!(aggregate(&order), expected);
        }
        assert_eq!(expected.projects.len(), 3);
        assert_eq!(expected.packages.len(), 3);
        assert_eq!(expected.issues.len(), 1);
    }

    #[test]
    fn test_merge_is_commutative() {
        let resolutions = sample();
        let build = |indices: &[usize]| {
            let mut accumulator = ResolutionAccumulator::new();
            for &i in indices {
                accumulator.add(resolutions[i].clone(), &NoCurations);
            }
            accumulator
        };

        let left = build(&[0]).merge(build(&[1, 2])).finalize();
        let right = build(&[1, 2]).merge(build(&[0])).finalize();
        assert_eq!(left, right);
        assert_eq!(left, aggregate(&[0, 1, 2]));
    }

    #[test]
    fn test_shared_package_is_curated_once() {
        struct Counting {
            inner: FileCurationProvider,
            lookups: AtomicUsize,
        }

        impl CurationProvider for Counting {
            fn curation_for(&self, id: &Identifier) -> Option<CurationData> {
                self.lookups.fetch_add(1, Ordering::SeqCst);
                self.inner.curation_for(id)
            }
        }

        let provider = Counting {
            inner: FileCurationProvider::new([PackageCuration {
                id: "Maven:org.slf4j:slf4j-api:2.0.5".parse().unwrap(),
                data: CurationData {
                    comment: "license verified in source".to_string(),
                    concluded_license: Some("MIT".to_string()),
                    ..Default::default()
                },
            }]),
            lookups: AtomicUsize::new(0),
        };

        let mut accumulator = ResolutionAccumulator::new();
        for resolution in sample() {
            accumulator.add(resolution, &provider);
        }
        let result = accumulator.finalize();

        let slf4j: Vec<&CuratedPackage> = result
            .packages
            .iter()
            .filter(|p| p.package.id.name == "slf4j-api")
            .collect();
        assert_eq!(slf4j.len(), 1);
        assert_eq!(slf4j[0].package.concluded_license.as_deref(), Some("MIT"));
        assert_eq!(slf4j[0].package.description, "Simple Logging Facade");
        assert!(slf4j[0].package.declared_licenses.contains("MIT"));
        assert_eq!(slf4j[0].curations.len(), 1);
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_issues_keyed_by_project() {
        let result = aggregate(&[1]);
        let key: Identifier = "Gradle::app:1.0.0".parse().unwrap();
        assert_eq!(result.issues[&key].len(), 1);
        assert!(!result.has_errors());
    }

    #[test]
    fn test_same_project_id_from_two_files_is_not_merged() {
        let resolutions = [
            resolution(
                "PIP",
                "tools/app/requirements.txt",
                "app",
                vec![package("PyPI", "", "six", "1.16.0")],
                Vec::new(),
            ),
            resolution(
                "PIP",
                "services/app/requirements.txt",
                "app",
                vec![package("PyPI", "", "requests", "2.31.0")],
                Vec::new(),
            ),
        ];
        let aggregate = |order: [usize; 2]| {
            let mut accumulator = ResolutionAccumulator::new();
            for i in order {
                accumulator.add(resolutions[i].clone(), &NoCurations);
            }
            accumulator.finalize()
        };

        let result = aggregate([0, 1]);
        assert_eq!(result, aggregate([1, 0]));

        assert_eq!(result.projects.len(), 1);
        let project = result.projects.iter().next().unwrap();
        assert_eq!(project.definition_file_path, "services/app/requirements.txt");
        let dependencies: Vec<String> = project
            .scopes
            .iter()
            .flat_map(|s| s.dependencies.iter().map(|d| d.id.name.clone()))
            .collect();
        assert_eq!(dependencies, vec!["requests"]);

        let issues = &result.issues[&project.id];
        assert_eq!(issues.len(), 1);
        let issue = issues.iter().next().unwrap();
        assert_eq!(issue.severity, Severity::Error);
        assert!(issue.message.contains("tools/app/requirements.txt"));
        assert!(issue.message.contains("services/app/requirements.txt"));
        assert!(result.has_errors());
    }

    #[test]
    fn test_merge_keeps_duplicate_project_error() {
        let left = resolution("PIP", "b/app/requirements.txt", "app", Vec::new(), Vec::new());
        let right = resolution("PIP", "a/app/requirements.txt", "app", Vec::new(), Vec::new());
        let build = |r: &ProjectResolution| {
            let mut accumulator = ResolutionAccumulator::new();
            accumulator.add(r.clone(), &NoCurations);
            accumulator
        };

        let merged = build(&left).merge(build(&right)).finalize();
        assert_eq!(merged, build(&right).merge(build(&left)).finalize());
        assert_eq!(merged.projects.len(), 1);
        assert_eq!(
            merged.projects.iter().next().unwrap().definition_file_path,
            "a/app/requirements.txt"
        );
        assert!(merged.has_errors());
    }
}
