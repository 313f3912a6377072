//! Package curations: metadata corrections keyed by package identifier.
//!
//! A [`CurationProvider`] answers "is there a correction for this package?".
//! Corrections replace metadata fields wholesale; they never depend on which
//! analyzer saw the package.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{CuratedPackage, Identifier, Package};

/// Fields a curation may override. `None` leaves the package value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationData {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_licenses: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concluded_license: Option<String>,
}

impl CurationData {
    pub fn apply(&self, package: Package) -> Package {
        let mut curated = package;
        if let Some(description) = &self.description {
            curated.description = description.clone();
        }
        if let Some(homepage_url) = &self.homepage_url {
            curated.homepage_url = homepage_url.clone();
        }
        if let Some(licenses) = &self.declared_licenses {
            curated.declared_licenses = licenses.clone();
        }
        if let Some(concluded) = &self.concluded_license {
            curated.concluded_license = Some(concluded.clone());
        }
        curated
    }
}

/// A curation as written in a curations file or a repository configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageCuration {
    pub id: Identifier,
    #[serde(flatten)]
    pub data: CurationData,
}

pub trait CurationProvider: Send + Sync {
    fn curation_for(&self, id: &Identifier) -> Option<CurationData>;
}

/// Apply the (optional) curation to `package`.
pub fn curate(package: Package, curation: Option<&CurationData>) -> CuratedPackage {
    match curation {
        Some(data) => CuratedPackage {
            package: data.apply(package),
            curations: BTreeSet::from([data.clone()]),
        },
        None => CuratedPackage {
            package,
            curations: BTreeSet::new(),
        },
    }
}

/// Pass-through provider used when no curations are configured.
pub struct NoCurations;

impl CurationProvider for NoCurations {
    fn curation_for(&self, _id: &Identifier) -> Option<CurationData> {
        None
    }
}

/// Curations held in memory, loaded from a TOML file or a repository configuration.
#[derive(Debug, Default)]
pub struct FileCurationProvider {
    curations: BTreeMap<Identifier, CurationData>,
}

#[derive(Debug, Deserialize)]
struct CurationsFile {
    #[serde(default)]
    curations: Vec<PackageCuration>,
}

impl FileCurationProvider {
    /// Later entries for the same identifier replace earlier ones.
    pub fn new(curations: impl IntoIterator<Item = PackageCuration>) -> Self {
        Self {
            curations: curations
                .into_iter()
                .map(|curation| (curation.id, curation.data))
                .collect(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read curations from {}", path.display()))?;
        let file: CurationsFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse curations in {}", path.display()))?;
        Ok(Self::new(file.curations))
    }

    pub fn len(&self) -> usize {
        self.curations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curations.is_empty()
    }
}

impl CurationProvider for FileCurationProvider {
    fn curation_for(&self, id: &Identifier) -> Option<CurationData> {
        self.curations.get(id).cloned()
    }
}

/// Asks each provider in turn; the first one with a curation wins.
pub struct CompositeCurationProvider {
    providers: Vec<Arc<dyn CurationProvider>>,
}

impl CompositeCurationProvider {
    pub fn new(providers: Vec<Arc<dyn CurationProvider>>) -> Self {
        Self { providers }
    }
}

impl CurationProvider for CompositeCurationProvider {
    fn curation_for(&self, id: &Identifier) -> Option<CurationData> {
        self.providers
            .iter()
            .find_map(|provider| provider.curation_for(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lodash() -> Identifier {
        Identifier::new("NPM", "", "lodash", "4.17.21")
    }

    #[test]
    fn test_curation_overrides_fields() {
        let mut package = Package::new(lodash());
        package.description = "old".to_string();
        package.declared_licenses.insert("UNKNOWN".to_string());

        let data = CurationData {
            description: Some("Lodash modular utilities.".to_string()),
            declared_licenses: Some(BTreeSet::from(["MIT".to_string()])),
            ..Default::default()
        };
        let curated = curate(package, Some(&data));
        assert_eq!(curated.package.description, "Lodash modular utilities.");
        assert_eq!(
            curated.package.declared_licenses,
            BTreeSet::from(["MIT".to_string()])
        );
        assert_eq!(curated.curations.len(), 1);
    }

    #[test]
    fn test_load_curations_file() {
        let mut f = NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
[[curations]]
id = "NPM::lodash:4.17.21"
comment = "verified"
homepage_url = "https://lodash.com/"
declared_licenses = ["MIT"]
"#
        )
        .unwrap();

        let provider = FileCurationProvider::from_file(f.path()).unwrap();
        assert_eq!(provider.len(), 1);
        let data = provider.curation_for(&lodash()).unwrap();
        assert_eq!(data.homepage_url.as_deref(), Some("https://lodash.com/"));
        assert!(provider
            .curation_for(&Identifier::new("NPM", "", "lodash", "4.17.20"))
            .is_none());
    }

    #[test]
    fn test_composite_first_match_wins() {
        let first = FileCurationProvider::new([PackageCuration {
            id: lodash(),
            data: CurationData {
                concluded_license: Some("MIT".to_string()),
                ..Default::default()
            },
        }]);
        let second = FileCurationProvider::new([PackageCuration {
            id: lodash(),
            data: CurationData {
                concluded_license: Some("Apache-2.0".to_string()),
                ..Default::default()
            },
        }]);
        let provider = CompositeCurationProvider::new(vec![Arc::new(first), Arc::new(second)]);
        let data = provider.curation_for(&lodash()).unwrap();
        assert_eq!(data.concluded_license.as_deref(), Some("MIT"));
        assert!(NoCurations.curation_for(&lodash()).is_none());
    }
}
