//! Scenario catalog
//!
//! The built-in catalog is compiled into the library, one YAML document per
//! category. Extra directories can be layered on top at run time.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::scenario::{CatalogFile, Scenario};

pub const CATEGORIES: [&str; 7] = [
    "analytics",
    "attendant",
    "auth",
    "owner",
    "patient",
    "services",
    "staff",
];

const BUILTIN: [(&str, &str); 7] = [
    ("analytics.yaml", include_str!("../catalog/analytics.yaml")),
    ("attendant.yaml", include_str!("../catalog/attendant.yaml")),
    ("auth.yaml", include_str!("../catalog/auth.yaml")),
    ("owner.yaml", include_str!("../catalog/owner.yaml")),
    ("patient.yaml", include_str!("../catalog/patient.yaml")),
    ("services.yaml", include_str!("../catalog/services.yaml")),
    ("staff.yaml", include_str!("../catalog/staff.yaml")),
];

/// Scenario selection. Empty lists do not filter.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// Case-id prefixes, e.g. `ADM` or `OWN-IMG`
    pub id_prefixes: Vec<String>,
    pub categories: Vec<String>,
    /// Keep scenarios carrying any of these tags
    pub tags: Vec<String>,
    pub exclude_tags: Vec<String>,
}

impl Filter {
    pub fn matches(&self, scenario: &Scenario) -> bool {
        let id_ok = self.id_prefixes.is_empty()
            || self
                .id_prefixes
                .iter()
                .any(|p| scenario.id.starts_with(&p.to_ascii_uppercase()));
        let category_ok = self.categories.is_empty()
            || self
                .categories
                .iter()
                .any(|c| c.trim().eq_ignore_ascii_case(&scenario.category));
        let tag_ok = self.tags.is_empty() || self.tags.iter().any(|t| scenario.has_tag(t));
        let not_excluded = !self.exclude_tags.iter().any(|t| scenario.has_tag(t));
        id_ok && category_ok && tag_ok && not_excluded
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    scenarios: Vec<Scenario>,
}

impl Catalog {
    /// The embedded catalog, validated.
    pub fn builtin() -> HarnessResult<Self> {
        let mut catalog = Self::default();
        for (name, yaml) in BUILTIN {
            let file = CatalogFile::from_yaml(yaml).map_err(|e| HarnessError::Catalog {
                origin: name.to_string(),
                reason: e.to_string(),
            })?;
            check_file_name(name, &file.category)?;
            catalog.scenarios.extend(file.into_scenarios(name)?);
        }
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load every `*.yaml`/`*.yml` below `dir`.
    pub fn load_dir(dir: &Path) -> HarnessResult<Self> {
        if !dir.is_dir() {
            return Err(HarnessError::Configuration(format!(
                "catalog directory {} does not exist",
                dir.display()
            )));
        }

        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        files.sort();

        let mut catalog = Self::default();
        for path in files {
            debug!("Loading scenarios from {}", path.display());
            let origin = path.display().to_string();
            let file = CatalogFile::from_file(&path)?;
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                check_file_name(name, &file.category).map_err(|e| match e {
                    HarnessError::Catalog { reason, .. } => HarnessError::Catalog {
                        origin: origin.clone(),
                        reason,
                    },
                    other => other,
                })?;
            }
            catalog.scenarios.extend(file.into_scenarios(&origin)?);
        }
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_scenarios(scenarios: Vec<Scenario>) -> HarnessResult<Self> {
        let catalog = Self { scenarios };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Append `other`. The combined catalog must validate; on error `self`
    /// is left untouched.
    pub fn extend(&mut self, other: Catalog) -> HarnessResult<()> {
        let mut scenarios = self.scenarios.clone();
        scenarios.extend(other.scenarios);
        *self = Self::from_scenarios(scenarios)?;
        Ok(())
    }

    /// Per-scenario rules plus catalog-wide uniqueness of ids and artifact paths.
    pub fn validate(&self) -> HarnessResult<()> {
        let mut ids = HashSet::new();
        let mut artifacts: HashMap<PathBuf, &str> = HashMap::new();

        for scenario in &self.scenarios {
            scenario.validate()?;
            if !ids.insert(scenario.id.as_str()) {
                return Err(HarnessError::Catalog {
                    origin: scenario.id.clone(),
                    reason: "duplicate scenario id".to_string(),
                });
            }
            for path in scenario.artifact_paths() {
                if let Some(other) = artifacts.insert(path.clone(), &scenario.id) {
                    return Err(HarnessError::Catalog {
                        origin: scenario.id.clone(),
                        reason: format!("artifact {} also written by {}", path.display(), other),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    /// Selected scenarios, in catalog order.
    pub fn select(&self, filter: &Filter) -> Vec<Scenario> {
        self.scenarios
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect()
    }
}

/// A file named after a known category must hold that category.
fn check_file_name(name: &str, category: &str) -> HarnessResult<()> {
    let stem = name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(name);
    if CATEGORIES.contains(&stem) && stem != category {
        return Err(HarnessError::Catalog {
            origin: name.to_string(),
            reason: format!("file declares category '{category}'"),
        });
    }
    Ok(())
}
