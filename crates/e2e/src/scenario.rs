//! Declarative YAML scenarios

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::driver::OptionChoice;
use crate::error::{HarnessError, HarnessResult};
use crate::locator::Locator;
use crate::role::Role;
use crate::screenshot::artifact_path;
use crate::wait::Readiness;

static CASE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z]{3,4}(-[A-Z]+)?-\d{3}$").expect("case id pattern is valid")
});

static SCREENSHOT_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(before|(before|after)-[a-z0-9]+(-[a-z0-9]+)*)$")
        .expect("screenshot tag pattern is valid")
});

/// Tag of the capture the runner takes after every completed scenario.
pub const AFTER_TAG: &str = "after";

/// One end-to-end case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Case id, e.g. `PKG-002`. Unique across the catalog.
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Artifact subdirectory. Filled in from the catalog file when omitted.
    #[serde(default)]
    pub category: String,

    /// Persona to log in as before the first navigation
    #[serde(default)]
    pub role: Role,

    /// Primary navigation, relative to the base URL
    #[serde(default)]
    pub target: Option<String>,

    /// Readiness policy for the primary navigation
    #[serde(default)]
    pub readiness: Readiness,

    /// Settle delay for the dom-ready policy
    #[serde(default)]
    pub settle_ms: Option<u64>,

    #[serde(default)]
    pub steps: Vec<Step>,

    /// The final URL must contain at least one of these fragments
    pub expect_url: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Acceptance criteria, kept for traceability
    #[serde(default)]
    pub acceptance: Vec<String>,
}

/// A single step in a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a path relative to the base URL
    Navigate {
        url: String,
        #[serde(default)]
        readiness: Option<Readiness>,
        #[serde(default)]
        settle_ms: Option<u64>,
    },

    /// Click the first visible candidate. When none shows up, navigate to
    /// `fallback_url`; without a fallback the step is skipped unless `required`.
    Click {
        selectors: Vec<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        fallback_url: Option<String>,
        #[serde(default)]
        required: bool,
        #[serde(default)]
        readiness: Option<Readiness>,
    },

    /// Fill an input. Optional fills are skipped when the field is absent.
    Fill {
        selectors: Vec<String>,
        value: FillValue,
        /// Which visible match to fill, e.g. 1 for a confirm-password field
        #[serde(default)]
        nth: usize,
        #[serde(default = "default_true")]
        optional: bool,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Choose an option. Alternatives in `options` are tried in order.
    Select {
        selectors: Vec<String>,
        #[serde(default)]
        option: Option<OptionChoice>,
        #[serde(default)]
        options: Vec<OptionChoice>,
        #[serde(default = "default_true")]
        optional: bool,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Reload the current page
    Reload {
        #[serde(default)]
        readiness: Option<Readiness>,
    },

    /// The current URL must contain one of the fragments
    ExpectUrl {
        any_of: Vec<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// At least one candidate must become visible
    ExpectVisible {
        any_of: Vec<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Capture `<category>/<ID>-<tag>.png`
    Screenshot { tag: String },

    /// Fixed delay (use sparingly)
    Sleep { ms: u64 },
}

fn default_true() -> bool {
    true
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Step::Navigate { .. } => "navigate",
            Step::Click { .. } => "click",
            Step::Fill { .. } => "fill",
            Step::Select { .. } => "select",
            Step::Reload { .. } => "reload",
            Step::ExpectUrl { .. } => "expect_url",
            Step::ExpectVisible { .. } => "expect_visible",
            Step::Screenshot { .. } => "screenshot",
            Step::Sleep { .. } => "sleep",
        }
    }
}

/// A form value: a literal, or a symbolic reference to a persona's credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Literal(String),
    Credential { credential: CredentialRef },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRef {
    pub role: Role,
    pub field: CredentialField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialField {
    Username,
    Password,
}

/// One YAML file of the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    pub category: String,
    pub scenarios: Vec<Scenario>,
}

impl CatalogFile {
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| HarnessError::Catalog {
            origin: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Stamp the file's category onto its scenarios. A scenario that names a
    /// different category is rejected.
    pub fn into_scenarios(self, origin: &str) -> HarnessResult<Vec<Scenario>> {
        let category = self.category;
        self.scenarios
            .into_iter()
            .map(|mut scenario| {
                if scenario.category.is_empty() {
                    scenario.category = category.clone();
                } else if scenario.category != category {
                    return Err(HarnessError::Catalog {
                        origin: origin.to_string(),
                        reason: format!(
                            "{} declares category '{}' inside the '{}' file",
                            scenario.id, scenario.category, category
                        ),
                    });
                }
                Ok(scenario)
            })
            .collect()
    }
}

impl Scenario {
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Every artifact the scenario can produce, including the final capture.
    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::Screenshot { tag } => Some(tag.as_str()),
                _ => None,
            })
            .chain(std::iter::once(AFTER_TAG))
            .map(|tag| artifact_path(&self.category, &self.id, tag))
            .collect()
    }

    /// Check the scenario on its own. Catalog-wide rules live in the catalog.
    pub fn validate(&self) -> HarnessResult<()> {
        let mut problems = Vec::new();

        if !CASE_ID.is_match(&self.id) {
            problems.push(format!("id '{}' does not match {}", self.id, CASE_ID.as_str()));
        }
        if self.title.trim().is_empty() {
            problems.push("title is empty".to_string());
        }
        if self.category.trim().is_empty() {
            problems.push("category is empty".to_string());
        }
        if self.expect_url.is_empty() {
            problems.push("expect_url needs at least one fragment".to_string());
        }
        if self.expect_url.iter().any(|f| f.trim().is_empty()) {
            problems.push("expect_url contains an empty fragment".to_string());
        }
        if let Some(target) = &self.target {
            check_path("target", target, &mut problems);
        }

        let mut tags = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            let at = format!("step {} ({})", i + 1, step.action());
            match step {
                Step::Navigate { url, .. } => check_path(&at, url, &mut problems),
                Step::Click {
                    selectors,
                    fallback_url,
                    ..
                } => {
                    check_locators(&at, selectors, &mut problems);
                    if let Some(url) = fallback_url {
                        check_path(&at, url, &mut problems);
                    }
                }
                Step::Fill {
                    selectors, value, ..
                } => {
                    check_locators(&at, selectors, &mut problems);
                    if let FillValue::Credential { credential } = value {
                        if !credential.role.is_privileged() {
                            problems.push(format!("{at}: anonymous has no credentials"));
                        }
                    }
                }
                Step::Select {
                    selectors,
                    option,
                    options,
                    ..
                } => {
                    check_locators(&at, selectors, &mut problems);
                    if option.is_none() && options.is_empty() {
                        problems.push(format!("{at}: no option to choose"));
                    }
                }
                Step::ExpectUrl { any_of, .. } => {
                    if any_of.is_empty() || any_of.iter().any(|f| f.trim().is_empty()) {
                        problems.push(format!("{at}: any_of needs non-empty fragments"));
                    }
                }
                Step::ExpectVisible { any_of, .. } => check_locators(&at, any_of, &mut problems),
                Step::Screenshot { tag } => {
                    if tag == AFTER_TAG {
                        problems.push(format!("{at}: '{AFTER_TAG}' is reserved for the final capture"));
                    } else if !SCREENSHOT_TAG.is_match(tag) {
                        problems.push(format!(
                            "{at}: tag '{tag}' must be 'before', 'before-*' or 'after-*'"
                        ));
                    }
                    if !tags.insert(tag.as_str()) {
                        problems.push(format!("{at}: duplicate screenshot tag '{tag}'"));
                    }
                }
                Step::Reload { .. } | Step::Sleep { .. } => {}
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Catalog {
                origin: self.id.clone(),
                reason: problems.join("; "),
            })
        }
    }
}

fn check_path(at: &str, path: &str, problems: &mut Vec<String>) {
    if !path.starts_with('/') || path.starts_with("//") {
        problems.push(format!("{at}: '{path}' must be a path starting with '/'"));
    }
}

fn check_locators(at: &str, selectors: &[String], problems: &mut Vec<String>) {
    if selectors.is_empty() {
        problems.push(format!("{at}: no selectors"));
    }
    for selector in selectors {
        if let Err(e) = Locator::parse(selector) {
            problems.push(format!("{at}: {e}"));
        }
    }
}
