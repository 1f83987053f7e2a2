//! Run results and the `results.json` report

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FailureKind, HarnessError, HarnessResult};
use crate::role::Role;
use crate::scenario::Scenario;
use crate::screenshot::Artifact;

pub const RESULTS_FILE: &str = "results.json";

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIGURATION: i32 = 2;
pub const EXIT_SETUP: i32 = 3;
pub const EXIT_TIMEOUT: i32 = 4;
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Passed,
    Failed,
    /// Interrupted while running
    Cancelled,
    /// Never started because the run was cancelled first
    Skipped,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
            Status::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub id: String,
    pub title: String,
    pub category: String,
    pub role: Role,
    pub status: Status,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
    pub final_url: Option<String>,
    pub last_screenshot: Option<PathBuf>,
    pub artifacts: Vec<Artifact>,
    pub steps_completed: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ScenarioResult {
    /// A result for `scenario` that has not finished yet.
    pub fn start(scenario: &Scenario) -> Self {
        Self {
            id: scenario.id.clone(),
            title: scenario.title.clone(),
            category: scenario.category.clone(),
            role: scenario.role,
            status: Status::Skipped,
            failure: None,
            message: None,
            final_url: None,
            last_screenshot: None,
            artifacts: Vec::new(),
            steps_completed: 0,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn fail(&mut self, err: &HarnessError) {
        let kind = err.kind();
        self.status = if kind == FailureKind::Cancelled {
            Status::Cancelled
        } else {
            Status::Failed
        };
        self.failure = Some(kind);
        self.message = Some(err.to_string());
    }

    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }

    /// One line for the end-of-run failure summary.
    pub fn summary_line(&self) -> String {
        let kind = self
            .failure
            .map(|k| k.as_str())
            .unwrap_or_else(|| self.status.as_str());
        format!(
            "{} [{}] url: {} | screenshot: {} | {}",
            self.id,
            kind,
            self.final_url.as_deref().unwrap_or("-"),
            self.last_screenshot
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.message.as_deref().unwrap_or("")
        )
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub base_url: String,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn new(
        base_url: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        results: Vec<ScenarioResult>,
    ) -> Self {
        let count = |status: Status| results.iter().filter(|r| r.status == status).count();
        Self {
            base_url: base_url.into(),
            started_at,
            total: results.len(),
            passed: count(Status::Passed),
            failed: count(Status::Failed),
            cancelled: count(Status::Cancelled),
            skipped: count(Status::Skipped),
            duration_ms,
            results,
        }
    }

    pub fn success(&self) -> bool {
        self.passed == self.total
    }

    pub fn get(&self, id: &str) -> Option<&ScenarioResult> {
        self.results.iter().find(|r| r.id == id)
    }

    /// Process exit code. Cancellation wins, then setup > timeout >
    /// configuration > everything else.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled > 0 || self.skipped > 0 {
            return EXIT_CANCELLED;
        }
        let kinds: Vec<FailureKind> = self.results.iter().filter_map(|r| r.failure).collect();
        if kinds.is_empty() {
            EXIT_OK
        } else if kinds.contains(&FailureKind::SetupFailed) {
            EXIT_SETUP
        } else if kinds.contains(&FailureKind::Timeout) {
            EXIT_TIMEOUT
        } else if kinds.contains(&FailureKind::Configuration) {
            EXIT_CONFIGURATION
        } else {
            EXIT_FAILURE
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioResult> {
        self.results.iter().filter(|r| !r.passed())
    }

    pub fn failure_summary(&self) -> Vec<String> {
        self.failures().map(|r| r.summary_line()).collect()
    }

    /// Write `results.json` into `dir`.
    pub fn write_results(&self, dir: &Path) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|source| HarnessError::ArtifactWrite {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(RESULTS_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|source| HarnessError::ArtifactWrite {
            path: path.clone(),
            source,
        })?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}
