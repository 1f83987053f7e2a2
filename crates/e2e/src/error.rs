//! Error types for the harness

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::role::Role;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Catalog error in {origin}: {reason}")]
    Catalog { origin: String, reason: String },

    #[error("Session setup failed: {reason}")]
    SetupFailed {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Authentication failed for {role} as '{username}' (final URL: {final_url})")]
    AuthenticationFailed {
        role: Role,
        username: String,
        final_url: String,
    },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("URL invariant failed: expected one of [{}] in '{actual}'", expected.join(", "))]
    UrlMismatch { expected: Vec<String>, actual: String },

    #[error("Timed out after {timeout:?} waiting for {operation}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Failed to write artifact {}: {source}", path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Browser error: {0}")]
    Driver(String),

    #[error("Scenario cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<chromiumoxide::error::CdpError> for HarnessError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        HarnessError::Driver(err.to_string())
    }
}

impl HarnessError {
    pub fn setup(reason: impl Into<String>) -> Self {
        HarnessError::SetupFailed {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        HarnessError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Triage bucket used in reports and exit codes.
    pub fn kind(&self) -> FailureKind {
        match self {
            HarnessError::Configuration(_)
            | HarnessError::Catalog { .. }
            | HarnessError::Yaml(_)
            | HarnessError::Toml(_) => FailureKind::Configuration,
            HarnessError::SetupFailed { .. } => FailureKind::SetupFailed,
            HarnessError::AuthenticationFailed { .. } => FailureKind::AuthenticationFailed,
            HarnessError::AssertionFailed(_) | HarnessError::UrlMismatch { .. } => {
                FailureKind::AssertionFailed
            }
            HarnessError::Timeout { .. } => FailureKind::Timeout,
            HarnessError::Cancelled => FailureKind::Cancelled,
            HarnessError::ArtifactWrite { .. }
            | HarnessError::Driver(_)
            | HarnessError::Io(_)
            | HarnessError::Json(_)
            | HarnessError::Http(_) => FailureKind::DriverError,
        }
    }
}

/// Why a scenario did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    SetupFailed,
    AuthenticationFailed,
    AssertionFailed,
    Timeout,
    DriverError,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Configuration => "configuration",
            FailureKind::SetupFailed => "setup_failed",
            FailureKind::AuthenticationFailed => "authentication_failed",
            FailureKind::AssertionFailed => "assertion_failed",
            FailureKind::Timeout => "timeout",
            FailureKind::DriverError => "driver_error",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
