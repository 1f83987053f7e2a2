//! Harness configuration
//!
//! Values resolve with the precedence: explicit overrides (command line, then
//! an optional TOML file) → environment variables → built-in defaults. The
//! resolved [`HarnessConfig`] is read-only for the rest of the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::role::{Credentials, Role};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_SCREENSHOT_DIR: &str = "./screenshots";

/// Deployment profile the harness runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Local development. Seeded fixture personas are allowed.
    #[default]
    Development,
    Ci,
    Production,
}

impl FromStr for Profile {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Profile::Development),
            "ci" => Ok(Profile::Ci),
            "production" | "prod" => Ok(Profile::Production),
            other => Err(HarnessError::Configuration(format!(
                "unknown profile '{other}' (expected development, ci or production)"
            ))),
        }
    }
}

/// Bounded waits used throughout a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Whole-scenario deadline
    pub scenario_ms: u64,

    /// Navigation and readiness waits; expiry is an error
    pub navigation_ms: u64,

    /// Visibility probes; expiry means "absent"
    pub probe_ms: u64,

    /// Quiet period for the network-idle policy
    pub network_quiet_ms: u64,

    /// Fixed delay after DOMContentLoaded for the dom-ready policy
    pub dom_settle_ms: u64,

    /// Browser launch
    pub launch_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            scenario_ms: 60_000,
            navigation_ms: 30_000,
            probe_ms: 2_000,
            network_quiet_ms: 500,
            dom_settle_ms: 1_000,
            launch_ms: 30_000,
        }
    }
}

impl Timeouts {
    pub fn scenario(&self) -> Duration {
        Duration::from_millis(self.scenario_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }

    pub fn network_quiet(&self) -> Duration {
        Duration::from_millis(self.network_quiet_ms)
    }

    pub fn dom_settle(&self) -> Duration {
        Duration::from_millis(self.dom_settle_ms)
    }

    pub fn launch(&self) -> Duration {
        Duration::from_millis(self.launch_ms)
    }
}

/// Explicit values supplied at harness start. Every field is optional; unset
/// fields fall through to the environment and then to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub screenshot_dir: Option<PathBuf>,
    pub headless: Option<bool>,
    pub workers: Option<usize>,
    pub scenario_timeout_secs: Option<u64>,
    pub profile: Option<Profile>,
    pub serialize_roles: Option<bool>,
    pub chrome_path: Option<PathBuf>,
    pub timeouts: Option<Timeouts>,
    pub credentials: BTreeMap<Role, Credentials>,
}

impl ConfigOverrides {
    /// Load overrides from a TOML file
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let overrides: Self = toml::from_str(&content)?;
        Ok(overrides)
    }

    /// Layer `higher` on top of `self`; fields set in `higher` win.
    pub fn merge(mut self, higher: ConfigOverrides) -> Self {
        self.base_url = higher.base_url.or(self.base_url);
        self.screenshot_dir = higher.screenshot_dir.or(self.screenshot_dir);
        self.headless = higher.headless.or(self.headless);
        self.workers = higher.workers.or(self.workers);
        self.scenario_timeout_secs = higher.scenario_timeout_secs.or(self.scenario_timeout_secs);
        self.profile = higher.profile.or(self.profile);
        self.serialize_roles = higher.serialize_roles.or(self.serialize_roles);
        self.chrome_path = higher.chrome_path.or(self.chrome_path);
        self.timeouts = higher.timeouts.or(self.timeouts);
        self.credentials.extend(higher.credentials);
        self
    }
}

/// Resolved, validated configuration shared by every scenario.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    base_url: Url,
    screenshot_dir: PathBuf,
    credentials: BTreeMap<Role, Credentials>,
    pub headless: bool,
    pub workers: usize,
    pub profile: Profile,
    pub serialize_roles: bool,
    pub chrome_path: Option<PathBuf>,
    pub timeouts: Timeouts,
}

impl HarnessConfig {
    /// Resolve against the process environment.
    pub fn from_env(overrides: ConfigOverrides) -> HarnessResult<Self> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary variable lookup.
    pub fn resolve<F>(overrides: ConfigOverrides, env: F) -> HarnessResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let profile = match overrides.profile {
            Some(profile) => profile,
            None => env("HARNESS_PROFILE")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
        };

        let raw_url = overrides
            .base_url
            .or_else(|| env("BASE_URL"))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = parse_base_url(&raw_url)?;

        let screenshot_dir = overrides
            .screenshot_dir
            .or_else(|| env("SCREENSHOT_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCREENSHOT_DIR));

        let headless = match overrides.headless {
            Some(headless) => headless,
            None => env("HEADLESS")
                .map(|v| parse_bool("HEADLESS", &v))
                .transpose()?
                .unwrap_or(true),
        };

        let workers = match overrides.workers {
            Some(workers) => workers,
            None => env("PARALLEL_WORKERS")
                .map(|v| parse_number::<usize>("PARALLEL_WORKERS", &v))
                .transpose()?
                .unwrap_or(1),
        };
        if workers == 0 {
            return Err(HarnessError::Configuration(
                "worker count must be at least 1".to_string(),
            ));
        }

        let mut timeouts = overrides.timeouts.unwrap_or_default();
        let scenario_secs = match overrides.scenario_timeout_secs {
            Some(secs) => Some(secs),
            None => env("SCENARIO_TIMEOUT_SECS")
                .map(|v| parse_number::<u64>("SCENARIO_TIMEOUT_SECS", &v))
                .transpose()?,
        };
        if let Some(secs) = scenario_secs {
            if secs == 0 {
                return Err(HarnessError::Configuration(
                    "scenario timeout must be at least one second".to_string(),
                ));
            }
            timeouts.scenario_ms = secs.checked_mul(1000).ok_or_else(|| {
                HarnessError::Configuration(format!("scenario timeout of {secs}s is too large"))
            })?;
        }

        let serialize_roles = match overrides.serialize_roles {
            Some(serialize) => serialize,
            None => env("SERIALIZE_ROLES")
                .map(|v| parse_bool("SERIALIZE_ROLES", &v))
                .transpose()?
                .unwrap_or(false),
        };

        let chrome_path = overrides
            .chrome_path
            .or_else(|| env("CHROME_PATH").map(PathBuf::from));

        let credentials = resolve_credentials(profile, overrides.credentials, &env)?;

        Ok(Self {
            base_url,
            screenshot_dir,
            credentials,
            headless,
            workers,
            profile,
            serialize_roles,
            chrome_path,
            timeouts,
        })
    }

    /// Absolute URL of the application under test. Always ends with `/`.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join an application path such as `/packages/3/` onto the base URL.
    pub fn url_for(&self, path: &str) -> HarnessResult<Url> {
        if !path.starts_with('/') || path.starts_with("//") {
            return Err(HarnessError::Configuration(format!(
                "navigation path '{path}' must be relative to the base URL and start with '/'"
            )));
        }
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| HarnessError::Configuration(format!("cannot join '{path}': {e}")))
    }

    /// Artifact root, created if absent.
    pub fn screenshot_root(&self) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(&self.screenshot_dir).map_err(|e| {
            HarnessError::Configuration(format!(
                "screenshot directory {} is not writable: {}",
                self.screenshot_dir.display(),
                e
            ))
        })?;
        Ok(self.screenshot_dir.clone())
    }

    /// True when `url` points at the shared or a per-role login form below
    /// the base URL.
    pub fn is_login_page(&self, url: &str) -> bool {
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => url.to_string(),
        };
        let base = self.base_url.path().trim_end_matches('/');
        let relative = path.strip_prefix(base).unwrap_or(&path);
        relative.starts_with("/accounts/login") || relative.starts_with("/login")
    }

    pub fn credentials(&self, role: Role) -> HarnessResult<&Credentials> {
        if !role.is_privileged() {
            return Err(HarnessError::Configuration(format!(
                "role '{role}' has no credentials"
            )));
        }
        self.credentials.get(&role).ok_or_else(|| {
            HarnessError::Configuration(format!("no credentials configured for role '{role}'"))
        })
    }
}

fn parse_base_url(raw: &str) -> HarnessResult<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| HarnessError::Configuration(format!("invalid BASE_URL '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(HarnessError::Configuration(format!(
            "BASE_URL '{raw}' must be an absolute http(s) URL"
        )));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(HarnessError::Configuration(format!(
            "BASE_URL '{raw}' must not carry a query or fragment"
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_bool(name: &str, value: &str) -> HarnessResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(HarnessError::Configuration(format!(
            "{name} must be a boolean, got '{value}'"
        ))),
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> HarnessResult<T> {
    value.parse().map_err(|_| {
        HarnessError::Configuration(format!("{name} must be a non-negative integer, got '{value}'"))
    })
}

fn resolve_credentials<F>(
    profile: Profile,
    mut explicit: BTreeMap<Role, Credentials>,
    env: &F,
) -> HarnessResult<BTreeMap<Role, Credentials>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(role) = explicit.keys().find(|role| !role.is_privileged()) {
        return Err(HarnessError::Configuration(format!(
            "credentials cannot be configured for role '{role}'"
        )));
    }

    let mut resolved = BTreeMap::new();
    let mut missing = Vec::new();

    for role in Role::PRIVILEGED {
        if let Some(creds) = explicit.remove(&role) {
            resolved.insert(role, creds);
            continue;
        }

        let Some(prefix) = role.env_prefix() else {
            continue;
        };
        let username = env(&format!("{prefix}_USERNAME"));
        let password = env(&format!("{prefix}_PASSWORD"));
        match (username, password, profile) {
            (Some(username), Some(password), _) => {
                resolved.insert(role, Credentials::new(username, password));
            }
            (username, password, Profile::Development) => {
                if let Some(fixture) = role.fixture_credentials() {
                    resolved.insert(
                        role,
                        Credentials::new(
                            username.unwrap_or(fixture.username),
                            password.unwrap_or(fixture.password),
                        ),
                    );
                }
            }
            _ => missing.push(format!("{prefix}_USERNAME/{prefix}_PASSWORD")),
        }
    }

    if !missing.is_empty() {
        return Err(HarnessError::Configuration(format!(
            "profile {:?} refuses built-in credentials; set {}",
            profile,
            missing.join(", ")
        )));
    }

    Ok(resolved)
}
