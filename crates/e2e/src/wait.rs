//! Bounded waiting
//!
//! Every wait in the harness has an upper bound. Two flavours exist:
//! [`wait_for`] / [`wait_for_result`] turn expiry into a [`HarnessError::Timeout`],
//! while [`poll_for`] returns `None` so that callers can treat absence as a
//! normal outcome (optional elements, probes).

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::config::Timeouts;
use crate::error::{HarnessError, HarnessResult};

/// Default timeout for wait operations (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default poll interval for checking conditions (100ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct WaitConfig {
    /// Maximum time to wait for the condition.
    pub timeout: Duration,

    /// How often to check if the condition is satisfied.
    pub poll_interval: Duration,
}

impl WaitConfig {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Custom timeout with the default poll interval.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, DEFAULT_POLL_INTERVAL.min(timeout))
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

/// Waits for a condition to become true. The condition is always evaluated at
/// least once, even with a zero timeout.
pub async fn wait_for<F, Fut>(
    condition: F,
    config: WaitConfig,
    description: &str,
) -> HarnessResult<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();

    loop {
        if condition().await {
            return Ok(());
        }

        if start.elapsed() >= config.timeout {
            return Err(HarnessError::timeout(description, config.timeout));
        }

        sleep(config.poll_interval).await;
    }
}

/// Like [`wait_for`], but the condition may fail. Errors are treated as
/// transient and polling continues; the last one is dropped on timeout.
pub async fn wait_for_result<F, Fut>(
    condition: F,
    config: WaitConfig,
    description: &str,
) -> HarnessResult<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = HarnessResult<bool>>,
{
    let start = Instant::now();

    loop {
        match condition().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => tracing::trace!("{} not ready: {}", description, e),
        }

        if start.elapsed() >= config.timeout {
            return Err(HarnessError::timeout(description, config.timeout));
        }

        sleep(config.poll_interval).await;
    }
}

/// Polls `probe` until it yields a value. Returns `Ok(None)` when the timeout
/// expires; hard errors from the probe propagate immediately.
pub async fn poll_for<T, F, Fut>(probe: F, config: WaitConfig) -> HarnessResult<Option<T>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = HarnessResult<Option<T>>>,
{
    let start = Instant::now();

    loop {
        if let Some(value) = probe().await? {
            return Ok(Some(value));
        }

        if start.elapsed() >= config.timeout {
            return Ok(None);
        }

        sleep(config.poll_interval).await;
    }
}

/// What "the page is ready" means after a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Load complete and no new network activity for the quiet period.
    #[default]
    NetworkIdle,
    /// DOMContentLoaded fired, followed by a fixed settle delay.
    DomReady,
}

/// A fully resolved readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyPlan {
    pub readiness: Readiness,
    pub quiet: Duration,
    pub settle: Duration,
    pub timeout: Duration,
}

impl ReadyPlan {
    /// Build a plan from configured timeouts, optionally overriding the settle delay.
    pub fn new(readiness: Readiness, timeouts: &Timeouts, settle_ms: Option<u64>) -> Self {
        Self {
            readiness,
            quiet: timeouts.network_quiet(),
            settle: settle_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| timeouts.dom_settle()),
            timeout: timeouts.navigation(),
        }
    }

    pub fn network_idle(timeouts: &Timeouts) -> Self {
        Self::new(Readiness::NetworkIdle, timeouts, None)
    }
}
