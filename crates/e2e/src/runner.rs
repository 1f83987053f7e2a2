//! Scenario runner: sessions, deadlines, leases and cancellation
//!
//! Each scenario gets a fresh session from the [`SessionProvider`], runs under
//! its own deadline and always releases the session before its result is
//! recorded. Up to `workers` scenarios run at once; results come back in the
//! order the scenarios were given.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HarnessConfig;
use crate::error::{FailureKind, HarnessError, HarnessResult};
use crate::executor::{Executor, ScenarioTrace};
use crate::report::{ScenarioResult, Status, SuiteResult};
use crate::role::Role;
use crate::scenario::{Scenario, AFTER_TAG};
use crate::screenshot::ScreenshotRecorder;
use crate::session::{ChromeSessionProvider, Session, SessionProvider};

pub struct Runner {
    config: Arc<HarnessConfig>,
    provider: Arc<dyn SessionProvider>,
    recorder: ScreenshotRecorder,
    cancel: CancellationToken,
    /// One permit per role when roles are serialized
    leases: HashMap<Role, Arc<Semaphore>>,
}

impl Runner {
    pub fn new(config: HarnessConfig, provider: Arc<dyn SessionProvider>) -> HarnessResult<Self> {
        let recorder = ScreenshotRecorder::new(config.screenshot_root()?);
        let leases = if config.serialize_roles {
            Role::PRIVILEGED
                .iter()
                .map(|role| (*role, Arc::new(Semaphore::new(1))))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            config: Arc::new(config),
            provider,
            recorder,
            cancel: CancellationToken::new(),
            leases,
        })
    }

    /// A runner that launches a local Chrome per scenario.
    pub fn chrome(config: HarnessConfig) -> HarnessResult<Self> {
        let provider = Arc::new(ChromeSessionProvider::from_config(&config));
        Self::new(config, provider)
    }

    /// Share an existing token, e.g. one cancelled from a Ctrl-C handler.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run `scenarios` and collect their results in input order.
    pub async fn run(&self, scenarios: &[Scenario]) -> SuiteResult {
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            "Running {} scenario(s) against {} with {} worker(s)...",
            scenarios.len(),
            self.config.base_url(),
            self.config.workers
        );

        let mut indexed: Vec<(usize, ScenarioResult)> = stream::iter(scenarios.iter().enumerate())
            .map(|(index, scenario)| async move { (index, self.run_one(scenario).await) })
            .buffer_unordered(self.config.workers)
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);

        let results = indexed.into_iter().map(|(_, result)| result).collect();
        let duration_ms = start.elapsed().as_millis() as u64;
        let suite = SuiteResult::new(self.config.base_url().as_str(), started_at, duration_ms, results);

        info!("");
        info!(
            "Scenario Results: {} passed, {} failed, {} cancelled, {} skipped ({} ms)",
            suite.passed, suite.failed, suite.cancelled, suite.skipped, suite.duration_ms
        );
        suite
    }

    /// Run a single scenario. Never returns an error: every failure ends up
    /// in the result.
    pub async fn run_one(&self, scenario: &Scenario) -> ScenarioResult {
        let start = Instant::now();
        let mut result = ScenarioResult::start(scenario);

        if self.cancel.is_cancelled() {
            debug!("[{}] skipped, run was cancelled", scenario.id);
            return result;
        }

        let Some(_lease) = self.lease(scenario.role).await else {
            debug!("[{}] skipped while waiting for the {} lease", scenario.id, scenario.role);
            return result;
        };

        let opened = tokio::select! {
            _ = self.cancel.cancelled() => None,
            opened = self.provider.open(&scenario.id) => Some(opened),
        };
        let session = match opened {
            None => return result,
            Some(Ok(session)) => session,
            Some(Err(e)) => {
                let err = as_setup_failure(e);
                error!("✗ {} - {}", scenario.id, err);
                result.fail(&err);
                result.duration_ms = start.elapsed().as_millis() as u64;
                return result;
            }
        };

        let (outcome, trace) = self.execute(scenario, session.as_ref()).await;

        if let Err(e) = session.close().await {
            warn!("[{}] session teardown failed: {}", scenario.id, e);
        }

        result.final_url = trace.last_url;
        result.last_screenshot = trace.last_screenshot;
        result.artifacts = trace.artifacts;
        result.steps_completed = trace.steps_completed;
        result.duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                result.status = Status::Passed;
                info!("✓ {} ({} ms)", scenario.id, result.duration_ms);
            }
            Err(e) => {
                result.fail(&e);
                if result.status == Status::Cancelled {
                    warn!("⊘ {} cancelled after {} ms", scenario.id, result.duration_ms);
                } else {
                    error!("✗ {} - {}", scenario.id, e);
                }
            }
        }
        result
    }

    /// Drive the scenario on an open session, then take the final capture
    /// and note where the page ended up.
    async fn execute(
        &self,
        scenario: &Scenario,
        session: &dyn Session,
    ) -> (HarnessResult<()>, ScenarioTrace) {
        let page = session.driver();
        let executor = Executor::new(&self.config, &self.recorder);
        let deadline = self.config.timeouts.scenario();
        let mut trace = ScenarioTrace::default();

        let mut outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(HarnessError::Cancelled),
            run = tokio::time::timeout(deadline, executor.run(scenario, page, &mut trace)) => {
                match run {
                    Ok(outcome) => outcome,
                    Err(_) => Err(HarnessError::timeout(
                        format!("scenario {}", scenario.id),
                        deadline,
                    )),
                }
            }
        };

        let interrupted = matches!(
            &outcome,
            Err(e) if matches!(e.kind(), FailureKind::Timeout | FailureKind::Cancelled)
        );
        if interrupted {
            return (outcome, trace);
        }

        if let Err(e) = executor.capture(scenario, page, AFTER_TAG, &mut trace).await {
            warn!("[{}] final screenshot failed: {}", scenario.id, e);
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }

        if outcome.is_err() {
            let probe = self.config.timeouts.probe();
            if let Ok(Ok(url)) = tokio::time::timeout(probe, page.current_url()).await {
                trace.last_url = Some(url);
            }
        }

        (outcome, trace)
    }

    /// Wait for the role's lease. `None` means the run was cancelled while
    /// waiting; roles without a lease get a dummy guard.
    async fn lease(&self, role: Role) -> Option<Option<OwnedSemaphorePermit>> {
        let Some(semaphore) = self.leases.get(&role) else {
            return Some(None);
        };
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => Some(permit.ok()),
        }
    }
}

fn as_setup_failure(err: HarnessError) -> HarnessError {
    match err {
        err @ HarnessError::SetupFailed { .. } => err,
        other => HarnessError::SetupFailed {
            reason: other.to_string(),
            source: Some(Box::new(other)),
        },
    }
}
