//! Runs one scenario on a borrowed page
//!
//! The executor never owns the page; the runner opens and closes sessions.
//! Everything it learns along the way (URLs, artifacts) goes into a
//! [`ScenarioTrace`] so that partial progress survives a failure or a
//! deadline.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::auth::Authenticator;
use crate::config::HarnessConfig;
use crate::driver::{first_visible, Driver, OptionChoice};
use crate::error::{HarnessError, HarnessResult};
use crate::locator::Locator;
use crate::scenario::{CredentialField, FillValue, Scenario, Step};
use crate::screenshot::{artifact_path, Artifact, ScreenshotRecorder};
use crate::wait::{wait_for, ReadyPlan, Readiness, WaitConfig};

/// What a scenario has done so far.
#[derive(Debug, Clone, Default)]
pub struct ScenarioTrace {
    pub last_url: Option<String>,
    /// Full path of the most recent capture
    pub last_screenshot: Option<PathBuf>,
    pub artifacts: Vec<Artifact>,
    pub steps_completed: usize,
}

pub struct Executor<'a> {
    config: &'a HarnessConfig,
    recorder: &'a ScreenshotRecorder,
}

impl<'a> Executor<'a> {
    pub fn new(config: &'a HarnessConfig, recorder: &'a ScreenshotRecorder) -> Self {
        Self { config, recorder }
    }

    pub async fn run(
        &self,
        scenario: &Scenario,
        page: &dyn Driver,
        trace: &mut ScenarioTrace,
    ) -> HarnessResult<()> {
        if scenario.role.is_privileged() {
            let url = Authenticator::new(self.config)
                .login(page, scenario.role)
                .await?;
            trace.last_url = Some(url);
        }

        if let Some(target) = &scenario.target {
            self.navigate(page, target, scenario.readiness, scenario.settle_ms)
                .await?;
            trace.last_url = Some(page.current_url().await?);
        }

        for (index, step) in scenario.steps.iter().enumerate() {
            debug!("[{}] step {}: {}", scenario.id, index + 1, step.action());
            self.step(scenario, page, step, trace)
                .await
                .map_err(|e| in_step(e, index, step))?;
            trace.steps_completed += 1;
        }

        let url = self
            .expect_url(page, &scenario.expect_url, self.config.timeouts.probe())
            .await?;
        info!("[{}] reached {}", scenario.id, url);
        trace.last_url = Some(url);
        Ok(())
    }

    /// Write `<category>/<ID>-<tag>.png` and record it in the trace.
    pub async fn capture(
        &self,
        scenario: &Scenario,
        page: &dyn Driver,
        tag: &str,
        trace: &mut ScenarioTrace,
    ) -> HarnessResult<()> {
        let relative = artifact_path(&scenario.category, &scenario.id, tag);
        if let Some(artifact) = self.recorder.take(page, &relative).await? {
            trace.last_screenshot = Some(self.recorder.root().join(&artifact.path));
            trace.artifacts.push(artifact);
        }
        Ok(())
    }

    async fn step(
        &self,
        scenario: &Scenario,
        page: &dyn Driver,
        step: &Step,
        trace: &mut ScenarioTrace,
    ) -> HarnessResult<()> {
        let timeouts = &self.config.timeouts;

        match step {
            Step::Navigate {
                url,
                readiness,
                settle_ms,
            } => {
                self.navigate(
                    page,
                    url,
                    readiness.unwrap_or(scenario.readiness),
                    settle_ms.or(scenario.settle_ms),
                )
                .await?;
                trace.last_url = Some(page.current_url().await?);
            }

            Step::Click {
                selectors,
                timeout_ms,
                fallback_url,
                required,
                readiness,
            } => {
                let locators = Locator::parse_all(selectors)?;
                let fallback = if *required {
                    timeouts.navigation()
                } else {
                    timeouts.probe()
                };
                let timeout = bound(*timeout_ms, fallback);
                let plan = ReadyPlan::new(
                    readiness.unwrap_or(scenario.readiness),
                    timeouts,
                    scenario.settle_ms,
                );

                match first_visible(page, &locators, 0, timeout).await? {
                    Some(element) => {
                        let navigated = page.click(&locators, element).await?;
                        debug!("[{}] clicked (navigated: {})", scenario.id, navigated);
                        page.wait_ready(&plan).await?;
                    }
                    None => match fallback_url {
                        Some(url) => {
                            debug!("[{}] nothing to click, falling back to {}", scenario.id, url);
                            self.navigate(page, url, plan.readiness, scenario.settle_ms)
                                .await?;
                        }
                        None if *required => {
                            return Err(HarnessError::AssertionFailed(format!(
                                "none of [{}] became visible",
                                selectors.join(", ")
                            )))
                        }
                        None => debug!("[{}] nothing to click, skipping", scenario.id),
                    },
                }
                trace.last_url = Some(page.current_url().await?);
            }

            Step::Fill {
                selectors,
                value,
                nth,
                optional,
                timeout_ms,
            } => {
                let locators = Locator::parse_all(selectors)?;
                let fallback = if *optional {
                    timeouts.probe()
                } else {
                    timeouts.navigation()
                };
                match first_visible(page, &locators, *nth, bound(*timeout_ms, fallback)).await? {
                    Some(element) => {
                        let value = self.resolve_value(value)?;
                        page.fill(&locators, element, &value).await?;
                    }
                    None if *optional => {
                        debug!("[{}] optional field absent: {}", scenario.id, selectors.join(", "))
                    }
                    None => {
                        return Err(HarnessError::AssertionFailed(format!(
                            "field [{}] not found",
                            selectors.join(", ")
                        )))
                    }
                }
            }

            Step::Select {
                selectors,
                option,
                options,
                optional,
                timeout_ms,
            } => {
                let locators = Locator::parse_all(selectors)?;
                let choices: Vec<&OptionChoice> = option.iter().chain(options.iter()).collect();
                let fallback = if *optional {
                    timeouts.probe()
                } else {
                    timeouts.navigation()
                };

                let Some(element) =
                    first_visible(page, &locators, 0, bound(*timeout_ms, fallback)).await?
                else {
                    if *optional {
                        debug!("[{}] optional select absent: {}", scenario.id, selectors.join(", "));
                        return Ok(());
                    }
                    return Err(HarnessError::AssertionFailed(format!(
                        "select [{}] not found",
                        selectors.join(", ")
                    )));
                };

                let mut chosen = false;
                for choice in &choices {
                    if page.select(&locators, element, choice).await? {
                        debug!("[{}] selected {}", scenario.id, choice);
                        chosen = true;
                        break;
                    }
                }
                if !chosen {
                    let tried = choices
                        .iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    if !*optional {
                        return Err(HarnessError::AssertionFailed(format!(
                            "no option matching {tried}"
                        )));
                    }
                    debug!("[{}] no option matching {}", scenario.id, tried);
                }
            }

            Step::Reload { readiness } => {
                page.reload().await?;
                let plan = ReadyPlan::new(
                    readiness.unwrap_or(scenario.readiness),
                    timeouts,
                    scenario.settle_ms,
                );
                page.wait_ready(&plan).await?;
            }

            Step::ExpectUrl { any_of, timeout_ms } => {
                let url = self
                    .expect_url(page, any_of, bound(*timeout_ms, timeouts.probe()))
                    .await?;
                trace.last_url = Some(url);
            }

            Step::ExpectVisible { any_of, timeout_ms } => {
                let locators = Locator::parse_all(any_of)?;
                let timeout = bound(*timeout_ms, timeouts.probe());
                if first_visible(page, &locators, 0, timeout).await?.is_none() {
                    return Err(HarnessError::AssertionFailed(format!(
                        "none of [{}] visible within {:?}",
                        any_of.join(", "),
                        timeout
                    )));
                }
            }

            Step::Screenshot { tag } => self.capture(scenario, page, tag, trace).await?,

            Step::Sleep { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        }

        Ok(())
    }

    async fn navigate(
        &self,
        page: &dyn Driver,
        path: &str,
        readiness: Readiness,
        settle_ms: Option<u64>,
    ) -> HarnessResult<()> {
        let url = self.config.url_for(path)?;
        page.goto(&url).await?;
        page.wait_ready(&ReadyPlan::new(readiness, &self.config.timeouts, settle_ms))
            .await
    }

    /// Wait until the current URL contains one of `fragments`.
    async fn expect_url(
        &self,
        page: &dyn Driver,
        fragments: &[String],
        timeout: Duration,
    ) -> HarnessResult<String> {
        let matched = wait_for(
            move || async move {
                match page.current_url().await {
                    Ok(url) => fragments.iter().any(|f| url.contains(f.as_str())),
                    Err(_) => false,
                }
            },
            WaitConfig::with_timeout(timeout),
            "URL invariant",
        )
        .await;

        let actual = page.current_url().await?;
        match matched {
            Ok(()) => Ok(actual),
            Err(_) => Err(HarnessError::UrlMismatch {
                expected: fragments.to_vec(),
                actual,
            }),
        }
    }

    fn resolve_value(&self, value: &FillValue) -> HarnessResult<String> {
        match value {
            FillValue::Literal(text) => Ok(text.clone()),
            FillValue::Credential { credential } => {
                let creds = self.config.credentials(credential.role)?;
                Ok(match credential.field {
                    CredentialField::Username => creds.username.clone(),
                    CredentialField::Password => creds.password.clone(),
                })
            }
        }
    }
}

fn bound(timeout_ms: Option<u64>, fallback: Duration) -> Duration {
    timeout_ms.map(Duration::from_millis).unwrap_or(fallback)
}

/// Prefix assertion messages with the failing step.
fn in_step(err: HarnessError, index: usize, step: &Step) -> HarnessError {
    match err {
        HarnessError::AssertionFailed(message) => HarnessError::AssertionFailed(format!(
            "step {} ({}): {}",
            index + 1,
            step.action(),
            message
        )),
        other => other,
    }
}
