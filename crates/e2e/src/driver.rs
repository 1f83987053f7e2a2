//! Page operations the harness depends on
//!
//! [`Driver`] is the seam between scenario logic and the browser. The Chrome
//! implementation is [`crate::page::CdpPage`]; integration tests script an
//! in-memory site behind the same trait.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::HarnessResult;
use crate::locator::Locator;
use crate::wait::{poll_for, ReadyPlan, WaitConfig};

/// A visible element found by [`Driver::find_visible`]. Handles are only valid
/// until the next navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHandle {
    /// Index of the matching locator in the list that was probed.
    pub locator: usize,
    /// Index among that locator's visible matches.
    pub index: usize,
}

/// How to pick an `<option>` of a `<select>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionChoice {
    Label { label: String },
    Value { value: String },
    Index { index: usize },
}

impl std::fmt::Display for OptionChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionChoice::Label { label } => write!(f, "label '{label}'"),
            OptionChoice::Value { value } => write!(f, "value '{value}'"),
            OptionChoice::Index { index } => write!(f, "index {index}"),
        }
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    /// Start a navigation. Does not wait for readiness.
    async fn goto(&self, url: &Url) -> HarnessResult<()>;

    /// Block until the page satisfies `plan`, or fail with a timeout.
    async fn wait_ready(&self, plan: &ReadyPlan) -> HarnessResult<()>;

    async fn current_url(&self) -> HarnessResult<String>;

    /// Single probe, no waiting: the `nth` visible element matched by the
    /// first locator that has more than `nth` visible matches.
    async fn find_visible(
        &self,
        locators: &[Locator],
        nth: usize,
    ) -> HarnessResult<Option<ElementHandle>>;

    /// Click the element. Returns `true` when the click started a navigation.
    async fn click(&self, locators: &[Locator], element: ElementHandle) -> HarnessResult<bool>;

    async fn fill(
        &self,
        locators: &[Locator],
        element: ElementHandle,
        value: &str,
    ) -> HarnessResult<()>;

    /// Returns `false` when the select has no option matching `choice`.
    async fn select(
        &self,
        locators: &[Locator],
        element: ElementHandle,
        choice: &OptionChoice,
    ) -> HarnessResult<bool>;

    async fn reload(&self) -> HarnessResult<()>;

    /// Full-page PNG.
    async fn screenshot(&self) -> HarnessResult<Vec<u8>>;
}

/// Poll for the first visible element among `locators` for up to `timeout`.
/// Absence is `Ok(None)`, not an error.
pub async fn first_visible(
    driver: &dyn Driver,
    locators: &[Locator],
    nth: usize,
    timeout: Duration,
) -> HarnessResult<Option<ElementHandle>> {
    if locators.is_empty() {
        return Ok(None);
    }
    poll_for(
        move || driver.find_visible(locators, nth),
        WaitConfig::with_timeout(timeout),
    )
    .await
}
