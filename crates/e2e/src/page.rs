//! Chrome implementation of [`Driver`]
//!
//! Element work happens in page scripts. Each script re-resolves the element
//! from its locator list and index, so a handle never holds a remote object
//! reference across calls. Scripts return `JSON.stringify(..)` payloads that
//! are decoded with serde on this side.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page as ChromePage, ScreenshotParams};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::driver::{Driver, ElementHandle, OptionChoice};
use crate::error::{HarnessError, HarnessResult};
use crate::locator::Locator;
use crate::wait::{wait_for_result, ReadyPlan, Readiness, WaitConfig, DEFAULT_POLL_INTERVAL};

/// How long a click gets to replace the current document before it is
/// treated as an in-page action.
const CLICK_NAVIGATION_GRACE: Duration = Duration::from_millis(750);

const PRELUDE: &str = r#"
const norm = (s) => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
const visible = (el) => {
  const st = window.getComputedStyle(el);
  if (st.display === 'none' || st.visibility === 'hidden' || parseFloat(st.opacity) === 0) return false;
  const r = el.getBoundingClientRect();
  return r.width > 0 && r.height > 0;
};
const candidates = (loc) => {
  let els;
  try { els = Array.from(document.querySelectorAll(loc.css)); } catch (e) { return []; }
  if (loc.text !== null && loc.text !== undefined) {
    const want = norm(loc.text);
    els = els.filter((el) => norm(el.innerText || el.textContent).includes(want));
    if (loc.leaf) els = els.filter((el) => !els.some((o) => o !== el && el.contains(o)));
  }
  return els.filter(visible);
};
const resolve = (locs, h) => {
  const loc = locs[h.locator];
  return loc ? candidates(loc)[h.index] : undefined;
};
"#;

#[derive(Debug, Deserialize)]
struct Found {
    locator: usize,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct Outcome {
    ok: bool,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoadState {
    ready: String,
    resources: usize,
}

/// A browser tab driven over CDP.
pub struct CdpPage {
    inner: ChromePage,
    navigation_timeout: Duration,
}

impl CdpPage {
    pub fn new(inner: ChromePage, navigation_timeout: Duration) -> Self {
        Self {
            inner,
            navigation_timeout,
        }
    }

    /// Run `body` inside an isolated function with the prelude in scope and
    /// decode its JSON result.
    async fn run_script<T: DeserializeOwned>(&self, body: &str) -> HarnessResult<T> {
        let script = format!("String((() => {{ {PRELUDE}\n{body} }})())");
        let raw: String = self.inner.evaluate(script.as_str()).await?.into_value()?;
        trace!("script result: {}", raw);
        Ok(serde_json::from_str(&raw)?)
    }

    async fn element_action(
        &self,
        locators: &[Locator],
        element: ElementHandle,
        action: &str,
        action_body: &str,
    ) -> HarnessResult<Outcome> {
        let locs = serde_json::to_string(locators)?;
        let handle = serde_json::to_string(&serde_json::json!({
            "locator": element.locator,
            "index": element.index,
        }))?;
        let body = format!(
            "const el = resolve({locs}, {handle});\n\
             if (!el) return JSON.stringify({{ ok: false, reason: 'element detached' }});\n\
             {action_body}"
        );
        let outcome: Outcome = self.run_script(&body).await?;
        if !outcome.ok {
            debug!(
                "{} on {} failed: {}",
                action,
                describe(locators, element),
                outcome.reason.as_deref().unwrap_or("unknown")
            );
        }
        Ok(outcome)
    }

    async fn load_state(&self) -> HarnessResult<LoadState> {
        self.run_script(
            "return JSON.stringify({ ready: document.readyState, \
             resources: performance.getEntriesByType('resource').length });",
        )
        .await
    }

    async fn wait_network_idle(&self, plan: &ReadyPlan) -> HarnessResult<()> {
        let start = Instant::now();
        let mut stable: Option<(usize, Instant)> = None;

        loop {
            match self.load_state().await {
                Ok(state) if state.ready == "complete" => match stable {
                    Some((count, since)) if count == state.resources => {
                        if since.elapsed() >= plan.quiet {
                            return Ok(());
                        }
                    }
                    _ => stable = Some((state.resources, Instant::now())),
                },
                Ok(_) => stable = None,
                Err(e) => {
                    trace!("load state unavailable: {}", e);
                    stable = None;
                }
            }

            if start.elapsed() >= plan.timeout {
                return Err(HarnessError::timeout("network idle", plan.timeout));
            }
            sleep(DEFAULT_POLL_INTERVAL).await;
        }
    }

    async fn wait_dom_ready(&self, plan: &ReadyPlan) -> HarnessResult<()> {
        let page = self;
        wait_for_result(
            move || async move {
                let state = page.load_state().await?;
                Ok(state.ready != "loading")
            },
            WaitConfig::with_timeout(plan.timeout),
            "DOMContentLoaded",
        )
        .await?;
        sleep(plan.settle).await;
        Ok(())
    }
}

#[async_trait]
impl Driver for CdpPage {
    async fn goto(&self, url: &Url) -> HarnessResult<()> {
        debug!("goto {}", url);
        tokio::time::timeout(self.navigation_timeout, self.inner.goto(url.as_str()))
            .await
            .map_err(|_| HarnessError::timeout(format!("navigation to {url}"), self.navigation_timeout))??;
        Ok(())
    }

    async fn wait_ready(&self, plan: &ReadyPlan) -> HarnessResult<()> {
        match plan.readiness {
            Readiness::NetworkIdle => self.wait_network_idle(plan).await,
            Readiness::DomReady => self.wait_dom_ready(plan).await,
        }
    }

    async fn current_url(&self) -> HarnessResult<String> {
        let url: String = self
            .inner
            .evaluate("window.location.href")
            .await?
            .into_value()?;
        Ok(url)
    }

    async fn find_visible(
        &self,
        locators: &[Locator],
        nth: usize,
    ) -> HarnessResult<Option<ElementHandle>> {
        let locs = serde_json::to_string(locators)?;
        let body = format!(
            "const locs = {locs};\n\
             for (let i = 0; i < locs.length; i++) {{\n\
               if (candidates(locs[i]).length > {nth}) return JSON.stringify({{ locator: i, index: {nth} }});\n\
             }}\n\
             return JSON.stringify(null);"
        );
        // A document being replaced mid-probe reads as "nothing visible yet".
        let found: Option<Found> = match self.run_script(&body).await {
            Ok(found) => found,
            Err(HarnessError::Driver(e)) => {
                trace!("probe interrupted: {}", e);
                None
            }
            Err(e) => return Err(e),
        };
        Ok(found.map(|f| ElementHandle {
            locator: f.locator,
            index: f.index,
        }))
    }

    async fn click(&self, locators: &[Locator], element: ElementHandle) -> HarnessResult<bool> {
        let outcome = self
            .element_action(
                locators,
                element,
                "click",
                "window.__harnessMarker = true;\n\
                 el.scrollIntoView({ block: 'center', inline: 'center' });\n\
                 el.click();\n\
                 return JSON.stringify({ ok: true });",
            )
            .await;

        match outcome {
            Ok(o) if !o.ok => {
                return Err(HarnessError::Driver(format!(
                    "cannot click {}: {}",
                    describe(locators, element),
                    o.reason.unwrap_or_default()
                )))
            }
            Ok(_) => {}
            // The document went away while the click handler ran.
            Err(e) => {
                debug!("click evaluation interrupted: {}", e);
                return Ok(true);
            }
        }

        let start = Instant::now();
        while start.elapsed() < CLICK_NAVIGATION_GRACE {
            sleep(DEFAULT_POLL_INTERVAL).await;
            let marker = match self.inner.evaluate("window.__harnessMarker === true").await {
                Ok(result) => result.into_value::<bool>().unwrap_or(false),
                Err(_) => false,
            };
            if !marker {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn fill(
        &self,
        locators: &[Locator],
        element: ElementHandle,
        value: &str,
    ) -> HarnessResult<()> {
        let value = serde_json::to_string(value)?;
        let body = format!(
            "const value = {value};\n\
             el.scrollIntoView({{ block: 'center' }});\n\
             el.focus();\n\
             let proto = null;\n\
             if (el instanceof HTMLTextAreaElement) proto = HTMLTextAreaElement.prototype;\n\
             else if (el instanceof HTMLInputElement) proto = HTMLInputElement.prototype;\n\
             const desc = proto ? Object.getOwnPropertyDescriptor(proto, 'value') : null;\n\
             if (desc && desc.set) desc.set.call(el, value); else el.value = value;\n\
             el.dispatchEvent(new Event('input', {{ bubbles: true }}));\n\
             el.dispatchEvent(new Event('change', {{ bubbles: true }}));\n\
             return JSON.stringify({{ ok: true }});"
        );
        let outcome = self.element_action(locators, element, "fill", &body).await?;
        if outcome.ok {
            Ok(())
        } else {
            Err(HarnessError::Driver(format!(
                "cannot fill {}: {}",
                describe(locators, element),
                outcome.reason.unwrap_or_default()
            )))
        }
    }

    async fn select(
        &self,
        locators: &[Locator],
        element: ElementHandle,
        choice: &OptionChoice,
    ) -> HarnessResult<bool> {
        let choice = serde_json::to_string(choice)?;
        let body = format!(
            "const choice = {choice};\n\
             if (!(el instanceof HTMLSelectElement)) return JSON.stringify({{ ok: false, reason: 'not a select element' }});\n\
             const opts = Array.from(el.options);\n\
             let idx = -1;\n\
             if (choice.label !== undefined) idx = opts.findIndex((o) => norm(o.label || o.text) === norm(choice.label));\n\
             else if (choice.value !== undefined) idx = opts.findIndex((o) => o.value === choice.value);\n\
             else if (choice.index < opts.length) idx = choice.index;\n\
             if (idx < 0) return JSON.stringify({{ ok: false, reason: 'no matching option' }});\n\
             el.selectedIndex = idx;\n\
             el.dispatchEvent(new Event('input', {{ bubbles: true }}));\n\
             el.dispatchEvent(new Event('change', {{ bubbles: true }}));\n\
             return JSON.stringify({{ ok: true }});"
        );
        let outcome = self
            .element_action(locators, element, "select", &body)
            .await?;
        Ok(outcome.ok)
    }

    async fn reload(&self) -> HarnessResult<()> {
        tokio::time::timeout(self.navigation_timeout, self.inner.reload())
            .await
            .map_err(|_| HarnessError::timeout("reload", self.navigation_timeout))??;
        Ok(())
    }

    async fn screenshot(&self) -> HarnessResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        Ok(self.inner.screenshot(params).await?)
    }
}

fn describe(locators: &[Locator], element: ElementHandle) -> String {
    match locators.get(element.locator) {
        Some(locator) if element.index > 0 => format!("{} (#{})", locator, element.index),
        Some(locator) => locator.to_string(),
        None => format!("locator #{}", element.locator),
    }
}
