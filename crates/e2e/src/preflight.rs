//! Reachability check of the application before any browser is launched

use std::time::{Duration, Instant};

use reqwest::Url;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::session::USER_AGENT;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Poll `base_url` until it answers. Any HTTP response counts, including
/// redirects and error statuses; only connection-level failures retry.
pub async fn check_reachable(base_url: &Url, timeout: Duration) -> HarnessResult<()> {
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let start = Instant::now();
    let mut attempts = 0;
    let mut last_error = None;

    while attempts == 0 || start.elapsed() < timeout {
        attempts += 1;
        match client.get(base_url.clone()).send().await {
            Ok(resp) => {
                debug!("{} answered {}", base_url, resp.status());
                return Ok(());
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for {} to answer...", base_url);
                }
                if !e.is_connect() {
                    warn!("Reachability check error: {}", e);
                }
                last_error = Some(e);
            }
        }

        sleep(RETRY_INTERVAL).await;
    }

    Err(HarnessError::SetupFailed {
        reason: format!("{base_url} did not answer after {attempts} attempt(s)"),
        source: last_error.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
    })
}
