//! Browser sessions
//!
//! Every scenario gets its own browser process with a throwaway profile, so
//! cookies and storage never leak between scenarios. A session is released
//! with [`Session::close`]; dropping it without closing still stops the CDP
//! handler and removes the profile directory.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::viewport::Viewport;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::HarnessConfig;
use crate::driver::Driver;
use crate::error::{HarnessError, HarnessResult};
use crate::page::CdpPage;

/// Fixed user agent so server-side behaviour does not depend on the local Chrome build.
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 ClinicE2E/0.1";

pub const VIEWPORT: (u32, u32) = (1920, 1080);

/// Upper bound for each teardown phase: the CDP close request, and the
/// process exit after it (or after a kill).
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// An open page owned by one scenario.
#[async_trait]
pub trait Session: Send {
    fn driver(&self) -> &dyn Driver;

    /// Tear the session down. Errors are reported, never retried.
    async fn close(self: Box<Self>) -> HarnessResult<()>;
}

/// Creates sessions on demand.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self, scenario_id: &str) -> HarnessResult<Box<dyn Session>>;
}

#[derive(Debug, Clone)]
pub struct ChromeSessionProvider {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub window: (u32, u32),
    pub user_agent: String,
    pub launch_timeout: Duration,
    pub navigation_timeout: Duration,
    pub extra_args: Vec<String>,
}

impl ChromeSessionProvider {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            headless: config.headless,
            chrome_path: config.chrome_path.clone(),
            window: VIEWPORT,
            user_agent: USER_AGENT.to_string(),
            launch_timeout: config.timeouts.launch(),
            navigation_timeout: config.timeouts.navigation(),
            extra_args: vec![
                // Containers usually lack user namespaces and a large /dev/shm.
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
            ],
        }
    }

    fn browser_config(&self, profile: &TempDir) -> HarnessResult<BrowserConfig> {
        let (width, height) = self.window;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .viewport(Viewport {
                width,
                height,
                ..Viewport::default()
            })
            .arg(format!("--user-data-dir={}", profile.path().display()))
            .arg(format!("--user-agent={}", self.user_agent));

        for arg in &self.extra_args {
            builder = builder.arg(arg.clone());
        }
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.chrome_path {
            builder = builder.chrome_executable(path.clone());
        }

        builder
            .build()
            .map_err(|e| HarnessError::setup(format!("invalid browser configuration: {e}")))
    }
}

#[async_trait]
impl SessionProvider for ChromeSessionProvider {
    async fn open(&self, scenario_id: &str) -> HarnessResult<Box<dyn Session>> {
        let profile = tempfile::Builder::new()
            .prefix(&format!("clinic-e2e-{}-", scenario_id.to_ascii_lowercase()))
            .tempdir()
            .map_err(|e| HarnessError::SetupFailed {
                reason: "cannot create browser profile directory".to_string(),
                source: Some(Box::new(e)),
            })?;

        let config = self.browser_config(&profile)?;
        debug!("[{}] launching browser (headless: {})", scenario_id, self.headless);

        let (mut browser, mut handler) =
            tokio::time::timeout(self.launch_timeout, Browser::launch(config))
                .await
                .map_err(|_| {
                    HarnessError::setup(format!(
                        "browser did not start within {:?}",
                        self.launch_timeout
                    ))
                })?
                .map_err(|e| HarnessError::SetupFailed {
                    reason: "failed to launch Chrome".to_string(),
                    source: Some(Box::new(e)),
                })?;

        let id = scenario_id.to_string();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("[{}] browser handler error: {}", id, e);
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                handler_task.abort();
                return Err(HarnessError::SetupFailed {
                    reason: "failed to open a page".to_string(),
                    source: Some(Box::new(e)),
                });
            }
        };

        Ok(Box::new(ChromeSession {
            browser,
            page: CdpPage::new(page, self.navigation_timeout),
            handler: handler_task,
            _profile: profile,
        }))
    }
}

pub struct ChromeSession {
    browser: Browser,
    page: CdpPage,
    handler: JoinHandle<()>,
    _profile: TempDir,
}

#[async_trait]
impl Session for ChromeSession {
    fn driver(&self) -> &dyn Driver {
        &self.page
    }

    async fn close(mut self: Box<Self>) -> HarnessResult<()> {
        let closed = within_grace("browser close", self.browser.close(), TEARDOWN_GRACE)
            .await
            .map(|_| ());

        if closed.is_err() {
            warn!("browser did not close, killing the process");
            if let Some(Err(e)) = self.browser.kill().await {
                warn!("failed to kill browser process: {}", e);
            }
        }
        if let Err(e) = within_grace("browser exit", self.browser.wait(), TEARDOWN_GRACE).await {
            warn!("browser process did not exit cleanly: {}", e);
        }

        self.handler.abort();
        closed
    }
}

/// Await `fut` for at most `grace`. Expiry is a timeout error.
async fn within_grace<T, E>(
    operation: &str,
    fut: impl Future<Output = Result<T, E>>,
    grace: Duration,
) -> HarnessResult<T>
where
    HarnessError: From<E>,
{
    match tokio::time::timeout(grace, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(HarnessError::timeout(operation, grace)),
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
