//! Persona login
//!
//! One [`Authenticator`] drives the shared login flow for every role:
//!
//! ```text
//! /accounts/login/ ──► dismiss reminder modal ──► role card ──► /accounts/login/<segment>/
//!                                                                       │
//!            landing area (/owner/, /admin/, ...) ◄── submit ◄── username + password
//! ```
//!
//! Success means the browser ended up anywhere other than a login page.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::driver::{first_visible, Driver};
use crate::error::{HarnessError, HarnessResult};
use crate::locator::Locator;
use crate::role::{Role, RoleDescriptor};
use crate::wait::{wait_for, ReadyPlan, WaitConfig};

const LOGIN_PATH: &str = "/accounts/login/";
const LOGIN_ATTEMPTS: u32 = 3;
const LOGIN_RETRY_DELAY: Duration = Duration::from_secs(2);

const MODAL: &[&str] = &["#reminderModal", ".modal.show", "[id*=\"reminder\"]"];
const MODAL_CLOSE: &[&str] = &[
    "button:has-text(\"Got it\")",
    "button:has-text(\"Close\")",
    ".modal .close",
    ".btn-close",
];
const MODAL_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
const MODAL_FADE: Duration = Duration::from_millis(500);

const USERNAME_FIELDS: &[&str] = &["input[name=\"username\"]", "input#username"];
const PASSWORD_FIELDS: &[&str] = &["input[name=\"password\"]", "input#password"];
const SUBMIT: &[&str] = &["button[type=\"submit\"]", "input[type=\"submit\"]"];

pub struct Authenticator<'a> {
    config: &'a HarnessConfig,
}

impl<'a> Authenticator<'a> {
    pub fn new(config: &'a HarnessConfig) -> Self {
        Self { config }
    }

    /// Log in as `role` with its configured credentials. Returns the final URL.
    pub async fn login(&self, page: &dyn Driver, role: Role) -> HarnessResult<String> {
        let descriptor = role.descriptor().ok_or_else(|| {
            HarnessError::Configuration(format!("role '{role}' cannot log in"))
        })?;
        let creds = self.config.credentials(role)?;
        self.login_with(page, descriptor, &creds.username, &creds.password)
            .await
    }

    pub async fn login_as_patient(
        &self,
        page: &dyn Driver,
        username: &str,
        password: &str,
    ) -> HarnessResult<String> {
        self.login_role(page, Role::Patient, username, password).await
    }

    pub async fn login_as_attendant(
        &self,
        page: &dyn Driver,
        username: &str,
        password: &str,
    ) -> HarnessResult<String> {
        self.login_role(page, Role::Attendant, username, password).await
    }

    pub async fn login_as_staff(
        &self,
        page: &dyn Driver,
        username: &str,
        password: &str,
    ) -> HarnessResult<String> {
        self.login_role(page, Role::StaffAdmin, username, password).await
    }

    pub async fn login_as_owner(
        &self,
        page: &dyn Driver,
        username: &str,
        password: &str,
    ) -> HarnessResult<String> {
        self.login_role(page, Role::Owner, username, password).await
    }

    async fn login_role(
        &self,
        page: &dyn Driver,
        role: Role,
        username: &str,
        password: &str,
    ) -> HarnessResult<String> {
        let descriptor = role.descriptor().ok_or_else(|| {
            HarnessError::Configuration(format!("role '{role}' cannot log in"))
        })?;
        self.login_with(page, descriptor, username, password).await
    }

    pub async fn login_with(
        &self,
        page: &dyn Driver,
        descriptor: &RoleDescriptor,
        username: &str,
        password: &str,
    ) -> HarnessResult<String> {
        let role = descriptor.role;
        let timeouts = &self.config.timeouts;
        info!("Logging in as {} ({})", role, username);

        self.open_login_page(page).await?;
        self.dismiss_reminder(page).await?;

        let role_links = Locator::parse_all(&descriptor.login_link_selectors())?;
        match first_visible(page, &role_links, 0, timeouts.probe()).await? {
            Some(link) => {
                page.click(&role_links, link).await?;
                page.wait_ready(&ReadyPlan::network_idle(timeouts)).await?;
            }
            None => {
                debug!("no {} card on the login page, opening its form directly", role);
                page.goto(&self.config.url_for(&descriptor.login_path())?)
                    .await?;
                page.wait_ready(&ReadyPlan::network_idle(timeouts)).await?;
            }
        }

        let failed = |final_url: String| HarnessError::AuthenticationFailed {
            role,
            username: username.to_string(),
            final_url,
        };

        let username_fields = Locator::parse_all(USERNAME_FIELDS)?;
        let Some(field) = first_visible(page, &username_fields, 0, timeouts.navigation()).await?
        else {
            return Err(failed(page.current_url().await?));
        };
        page.fill(&username_fields, field, username).await?;

        let password_fields = Locator::parse_all(PASSWORD_FIELDS)?;
        let Some(field) = first_visible(page, &password_fields, 0, timeouts.probe()).await? else {
            return Err(failed(page.current_url().await?));
        };
        page.fill(&password_fields, field, password).await?;

        let submit = Locator::parse_all(SUBMIT)?;
        let Some(button) = first_visible(page, &submit, 0, timeouts.probe()).await? else {
            return Err(failed(page.current_url().await?));
        };
        page.click(&submit, button).await?;
        page.wait_ready(&ReadyPlan::network_idle(timeouts)).await?;

        // The landing area only bounds the wait; redirects elsewhere still count.
        let config = self.config;
        let landed = wait_for(
            move || async move {
                page.current_url()
                    .await
                    .map(|url| descriptor.is_landing(&url) || !config.is_login_page(&url))
                    .unwrap_or(false)
            },
            WaitConfig::with_timeout(timeouts.navigation()),
            "post-login landing",
        )
        .await;
        if landed.is_err() {
            debug!("{} did not reach its landing area", role);
        }

        let final_url = page.current_url().await?;
        if self.config.is_login_page(&final_url) {
            warn!("Login as {} ({}) ended on {}", role, username, final_url);
            return Err(failed(final_url));
        }

        if !descriptor.is_landing(&final_url) {
            debug!("{} landed outside its home area: {}", role, final_url);
        }
        info!("Logged in as {} → {}", role, final_url);
        Ok(final_url)
    }

    async fn open_login_page(&self, page: &dyn Driver) -> HarnessResult<()> {
        let url = self.config.url_for(LOGIN_PATH)?;
        let plan = ReadyPlan::network_idle(&self.config.timeouts);

        let mut attempt = 1;
        loop {
            let result = match page.goto(&url).await {
                Ok(()) => page.wait_ready(&plan).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < LOGIN_ATTEMPTS => {
                    warn!(
                        "Login page attempt {}/{} failed: {}",
                        attempt, LOGIN_ATTEMPTS, e
                    );
                    attempt += 1;
                    sleep(LOGIN_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn dismiss_reminder(&self, page: &dyn Driver) -> HarnessResult<()> {
        let modal = Locator::parse_all(MODAL)?;
        if first_visible(page, &modal, 0, self.config.timeouts.probe())
            .await?
            .is_none()
        {
            return Ok(());
        }

        let close = Locator::parse_all(MODAL_CLOSE)?;
        match first_visible(page, &close, 0, MODAL_CLOSE_TIMEOUT).await? {
            Some(button) => {
                debug!("dismissing reminder modal");
                page.click(&close, button).await?;
                sleep(MODAL_FADE).await;
            }
            None => debug!("reminder modal has no close control"),
        }
        Ok(())
    }
}
