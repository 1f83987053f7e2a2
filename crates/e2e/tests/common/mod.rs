//! Scripted stand-in for the clinic site
//!
//! `Site` describes which locators are visible on which path, where links
//! lead and which paths redirect or load slowly. `ScriptedProvider` hands
//! out one `ScriptedDriver` per scenario and records everything in a shared
//! `Journal`.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use clinic_e2e::driver::{Driver, ElementHandle, OptionChoice};
use clinic_e2e::locator::Locator;
use clinic_e2e::wait::ReadyPlan;
use clinic_e2e::{
    ConfigOverrides, HarnessConfig, HarnessError, HarnessResult, Session, SessionProvider,
    Timeouts,
};

pub const BASE_URL: &str = "http://clinic.test/";

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nscripted";

const USERNAME: &str = r#"input[name="username"]"#;
const PASSWORD: &str = r#"input[name="password"]"#;
const SUBMIT: &str = r#"button[type="submit"]"#;

/// Short timeouts so absent controls are detected quickly.
pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        scenario_ms: 5_000,
        navigation_ms: 300,
        probe_ms: 50,
        network_quiet_ms: 10,
        dom_settle_ms: 10,
        launch_ms: 1_000,
    }
}

pub fn overrides(screenshots: &Path) -> ConfigOverrides {
    ConfigOverrides {
        base_url: Some(BASE_URL.to_string()),
        screenshot_dir: Some(screenshots.to_path_buf()),
        timeouts: Some(fast_timeouts()),
        ..Default::default()
    }
}

pub fn config(screenshots: &Path) -> HarnessConfig {
    HarnessConfig::resolve(overrides(screenshots), |_| None).unwrap()
}

#[derive(Debug, Clone)]
pub struct Site {
    base: Url,
    pages: HashMap<String, Vec<String>>,
    links: HashMap<String, String>,
    redirects: HashMap<String, String>,
    slow: HashMap<String, Duration>,
    /// username -> (password, landing path)
    accounts: HashMap<String, (String, String)>,
}

impl Site {
    /// The shared login page, the four role forms and the seeded personas.
    pub fn new() -> Self {
        Self::at(BASE_URL)
    }

    /// Same site served below `base`, e.g. `http://clinic.test/beta/`.
    /// Paths given to the builder stay relative to the base.
    pub fn at(base: &str) -> Self {
        let mut site = Self {
            base: Url::parse(base).unwrap(),
            pages: HashMap::new(),
            links: HashMap::new(),
            redirects: HashMap::new(),
            slow: HashMap::new(),
            accounts: HashMap::new(),
        };

        let mut cards = Vec::new();
        for segment in ["patient", "attendant", "admin", "owner"] {
            let card = format!("a[href*='/accounts/login/{segment}/']");
            let form = format!("/accounts/login/{segment}/");
            site = site
                .link(&card, &form)
                .page(&form, &[USERNAME, PASSWORD, SUBMIT]);
            cards.push(card);
        }
        let cards: Vec<&str> = cards.iter().map(String::as_str).collect();
        site = site.page("/accounts/login/", &cards);

        site.account("maria.santos", "TestPass123!", "/accounts/profile/")
            .account("attendant.01", "AttendPass123!", "/attendant/dashboard/")
            .account("admin.staff", "AdminPass123!", "/appointments/admin/dashboard/")
            .account("clinic.owner", "OwnerPass123!", "/owner/")
    }

    pub fn page(mut self, path: &str, visible: &[&str]) -> Self {
        self.pages
            .entry(path.to_string())
            .or_default()
            .extend(visible.iter().map(|s| s.to_string()));
        self
    }

    pub fn link(mut self, locator: &str, target: &str) -> Self {
        self.links.insert(locator.to_string(), target.to_string());
        self
    }

    pub fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    /// Readiness on `path` takes `delay`.
    pub fn slow(mut self, path: &str, delay: Duration) -> Self {
        self.slow.insert(path.to_string(), delay);
        self
    }

    pub fn account(mut self, username: &str, password: &str, landing: &str) -> Self {
        self.accounts.insert(
            username.to_string(),
            (password.to_string(), landing.to_string()),
        );
        self
    }

    fn visible_on(&self, path: &str, source: &str) -> usize {
        self.pages
            .get(path)
            .map(|v| v.iter().filter(|s| s.as_str() == source).count())
            .unwrap_or(0)
    }
}

/// Everything the scripted sessions did.
#[derive(Debug, Default)]
pub struct Journal {
    pub visits: Mutex<Vec<String>>,
    pub fills: Mutex<Vec<(String, String)>>,
    pub plans: Mutex<Vec<(String, ReadyPlan)>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    /// Sessions open right now, and the most ever open at once
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Journal {
    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.fills.lock().unwrap().clone()
    }

    pub fn plans_for(&self, path: &str) -> Vec<ReadyPlan> {
        self.plans
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, plan)| *plan)
            .collect()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct ScriptedDriver {
    site: Arc<Site>,
    journal: Arc<Journal>,
    url: Mutex<Url>,
    username: Mutex<Option<String>>,
    password: Mutex<Option<String>>,
}

impl ScriptedDriver {
    pub fn new(site: Arc<Site>, journal: Arc<Journal>) -> Self {
        let url = site.base.join("about-blank").unwrap();
        Self {
            site,
            journal,
            url: Mutex::new(url),
            username: Mutex::new(None),
            password: Mutex::new(None),
        }
    }

    /// Current path relative to the site base.
    fn path(&self) -> String {
        let path = self.url.lock().unwrap().path().to_string();
        self.relative(&path)
    }

    fn relative(&self, path: &str) -> String {
        let base = self.site.base.path().trim_end_matches('/');
        path.strip_prefix(base).unwrap_or(path).to_string()
    }

    fn navigate(&self, path: &str) {
        let path = self.site.redirects.get(path).map(String::as_str).unwrap_or(path);
        let url = self.site.base.join(path.trim_start_matches('/')).unwrap();
        self.journal.visits.lock().unwrap().push(path.to_string());
        *self.url.lock().unwrap() = url;
    }

    fn submit_login(&self) -> bool {
        let username = self.username.lock().unwrap().clone();
        let password = self.password.lock().unwrap().clone();
        let landing = match (username, password) {
            (Some(u), Some(p)) => self
                .site
                .accounts
                .get(&u)
                .filter(|(expected, _)| *expected == p)
                .map(|(_, landing)| landing.clone()),
            _ => None,
        };
        match landing {
            Some(landing) => {
                self.navigate(&landing);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn goto(&self, url: &Url) -> HarnessResult<()> {
        self.navigate(&self.relative(url.path()));
        Ok(())
    }

    async fn wait_ready(&self, plan: &ReadyPlan) -> HarnessResult<()> {
        let path = self.path();
        self.journal.plans.lock().unwrap().push((path.clone(), *plan));
        if let Some(delay) = self.site.slow.get(&path).copied() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn current_url(&self) -> HarnessResult<String> {
        Ok(self.url.lock().unwrap().to_string())
    }

    async fn find_visible(
        &self,
        locators: &[Locator],
        nth: usize,
    ) -> HarnessResult<Option<ElementHandle>> {
        let path = self.path();
        Ok(locators
            .iter()
            .position(|l| self.site.visible_on(&path, &l.source) > nth)
            .map(|locator| ElementHandle { locator, index: nth }))
    }

    async fn click(&self, locators: &[Locator], element: ElementHandle) -> HarnessResult<bool> {
        let source = &locators[element.locator].source;
        if source == SUBMIT && self.path().starts_with("/accounts/login/") {
            return Ok(self.submit_login());
        }
        match self.site.links.get(source) {
            Some(target) => {
                self.navigate(target);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fill(
        &self,
        locators: &[Locator],
        element: ElementHandle,
        value: &str,
    ) -> HarnessResult<()> {
        let source = locators[element.locator].source.clone();
        if source == USERNAME {
            *self.username.lock().unwrap() = Some(value.to_string());
        } else if source == PASSWORD {
            *self.password.lock().unwrap() = Some(value.to_string());
        }
        self.journal
            .fills
            .lock()
            .unwrap()
            .push((source, value.to_string()));
        Ok(())
    }

    async fn select(
        &self,
        _locators: &[Locator],
        _element: ElementHandle,
        _choice: &OptionChoice,
    ) -> HarnessResult<bool> {
        Ok(true)
    }

    async fn reload(&self) -> HarnessResult<()> {
        Ok(())
    }

    async fn screenshot(&self) -> HarnessResult<Vec<u8>> {
        Ok(PNG.to_vec())
    }
}

pub struct ScriptedSession {
    driver: ScriptedDriver,
    journal: Arc<Journal>,
}

#[async_trait]
impl Session for ScriptedSession {
    fn driver(&self) -> &dyn Driver {
        &self.driver
    }

    async fn close(self: Box<Self>) -> HarnessResult<()> {
        self.journal.active.fetch_sub(1, Ordering::SeqCst);
        self.journal.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ScriptedProvider {
    site: Arc<Site>,
    pub journal: Arc<Journal>,
    broken: HashSet<String>,
}

impl ScriptedProvider {
    pub fn new(site: Site) -> Self {
        Self {
            site: Arc::new(site),
            journal: Arc::new(Journal::default()),
            broken: HashSet::new(),
        }
    }

    /// Opening a session for `scenario_id` fails as if Chrome did not start.
    pub fn broken_for(mut self, scenario_id: &str) -> Self {
        self.broken.insert(scenario_id.to_string());
        self
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    async fn open(&self, scenario_id: &str) -> HarnessResult<Box<dyn Session>> {
        if self.broken.contains(scenario_id) {
            return Err(HarnessError::setup("chrome executable not found"));
        }
        self.journal.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.journal.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            driver: ScriptedDriver::new(self.site.clone(), self.journal.clone()),
            journal: self.journal.clone(),
        }))
    }
}
