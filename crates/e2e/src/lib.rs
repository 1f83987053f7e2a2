//! Clinic E2E harness
//!
//! Role-aware browser scenarios for the beauty clinic web application:
//! - Resolves one explicit configuration (flags, TOML file, environment)
//! - Launches a fresh Chrome per scenario over the DevTools protocol
//! - Logs in as patient, attendant, staff or owner
//! - Runs declarative YAML scenarios and checks URL invariants
//! - Writes before/after screenshots and a JSON report
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Runner                               │
//! │    ├── preflight::check_reachable(base_url)                 │
//! │    ├── SessionProvider::open() -> Session (one per case)    │
//! │    ├── Executor::run(scenario, page) under a deadline       │
//! │    │     ├── Authenticator::login(role)                     │
//! │    │     ├── navigate target (network idle | dom ready)     │
//! │    │     ├── steps: click, fill, select, expect_*, ...      │
//! │    │     └── final URL invariant                            │
//! │    ├── ScreenshotRecorder -> <root>/<category>/<ID>-<tag>   │
//! │    └── SuiteResult -> results.json, exit code               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Catalog (YAML, one file per category)                      │
//! │    ├── id, title, role, target, readiness                   │
//! │    ├── steps: [Step]                                        │
//! │    └── expect_url: [fragment], tags, acceptance             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod catalog;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod locator;
pub mod page;
pub mod preflight;
pub mod report;
pub mod role;
pub mod runner;
pub mod scenario;
pub mod screenshot;
pub mod session;
pub mod wait;

pub use auth::Authenticator;
pub use catalog::{Catalog, Filter};
pub use config::{ConfigOverrides, HarnessConfig, Profile, Timeouts};
pub use driver::{first_visible, Driver, ElementHandle, OptionChoice};
pub use error::{FailureKind, HarnessError, HarnessResult};
pub use report::{ScenarioResult, Status, SuiteResult};
pub use role::{Credentials, Role};
pub use runner::Runner;
pub use scenario::{Scenario, Step};
pub use session::{ChromeSessionProvider, Session, SessionProvider};
