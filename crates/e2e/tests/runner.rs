//! Runner semantics against a scripted site

mod common;

use std::sync::Arc;
use std::time::Duration;

use clinic_e2e::report::{EXIT_CANCELLED, EXIT_SETUP};
use clinic_e2e::wait::Readiness;
use clinic_e2e::{
    Catalog, Credentials, FailureKind, HarnessConfig, Role, Runner, Scenario, Status,
};

use common::{config, overrides, ScriptedProvider, Site};

fn builtin(id: &str) -> Scenario {
    Catalog::builtin().unwrap().get(id).unwrap().clone()
}

fn scenario(yaml: &str) -> Scenario {
    let scenario = Scenario::from_yaml(yaml).unwrap();
    scenario.validate().unwrap();
    scenario
}

fn runner(config: HarnessConfig, provider: &Arc<ScriptedProvider>) -> Runner {
    Runner::new(config, provider.clone()).unwrap()
}

#[tokio::test]
async fn absent_optional_search_still_passes() {
    let screens = tempfile::tempdir().unwrap();
    let site = Site::new().page("/appointments/admin/patients/", &["table"]);
    let provider = Arc::new(ScriptedProvider::new(site));

    let result = runner(config(screens.path()), &provider)
        .run_one(&builtin("ADM-008"))
        .await;

    assert_eq!(result.status, Status::Passed, "{:?}", result.message);
    assert!(provider.journal.fills().iter().all(|(_, value)| value != "maria"));
    assert!(screens.path().join("staff/ADM-008-after.png").is_file());
    assert_eq!(provider.journal.closed(), 1);
}

#[tokio::test]
async fn visible_search_is_filled() {
    let screens = tempfile::tempdir().unwrap();
    let site = Site::new().page("/appointments/admin/patients/", &[r#"input[name="search"]"#]);
    let provider = Arc::new(ScriptedProvider::new(site));

    let result = runner(config(screens.path()), &provider)
        .run_one(&builtin("ADM-008"))
        .await;

    assert_eq!(result.status, Status::Passed, "{:?}", result.message);
    assert!(provider
        .journal
        .fills()
        .contains(&(r#"input[name="search"]"#.to_string(), "maria".to_string())));
}

#[tokio::test]
async fn either_url_fragment_passes() {
    let screens = tempfile::tempdir().unwrap();
    let site = Site::new()
        .redirect("/owner/analytics/", "/analytics/")
        .redirect("/packages/my-packages/", "/my-packages/");
    let provider = Arc::new(ScriptedProvider::new(site));
    let runner = runner(config(screens.path()), &provider);

    let suite = runner
        .run(&[builtin("ANA-001"), builtin("PKG-003")])
        .await;

    assert!(suite.success(), "{:?}", suite.failure_summary());
    let ana = suite.get("ANA-001").unwrap();
    assert!(ana.final_url.as_deref().unwrap().ends_with("/analytics/"));
    assert!(screens.path().join("analytics/ANA-001-after.png").is_file());
    assert!(screens.path().join("services/PKG-003-after.png").is_file());
}

#[tokio::test]
async fn click_falls_back_to_direct_navigation() {
    let screens = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Site::new()));

    let result = runner(config(screens.path()), &provider)
        .run_one(&builtin("PKG-002"))
        .await;

    assert_eq!(result.status, Status::Passed, "{:?}", result.message);
    assert_eq!(provider.journal.visits(), vec!["/packages/", "/packages/3/"]);
}

#[tokio::test]
async fn click_follows_visible_link() {
    let screens = tempfile::tempdir().unwrap();
    let link = r#"a[href*="/packages/3/"]"#;
    let site = Site::new()
        .page("/packages/", &[link])
        .link(link, "/packages/3/");
    let provider = Arc::new(ScriptedProvider::new(site));

    let result = runner(config(screens.path()), &provider)
        .run_one(&builtin("PKG-002"))
        .await;

    assert_eq!(result.status, Status::Passed, "{:?}", result.message);
    assert!(result.final_url.unwrap().ends_with("/packages/3/"));
}

#[tokio::test]
async fn dom_ready_scenario_captures_before_and_after() {
    let screens = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Site::new()));

    let result = runner(config(screens.path()), &provider)
        .run_one(&builtin("OWN-IMG-004"))
        .await;

    assert_eq!(result.status, Status::Passed, "{:?}", result.message);
    let plans = provider.journal.plans_for("/owner/manage/product-images/");
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].readiness, Readiness::DomReady);
    assert_eq!(plans[0].settle, Duration::from_millis(1000));

    let paths: Vec<_> = result.artifacts.iter().map(|a| a.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            std::path::PathBuf::from("owner/OWN-IMG-004-before.png"),
            std::path::PathBuf::from("owner/OWN-IMG-004-after.png"),
        ]
    );
    assert_eq!(
        result.last_screenshot,
        Some(screens.path().join("owner/OWN-IMG-004-after.png"))
    );
}

#[tokio::test]
async fn deadline_is_reported_as_timeout() {
    let screens = tempfile::tempdir().unwrap();
    let site = Site::new().slow("/packages/", Duration::from_secs(5));
    let provider = Arc::new(ScriptedProvider::new(site));

    let mut overrides = overrides(screens.path());
    overrides.scenario_timeout_secs = Some(1);
    let config = HarnessConfig::resolve(overrides, |_| None).unwrap();

    let result = runner(config, &provider).run_one(&builtin("PKG-001")).await;

    assert_eq!(result.status, Status::Failed);
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert!(!screens.path().join("services/PKG-001-after.png").exists());
    assert_eq!(provider.journal.closed(), 1);
}

#[tokio::test]
async fn failed_invariant_still_captures_after() {
    let screens = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Site::new()));
    let broken = scenario(
        "id: SRV-950\ntitle: Wrong place\ncategory: services\ntarget: /services/\nexpect_url: [/nowhere/]\n",
    );

    let result = runner(config(screens.path()), &provider).run_one(&broken).await;

    assert_eq!(result.status, Status::Failed);
    assert_eq!(result.failure, Some(FailureKind::AssertionFailed));
    assert!(result.final_url.as_deref().unwrap().ends_with("/services/"));
    assert!(screens.path().join("services/SRV-950-after.png").is_file());
    assert_eq!(
        result.last_screenshot,
        Some(screens.path().join("services/SRV-950-after.png"))
    );
}

#[tokio::test]
async fn setup_failure_does_not_leak() {
    let screens = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Site::new()).broken_for("SRV-001"));
    let runner = runner(config(screens.path()), &provider);

    let suite = runner
        .run(&[builtin("SRV-001"), builtin("PRD-001"), builtin("PKG-001")])
        .await;

    assert_eq!(suite.failed, 1);
    assert_eq!(suite.passed, 2);
    let srv = suite.get("SRV-001").unwrap();
    assert_eq!(srv.failure, Some(FailureKind::SetupFailed));
    assert!(srv.artifacts.is_empty());
    assert_eq!(suite.exit_code(), EXIT_SETUP);
    assert_eq!(provider.journal.opened(), 2);
    assert_eq!(provider.journal.closed(), 2);
}

#[tokio::test]
async fn wrong_password_is_an_authentication_failure() {
    let screens = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Site::new()));

    let mut overrides = overrides(screens.path());
    overrides
        .credentials
        .insert(Role::Owner, Credentials::new("clinic.owner", "not-the-password"));
    let config = HarnessConfig::resolve(overrides, |_| None).unwrap();

    let result = runner(config, &provider).run_one(&builtin("ANA-001")).await;

    assert_eq!(result.status, Status::Failed);
    assert_eq!(result.failure, Some(FailureKind::AuthenticationFailed));
    let message = result.message.unwrap();
    assert!(message.contains("clinic.owner"));
    assert!(!message.contains("not-the-password"));
    assert!(result
        .final_url
        .unwrap()
        .contains("/accounts/login/owner/"));
    assert!(!provider.journal.visits().contains(&"/owner/analytics/".to_string()));
}

#[tokio::test]
async fn results_keep_input_order_with_parallel_workers() {
    let screens = tempfile::tempdir().unwrap();
    let site = Site::new().slow("/services/", Duration::from_millis(200));
    let provider = Arc::new(ScriptedProvider::new(site));

    let mut overrides = overrides(screens.path());
    overrides.workers = Some(3);
    let config = HarnessConfig::resolve(overrides, |_| None).unwrap();

    let ids = ["SRV-001", "PKG-001", "PRD-001"];
    let scenarios: Vec<_> = ids.iter().map(|id| builtin(id)).collect();
    let suite = runner(config, &provider).run(&scenarios).await;

    assert!(suite.success(), "{:?}", suite.failure_summary());
    let order: Vec<_> = suite.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(order, ids);
}

#[tokio::test]
async fn repeated_runs_classify_the_same() {
    let screens = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Site::new()));
    let runner = runner(config(screens.path()), &provider);
    let scenarios = [builtin("PKG-002"), builtin("ADM-SMS-001")];

    let first = runner.run(&scenarios).await;
    let second = runner.run(&scenarios).await;
    let alone = runner.run_one(&scenarios[1]).await;

    let statuses = |s: &clinic_e2e::SuiteResult| {
        s.results.iter().map(|r| (r.id.clone(), r.status)).collect::<Vec<_>>()
    };
    assert_eq!(statuses(&first), statuses(&second));
    assert_eq!(first.get("ADM-SMS-001").unwrap().status, alone.status);
    assert!(screens.path().join("staff/ADM-SMS-001-after.png").is_file());
}

#[tokio::test]
async fn cancellation_stops_running_and_skips_pending() {
    let screens = tempfile::tempdir().unwrap();
    let site = Site::new().slow("/services/", Duration::from_secs(10));
    let provider = Arc::new(ScriptedProvider::new(site));

    let mut overrides = overrides(screens.path());
    overrides.scenario_timeout_secs = Some(30);
    let config = HarnessConfig::resolve(overrides, |_| None).unwrap();
    let runner = runner(config, &provider);

    let token = runner.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let suite = runner.run(&[builtin("SRV-001"), builtin("PKG-001")]).await;

    assert_eq!(suite.get("SRV-001").unwrap().status, Status::Cancelled);
    assert_eq!(suite.get("PKG-001").unwrap().status, Status::Skipped);
    assert_eq!(suite.exit_code(), EXIT_CANCELLED);
    assert_eq!(provider.journal.opened(), 1);
    assert_eq!(provider.journal.closed(), 1);
    assert!(!screens.path().join("services/SRV-001-after.png").exists());
}

fn base_path_config(screens: &std::path::Path, owner_password: &str) -> HarnessConfig {
    let mut overrides = overrides(screens);
    overrides.base_url = Some("http://clinic.test/beta".to_string());
    overrides
        .credentials
        .insert(Role::Owner, Credentials::new("clinic.owner", owner_password));
    HarnessConfig::resolve(overrides, |_| None).unwrap()
}

#[tokio::test]
async fn login_below_base_path_succeeds() {
    let screens = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Site::at("http://clinic.test/beta/")));

    let result = runner(base_path_config(screens.path(), "OwnerPass123!"), &provider)
        .run_one(&builtin("OWN-IMG-004"))
        .await;

    assert_eq!(result.status, Status::Passed, "{:?}", result.message);
    assert_eq!(
        result.final_url.as_deref(),
        Some("http://clinic.test/beta/owner/manage/product-images/")
    );
}

#[tokio::test]
async fn rejected_login_below_base_path_is_an_authentication_failure() {
    let screens = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Site::at("http://clinic.test/beta/")));

    let result = runner(base_path_config(screens.path(), "not-the-password"), &provider)
        .run_one(&builtin("ANA-001"))
        .await;

    assert_eq!(result.status, Status::Failed);
    assert_eq!(result.failure, Some(FailureKind::AuthenticationFailed));
    assert!(result
        .final_url
        .unwrap()
        .starts_with("http://clinic.test/beta/accounts/login/owner/"));
    assert!(!provider.journal.visits().contains(&"/owner/analytics/".to_string()));
}

fn owner_pair_site() -> Site {
    Site::new()
        .slow("/owner/analytics/", Duration::from_millis(200))
        .slow("/owner/manage/product-images/", Duration::from_millis(200))
}

fn two_workers(screens: &std::path::Path, serialize_roles: bool) -> HarnessConfig {
    let mut overrides = overrides(screens);
    overrides.workers = Some(2);
    overrides.serialize_roles = Some(serialize_roles);
    HarnessConfig::resolve(overrides, |_| None).unwrap()
}

#[tokio::test]
async fn serialized_roles_never_overlap() {
    let screens = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(owner_pair_site()));

    let suite = runner(two_workers(screens.path(), true), &provider)
        .run(&[builtin("ANA-001"), builtin("OWN-IMG-004")])
        .await;

    assert!(suite.success(), "{:?}", suite.failure_summary());
    assert_eq!(provider.journal.opened(), 2);
    assert_eq!(provider.journal.peak(), 1);
}

#[tokio::test]
async fn unserialized_roles_share_workers() {
    let screens = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(owner_pair_site()));

    let suite = runner(two_workers(screens.path(), false), &provider)
        .run(&[builtin("ANA-001"), builtin("OWN-IMG-004")])
        .await;

    assert!(suite.success(), "{:?}", suite.failure_summary());
    assert_eq!(provider.journal.peak(), 2);
}

#[tokio::test]
async fn cancelled_while_waiting_for_lease_is_skipped() {
    let screens = tempfile::tempdir().unwrap();
    let site = Site::new().slow("/owner/analytics/", Duration::from_secs(10));
    let provider = Arc::new(ScriptedProvider::new(site));

    let mut overrides = overrides(screens.path());
    overrides.workers = Some(2);
    overrides.serialize_roles = Some(true);
    overrides.scenario_timeout_secs = Some(30);
    let runner = runner(HarnessConfig::resolve(overrides, |_| None).unwrap(), &provider);

    let token = runner.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        token.cancel();
    });

    let suite = runner.run(&[builtin("ANA-001"), builtin("OWN-IMG-004")]).await;

    assert_eq!(suite.get("ANA-001").unwrap().status, Status::Cancelled);
    assert_eq!(suite.get("OWN-IMG-004").unwrap().status, Status::Skipped);
    assert_eq!(suite.exit_code(), EXIT_CANCELLED);
    assert_eq!(provider.journal.opened(), 1);
    assert_eq!(provider.journal.closed(), 1);
}
