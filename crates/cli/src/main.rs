//! Clinic E2E - command-line runner
//!
//! Selects scenarios from the built-in catalog (plus any extra catalog
//! directories), resolves configuration, runs them in fresh Chrome sessions
//! and writes `results.json`. The exit code classifies the run.

use std::path::PathBuf;

use clap::Parser;
use tracing::warn;

use clinic_e2e::report::{EXIT_CONFIGURATION, EXIT_FAILURE, EXIT_OK, EXIT_SETUP};
use clinic_e2e::{
    preflight, Catalog, ConfigOverrides, FailureKind, Filter, HarnessConfig, HarnessError,
    Profile, Runner,
};

mod output;

/// Role-aware end-to-end scenarios for the clinic web application
#[derive(Parser)]
#[command(name = "clinic-e2e")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Case-id prefix to run, e.g. ADM or OWN-IMG (repeatable)
    #[arg(long = "id", value_name = "PREFIX")]
    ids: Vec<String>,

    /// Category to run (repeatable)
    #[arg(long = "category")]
    categories: Vec<String>,

    /// Only scenarios carrying this tag (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Skip scenarios carrying this tag (repeatable)
    #[arg(long = "exclude-tag")]
    exclude_tags: Vec<String>,

    /// Print the selected scenarios and exit
    #[arg(long)]
    list: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: output::OutputFormat,

    /// Application base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Screenshot root directory
    #[arg(long)]
    screenshot_dir: Option<PathBuf>,

    /// Scenarios to run in parallel
    #[arg(long)]
    workers: Option<usize>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Per-scenario deadline in seconds
    #[arg(long = "timeout-secs")]
    timeout_secs: Option<u64>,

    /// TOML file with configuration overrides
    #[arg(long)]
    config: Option<PathBuf>,

    /// Deployment profile: development, ci or production
    #[arg(long)]
    profile: Option<Profile>,

    /// Run at most one scenario per role at a time
    #[arg(long)]
    serialize_roles: bool,

    /// Extra directory of YAML scenarios (repeatable)
    #[arg(long = "catalog-dir")]
    catalog_dirs: Vec<PathBuf>,

    /// Directory for results.json
    #[arg(long, default_value = "test-results")]
    output: PathBuf,

    /// Do not check that the base URL answers before starting
    #[arg(long)]
    skip_preflight: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn filter(&self) -> Filter {
        Filter {
            id_prefixes: self.ids.clone(),
            categories: self.categories.clone(),
            tags: self.tags.clone(),
            exclude_tags: self.exclude_tags.clone(),
        }
    }

    /// Flag values; unset flags stay `None` so lower layers apply.
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            base_url: self.base_url.clone(),
            screenshot_dir: self.screenshot_dir.clone(),
            headless: self.headed.then_some(false),
            workers: self.workers,
            scenario_timeout_secs: self.timeout_secs,
            profile: self.profile,
            serialize_roles: self.serialize_roles.then_some(true),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut catalog = Catalog::builtin()?;
    for dir in &cli.catalog_dirs {
        catalog.extend(Catalog::load_dir(dir)?)?;
    }

    let selected = catalog.select(&cli.filter());
    if cli.list {
        output::print_list(&selected, cli.format);
        return Ok(EXIT_OK);
    }
    if selected.is_empty() {
        output::print_warning("No scenarios match the selection.");
        return Ok(EXIT_OK);
    }

    let file_overrides = match &cli.config {
        Some(path) => ConfigOverrides::load(path)?,
        None => ConfigOverrides::default(),
    };
    let config = HarnessConfig::from_env(file_overrides.merge(cli.overrides()))?;

    if !cli.skip_preflight {
        preflight::check_reachable(config.base_url(), config.timeouts.navigation()).await?;
    }

    let runner = Runner::chrome(config)?;
    let token = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping running scenarios...");
            token.cancel();
        }
    });

    let suite = runner.run(&selected).await;
    output::print_suite(&suite, cli.format);
    suite.write_results(&cli.output)?;

    if suite.success() {
        output::print_success(&format!("All {} scenario(s) passed", suite.total));
    }
    Ok(suite.exit_code())
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<HarnessError>().map(|e| e.kind()) {
        Some(FailureKind::Configuration) => EXIT_CONFIGURATION,
        Some(FailureKind::SetupFailed) => EXIT_SETUP,
        _ => EXIT_FAILURE,
    }
}
