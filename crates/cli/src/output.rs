//! Output formatting for the CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use clinic_e2e::{Scenario, ScenarioResult, Status, SuiteResult};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

impl TableDisplay for Scenario {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Category", "Role", "Target", "Tags", "Title"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.category.clone(),
            self.role.to_string(),
            self.target.clone().unwrap_or_else(|| "-".to_string()),
            self.tags.join(", "),
            self.title.clone(),
        ]
    }
}

impl TableDisplay for ScenarioResult {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Status", "Failure", "Duration", "Final URL"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            status_label(self.status),
            self.failure
                .map(|k| k.to_string())
                .unwrap_or_else(|| "-".to_string()),
            format!("{} ms", self.duration_ms),
            self.final_url.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

fn status_label(status: Status) -> String {
    match status {
        Status::Passed => "✓ passed".green().to_string(),
        Status::Failed => "✗ failed".red().to_string(),
        Status::Cancelled => "⊘ cancelled".yellow().to_string(),
        Status::Skipped => "- skipped".dimmed().to_string(),
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        _ if items.is_empty() => println!("No items found."),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

/// Per-scenario table, totals and the failure summary.
pub fn print_suite(suite: &SuiteResult, format: OutputFormat) {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(suite).unwrap_or_default());
        return;
    }

    print_list(&suite.results, format);
    println!();
    println!(
        "{} passed, {} failed, {} cancelled, {} skipped in {:.1}s",
        suite.passed.to_string().green().bold(),
        suite.failed.to_string().red().bold(),
        suite.cancelled.to_string().yellow(),
        suite.skipped.to_string().dimmed(),
        suite.duration_ms as f64 / 1000.0
    );

    let failures = suite.failure_summary();
    if !failures.is_empty() {
        println!();
        println!("{}", "Failures:".bold());
        for line in failures {
            println!("  {}", line);
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}
