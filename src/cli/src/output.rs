//! Output formatting utilities for the sweeper CLI.
//!
//! Supports table, JSON, and YAML output formats.

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

use sweeper_core::jobs::{RunCounts, RunResult};

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
    /// Render as YAML
    Yaml,
}

/// Print a success message to stdout.
pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

/// Print an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

/// Print a warning to stderr.
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), msg);
}

/// Print an informational message to stdout.
pub fn print_info(msg: &str) {
    println!("{} {}", "[INFO]".blue().bold(), msg);
}

/// Print a list of items in the requested format.
pub fn print_list<T: Tabled + Serialize>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No results found.".dimmed());
                return Ok(());
            }
            let table = Table::new(items)
                .with(Style::rounded())
                .with(Modify::new(Columns::first()).with(Alignment::left()))
                .to_string();
            println!("{}", table);
        }
        OutputFormat::Json | OutputFormat::Yaml => print_item(items, format)?,
    }
    Ok(())
}

/// Print a single item as JSON or YAML. Table output falls back to JSON.
pub fn print_item<T: Serialize + ?Sized>(item: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(item)?);
        }
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(item)?),
    }
    Ok(())
}

/// Print key-value details to the terminal (non-JSON/YAML output).
pub fn print_detail(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

/// Print a section header.
pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

// ═══════════════════════════════════════════════════════════════════════════════
// Run summaries
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Tabled, Serialize)]
struct CountsRow {
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Found")]
    total_found: u64,
    #[tabled(rename = "Succeeded")]
    succeeded: u64,
    #[tabled(rename = "Failed")]
    failed: u64,
    #[tabled(rename = "Skipped")]
    skipped: u64,
}

impl CountsRow {
    fn new(scope: impl Into<String>, counts: RunCounts) -> Self {
        Self {
            scope: scope.into(),
            total_found: counts.total_found,
            succeeded: counts.succeeded,
            failed: counts.failed,
            skipped: counts.skipped,
        }
    }
}

fn colored_status(status: &str) -> ColoredString {
    match status {
        "ok" => status.green(),
        "partial" | "cancelled" => status.yellow(),
        _ => status.normal(),
    }
}

/// Print the summary of one job run.
pub fn print_run_result(result: &RunResult, format: OutputFormat) -> Result<()> {
    if !matches!(format, OutputFormat::Table) {
        return print_item(result, format);
    }

    print_run_header(result);

    let mut rows: Vec<CountsRow> = result
        .breakdown
        .iter()
        .map(|(scope, counts)| CountsRow::new(scope.clone(), *counts))
        .collect();
    rows.push(CountsRow::new("total", result.counts()));
    print_list(&rows, format)?;

    if !result.tallies.is_empty() {
        println!();
        for (key, n) in &result.tallies {
            print_detail(key, &n.to_string());
        }
    }

    match result.status() {
        "ok" => print_success("Run completed"),
        "dry_run" => print_info("Dry run: nothing was changed"),
        "cancelled" => print_warning("Interrupted: counts cover the items processed so far"),
        _ => print_warning(&format!("{} item(s) failed, see logs", result.failed)),
    }
    Ok(())
}

fn print_run_header(result: &RunResult) {
    print_header(&format!("Job: {}", result.job));
    print_detail("Run", &result.run_id.to_string());
    print_detail("Status", &colored_status(result.status()).to_string());
    print_detail("Duration", &format!("{:.2?}", result.duration()));
    println!();
}
