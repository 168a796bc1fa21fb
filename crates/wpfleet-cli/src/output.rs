//! Report rendering. Reports go to stdout; logs and prompts use stderr.

use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format for command reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON
    Json,
    /// Prometheus text exposition (health only)
    Prometheus,
}

pub fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("No results");
    } else {
        println!("{}", Table::new(rows));
    }
}

pub fn print_json<T: Serialize + ?Sized>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

pub fn print_summary(line: &str) {
    eprintln!("{line}");
}

/// Shorten long cell text so tables stay readable.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
