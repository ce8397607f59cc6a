//! Ephemeral artifact commands

use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use visreg_engine::isolation::CategoryUsage;

use super::Context;
use crate::output::{format_bytes, print_info, print_json, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ArtifactsCommands {
    /// Delete session artifacts older than the retention window
    Cleanup {
        /// Retention window in hours (overrides config)
        #[arg(long)]
        retention_hours: Option<u64>,
    },

    /// Show storage used by session artifacts
    Usage,
}

#[derive(Serialize)]
pub struct UsageDisplay {
    pub category: &'static str,
    pub files: u64,
    pub bytes: u64,
}

impl UsageDisplay {
    fn new(category: &'static str, usage: CategoryUsage) -> Self {
        Self {
            category,
            files: usage.files,
            bytes: usage.bytes,
        }
    }
}

impl TableDisplay for UsageDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Category", "Files", "Size"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.category.to_string(),
            self.files.to_string(),
            format_bytes(self.bytes),
        ]
    }
}

pub async fn execute(cmd: ArtifactsCommands, ctx: &Context) -> Result<bool> {
    let isolation = ctx.isolation().await?;

    match cmd {
        ArtifactsCommands::Cleanup { retention_hours } => {
            let retention = retention_hours
                .map(|hours| Duration::from_secs(hours * 3600))
                .unwrap_or_else(|| ctx.config.retention.window());
            let report = isolation.cleanup(retention).await?;

            if ctx.format == OutputFormat::Json {
                print_json(&report);
            } else if report.removed_sessions.is_empty() {
                print_info("No expired session artifacts");
            } else {
                print_success(&format!(
                    "Removed {} sessions, freed {}",
                    report.removed_sessions.len(),
                    format_bytes(report.freed_bytes)
                ));
            }
        }

        ArtifactsCommands::Usage => {
            let usage = isolation.usage_report()?;
            if ctx.format == OutputFormat::Json {
                print_json(&usage);
                return Ok(true);
            }

            let rows = vec![
                UsageDisplay::new("screenshots", usage.screenshots),
                UsageDisplay::new("diffs", usage.diffs),
                UsageDisplay::new("other", usage.other),
            ];
            print_list(&rows, ctx.format);
            println!(
                "{} sessions, {} total under {}",
                usage.sessions,
                format_bytes(usage.total_bytes()),
                isolation.root().display()
            );
        }
    }
    Ok(true)
}
