//! Report and history commands

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use visreg_common::TestSession;
use visreg_engine::ReportFormat;

use super::Context;
use crate::output::{print_list, print_success, TableDisplay};

#[derive(Args)]
pub struct ReportArgs {
    /// Session ID
    pub session: String,

    /// Report kind: html, json or summary
    #[arg(long = "as", default_value = "summary", value_parser = parse_report_format)]
    pub kind: ReportFormat,

    /// Write the report to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

fn parse_report_format(value: &str) -> std::result::Result<ReportFormat, String> {
    value.parse().map_err(|e: visreg_common::Error| e.to_string())
}

#[derive(Args)]
pub struct HistoryArgs {
    /// How many days back to look
    #[arg(long, default_value_t = 7)]
    pub days: u32,
}

#[derive(Serialize)]
pub struct SessionDisplay {
    pub id: String,
    pub started_at: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub missing_baseline: usize,
    pub avg_similarity: f64,
    pub complete: bool,
}

impl From<&TestSession> for SessionDisplay {
    fn from(session: &TestSession) -> Self {
        Self {
            id: session.id.clone(),
            started_at: session.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            total: session.counts.total,
            passed: session.counts.passed,
            failed: session.counts.failed,
            errors: session.counts.errors,
            missing_baseline: session.counts.missing_baseline,
            avg_similarity: session.avg_similarity,
            complete: session.complete,
        }
    }
}

impl TableDisplay for SessionDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Session", "Started", "Total", "Pass", "Fail", "Error", "Missing", "Avg", "Complete"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.started_at.clone(),
            self.total.to_string(),
            self.passed.to_string(),
            self.failed.to_string(),
            self.errors.to_string(),
            self.missing_baseline.to_string(),
            format!("{:.2}%", self.avg_similarity),
            if self.complete { "yes" } else { "no" }.to_string(),
        ]
    }
}

pub async fn execute_report(args: ReportArgs, ctx: &Context) -> Result<bool> {
    let reports = ctx.report_store()?;
    let rendered = reports.render_report(&args.session, args.kind)?;

    match args.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, rendered)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            print_success(&format!("Report written to {}", path.display()));
        }
        None => println!("{}", rendered),
    }
    Ok(true)
}

pub async fn execute_history(args: HistoryArgs, ctx: &Context) -> Result<bool> {
    let reports = ctx.report_store()?;
    let sessions: Vec<SessionDisplay> = reports
        .history(args.days)?
        .iter()
        .map(SessionDisplay::from)
        .collect();
    print_list(&sessions, ctx.format);
    Ok(true)
}
