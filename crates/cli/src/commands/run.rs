//! Comparison session command

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use visreg_common::{ComparisonResult, ComparisonStatus, PageType, TestSession, Viewport};
use visreg_engine::{ComparisonOrchestrator, OrchestratorConfig, ReportFormat, Scope, SimilarityEngine};

use super::{parse_page, parse_viewport, Context};
use crate::output::{
    print_error, print_info, print_json, print_list, print_success, print_warning, status_label,
    OutputFormat, TableDisplay,
};

#[derive(Args)]
pub struct RunArgs {
    /// Page types to compare (default: all)
    #[arg(long, value_delimiter = ',', value_parser = parse_page)]
    pub modules: Vec<PageType>,

    /// Restrict to one viewport
    #[arg(long, value_parser = parse_viewport)]
    pub viewport: Option<Viewport>,

    /// Concurrent capture workers (overrides config)
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Serialize)]
pub struct ResultDisplay {
    pub test: String,
    pub status: ComparisonStatus,
    pub similarity: Option<f64>,
    pub threshold: Option<f64>,
    pub duration_ms: u64,
    pub detail: String,
}

impl From<&ComparisonResult> for ResultDisplay {
    fn from(result: &ComparisonResult) -> Self {
        let detail = match (&result.error, &result.diff_path) {
            (Some(error), _) => error.clone(),
            (None, Some(diff)) => diff.display().to_string(),
            (None, None) => String::new(),
        };
        Self {
            test: result.test_name(),
            status: result.status,
            similarity: result.scores.map(|s| s.composite),
            threshold: result.threshold,
            duration_ms: result.duration_ms,
            detail,
        }
    }
}

impl TableDisplay for ResultDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Test", "Status", "Similarity", "Threshold", "Duration", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        let percent = |v: Option<f64>| v.map(|v| format!("{:.2}%", v)).unwrap_or_else(|| "-".to_string());
        vec![
            self.test.clone(),
            status_label(self.status),
            percent(self.similarity),
            percent(self.threshold),
            format!("{}ms", self.duration_ms),
            self.detail.clone(),
        ]
    }
}

/// Exit status of a session: FAIL, ERROR or cancellation fail the run,
/// missing baselines only warn
pub fn session_ok(session: &TestSession) -> bool {
    session.complete && session.counts.failed == 0 && session.counts.errors == 0
}

pub async fn execute(args: RunArgs, ctx: &Context) -> Result<bool> {
    let config = &ctx.config;
    let mut orchestrator_config = OrchestratorConfig::from_config(config);
    if let Some(workers) = args.workers {
        orchestrator_config.workers = workers.max(1);
    }

    let reports = Arc::new(ctx.report_store()?);
    let orchestrator = ComparisonOrchestrator::new(
        Arc::new(ctx.capturer()),
        Arc::new(ctx.baseline_store().await?),
        SimilarityEngine::new(config.similarity.clone())?,
        ctx.thresholds()?,
        Arc::new(ctx.isolation().await?),
        orchestrator_config,
    )
    .with_reports(reports.clone());

    let scope = Scope {
        pages: if args.modules.is_empty() { None } else { Some(args.modules) },
        viewport: args.viewport,
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let session = orchestrator.run(&scope, cancel).await?;

    // Reports are best effort; the session is already persisted
    let report_path = match reports.write_report(&session.id, ReportFormat::Html, &config.reports_dir()) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(session = %session.id, "Failed to write HTML report: {}", e);
            None
        }
    };

    if ctx.format == OutputFormat::Json {
        print_json(&session);
        return Ok(session_ok(&session));
    }

    let rows: Vec<ResultDisplay> = session.results.iter().map(ResultDisplay::from).collect();
    print_list(&rows, ctx.format);

    let counts = &session.counts;
    println!();
    println!("Session:        {}", session.id);
    println!(
        "Results:        {} total, {} passed, {} failed, {} errors, {} missing baseline",
        counts.total, counts.passed, counts.failed, counts.errors, counts.missing_baseline
    );
    println!("Avg similarity: {:.2}%", session.avg_similarity);
    if let Some(path) = report_path {
        println!("Report:         {}", path.display());
    }
    println!();

    if !session.complete {
        print_warning("Session was cancelled before every pair finished");
    }
    if counts.missing_baseline > 0 {
        print_info(&format!(
            "{} screenshots have no baseline yet; review them and run `visreg generate`",
            counts.missing_baseline
        ));
    }

    let ok = session_ok(&session);
    if ok {
        print_success("Visual regression passed");
    } else if session.complete {
        print_error("Visual regression failed");
    }
    Ok(ok)
}
