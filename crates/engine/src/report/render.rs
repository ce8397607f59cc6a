//! Report rendering: JSON record, plain summary and HTML

use handlebars::Handlebars;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use visreg_common::{ComparisonResult, ComparisonStatus, Error, Result, TestSession};

const HTML_TEMPLATE: &str = include_str!("report.hbs");

/// Failures scoring below this are reported as a low-similarity pattern
pub const LOW_SIMILARITY: f64 = 85.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Html,
    Json,
    Summary,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Json => "json",
            ReportFormat::Summary => "txt",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "html" => Ok(ReportFormat::Html),
            "json" => Ok(ReportFormat::Json),
            "summary" => Ok(ReportFormat::Summary),
            other => Err(Error::InvalidConfig(format!("unknown report format '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub test_name: String,
    pub page_name: String,
    pub viewport: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupStats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub missing_baseline: usize,
    pub pass_rate: f64,
    pub avg_similarity: f64,
    #[serde(skip)]
    similarity_sum: f64,
}

impl GroupStats {
    fn add(&mut self, result: &ComparisonResult) {
        self.total += 1;
        match result.status {
            ComparisonStatus::Pass => self.passed += 1,
            ComparisonStatus::Fail => self.failed += 1,
            ComparisonStatus::Error => self.errors += 1,
            ComparisonStatus::MissingBaseline => self.missing_baseline += 1,
        }
        if let Some(scores) = result.scores {
            self.similarity_sum += scores.composite;
        }
    }

    fn finish(&mut self) {
        let scored = self.passed + self.failed;
        self.pass_rate = round2(self.passed as f64 / self.total.max(1) as f64 * 100.0);
        self.avg_similarity = if scored == 0 {
            0.0
        } else {
            round2(self.similarity_sum / scored as f64)
        };
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailurePattern {
    pub kind: &'static str,
    pub description: String,
    pub tests: Vec<String>,
}

/// Structured record of one session, also used as the CI metrics export
#[derive(Debug, Clone, Serialize)]
pub struct ReportRecord {
    pub session_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub complete: bool,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub error_tests: usize,
    pub missing_baseline_tests: usize,
    pub avg_similarity: f64,
    /// Seconds
    pub total_duration: f64,
    pub failures: Vec<FailureRecord>,
    pub page_stats: BTreeMap<String, GroupStats>,
    pub viewport_stats: BTreeMap<String, GroupStats>,
    pub failure_patterns: Vec<FailurePattern>,
}

impl ReportRecord {
    pub fn from_session(session: &TestSession) -> Self {
        let mut page_stats: BTreeMap<String, GroupStats> = BTreeMap::new();
        let mut viewport_stats: BTreeMap<String, GroupStats> = BTreeMap::new();
        for result in &session.results {
            page_stats
                .entry(result.key.page.to_string())
                .or_default()
                .add(result);
            viewport_stats
                .entry(result.key.viewport.to_string())
                .or_default()
                .add(result);
        }
        page_stats.values_mut().for_each(GroupStats::finish);
        viewport_stats.values_mut().for_each(GroupStats::finish);

        let failures = session
            .failures()
            .map(|r| FailureRecord {
                test_name: r.test_name(),
                page_name: r.key.page.to_string(),
                viewport: r.key.viewport.to_string(),
                similarity: round2(r.similarity()),
            })
            .collect();

        Self {
            session_id: session.id.clone(),
            started_at: session.started_at.to_rfc3339(),
            ended_at: session.ended_at.map(|t| t.to_rfc3339()),
            complete: session.complete,
            total_tests: session.counts.total,
            passed_tests: session.counts.passed,
            failed_tests: session.counts.failed,
            error_tests: session.counts.errors,
            missing_baseline_tests: session.counts.missing_baseline,
            avg_similarity: round2(session.avg_similarity),
            total_duration: session.total_duration_ms as f64 / 1000.0,
            failures,
            page_stats,
            viewport_stats,
            failure_patterns: failure_patterns(session),
        }
    }
}

fn failure_patterns(session: &TestSession) -> Vec<FailurePattern> {
    let mut patterns = Vec::new();

    let mut by_page: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for failure in session.failures() {
        by_page
            .entry(failure.key.page.to_string())
            .or_default()
            .push(failure.test_name());
    }
    for (page, tests) in by_page {
        if tests.len() > 1 {
            patterns.push(FailurePattern {
                kind: "cross_device_failure",
                description: format!("{} fails on {} viewports", page, tests.len()),
                tests,
            });
        }
    }

    let low: Vec<String> = session
        .failures()
        .filter(|r| r.similarity() < LOW_SIMILARITY)
        .map(|r| r.test_name())
        .collect();
    if !low.is_empty() {
        patterns.push(FailurePattern {
            kind: "low_similarity",
            description: format!(
                "{} failure(s) below {:.0}% similarity, likely layout changes",
                low.len(),
                LOW_SIMILARITY
            ),
            tests: low,
        });
    }

    patterns
}

#[derive(Serialize)]
struct HtmlRow {
    test_name: String,
    page_name: String,
    viewport: String,
    status: &'static str,
    scored: bool,
    similarity: f64,
    threshold: Option<f64>,
    diff_path: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct HtmlContext<'a> {
    #[serde(flatten)]
    record: &'a ReportRecord,
    results: Vec<HtmlRow>,
}

/// Render `session` in `format`. Partial sessions render whatever they hold.
pub fn render(session: &TestSession, format: ReportFormat) -> Result<String> {
    let record = ReportRecord::from_session(session);
    match format {
        ReportFormat::Json => Ok(serde_json::to_string_pretty(&record)?),
        ReportFormat::Summary => Ok(render_summary(&record)),
        ReportFormat::Html => {
            let context = HtmlContext {
                record: &record,
                results: session
                    .results
                    .iter()
                    .map(|r| HtmlRow {
                        test_name: r.test_name(),
                        page_name: r.key.page.config().display_name.to_string(),
                        viewport: r.key.viewport.to_string(),
                        status: r.status.as_str(),
                        scored: r.scores.is_some(),
                        similarity: round2(r.similarity()),
                        threshold: r.threshold,
                        diff_path: r.diff_path.as_ref().map(|p| p.display().to_string()),
                        error: r.error.clone(),
                    })
                    .collect(),
            };
            let hb = Handlebars::new();
            Ok(hb.render_template(HTML_TEMPLATE, &context)?)
        }
    }
}

fn render_summary(record: &ReportRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session {}", record.session_id);
    if !record.complete {
        let _ = writeln!(out, "  (incomplete: session was cancelled)");
    }
    let _ = writeln!(
        out,
        "  {} tests: {} passed, {} failed, {} errors, {} missing baseline",
        record.total_tests,
        record.passed_tests,
        record.failed_tests,
        record.error_tests,
        record.missing_baseline_tests
    );
    let _ = writeln!(
        out,
        "  average similarity {:.2}%, duration {:.1}s",
        record.avg_similarity, record.total_duration
    );
    if !record.failures.is_empty() {
        let _ = writeln!(out, "Failures:");
        for failure in &record.failures {
            let _ = writeln!(out, "  {} ({:.2}%)", failure.test_name, failure.similarity);
        }
    }
    for pattern in &record.failure_patterns {
        let _ = writeln!(out, "Pattern {}: {}", pattern.kind, pattern.description);
    }
    out
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
