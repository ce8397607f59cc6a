//! Core types for visreg

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Browser viewport a page is rendered at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Viewport {
    Desktop,
    Laptop,
    Tablet,
    Mobile,
}

impl Viewport {
    pub const ALL: [Viewport; 4] = [
        Viewport::Desktop,
        Viewport::Laptop,
        Viewport::Tablet,
        Viewport::Mobile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Viewport::Desktop => "desktop",
            Viewport::Laptop => "laptop",
            Viewport::Tablet => "tablet",
            Viewport::Mobile => "mobile",
        }
    }

    /// Rendered (width, height) in CSS pixels
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Viewport::Desktop => (1920, 1080),
            Viewport::Laptop => (1366, 768),
            Viewport::Tablet => (768, 1024),
            Viewport::Mobile => (375, 667),
        }
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Viewport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Viewport::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown viewport '{}'", s)))
    }
}

/// Condition the capture collaborator waits for before taking a screenshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Readiness {
    /// Wait until the selector is visible
    Selector { selector: &'static str },
    /// Click `click`, then wait until `selector` is visible
    ClickThenSelector {
        click: &'static str,
        selector: &'static str,
    },
    /// Wait until the network has been idle
    NetworkIdle,
}

/// Capture configuration for one page type
#[derive(Debug, Clone, Copy)]
pub struct PageConfig {
    pub display_name: &'static str,
    /// URL path relative to the application base URL; `{order_id}` is substituted
    pub url_template: &'static str,
    pub readiness: Readiness,
    pub viewports: &'static [Viewport],
    /// Only reachable with a signed-in session
    pub requires_auth: bool,
}

/// Page types under visual test
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Login,
    Register,
    Orders,
    OrderCreate,
    OrderEdit,
    EnhancedModal,
    UiComponents,
}

impl PageType {
    pub const ALL: [PageType; 7] = [
        PageType::Login,
        PageType::Register,
        PageType::Orders,
        PageType::OrderCreate,
        PageType::OrderEdit,
        PageType::EnhancedModal,
        PageType::UiComponents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Login => "login",
            PageType::Register => "register",
            PageType::Orders => "orders",
            PageType::OrderCreate => "order_create",
            PageType::OrderEdit => "order_edit",
            PageType::EnhancedModal => "enhanced_modal",
            PageType::UiComponents => "ui_components",
        }
    }

    pub fn config(&self) -> PageConfig {
        match self {
            PageType::Login => PageConfig {
                display_name: "Login Page",
                url_template: "/login",
                readiness: Readiness::Selector { selector: "form" },
                viewports: &Viewport::ALL,
                requires_auth: false,
            },
            PageType::Register => PageConfig {
                display_name: "Register Page",
                url_template: "/register",
                readiness: Readiness::Selector { selector: "form" },
                viewports: &Viewport::ALL,
                requires_auth: false,
            },
            PageType::Orders => PageConfig {
                display_name: "Orders List",
                url_template: "/orders",
                readiness: Readiness::Selector { selector: "table" },
                viewports: &Viewport::ALL,
                requires_auth: true,
            },
            PageType::OrderCreate => PageConfig {
                display_name: "Order Create",
                url_template: "/orders/create",
                readiness: Readiness::Selector {
                    selector: "button[type='submit']",
                },
                viewports: &Viewport::ALL,
                requires_auth: true,
            },
            PageType::OrderEdit => PageConfig {
                display_name: "Order Edit",
                url_template: "/orders/{order_id}/edit",
                readiness: Readiness::Selector { selector: "form" },
                viewports: &Viewport::ALL,
                requires_auth: true,
            },
            PageType::EnhancedModal => PageConfig {
                display_name: "Enhanced Modal",
                url_template: "/orders",
                readiness: Readiness::ClickThenSelector {
                    click: "[data-bs-toggle='modal']",
                    selector: ".modal.show",
                },
                viewports: &[Viewport::Desktop, Viewport::Mobile],
                requires_auth: true,
            },
            PageType::UiComponents => PageConfig {
                display_name: "UI Components",
                url_template: "/orders",
                readiness: Readiness::NetworkIdle,
                viewports: &[Viewport::Desktop, Viewport::Tablet, Viewport::Mobile],
                requires_auth: true,
            },
        }
    }

    /// Absolute URL for this page against `base_url`
    pub fn url(&self, base_url: &str, order_id: u64) -> String {
        let path = self
            .config()
            .url_template
            .replace("{order_id}", &order_id.to_string());
        format!("{}{}", base_url.trim_end_matches('/'), path)
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PageType::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown page type '{}'", s)))
    }
}

/// Identity of one baseline: a (page, viewport) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BaselineKey {
    pub page: PageType,
    pub viewport: Viewport,
}

impl BaselineKey {
    pub fn new(page: PageType, viewport: Viewport) -> Self {
        Self { page, viewport }
    }

    /// File stem used for images of this key, e.g. `login@desktop`
    pub fn stem(&self) -> String {
        format!("{}@{}", self.page, self.viewport)
    }

    pub fn file_name(&self) -> String {
        format!("{}.png", self.stem())
    }

    pub fn from_stem(stem: &str) -> Result<Self> {
        let (page, viewport) = stem
            .split_once('@')
            .ok_or_else(|| Error::InvalidConfig(format!("malformed baseline name '{}'", stem)))?;
        Ok(Self::new(page.parse()?, viewport.parse()?))
    }

    /// Every (page, viewport) pair in scope; `None` means all
    pub fn scope(pages: Option<&[PageType]>, viewport: Option<Viewport>) -> Vec<BaselineKey> {
        let pages = pages.unwrap_or(&PageType::ALL);
        let mut keys = Vec::new();
        for page in pages {
            for vp in page.config().viewports {
                if viewport.map_or(true, |only| only == *vp) {
                    keys.push(BaselineKey::new(*page, *vp));
                }
            }
        }
        keys.sort();
        keys.dedup();
        keys
    }
}

impl fmt::Display for BaselineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.page, self.viewport)
    }
}

/// Sub-scores and weighted composite, all in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScores {
    pub pixel: f64,
    pub histogram: f64,
    pub structural: f64,
    pub composite: f64,
    /// Inputs had different dimensions and were padded to a common canvas
    pub dimension_mismatch: bool,
}

impl SimilarityScores {
    pub fn identical() -> Self {
        Self {
            pixel: 100.0,
            histogram: 100.0,
            structural: 100.0,
            composite: 100.0,
            dimension_mismatch: false,
        }
    }
}

/// Terminal state of one (page, viewport) comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Pass,
    Fail,
    Error,
    MissingBaseline,
}

impl ComparisonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonStatus::Pass => "pass",
            ComparisonStatus::Fail => "fail",
            ComparisonStatus::Error => "error",
            ComparisonStatus::MissingBaseline => "missing_baseline",
        }
    }
}

impl FromStr for ComparisonStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pass" => Ok(ComparisonStatus::Pass),
            "fail" => Ok(ComparisonStatus::Fail),
            "error" => Ok(ComparisonStatus::Error),
            "missing_baseline" => Ok(ComparisonStatus::MissingBaseline),
            other => Err(Error::Internal(format!("unknown status '{}'", other))),
        }
    }
}

/// Outcome of scoring one screenshot against its baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub key: BaselineKey,
    pub status: ComparisonStatus,
    pub scores: Option<SimilarityScores>,
    pub threshold: Option<f64>,
    pub baseline_checksum: Option<String>,
    pub screenshot_path: Option<PathBuf>,
    pub diff_path: Option<PathBuf>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ComparisonResult {
    /// Composite score, or 0 when the pair was never scored
    pub fn similarity(&self) -> f64 {
        self.scores.map(|s| s.composite).unwrap_or(0.0)
    }

    pub fn test_name(&self) -> String {
        format!("{}_{}", self.key.page, self.key.viewport)
    }
}

/// Aggregate outcome counts for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub missing_baseline: usize,
}

impl SessionCounts {
    pub fn tally<'a>(results: impl IntoIterator<Item = &'a ComparisonResult>) -> Self {
        let mut counts = Self::default();
        for result in results {
            counts.total += 1;
            match result.status {
                ComparisonStatus::Pass => counts.passed += 1,
                ComparisonStatus::Fail => counts.failed += 1,
                ComparisonStatus::Error => counts.errors += 1,
                ComparisonStatus::MissingBaseline => counts.missing_baseline += 1,
            }
        }
        counts
    }

    /// Pairs that reached the scoring stage
    pub fn scored(&self) -> usize {
        self.passed + self.failed
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64 * 100.0
        }
    }
}

/// One batch of comparisons sharing a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// False when the session was cancelled before every pair finished
    pub complete: bool,
    pub counts: SessionCounts,
    pub avg_similarity: f64,
    pub total_duration_ms: u64,
    pub results: Vec<ComparisonResult>,
}

impl TestSession {
    /// Build a session from raw results. A later result for the same key
    /// replaces an earlier one, so re-recording a pair is harmless.
    pub fn from_results(
        id: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        complete: bool,
        results: impl IntoIterator<Item = ComparisonResult>,
    ) -> Self {
        let mut by_key: BTreeMap<BaselineKey, ComparisonResult> = BTreeMap::new();
        for result in results {
            by_key.insert(result.key, result);
        }
        let results: Vec<ComparisonResult> = by_key.into_values().collect();
        let counts = SessionCounts::tally(&results);

        let scored: Vec<f64> = results
            .iter()
            .filter_map(|r| r.scores.map(|s| s.composite))
            .collect();
        let avg_similarity = if scored.is_empty() {
            0.0
        } else {
            scored.iter().sum::<f64>() / scored.len() as f64
        };

        let total_duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;

        Self {
            id: id.into(),
            started_at,
            ended_at: Some(ended_at),
            complete,
            counts,
            avg_similarity,
            total_duration_ms,
            results,
        }
    }

    /// Check that the aggregate counts equal the tally of contained results
    pub fn verify(&self) -> Result<()> {
        let actual = SessionCounts::tally(&self.results);
        if actual != self.counts {
            return Err(Error::SessionInvariant {
                id: self.id.clone(),
                detail: format!("recorded {:?}, results tally {:?}", self.counts, actual),
            });
        }
        let sum = actual.passed + actual.failed + actual.errors + actual.missing_baseline;
        if sum != actual.total {
            return Err(Error::SessionInvariant {
                id: self.id.clone(),
                detail: format!("status counts sum to {} but total is {}", sum, actual.total),
            });
        }
        Ok(())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ComparisonResult> {
        self.results
            .iter()
            .filter(|r| r.status == ComparisonStatus::Fail)
    }

    /// True when every pair passed
    pub fn succeeded(&self) -> bool {
        self.complete && self.counts.passed == self.counts.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn result(page: PageType, viewport: Viewport, status: ComparisonStatus, score: Option<f64>) -> ComparisonResult {
        ComparisonResult {
            key: BaselineKey::new(page, viewport),
            status,
            scores: score.map(|s| SimilarityScores {
                pixel: s,
                histogram: s,
                structural: s,
                composite: s,
                dimension_mismatch: false,
            }),
            threshold: Some(95.0),
            baseline_checksum: None,
            screenshot_path: None,
            diff_path: None,
            error: None,
            duration_ms: 5,
            timestamp: Utc::now(),
        }
    }

    #[test_case("desktop", Viewport::Desktop)]
    #[test_case("mobile", Viewport::Mobile)]
    fn test_viewport_parse(name: &str, expected: Viewport) {
        assert_eq!(name.parse::<Viewport>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_page_type_rejected() {
        assert!("checkout".parse::<PageType>().is_err());
    }

    #[test]
    fn test_key_stem_roundtrip() {
        let key = BaselineKey::new(PageType::OrderEdit, Viewport::Tablet);
        assert_eq!(key.stem(), "order_edit@tablet");
        assert_eq!(BaselineKey::from_stem(&key.stem()).unwrap(), key);
    }

    #[test]
    fn test_order_edit_url_substitutes_id() {
        assert_eq!(
            PageType::OrderEdit.url("http://localhost:8000/", 42),
            "http://localhost:8000/orders/42/edit"
        );
    }

    #[test]
    fn test_only_auth_forms_are_public() {
        let public: Vec<PageType> = PageType::ALL
            .into_iter()
            .filter(|p| !p.config().requires_auth)
            .collect();
        assert_eq!(public, vec![PageType::Login, PageType::Register]);
    }

    #[test]
    fn test_scope_filters_viewport() {
        let keys = BaselineKey::scope(Some(&[PageType::Login, PageType::EnhancedModal]), Some(Viewport::Tablet));
        assert_eq!(keys, vec![BaselineKey::new(PageType::Login, Viewport::Tablet)]);
    }

    #[test]
    fn test_session_counts_missing_separately() {
        let now = Utc::now();
        let session = TestSession::from_results(
            "s1",
            now,
            now,
            true,
            vec![
                result(PageType::Login, Viewport::Desktop, ComparisonStatus::MissingBaseline, None),
                result(PageType::Orders, Viewport::Desktop, ComparisonStatus::Pass, Some(99.0)),
                result(PageType::Orders, Viewport::Mobile, ComparisonStatus::Fail, Some(90.0)),
            ],
        );
        assert_eq!(session.counts.total, 3);
        assert_eq!(session.counts.missing_baseline, 1);
        assert_eq!(session.counts.passed, 1);
        assert_eq!(session.counts.failed, 1);
        assert!((session.avg_similarity - 94.5).abs() < 1e-9);
        session.verify().unwrap();
    }

    #[test]
    fn test_rerecorded_key_replaces_previous() {
        let now = Utc::now();
        let session = TestSession::from_results(
            "s2",
            now,
            now,
            true,
            vec![
                result(PageType::Login, Viewport::Desktop, ComparisonStatus::Error, None),
                result(PageType::Login, Viewport::Desktop, ComparisonStatus::Pass, Some(100.0)),
            ],
        );
        assert_eq!(session.counts.total, 1);
        assert_eq!(session.results[0].status, ComparisonStatus::Pass);
    }

    #[test]
    fn test_verify_detects_tampered_counts() {
        let now = Utc::now();
        let mut session = TestSession::from_results(
            "s3",
            now,
            now,
            true,
            vec![result(PageType::Login, Viewport::Desktop, ComparisonStatus::Pass, Some(99.0))],
        );
        session.counts.failed = 1;
        assert!(matches!(session.verify(), Err(Error::SessionInvariant { .. })));
    }
}
