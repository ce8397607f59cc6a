//! visreg configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::PageType;

/// Top-level configuration, loaded from `visreg.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisregConfig {
    /// Directory holding the baseline corpus, versions, artifacts and reports
    pub root: PathBuf,

    /// Base URL of the application under test
    pub base_url: String,

    /// Order used for the order edit page
    pub fixture_order_id: u64,

    /// Snapshot the current corpus before `generate` overwrites it
    pub backup_before_generate: bool,

    pub similarity: SimilarityConfig,
    pub thresholds: ThresholdConfig,
    pub recommendation: RecommendationConfig,
    pub capture: CaptureConfig,
    pub store_lock: LockConfig,
    pub retention: RetentionConfig,
}

impl Default for VisregConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("visual-tests"),
            base_url: "http://localhost:8000".to_string(),
            fixture_order_id: 1,
            backup_before_generate: true,
            similarity: SimilarityConfig::default(),
            thresholds: ThresholdConfig::default(),
            recommendation: RecommendationConfig::default(),
            capture: CaptureConfig::default(),
            store_lock: LockConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

/// Composite weights and diff settings for the similarity engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub pixel_weight: f64,
    pub histogram_weight: f64,
    pub structural_weight: f64,

    /// Per-channel difference above which a pixel is highlighted in diffs
    pub diff_tolerance: u8,

    /// Side of the square window used for structural similarity
    pub ssim_window: u32,

    /// Step between successive structural windows
    pub ssim_stride: u32,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            pixel_weight: 0.4,
            histogram_weight: 0.3,
            structural_weight: 0.3,
            diff_tolerance: 5,
            ssim_window: 8,
            ssim_stride: 4,
        }
    }
}

/// Per-page minimum composite scores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Used for page types without an explicit entry
    pub default: f64,

    /// Keyed by page type identifier (`login`, `order_edit`, ...)
    pub pages: BTreeMap<String, f64>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        let pages = [
            (PageType::Login, 98.0),
            (PageType::Register, 98.0),
            (PageType::Orders, 95.0),
            (PageType::OrderCreate, 97.0),
            (PageType::OrderEdit, 95.0),
            (PageType::EnhancedModal, 95.0),
            (PageType::UiComponents, 97.0),
        ]
        .into_iter()
        .map(|(page, value)| (page.as_str().to_string(), value))
        .collect();

        Self {
            default: 95.0,
            pages,
        }
    }
}

/// Threshold recommendation heuristic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Percentile of historical passing scores, in [0, 100]
    pub percentile: f64,

    /// Largest move away from the current threshold per recommendation
    pub max_delta: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            percentile: 5.0,
            max_delta: 2.0,
        }
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 250,
            max_backoff_ms: 4_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as u32;
        let ms = self
            .base_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Capture and worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Units captured concurrently within one session
    pub workers: usize,

    /// Deadline for capturing one (page, viewport) unit, retries included.
    /// Must cover [`CaptureConfig::retry_budget`].
    pub unit_timeout_ms: u64,

    /// Deadline for a single capture attempt
    pub attempt_timeout_ms: u64,

    /// Node.js binary used to drive Playwright
    pub node_binary: String,

    pub headless: bool,

    pub retry: RetryPolicy,

    /// Account used to sign in before capturing pages behind the login
    pub credentials: Option<Credentials>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            unit_timeout_ms: 60_000,
            attempt_timeout_ms: 15_000,
            node_binary: "node".to_string(),
            headless: true,
            retry: RetryPolicy::default(),
            credentials: None,
        }
    }
}

impl CaptureConfig {
    /// Longest a unit can spend capturing: every attempt running to its
    /// deadline plus the backoff between attempts
    pub fn retry_budget(&self) -> Duration {
        let attempts = self.retry.max_attempts.max(1);
        let capturing = Duration::from_millis(self.attempt_timeout_ms.saturating_mul(attempts as u64));
        (1..attempts)
            .map(|attempt| self.retry.delay_for_attempt(attempt))
            .fold(capturing, |total, delay| total.saturating_add(delay))
    }
}

/// Application account for authenticated pages
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub login_id: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login_id", &self.login_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Exclusive lock over the current corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// A lock file older than this is treated as abandoned
    pub stale_after_secs: u64,

    pub retry: RetryPolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 300,
            retry: RetryPolicy {
                max_attempts: 10,
                base_backoff_ms: 50,
                max_backoff_ms: 2_000,
            },
        }
    }
}

/// Ephemeral artifact retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub artifact_retention_hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            artifact_retention_hours: 72,
        }
    }
}

impl RetentionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.artifact_retention_hours.saturating_mul(3600))
    }
}

impl VisregConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.similarity;
        let weights = [s.pixel_weight, s.histogram_weight, s.structural_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(Error::InvalidConfig(
                "similarity weights must be non-negative with a positive sum".into(),
            ));
        }
        if s.ssim_window == 0 || s.ssim_stride == 0 {
            return Err(Error::InvalidConfig("ssim window and stride must be positive".into()));
        }

        check_threshold(self.thresholds.default)?;
        for (page, value) in &self.thresholds.pages {
            page.parse::<PageType>()?;
            check_threshold(*value)?;
        }

        let r = &self.recommendation;
        if !(0.0..=100.0).contains(&r.percentile) {
            return Err(Error::InvalidConfig(format!(
                "recommendation percentile {} outside [0, 100]",
                r.percentile
            )));
        }
        if !r.max_delta.is_finite() || r.max_delta < 0.0 {
            return Err(Error::InvalidConfig("recommendation max_delta must be >= 0".into()));
        }

        if self.capture.workers == 0 {
            return Err(Error::InvalidConfig("capture.workers must be at least 1".into()));
        }
        if self.capture.retry.max_attempts == 0 || self.store_lock.retry.max_attempts == 0 {
            return Err(Error::InvalidConfig("retry max_attempts must be at least 1".into()));
        }
        if self.capture.attempt_timeout_ms == 0 {
            return Err(Error::InvalidConfig("capture.attempt_timeout_ms must be positive".into()));
        }
        let budget = self.capture.retry_budget();
        if Duration::from_millis(self.capture.unit_timeout_ms) < budget {
            return Err(Error::InvalidConfig(format!(
                "capture.unit_timeout_ms {} is shorter than the retry budget of {} ms",
                self.capture.unit_timeout_ms,
                budget.as_millis()
            )));
        }
        Ok(())
    }

    pub fn baseline_dir(&self) -> PathBuf {
        self.root.join("baseline")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("baseline_versions")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn reports_db_path(&self) -> PathBuf {
        self.reports_dir().join("test_results.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".baseline.lock")
    }
}

/// Thresholds must lie in (0, 100]
pub fn check_threshold(value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 && value <= 100.0 {
        Ok(())
    } else {
        Err(Error::InvalidThreshold(value))
    }
}
