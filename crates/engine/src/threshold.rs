//! Per-page pass/fail thresholds and advisory recommendations

use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use visreg_common::config::{check_threshold, RecommendationConfig, ThresholdConfig};
use visreg_common::{ComparisonStatus, PageType, Result};

/// One historical composite score with the outcome it was judged as
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalScore {
    pub score: f64,
    pub passed: bool,
}

/// Advisory output of [`ThresholdPolicy::recommend`]
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub page: PageType,
    pub current: f64,
    pub recommended: f64,
    pub percentile: f64,
    /// Passing samples the recommendation was computed from
    pub sample_size: usize,
    /// True when the raw percentile was clipped to `max_delta`
    pub bounded: bool,
}

/// Minimum acceptable composite score per page type
#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    default: f64,
    entries: HashMap<PageType, f64>,
    recommendation: RecommendationConfig,
}

impl ThresholdPolicy {
    pub fn from_config(thresholds: &ThresholdConfig, recommendation: &RecommendationConfig) -> Result<Self> {
        check_threshold(thresholds.default)?;
        let mut entries = HashMap::new();
        for (page, value) in &thresholds.pages {
            check_threshold(*value)?;
            entries.insert(page.parse::<PageType>()?, *value);
        }
        Ok(Self {
            default: thresholds.default,
            entries,
            recommendation: recommendation.clone(),
        })
    }

    /// Configured minimum, or the default for pages without an entry
    pub fn get(&self, page: PageType) -> f64 {
        self.entries.get(&page).copied().unwrap_or(self.default)
    }

    pub fn default_threshold(&self) -> f64 {
        self.default
    }

    pub fn update(&mut self, page: PageType, value: f64) -> Result<()> {
        check_threshold(value)?;
        let previous = self.entries.insert(page, value);
        info!(
            page = %page,
            previous = ?previous,
            threshold = value,
            "Updated threshold"
        );
        Ok(())
    }

    /// `>=` threshold passes; the boundary is inclusive
    pub fn judge(&self, page: PageType, composite: f64) -> ComparisonStatus {
        if composite >= self.get(page) {
            ComparisonStatus::Pass
        } else {
            ComparisonStatus::Fail
        }
    }

    /// Low percentile of historical passing scores, never further than
    /// `max_delta` from the current threshold. Does not modify the policy.
    pub fn recommend(&self, page: PageType, historical: &[HistoricalScore]) -> Recommendation {
        let current = self.get(page);
        let mut passing: Vec<f64> = historical
            .iter()
            .filter(|h| h.passed && h.score.is_finite())
            .map(|h| h.score)
            .collect();
        passing.sort_by(|a, b| a.total_cmp(b));

        let percentile = self.recommendation.percentile;
        let Some(raw) = percentile_of(&passing, percentile) else {
            return Recommendation {
                page,
                current,
                recommended: current,
                percentile,
                sample_size: 0,
                bounded: false,
            };
        };

        let delta = self.recommendation.max_delta;
        let bounded_value = raw.clamp(current - delta, current + delta).min(100.0);
        let recommended = if bounded_value > 0.0 { bounded_value } else { current };

        Recommendation {
            page,
            current,
            recommended,
            percentile,
            sample_size: passing.len(),
            bounded: recommended != raw,
        }
    }

    /// Serialisable form for writing back to the configuration file
    pub fn to_config(&self) -> ThresholdConfig {
        ThresholdConfig {
            default: self.default,
            pages: self
                .entries
                .iter()
                .map(|(page, value)| (page.as_str().to_string(), *value))
                .collect(),
        }
    }
}

/// Linear-interpolated percentile of an ascending slice
fn percentile_of(sorted: &[f64], percentile: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let rank = percentile.clamp(0.0, 100.0) / 100.0 * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let frac = rank - lower as f64;
            Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
        }
    }
}
