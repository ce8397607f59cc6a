//! CLI Commands

pub mod artifacts;
pub mod baseline;
pub mod report;
pub mod run;
pub mod threshold;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use visreg_common::{PageType, Viewport, VisregConfig};
use visreg_engine::capture::{PlaywrightCapturer, PlaywrightConfig};
use visreg_engine::{BaselineStore, IsolationManager, ReportStore, RetryingCapturer, ThresholdPolicy};

use crate::output::OutputFormat;

/// Everything a command needs: the loaded configuration and where it came from
pub struct Context {
    pub config: VisregConfig,
    pub config_path: PathBuf,
    pub format: OutputFormat,
}

impl Context {
    pub fn load(config_path: PathBuf, format: OutputFormat) -> Result<Self> {
        let config = VisregConfig::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        Ok(Self {
            config,
            config_path,
            format,
        })
    }

    pub async fn baseline_store(&self) -> Result<BaselineStore> {
        Ok(BaselineStore::open(&self.config).await?)
    }

    pub fn report_store(&self) -> Result<ReportStore> {
        Ok(ReportStore::open(self.config.reports_db_path())?)
    }

    pub async fn isolation(&self) -> Result<IsolationManager> {
        Ok(IsolationManager::open(self.config.artifacts_dir()).await?)
    }

    pub fn thresholds(&self) -> Result<ThresholdPolicy> {
        Ok(ThresholdPolicy::from_config(
            &self.config.thresholds,
            &self.config.recommendation,
        )?)
    }

    /// Playwright capturer with the configured retry policy for transient failures
    pub fn capturer(&self) -> RetryingCapturer<PlaywrightCapturer> {
        let capture = &self.config.capture;
        let playwright = PlaywrightCapturer::new(PlaywrightConfig {
            node_binary: capture.node_binary.clone(),
            headless: capture.headless,
            attempt_timeout_ms: capture.attempt_timeout_ms,
            credentials: capture.credentials.clone(),
            ..PlaywrightConfig::default()
        });
        RetryingCapturer::new(playwright, capture.retry.clone())
    }
}

pub fn parse_page(value: &str) -> std::result::Result<PageType, String> {
    value.parse().map_err(|e: visreg_common::Error| e.to_string())
}

pub fn parse_viewport(value: &str) -> std::result::Result<Viewport, String> {
    value.parse().map_err(|e: visreg_common::Error| e.to_string())
}

/// `None` when no modules were named, so the whole matrix is covered
pub fn modules_filter(modules: &[PageType]) -> Option<&[PageType]> {
    if modules.is_empty() {
        None
    } else {
        Some(modules)
    }
}
