//! On-disk records kept next to baseline images

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use visreg_common::{BaselineKey, PageType, Result, Viewport};

use super::write_atomic;

pub const METADATA_FILE: &str = "baseline_metadata.json";
pub const VERSION_FILE: &str = "version.json";

/// Corpus-wide record stored as `baseline_metadata.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusMetadata {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub server_url: String,
    /// Outcome of the last generation per page type
    pub modules: BTreeMap<String, ModuleRecord>,
    pub viewports: BTreeMap<String, ViewportRecord>,
    /// Keyed by file stem (`login@desktop`)
    pub entries: BTreeMap<String, BaselineEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub name: String,
    pub success: bool,
    pub baselines_created: usize,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportRecord {
    pub width: u32,
    pub height: u32,
}

/// One baseline image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub page: PageType,
    pub viewport: Viewport,
    pub width: u32,
    pub height: u32,
    pub checksum: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl BaselineEntry {
    pub fn key(&self) -> BaselineKey {
        BaselineKey::new(self.page, self.viewport)
    }
}

impl CorpusMetadata {
    pub async fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(METADATA_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&dir.join(METADATA_FILE), &json).await
    }

    pub fn record_entry(&mut self, entry: BaselineEntry) {
        let (width, height) = entry.viewport.dimensions();
        self.viewports
            .insert(entry.viewport.as_str().to_string(), ViewportRecord { width, height });
        self.entries.insert(entry.key().stem(), entry);
    }
}

/// Manifest of a frozen version, stored as `version.json` inside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Monotonic per store; orders versions created within the same instant
    pub sequence: u64,
    pub baseline_count: usize,
}

impl VersionRecord {
    pub async fn load(dir: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(dir.join(VERSION_FILE)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&dir.join(VERSION_FILE), &json).await
    }
}
