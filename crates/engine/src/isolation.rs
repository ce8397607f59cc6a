//! Ephemeral artifact namespaces
//!
//! Every session gets its own directory under `artifacts/sessions/<id>/`
//! with `screenshots/` and `diffs/` inside, so concurrent sessions never
//! write to the same file. Cleanup only ever descends into `sessions/`;
//! baseline versions live elsewhere and are never touched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use visreg_common::{BaselineKey, Result};

const SESSIONS_DIR: &str = "sessions";
const SCREENSHOTS_DIR: &str = "screenshots";
const DIFFS_DIR: &str = "diffs";
const MANIFEST_FILE: &str = "session.json";

#[derive(Debug, Serialize, Deserialize)]
struct SessionManifest {
    id: String,
    started_at: DateTime<Utc>,
    pid: u32,
}

/// Artifact namespace owned by one session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub diffs_dir: PathBuf,
}

impl SessionHandle {
    pub fn screenshot_path(&self, key: &BaselineKey) -> PathBuf {
        self.screenshots_dir.join(key.file_name())
    }

    pub fn diff_path(&self, key: &BaselineKey) -> PathBuf {
        self.diffs_dir.join(format!("{}_diff.png", key.stem()))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub removed_sessions: Vec<String>,
    pub freed_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryUsage {
    pub files: u64,
    pub bytes: u64,
}

impl CategoryUsage {
    fn add(&mut self, bytes: u64) {
        self.files += 1;
        self.bytes += bytes;
    }
}

/// Storage consumed under the artifacts root, by category
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageReport {
    pub sessions: usize,
    pub screenshots: CategoryUsage,
    pub diffs: CategoryUsage,
    pub other: CategoryUsage,
}

impl UsageReport {
    pub fn total_bytes(&self) -> u64 {
        self.screenshots.bytes + self.diffs.bytes + self.other.bytes
    }
}

pub struct IsolationManager {
    root: PathBuf,
}

impl IsolationManager {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(SESSIONS_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    pub async fn acquire_session(&self) -> Result<SessionHandle> {
        let sessions = self.sessions_dir();
        fs::create_dir_all(&sessions).await?;

        // create_dir fails on an existing path, so a colliding id is retried
        let (id, dir) = loop {
            let id = Uuid::new_v4().to_string();
            let dir = sessions.join(&id);
            match fs::create_dir(&dir).await {
                Ok(()) => break (id, dir),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        };

        let handle = SessionHandle {
            started_at: Utc::now(),
            screenshots_dir: dir.join(SCREENSHOTS_DIR),
            diffs_dir: dir.join(DIFFS_DIR),
            id,
            dir,
        };
        fs::create_dir_all(&handle.screenshots_dir).await?;
        fs::create_dir_all(&handle.diffs_dir).await?;

        let manifest = SessionManifest {
            id: handle.id.clone(),
            started_at: handle.started_at,
            pid: std::process::id(),
        };
        fs::write(handle.dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?).await?;

        debug!(session = %handle.id, dir = %handle.dir.display(), "Acquired artifact namespace");
        Ok(handle)
    }

    /// Delete session namespaces older than `retention`, complete or not
    pub async fn cleanup(&self, retention: Duration) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let mut entries = match fs::read_dir(self.sessions_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };
        let now = Utc::now();

        while let Some(entry) = entries.next_entry().await? {
            // file_type does not follow symlinks
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            let Some(started_at) = session_started_at(&path).await else {
                warn!(dir = %path.display(), "Cannot determine session age, skipping");
                continue;
            };
            let age = (now - started_at).to_std().unwrap_or(Duration::ZERO);
            if age <= retention {
                continue;
            }

            let bytes = dir_size(&path);
            fs::remove_dir_all(&path).await?;
            let id = entry.file_name().to_string_lossy().to_string();
            debug!(session = %id, bytes, "Removed expired artifacts");
            report.freed_bytes += bytes;
            report.removed_sessions.push(id);
        }

        report.removed_sessions.sort();
        info!(
            removed = report.removed_sessions.len(),
            freed_bytes = report.freed_bytes,
            "Artifact cleanup finished"
        );
        Ok(report)
    }

    pub fn usage_report(&self) -> Result<UsageReport> {
        let mut report = UsageReport::default();
        let sessions = self.sessions_dir();
        if !self.root.exists() {
            return Ok(report);
        }

        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            let path = entry.path();
            if entry.file_type().is_dir() {
                if path.parent() == Some(sessions.as_path()) {
                    report.sessions += 1;
                }
                continue;
            }
            let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            match category_of(path.strip_prefix(&sessions).ok()) {
                Some(SCREENSHOTS_DIR) => report.screenshots.add(bytes),
                Some(DIFFS_DIR) => report.diffs.add(bytes),
                _ => report.other.add(bytes),
            }
        }
        Ok(report)
    }
}

/// `screenshots` or `diffs` for files inside `<id>/<category>/...`
fn category_of(relative: Option<&Path>) -> Option<&str> {
    let mut components = relative?.components();
    components.next()?;
    let category = components.next()?.as_os_str().to_str()?;
    // the category directory itself must not be the last component
    components.next()?;
    Some(category)
}

async fn session_started_at(dir: &Path) -> Option<DateTime<Utc>> {
    if let Ok(bytes) = fs::read(dir.join(MANIFEST_FILE)).await {
        if let Ok(manifest) = serde_json::from_slice::<SessionManifest>(&bytes) {
            return Some(manifest.started_at);
        }
    }
    let modified = fs::metadata(dir).await.ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
