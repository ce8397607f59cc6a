//! Cross-process exclusive lock over the baseline corpus
//!
//! The lock is a file created with `create_new` holding a token unique to the
//! acquiring guard; whoever creates it owns the corpus until the guard is
//! dropped. Contenders back off per the configured [`RetryPolicy`] and give
//! up with [`Error::StoreLockConflict`].
//!
//! A lock file older than `stale_after` belongs to a writer that died. It is
//! claimed by renaming it to a private tombstone and checking the tombstone
//! still holds what was judged stale; a lock that was replaced in between is
//! put back. Release goes through the same rename, so a guard never deletes a
//! lock file carrying someone else's token.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};
use uuid::Uuid;

use visreg_common::config::LockConfig;
use visreg_common::{Error, Result, RetryPolicy};

#[derive(Debug, Clone)]
pub struct StoreLock {
    path: PathBuf,
    stale_after: Duration,
    retry: RetryPolicy,
}

/// Releases the lock file when dropped, on every exit path
#[derive(Debug)]
pub struct StoreLockGuard {
    path: PathBuf,
    token: String,
}

impl StoreLockGuard {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        let tombstone = match take(&self.path) {
            Ok(Some(tombstone)) => tombstone,
            Ok(None) => {
                warn!(path = %self.path.display(), "Store lock vanished before release");
                return;
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to release store lock: {}", e);
                return;
            }
        };

        let ours = std::fs::read_to_string(&tombstone)
            .map(|contents| owner_token(&contents) == Some(self.token.as_str()))
            .unwrap_or(false);
        if !ours {
            warn!(path = %self.path.display(), "Store lock was taken over; leaving it to its owner");
            reinstate(&tombstone, &self.path);
            return;
        }
        if let Err(e) = std::fs::remove_file(&tombstone) {
            warn!(path = %tombstone.display(), "Failed to remove released lock: {}", e);
        }
    }
}

impl StoreLock {
    pub fn new(path: impl Into<PathBuf>, config: &LockConfig) -> Self {
        Self {
            path: path.into(),
            stale_after: Duration::from_secs(config.stale_after_secs),
            retry: config.retry.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn acquire(&self) -> Result<StoreLockGuard> {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            let token = Uuid::new_v4().to_string();
            match try_create(&self.path, &token) {
                Ok(()) => {
                    debug!(path = %self.path.display(), attempt, "Acquired store lock");
                    return Ok(StoreLockGuard {
                        path: self.path.clone(),
                        token,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Some(seen) = self.stale_contents() {
                        warn!(path = %self.path.display(), "Breaking stale store lock");
                        match break_stale(&self.path, &seen) {
                            Ok(true) => continue,
                            Ok(false) => debug!(path = %self.path.display(), "Stale lock was already replaced"),
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }

            if attempt < attempts {
                tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
            }
        }
        Err(Error::StoreLockConflict { attempts })
    }

    /// Contents of the lock file when it is older than `stale_after`
    fn stale_contents(&self) -> Option<String> {
        let stale = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .map_or(false, |age| age > self.stale_after);
        if stale {
            std::fs::read_to_string(&self.path).ok()
        } else {
            None
        }
    }
}

fn try_create(path: &Path, token: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)?;
    writeln!(file, "token={}", token)?;
    writeln!(file, "pid={}", std::process::id())?;
    writeln!(file, "acquired_at={}", chrono::Utc::now().to_rfc3339())?;
    Ok(())
}

fn owner_token(contents: &str) -> Option<&str> {
    contents.lines().find_map(|line| line.strip_prefix("token="))
}

/// Move the lock file to a tombstone only the caller knows about.
/// `None` when there was no lock file to take.
fn take(path: &Path) -> std::io::Result<Option<PathBuf>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tombstone = path.with_file_name(format!("{}.released-{}", name, Uuid::new_v4()));
    match std::fs::rename(path, &tombstone) {
        Ok(()) => Ok(Some(tombstone)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Put a lock taken by mistake back in place, unless a newer lock already took its spot
fn reinstate(tombstone: &Path, path: &Path) {
    if let Err(e) = std::fs::hard_link(tombstone, path) {
        debug!(path = %path.display(), "Could not reinstate lock: {}", e);
    }
    let _ = std::fs::remove_file(tombstone);
}

/// Claim a stale lock whose contents were `seen`. Returns false when the
/// file changed hands since it was judged stale.
fn break_stale(path: &Path, seen: &str) -> std::io::Result<bool> {
    let Some(tombstone) = take(path)? else {
        return Ok(false);
    };
    let claimed = std::fs::read_to_string(&tombstone)?;
    if claimed == seen {
        std::fs::remove_file(&tombstone)?;
        Ok(true)
    } else {
        reinstate(&tombstone, path);
        Ok(false)
    }
}
