//! SQLite history of test sessions
//!
//! Sessions and results are append-only: a session id that has already been
//! recorded is never rewritten, and a repeated (session, page, viewport)
//! result is ignored.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use visreg_common::{
    BaselineKey, ComparisonResult, Error, PageType, Result, SessionCounts, SimilarityScores,
    TestSession,
};

use super::render::{render, ReportFormat};
use crate::threshold::HistoricalScore;

const PAGE_SIZE: usize = 32;

/// Time window for history queries; unset bounds are open
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl QueryWindow {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn last_days(days: u32) -> Self {
        Self {
            since: Some(Utc::now() - ChronoDuration::days(i64::from(days))),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn bounds(&self) -> (i64, i64) {
        (
            self.since.map_or(i64::MIN, |t| t.timestamp_millis()),
            self.until.map_or(i64::MAX, |t| t.timestamp_millis()),
        )
    }
}

/// History store for sessions and results
#[derive(Clone)]
pub struct ReportStore {
    conn: Arc<Mutex<Connection>>,
}

impl ReportStore {
    /// Open or create the history database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;

        info!("Opened report store at {:?}", path.as_ref());
        Ok(store)
    }

    /// In-memory store (for testing)
    pub fn open_memory() -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                complete INTEGER NOT NULL,
                total INTEGER NOT NULL,
                passed INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                errors INTEGER NOT NULL,
                missing_baseline INTEGER NOT NULL,
                avg_similarity REAL NOT NULL,
                total_duration_ms INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at);

            CREATE TABLE IF NOT EXISTS results (
                session_id TEXT NOT NULL REFERENCES sessions(id),
                page TEXT NOT NULL,
                viewport TEXT NOT NULL,
                status TEXT NOT NULL,
                pixel REAL,
                histogram REAL,
                structural REAL,
                composite REAL,
                dimension_mismatch INTEGER NOT NULL DEFAULT 0,
                threshold REAL,
                baseline_checksum TEXT,
                screenshot_path TEXT,
                diff_path TEXT,
                error TEXT,
                duration_ms INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                PRIMARY KEY (session_id, page, viewport)
            );
            CREATE INDEX IF NOT EXISTS idx_results_page ON results(page);
            "#,
        )?;
        Ok(())
    }

    /// Append `session` and its results. Returns false when the session id
    /// was already recorded, in which case nothing is written.
    pub fn persist(&self, session: &TestSession) -> Result<bool> {
        session.verify()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO sessions
             (id, started_at, ended_at, complete, total, passed, failed, errors,
              missing_baseline, avg_similarity, total_duration_ms, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                session.id,
                session.started_at.timestamp_millis(),
                session.ended_at.map(|t| t.timestamp_millis()),
                session.complete,
                session.counts.total as i64,
                session.counts.passed as i64,
                session.counts.failed as i64,
                session.counts.errors as i64,
                session.counts.missing_baseline as i64,
                session.avg_similarity,
                session.total_duration_ms as i64,
                Utc::now().timestamp_millis(),
            ],
        )?;
        if inserted == 0 {
            debug!(session = %session.id, "Session already recorded");
            return Ok(false);
        }

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO results
                 (session_id, page, viewport, status, pixel, histogram, structural, composite,
                  dimension_mismatch, threshold, baseline_checksum, screenshot_path, diff_path,
                  error, duration_ms, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )?;
            for r in &session.results {
                stmt.execute(params![
                    session.id,
                    r.key.page.as_str(),
                    r.key.viewport.as_str(),
                    r.status.as_str(),
                    r.scores.map(|s| s.pixel),
                    r.scores.map(|s| s.histogram),
                    r.scores.map(|s| s.structural),
                    r.scores.map(|s| s.composite),
                    r.scores.map_or(false, |s| s.dimension_mismatch),
                    r.threshold,
                    r.baseline_checksum,
                    r.screenshot_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                    r.diff_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                    r.error,
                    r.duration_ms as i64,
                    r.timestamp.timestamp_millis(),
                ])?;
            }
        }
        tx.commit()?;

        info!(
            session = %session.id,
            results = session.results.len(),
            complete = session.complete,
            "Recorded session"
        );
        Ok(true)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<TestSession>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                "SELECT id, started_at, ended_at, complete, total, passed, failed, errors,
                        missing_baseline, avg_similarity, total_duration_ms
                 FROM sessions WHERE id = ?1",
                params![id],
                session_from_row,
            )
            .optional()?;
        let Some(session) = session else {
            return Ok(None);
        };
        let mut session = session?;
        session.results = load_results(&conn, &session.id)?;
        Ok(Some(session))
    }

    /// Sessions in `window`, most recent first. The iterator pages through
    /// the database lazily and can be restarted.
    pub fn query(&self, window: QueryWindow) -> SessionIter {
        SessionIter {
            store: self.clone(),
            window,
            cursor: None,
            buffer: VecDeque::new(),
            yielded: 0,
            exhausted: false,
        }
    }

    /// Sessions from the last `days` days, most recent first
    pub fn history(&self, days: u32) -> Result<Vec<TestSession>> {
        self.query(QueryWindow::last_days(days)).collect()
    }

    /// Composite scores recorded for `page`, most recent first
    pub fn scores_for_page(&self, page: PageType, window: QueryWindow) -> Result<Vec<HistoricalScore>> {
        let (since, until) = window.bounds();
        let limit = window.limit.map_or(-1, |l| l as i64);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT r.composite, r.status FROM results r
             JOIN sessions s ON s.id = r.session_id
             WHERE r.page = ?1 AND r.composite IS NOT NULL
               AND s.started_at >= ?2 AND s.started_at <= ?3
             ORDER BY s.started_at DESC, r.viewport
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(params![page.as_str(), since, until, limit], |row| {
            let score: f64 = row.get(0)?;
            let status: String = row.get(1)?;
            Ok(HistoricalScore {
                score,
                passed: status == "pass",
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn render_report(&self, session_id: &str, format: ReportFormat) -> Result<String> {
        let session = self
            .get_session(session_id)?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        render(&session, format)
    }

    /// Render and write `report_<id>.<ext>` into `dir`
    pub fn write_report(&self, session_id: &str, format: ReportFormat, dir: &Path) -> Result<PathBuf> {
        let content = self.render_report(session_id, format)?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("report_{}.{}", session_id, format.extension()));
        std::fs::write(&path, content)?;
        Ok(path)
    }

    fn fetch_page(&self, window: &QueryWindow, cursor: Option<&(i64, String)>) -> Result<Vec<TestSession>> {
        let (since, until) = window.bounds();
        let (has_cursor, cursor_ts, cursor_id) = match cursor {
            Some((ts, id)) => (true, *ts, id.clone()),
            None => (false, 0, String::new()),
        };

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, started_at, ended_at, complete, total, passed, failed, errors,
                    missing_baseline, avg_similarity, total_duration_ms
             FROM sessions
             WHERE started_at >= ?1 AND started_at <= ?2
               AND (?3 = 0 OR started_at < ?4 OR (started_at = ?4 AND id < ?5))
             ORDER BY started_at DESC, id DESC
             LIMIT ?6",
        )?;
        let rows = stmt.query_map(
            params![since, until, has_cursor, cursor_ts, cursor_id, PAGE_SIZE as i64],
            session_from_row,
        )?;

        let mut sessions = Vec::new();
        for row in rows {
            let mut session = row??;
            session.results = load_results(&conn, &session.id)?;
            sessions.push(session);
        }
        Ok(sessions)
    }
}

/// Lazy, restartable iterator over sessions, most recent first
pub struct SessionIter {
    store: ReportStore,
    window: QueryWindow,
    cursor: Option<(i64, String)>,
    buffer: VecDeque<TestSession>,
    yielded: usize,
    exhausted: bool,
}

impl SessionIter {
    /// Rewind to the most recent session in the window
    pub fn restart(&mut self) {
        self.cursor = None;
        self.buffer.clear();
        self.yielded = 0;
        self.exhausted = false;
    }
}

impl Iterator for SessionIter {
    type Item = Result<TestSession>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.window.limit.map_or(false, |limit| self.yielded >= limit) {
            return None;
        }
        if self.buffer.is_empty() && !self.exhausted {
            match self.store.fetch_page(&self.window, self.cursor.as_ref()) {
                Ok(page) => {
                    if page.len() < PAGE_SIZE {
                        self.exhausted = true;
                    }
                    if let Some(last) = page.last() {
                        self.cursor = Some((last.started_at.timestamp_millis(), last.id.clone()));
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        let session = self.buffer.pop_front()?;
        self.yielded += 1;
        Some(Ok(session))
    }
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::Internal(format!("invalid timestamp {}", ms)))
}

/// Session header without results; the outer error is SQLite's, the inner ours
fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Result<TestSession>> {
    let id: String = row.get(0)?;
    let started_at: i64 = row.get(1)?;
    let ended_at: Option<i64> = row.get(2)?;
    let complete: bool = row.get(3)?;
    let counts = SessionCounts {
        total: row.get::<_, i64>(4)? as usize,
        passed: row.get::<_, i64>(5)? as usize,
        failed: row.get::<_, i64>(6)? as usize,
        errors: row.get::<_, i64>(7)? as usize,
        missing_baseline: row.get::<_, i64>(8)? as usize,
    };
    let avg_similarity: f64 = row.get(9)?;
    let total_duration_ms: i64 = row.get(10)?;

    Ok(build_session(id, started_at, ended_at, complete, counts, avg_similarity, total_duration_ms))
}

fn build_session(
    id: String,
    started_at: i64,
    ended_at: Option<i64>,
    complete: bool,
    counts: SessionCounts,
    avg_similarity: f64,
    total_duration_ms: i64,
) -> Result<TestSession> {
    Ok(TestSession {
        id,
        started_at: millis_to_utc(started_at)?,
        ended_at: ended_at.map(millis_to_utc).transpose()?,
        complete,
        counts,
        avg_similarity,
        total_duration_ms: total_duration_ms.max(0) as u64,
        results: Vec::new(),
    })
}

fn load_results(conn: &Connection, session_id: &str) -> Result<Vec<ComparisonResult>> {
    let mut stmt = conn.prepare(
        "SELECT page, viewport, status, pixel, histogram, structural, composite,
                dimension_mismatch, threshold, baseline_checksum, screenshot_path, diff_path,
                error, duration_ms, timestamp
         FROM results WHERE session_id = ?1
         ORDER BY page, viewport",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            (
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, Option<f64>>(5)?,
                row.get::<_, Option<f64>>(6)?,
                row.get::<_, bool>(7)?,
            ),
            row.get::<_, Option<f64>>(8)?,
            row.get::<_, Option<String>>(9)?,
            row.get::<_, Option<String>>(10)?,
            row.get::<_, Option<String>>(11)?,
            row.get::<_, Option<String>>(12)?,
            row.get::<_, i64>(13)?,
            row.get::<_, i64>(14)?,
        ))
    })?;

    let mut results = Vec::new();
    for row in rows {
        let (
            page,
            viewport,
            status,
            (pixel, histogram, structural, composite, dimension_mismatch),
            threshold,
            baseline_checksum,
            screenshot_path,
            diff_path,
            error,
            duration_ms,
            timestamp,
        ) = row?;

        let scores = match (pixel, histogram, structural, composite) {
            (Some(pixel), Some(histogram), Some(structural), Some(composite)) => Some(SimilarityScores {
                pixel,
                histogram,
                structural,
                composite,
                dimension_mismatch,
            }),
            _ => None,
        };

        results.push(ComparisonResult {
            key: BaselineKey::new(page.parse()?, viewport.parse()?),
            status: status.parse()?,
            scores,
            threshold,
            baseline_checksum,
            screenshot_path: screenshot_path.map(PathBuf::from),
            diff_path: diff_path.map(PathBuf::from),
            error,
            duration_ms: duration_ms.max(0) as u64,
            timestamp: millis_to_utc(timestamp)?,
        });
    }
    // page/viewport text order differs from enum order
    results.sort_by_key(|r| r.key);
    Ok(results)
}
