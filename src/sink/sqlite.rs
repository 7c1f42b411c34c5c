//! Embedded SQLite sink.
//!
//! One row per probed port in a local database file. Opening is idempotent:
//! the schema is created with `IF NOT EXISTS`, so re-running against an
//! existing file appends rows without touching what is already there.

use super::{ResultSink, RunInfo};
use crate::error::{SinkError, SinkResult};
use crate::prober::ProbeOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task;
use tracing::{debug, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS probe_results (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id     TEXT    NOT NULL,
    host        TEXT    NOT NULL,
    port        INTEGER NOT NULL,
    allowed     INTEGER NOT NULL,
    attempts    INTEGER NOT NULL,
    elapsed_ms  INTEGER NOT NULL,
    error       TEXT,
    recorded_at TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_probe_results_scan ON probe_results (scan_id);
";

const INSERT: &str = "
INSERT INTO probe_results (scan_id, host, port, allowed, attempts, elapsed_ms, error, recorded_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
";

/// Persists outcomes to an SQLite file.
pub struct SqliteSink {
    path: PathBuf,
    conn: Option<Connection>,
    run: Option<RunInfo>,
}

impl SqliteSink {
    /// Create a sink for the database at `path`; the file is created on open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: None,
            run: None,
        }
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_connection(path: &Path) -> SinkResult<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_millis(1_000))?;
    Ok(conn)
}

/// Run database work without stalling the other tasks on this worker.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => task::block_in_place(f),
        _ => f(),
    }
}

#[async_trait]
impl ResultSink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn open(&mut self, run: &RunInfo) -> SinkResult<()> {
        let conn = blocking(|| -> SinkResult<Connection> {
            let conn = open_connection(&self.path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })?;
        debug!(path = %self.path.display(), "sqlite sink ready");

        self.conn = Some(conn);
        self.run = Some(run.clone());
        Ok(())
    }

    async fn record(&mut self, outcome: &ProbeOutcome) -> SinkResult<()> {
        let (Some(conn), Some(run)) = (&self.conn, &self.run) else {
            return Err(SinkError::NotOpen);
        };

        blocking(|| -> SinkResult<()> {
            let mut stmt = conn.prepare_cached(INSERT)?;
            stmt.execute(params![
                run.scan_id.to_string(),
                run.target.host,
                outcome.port.as_u16(),
                outcome.allowed,
                outcome.attempts,
                i64::try_from(outcome.elapsed_ms()).unwrap_or(i64::MAX),
                outcome.error.as_ref().map(ToString::to_string),
                outcome.finished_at,
            ])?;
            Ok(())
        })
    }

    async fn close(&mut self) {
        self.run = None;
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = blocking(|| conn.close()) {
                warn!(path = %self.path.display(), error = %e, "failed to close sqlite sink");
            }
        }
    }
}

/// A row read back from an SQLite store.
#[derive(Debug, Clone, Serialize)]
pub struct StoredProbe {
    pub scan_id: String,
    pub host: String,
    pub port: u16,
    pub allowed: bool,
    pub attempts: u32,
    pub elapsed_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl SqliteSink {
    /// Most recent rows first, up to `limit`.
    pub fn load_recent(
        path: &Path,
        limit: usize,
        allowed_only: bool,
    ) -> SinkResult<Vec<StoredProbe>> {
        let conn = open_connection(path)?;
        conn.execute_batch(SCHEMA)?;

        let mut stmt = conn.prepare(
            "SELECT scan_id, host, port, allowed, attempts, elapsed_ms, error, recorded_at
             FROM probe_results
             WHERE (?1 = 0 OR allowed = 1)
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![allowed_only, limit], |row| {
            Ok(StoredProbe {
                scan_id: row.get(0)?,
                host: row.get(1)?,
                port: row.get(2)?,
                allowed: row.get(3)?,
                attempts: row.get(4)?,
                elapsed_ms: row.get(5)?,
                error: row.get(6)?,
                recorded_at: row.get(7)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(SinkError::from)
    }
}
