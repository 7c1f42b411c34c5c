//! Result persistence.
//!
//! Every probe outcome passes through a [`ResultSink`]. The coordinator owns
//! the sink exclusively for the duration of a run and calls it from a single
//! task, so implementations need no internal locking.

mod null;
mod postgres;
mod sqlite;

pub use null::NullSink;
pub use postgres::PostgresSink;
pub use sqlite::{SqliteSink, StoredProbe};

use crate::error::SinkResult;
use crate::prober::ProbeOutcome;
use crate::types::{ScanId, ScanTarget};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// Run-level context a sink attaches to every row it writes.
#[derive(Debug, Clone)]
pub struct RunInfo {
    /// Identifier of the run.
    pub scan_id: ScanId,
    /// Endpoint being probed.
    pub target: ScanTarget,
    /// Request path on the endpoint.
    pub path: String,
}

/// A destination for probe outcomes.
///
/// Lifecycle: `open` once, `record` per outcome, `close` once. `close` must be
/// safe to call after a failed or partial `open`, and more than once.
#[async_trait]
pub trait ResultSink: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Acquire resources and make sure the destination schema exists.
    async fn open(&mut self, run: &RunInfo) -> SinkResult<()>;

    /// Persist one outcome.
    async fn record(&mut self, outcome: &ProbeOutcome) -> SinkResult<()>;

    /// Release resources.
    async fn close(&mut self);
}

/// Where outcomes should be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SinkTarget {
    /// Do not persist anything.
    #[default]
    None,
    /// Embedded SQLite database file.
    Sqlite(PathBuf),
    /// PostgreSQL server, by connection string.
    Postgres(String),
}

impl SinkTarget {
    /// Construct the sink; nothing is opened yet.
    pub fn build(&self) -> Box<dyn ResultSink> {
        match self {
            Self::None => Box::new(NullSink),
            Self::Sqlite(path) => Box::new(SqliteSink::new(path.clone())),
            Self::Postgres(dsn) => Box::new(PostgresSink::new(dsn.clone())),
        }
    }
}

impl fmt::Display for SinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Sqlite(path) => write!(f, "sqlite:{}", path.display()),
            // The DSN may carry a password.
            Self::Postgres(_) => write!(f, "postgres"),
        }
    }
}
