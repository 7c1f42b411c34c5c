//! Prober trait abstraction and the per-port outcome type.
//!
//! A `Prober` performs exactly one attempt; retrying is layered on top by
//! [`probe_with_retry`](super::probe_with_retry), so test doubles only
//! have to script single attempts.

use crate::error::ProbeError;
use crate::types::Port;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;

/// Result of probing one port, across all of its attempts.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    /// The port that was probed.
    pub port: Port,
    /// True if some attempt reached the endpoint and got the expected answer.
    pub allowed: bool,
    /// Attempts made, always at least one.
    pub attempts: u32,
    /// Wall-clock time spent on this port, including retry delays.
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Error from the last attempt; present exactly when `allowed` is false.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<ProbeError>,
    /// When the outcome was determined.
    pub finished_at: DateTime<Utc>,
}

impl ProbeOutcome {
    /// An outcome for a port that let the probe through.
    pub fn allowed(port: Port, attempts: u32, elapsed: Duration) -> Self {
        Self {
            port,
            allowed: true,
            attempts: attempts.max(1),
            elapsed,
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// An outcome for a port that did not.
    pub fn denied(port: Port, attempts: u32, elapsed: Duration, error: ProbeError) -> Self {
        Self {
            port,
            allowed: false,
            attempts: attempts.max(1),
            elapsed,
            error: Some(error),
            finished_at: Utc::now(),
        }
    }

    /// Error detail as text, empty when allowed.
    pub fn error_detail(&self) -> String {
        self.error.as_ref().map(ToString::to_string).unwrap_or_default()
    }

    /// Elapsed time in whole milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

pub(crate) fn serialize_millis<S: Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

fn serialize_error<S: Serializer>(error: &Option<ProbeError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_str(&e.to_string()),
        None => s.serialize_none(),
    }
}

/// A single connectivity check against one port.
///
/// Implementations must be stateless with respect to the run: every call is
/// self-contained given the port, so one prober can be shared by all workers.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Make one timeout-bounded attempt.
    async fn attempt(&self, port: Port) -> Result<(), ProbeError>;
}

/// A prober shared between workers.
pub type SharedProber = Arc<dyn Prober>;
