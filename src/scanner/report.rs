//! Aggregate results of a run.

use crate::prober::traits::serialize_millis;
use crate::prober::ProbeOutcome;
use crate::sink::RunInfo;
use crate::types::{Port, ScanId, ScanTarget};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Everything a run produced.
///
/// `outcomes` is in completion order, which depends on scheduling; the
/// counts do not.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: ScanId,
    pub target: ScanTarget,
    pub path: String,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Ports in the run's port set.
    pub ports_total: usize,
    pub allowed: usize,
    pub denied: usize,
    /// Outcomes the sink failed to persist.
    pub sink_failures: usize,
    /// True when the run stopped before every port was probed.
    pub cancelled: bool,
    pub outcomes: Vec<ProbeOutcome>,
    #[serde(skip)]
    started: Instant,
}

impl ScanReport {
    pub(crate) fn new(run: &RunInfo, ports_total: usize) -> Self {
        Self {
            scan_id: run.scan_id,
            target: run.target.clone(),
            path: run.path.clone(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            ports_total,
            allowed: 0,
            denied: 0,
            sink_failures: 0,
            cancelled: false,
            outcomes: Vec::with_capacity(ports_total),
            started: Instant::now(),
        }
    }

    pub(crate) fn push(&mut self, outcome: ProbeOutcome) {
        if outcome.allowed {
            self.allowed += 1;
        } else {
            self.denied += 1;
        }
        self.outcomes.push(outcome);
    }

    pub(crate) fn finish(mut self) -> Self {
        self.duration = self.started.elapsed();
        self.cancelled = self.outcomes.len() < self.ports_total;
        self
    }

    /// Number of ports probed.
    pub fn probed(&self) -> usize {
        self.allowed + self.denied
    }

    /// Allowed ports in ascending order.
    pub fn allowed_ports(&self) -> Vec<Port> {
        let mut ports: Vec<Port> = self
            .outcomes
            .iter()
            .filter(|o| o.allowed)
            .map(|o| o.port)
            .collect();
        ports.sort_unstable();
        ports
    }

    /// Outcomes sorted by port, for stable presentation.
    pub fn sorted_outcomes(&self) -> Vec<&ProbeOutcome> {
        let mut outcomes: Vec<&ProbeOutcome> = self.outcomes.iter().collect();
        outcomes.sort_by_key(|o| o.port);
        outcomes
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} - {} allowed, {} denied of {} ports [{:.2}s]{}",
            self.target,
            self.allowed,
            self.denied,
            self.ports_total,
            self.duration.as_secs_f64(),
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}
