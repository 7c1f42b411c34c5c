//! Scan coordination - the bounded worker pool.
//!
//! A fixed number of worker tasks pull ports from a shared queue (in port
//! set order) and probe them. Outcomes flow back over a channel to the
//! coordinating task, which is the only writer to both the sink and the
//! report, so neither needs locking.

mod rate_limiter;
mod report;

pub use crate::types::CancelFlag;
pub use rate_limiter::RateLimiter;
pub use report::ScanReport;

use crate::error::{ProbeError, ScanError, ScanResult};
use crate::prober::{probe_with_retry, ExpectedResponse, HttpProber, ProbeOutcome, Prober};
use crate::prober::{RetryPolicy, SharedProber};
use crate::sink::{ResultSink, RunInfo};
use crate::types::{Port, PortSet, ScanId, ScanTarget};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Configuration for one run. Shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Endpoint to reach.
    pub target: ScanTarget,
    /// Request path on the endpoint.
    pub path: String,
    /// Ports to probe, in dispatch order.
    pub ports: PortSet,
    /// Number of workers.
    pub concurrency: usize,
    /// Per-attempt timeout for connect and for the HTTP exchange.
    pub timeout: Duration,
    /// Retry ceiling and delay.
    pub retry: RetryPolicy,
    /// What counts as a successful response.
    pub expect: ExpectedResponse,
    /// Optional cap on dispatches per second.
    pub rate_limit: Option<NonZeroU32>,
}

impl ScanConfig {
    /// Default number of workers.
    pub const DEFAULT_CONCURRENCY: usize = 5;
    /// Default per-attempt timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Create a configuration with default policy.
    pub fn new(target: ScanTarget, ports: PortSet) -> Self {
        Self {
            target,
            path: "/".to_string(),
            ports,
            concurrency: Self::DEFAULT_CONCURRENCY,
            timeout: Self::DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            expect: ExpectedResponse::default(),
            rate_limit: None,
        }
    }

    /// Set the request path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the number of workers.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the response requirements.
    pub fn with_expected(mut self, expect: ExpectedResponse) -> Self {
        self.expect = expect;
        self
    }

    /// Cap dispatches per second; 0 means unlimited.
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.rate_limit = NonZeroU32::new(per_second);
        self
    }

    /// Reject configurations no run could work with.
    pub fn validate(&self) -> ScanResult<()> {
        if self.concurrency == 0 {
            return Err(ScanError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ScanError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runs one scan: dispatches ports to workers and aggregates the report.
pub struct ScanCoordinator {
    config: Arc<ScanConfig>,
    prober: SharedProber,
    cancel: CancelFlag,
}

impl ScanCoordinator {
    /// Create a coordinator that probes over HTTP.
    pub fn new(config: ScanConfig) -> Self {
        let prober = HttpProber::new(config.target.clone(), config.path.clone(), config.timeout)
            .with_expected(config.expect.clone());

        Self {
            config: Arc::new(config),
            prober: Arc::new(prober),
            cancel: CancelFlag::new(),
        }
    }

    /// Replace the prober.
    pub fn with_prober(mut self, prober: SharedProber) -> Self {
        self.prober = prober;
        self
    }

    /// The run's configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// A handle that cancels this coordinator's runs.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Probe every port and return the aggregate report.
    ///
    /// Fails only before probing starts: on invalid configuration or when
    /// the sink cannot be opened. An empty port set yields an empty report
    /// without touching the sink.
    pub async fn run(&self, sink: &mut dyn ResultSink) -> ScanResult<ScanReport> {
        self.config.validate()?;

        let run = RunInfo {
            scan_id: ScanId::new(),
            target: self.config.target.clone(),
            path: self.config.path.clone(),
        };
        let total = self.config.ports.len();
        let mut report = ScanReport::new(&run, total);

        if total == 0 {
            return Ok(report.finish());
        }

        if let Err(e) = sink.open(&run).await {
            sink.close().await;
            return Err(ScanError::SinkOpen(e));
        }

        let workers = self.config.concurrency.min(total);
        info!(
            scan_id = %run.scan_id,
            target = %run.target,
            ports = total,
            workers,
            sink = sink.name(),
            "starting scan"
        );

        let queue = Arc::new(Mutex::new(self.config.ports.iter().collect::<VecDeque<_>>()));
        let limiter = self.config.rate_limit.map(RateLimiter::new);
        let (tx, mut rx) = mpsc::channel::<ProbeOutcome>(workers * 2);

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&queue),
                    prober: Arc::clone(&self.prober),
                    retry: self.config.retry,
                    limiter: limiter.clone(),
                    cancel: self.cancel.clone(),
                    results: tx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        drop(tx);

        while let Some(outcome) = rx.recv().await {
            if let Err(e) = sink.record(&outcome).await {
                warn!(port = %outcome.port, sink = sink.name(), error = %e, "failed to record outcome");
                report.sink_failures += 1;
            }
            report.push(outcome);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task failed");
            }
        }
        sink.close().await;

        let report = report.finish();
        info!(
            scan_id = %report.scan_id,
            allowed = report.allowed,
            denied = report.denied,
            cancelled = report.cancelled,
            duration_ms = report.duration.as_millis() as u64,
            "scan finished"
        );
        Ok(report)
    }
}

struct Worker {
    id: usize,
    queue: Arc<Mutex<VecDeque<Port>>>,
    prober: SharedProber,
    retry: RetryPolicy,
    limiter: Option<RateLimiter>,
    cancel: CancelFlag,
    results: mpsc::Sender<ProbeOutcome>,
}

impl Worker {
    async fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                debug!(worker = self.id, "cancelled, stopping");
                break;
            }
            let Some(port) = self.queue.lock().await.pop_front() else {
                break;
            };
            if let Some(limiter) = &self.limiter {
                limiter.wait().await;
                if self.cancel.is_cancelled() {
                    break;
                }
            }

            let outcome =
                probe_isolated(self.prober.as_ref(), port, &self.retry, &self.cancel).await;
            if self.results.send(outcome).await.is_err() {
                break;
            }
        }
    }
}

/// Counts attempts outside the retry future so a panic cannot lose them.
struct Counted<'a> {
    inner: &'a dyn Prober,
    attempts: AtomicU32,
}

#[async_trait]
impl Prober for Counted<'_> {
    async fn attempt(&self, port: Port) -> Result<(), ProbeError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.inner.attempt(port).await
    }
}

/// Probe one port; a panic inside the prober becomes a denied outcome.
async fn probe_isolated(
    prober: &dyn Prober,
    port: Port,
    retry: &RetryPolicy,
    cancel: &CancelFlag,
) -> ProbeOutcome {
    let start = Instant::now();
    let counted = Counted {
        inner: prober,
        attempts: AtomicU32::new(0),
    };
    match AssertUnwindSafe(probe_with_retry(&counted, port, retry, cancel))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            let attempts = counted.attempts.load(Ordering::Relaxed);
            warn!(port = %port, attempts, error = %message, "probe panicked");
            ProbeOutcome::denied(port, attempts, start.elapsed(), ProbeError::Internal(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "probe panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SinkError, SinkResult};
    use crate::sink::NullSink;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::io;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicUsize;

    /// Prober whose verdict is a pure function of the port.
    struct FnProber<F> {
        verdict: F,
        calls: AtomicUsize,
    }

    impl<F> FnProber<F>
    where
        F: Fn(Port) -> Result<(), ProbeError> + Send + Sync + 'static,
    {
        fn shared(verdict: F) -> Arc<Self> {
            Arc::new(Self {
                verdict,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl<F> Prober for FnProber<F>
    where
        F: Fn(Port) -> Result<(), ProbeError> + Send + Sync + 'static,
    {
        async fn attempt(&self, port: Port) -> Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            (self.verdict)(port)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        opens: usize,
        closes: usize,
        recorded: Vec<Port>,
        fail_open: bool,
        fail_ports: HashSet<u16>,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn open(&mut self, _run: &RunInfo) -> SinkResult<()> {
            self.opens += 1;
            if self.fail_open {
                return Err(SinkError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "read-only store",
                )));
            }
            Ok(())
        }

        async fn record(&mut self, outcome: &ProbeOutcome) -> SinkResult<()> {
            if self.fail_ports.contains(&outcome.port.as_u16()) {
                return Err(SinkError::Io(io::Error::new(io::ErrorKind::Other, "disk full")));
            }
            self.recorded.push(outcome.port);
            Ok(())
        }

        async fn close(&mut self) {
            self.closes += 1;
        }
    }

    fn target() -> ScanTarget {
        ScanTarget::new("127.0.0.1", IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    fn config(spec: &str, concurrency: usize) -> ScanConfig {
        ScanConfig::new(target(), PortSet::parse(spec).unwrap())
            .with_concurrency(concurrency)
            .with_retry(RetryPolicy::new(0))
    }

    fn even_ports_allowed(port: Port) -> Result<(), ProbeError> {
        if port.as_u16() % 2 == 0 {
            Ok(())
        } else {
            Err(ProbeError::ConnectionRefused)
        }
    }

    #[tokio::test]
    async fn test_one_outcome_per_port_for_any_concurrency() {
        for concurrency in [1, 2, 7, 20, 50] {
            let coordinator = ScanCoordinator::new(config("1-20", concurrency))
                .with_prober(FnProber::shared(even_ports_allowed));
            let report = coordinator.run(&mut NullSink).await.unwrap();

            assert_eq!(report.outcomes.len(), 20, "concurrency {}", concurrency);
            let distinct: HashSet<Port> = report.outcomes.iter().map(|o| o.port).collect();
            assert_eq!(distinct.len(), 20);
            assert_eq!(report.allowed, 10);
            assert_eq!(report.denied, 10);
            assert!(!report.cancelled);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stress_counts_are_exact() {
        let prober = FnProber::shared(|port: Port| {
            if port.as_u16() % 3 == 0 {
                Ok(())
            } else {
                Err(ProbeError::Timeout)
            }
        });
        let coordinator =
            ScanCoordinator::new(config("1000-1199", 10)).with_prober(prober.clone());
        let mut sink = RecordingSink::default();

        let report = coordinator.run(&mut sink).await.unwrap();

        assert_eq!(report.allowed + report.denied, 200);
        assert_eq!(report.allowed, (1000..1200).filter(|p| p % 3 == 0).count());
        assert_eq!(sink.recorded.len(), 200);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 200);
        assert_eq!((sink.opens, sink.closes), (1, 1));
    }

    #[tokio::test]
    async fn test_retries_flow_through_coordinator() {
        let coordinator = ScanCoordinator::new(config("80,81", 2).with_retry(RetryPolicy::new(3)))
            .with_prober(FnProber::shared(|_| Err(ProbeError::ConnectionRefused)));
        let report = coordinator.run(&mut NullSink).await.unwrap();
        assert!(report.outcomes.iter().all(|o| o.attempts == 4));
    }

    #[tokio::test]
    async fn test_panicking_probe_is_isolated() {
        let prober = FnProber::shared(|port: Port| {
            if port.as_u16() == 13 {
                panic!("prober bug on 13");
            }
            Ok(())
        });
        let coordinator = ScanCoordinator::new(config("10-16", 3)).with_prober(prober);
        let report = coordinator.run(&mut NullSink).await.unwrap();

        assert_eq!(report.outcomes.len(), 7);
        assert_eq!(report.allowed, 6);
        let failed = report.outcomes.iter().find(|o| !o.allowed).unwrap();
        assert_eq!(failed.port.as_u16(), 13);
        assert!(matches!(failed.error, Some(ProbeError::Internal(ref m)) if m.contains("13")));
    }

    /// Times out twice, then panics.
    struct PanicsOnThirdAttempt {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Prober for PanicsOnThirdAttempt {
        async fn attempt(&self, _port: Port) -> Result<(), ProbeError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 2 {
                panic!("third attempt");
            }
            Err(ProbeError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_panic_keeps_attempt_count() {
        let prober = Arc::new(PanicsOnThirdAttempt {
            calls: AtomicU32::new(0),
        });
        let coordinator = ScanCoordinator::new(config("80", 1).with_retry(RetryPolicy::new(5)))
            .with_prober(prober);
        let report = coordinator.run(&mut NullSink).await.unwrap();

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.attempts, 3);
        assert!(matches!(outcome.error, Some(ProbeError::Internal(_))));
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected_before_sink() {
        let prober = FnProber::shared(even_ports_allowed);
        let coordinator = ScanCoordinator::new(config("80", 0)).with_prober(prober.clone());
        let mut sink = RecordingSink::default();

        let result = coordinator.run(&mut sink).await;

        assert!(matches!(result, Err(ScanError::InvalidConfig(_))));
        assert_eq!(sink.opens, 0);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_timeout_is_rejected() {
        let coordinator = ScanCoordinator::new(config("80", 1).with_timeout(Duration::ZERO));
        let result = coordinator.run(&mut NullSink).await;
        assert!(matches!(result, Err(ScanError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_empty_port_set_returns_empty_report() {
        let config = ScanConfig::new(target(), PortSet::default());
        let coordinator = ScanCoordinator::new(config);
        let mut sink = RecordingSink::default();

        let report = coordinator.run(&mut sink).await.unwrap();

        assert!(report.outcomes.is_empty());
        assert_eq!(report.probed(), 0);
        assert!(!report.cancelled);
        assert_eq!(sink.opens, 0);
    }

    #[tokio::test]
    async fn test_sink_open_failure_is_fatal_and_closes() {
        let prober = FnProber::shared(even_ports_allowed);
        let coordinator = ScanCoordinator::new(config("1-5", 2)).with_prober(prober.clone());
        let mut sink = RecordingSink {
            fail_open: true,
            ..Default::default()
        };

        let result = coordinator.run(&mut sink).await;

        assert!(matches!(result, Err(ScanError::SinkOpen(_))));
        assert_eq!(sink.closes, 1);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sink_write_failures_do_not_stop_the_run() {
        let coordinator = ScanCoordinator::new(config("1-10", 4))
            .with_prober(FnProber::shared(even_ports_allowed));
        let mut sink = RecordingSink {
            fail_ports: [3, 7].into_iter().collect(),
            ..Default::default()
        };

        let report = coordinator.run(&mut sink).await.unwrap();

        assert_eq!(report.outcomes.len(), 10);
        assert_eq!(report.sink_failures, 2);
        assert_eq!(sink.recorded.len(), 8);
    }

    #[tokio::test]
    async fn test_cancel_returns_partial_report() {
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let prober = FnProber::shared(move |port: Port| {
            if port.as_u16() == 5 {
                trigger.cancel();
            }
            Ok(())
        });
        let mut coordinator = ScanCoordinator::new(config("1-50", 1)).with_prober(prober);
        coordinator.cancel = cancel;

        let report = coordinator.run(&mut NullSink).await.unwrap();

        assert_eq!(report.outcomes.len(), 5);
        assert!(report.cancelled);
        assert_eq!(report.ports_total, 50);
    }

    #[tokio::test]
    async fn test_cancel_stops_retries_of_in_flight_port() {
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let prober = FnProber::shared(move |_| {
            trigger.cancel();
            Err(ProbeError::Timeout)
        });
        let mut coordinator =
            ScanCoordinator::new(config("1-10", 1).with_retry(RetryPolicy::new(5)))
                .with_prober(prober.clone());
        coordinator.cancel = cancel;

        let report = coordinator.run(&mut NullSink).await.unwrap();

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].attempts, 1);
        assert_eq!(report.outcomes[0].error, Some(ProbeError::Timeout));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
        assert!(report.cancelled);
    }

    #[tokio::test]
    async fn test_dispatch_follows_port_set_order() {
        let coordinator = ScanCoordinator::new(config("9,3,7,1", 1))
            .with_prober(FnProber::shared(|_| Ok(())));
        let report = coordinator.run(&mut NullSink).await.unwrap();
        let order: Vec<u16> = report.outcomes.iter().map(|o| o.port.as_u16()).collect();
        assert_eq!(order, vec![9, 3, 7, 1]);
    }

    #[test]
    fn test_config_defaults() {
        let config = ScanConfig::new(target(), PortSet::default());
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.path, "/");
        assert!(config.with_rate_limit(0).rate_limit.is_none());
    }
}
