//! Per-port retry state machine.

use super::traits::{ProbeOutcome, Prober};
use crate::types::{CancelFlag, Port};
use std::time::{Duration, Instant};
use tracing::debug;

/// How many times a port is retried and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Fixed pause before each retry.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Default number of retries.
    pub const DEFAULT_RETRIES: u32 = 3;
    /// Default pause between attempts.
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(250);

    /// Create a policy with no delay between attempts.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    /// Set the pause between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Hard ceiling on attempts per port.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Self::DEFAULT_RETRIES,
            delay: Self::DEFAULT_DELAY,
        }
    }
}

/// Probe one port, retrying transient failures up to the policy's ceiling.
///
/// Never fails: every error ends up in the returned outcome. An attempt that
/// reached the server and was declined stops the loop immediately, and so
/// does a raised `cancel` flag; the attempt in flight is never interrupted.
pub async fn probe_with_retry(
    prober: &dyn Prober,
    port: Port,
    policy: &RetryPolicy,
    cancel: &CancelFlag,
) -> ProbeOutcome {
    let start = Instant::now();
    let max_attempts = policy.max_attempts();
    let mut attempts = 0;

    loop {
        attempts += 1;

        let error = match prober.attempt(port).await {
            Ok(()) => {
                debug!(port = %port, attempts, "probe succeeded");
                return ProbeOutcome::allowed(port, attempts, start.elapsed());
            }
            Err(e) => e,
        };

        if !error.is_retryable() || attempts >= max_attempts {
            debug!(port = %port, attempts, error = %error, "probe failed");
            return ProbeOutcome::denied(port, attempts, start.elapsed(), error);
        }
        if cancel.is_cancelled() {
            debug!(port = %port, attempts, "cancelled, not retrying");
            return ProbeOutcome::denied(port, attempts, start.elapsed(), error);
        }

        debug!(port = %port, attempt = attempts, error = %error, "retrying");
        if !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
            if cancel.is_cancelled() {
                return ProbeOutcome::denied(port, attempts, start.elapsed(), error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed list of attempt results, then repeats the last one.
    struct ScriptedProber {
        script: Mutex<VecDeque<Result<(), ProbeError>>>,
        last: Result<(), ProbeError>,
        calls: AtomicU32,
    }

    impl ScriptedProber {
        fn new(script: Vec<Result<(), ProbeError>>) -> Self {
            let last = script.last().cloned().unwrap_or(Ok(()));
            Self {
                script: Mutex::new(script.into()),
                last,
                calls: AtomicU32::new(0),
            }
        }

        fn always(result: Result<(), ProbeError>) -> Self {
            Self::new(vec![result])
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn attempt(&self, _port: Port) -> Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.last.clone())
        }
    }

    fn port() -> Port {
        Port::new(8080).unwrap()
    }

    #[tokio::test]
    async fn test_first_try_success() {
        let prober = ScriptedProber::always(Ok(()));
        let outcome =
            probe_with_retry(&prober, port(), &RetryPolicy::new(0), &CancelFlag::new()).await;
        assert!(outcome.allowed);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_exhausts_ceiling_on_transient_failures() {
        let prober = ScriptedProber::always(Err(ProbeError::ConnectionRefused));
        let outcome =
            probe_with_retry(&prober, port(), &RetryPolicy::new(3), &CancelFlag::new()).await;
        assert!(!outcome.allowed);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.error, Some(ProbeError::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_success_after_retries() {
        let prober = ScriptedProber::new(vec![
            Err(ProbeError::Timeout),
            Err(ProbeError::ConnectionReset),
            Ok(()),
        ]);
        let outcome =
            probe_with_retry(&prober, port(), &RetryPolicy::new(3), &CancelFlag::new()).await;
        assert!(outcome.allowed);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_application_decline_is_not_retried() {
        let prober = ScriptedProber::always(Err(ProbeError::UnexpectedStatus(403)));
        let outcome =
            probe_with_retry(&prober, port(), &RetryPolicy::new(3), &CancelFlag::new()).await;
        assert!(!outcome.allowed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error, Some(ProbeError::UnexpectedStatus(403)));
    }

    #[tokio::test]
    async fn test_reports_last_attempt_error() {
        let prober = ScriptedProber::new(vec![
            Err(ProbeError::Timeout),
            Err(ProbeError::ConnectionRefused),
        ]);
        let outcome =
            probe_with_retry(&prober, port(), &RetryPolicy::new(1), &CancelFlag::new()).await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.error, Some(ProbeError::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_decline_after_transient_failure() {
        let prober = ScriptedProber::new(vec![
            Err(ProbeError::Timeout),
            Err(ProbeError::BodyMismatch),
        ]);
        let outcome =
            probe_with_retry(&prober, port(), &RetryPolicy::new(5), &CancelFlag::new()).await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.error, Some(ProbeError::BodyMismatch));
    }

    #[tokio::test]
    async fn test_delay_between_attempts() {
        let prober = ScriptedProber::always(Err(ProbeError::Timeout));
        let policy = RetryPolicy::new(2).with_delay(Duration::from_millis(20));
        let outcome = probe_with_retry(&prober, port(), &policy, &CancelFlag::new()).await;
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.elapsed >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_cancel_stops_retries() {
        let prober = ScriptedProber::always(Err(ProbeError::Timeout));
        let cancel = CancelFlag::new();
        cancel.cancel();
        let outcome = probe_with_retry(&prober, port(), &RetryPolicy::new(5), &cancel).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.error, Some(ProbeError::Timeout));
    }

    #[tokio::test]
    async fn test_cancel_during_delay() {
        let prober = ScriptedProber::always(Err(ProbeError::ConnectionRefused));
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let policy = RetryPolicy::new(10).with_delay(Duration::from_millis(200));
        let outcome = probe_with_retry(&prober, port(), &policy, &cancel).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error, Some(ProbeError::ConnectionRefused));
    }

    #[test]
    fn test_max_attempts_saturates() {
        assert_eq!(RetryPolicy::new(u32::MAX).max_attempts(), u32::MAX);
        assert_eq!(RetryPolicy::default().max_attempts(), 4);
    }
}
