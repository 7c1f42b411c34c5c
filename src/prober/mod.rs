//! Prober module - one port, one timeout-bounded check, with retry.

pub mod http;
pub mod retry;
pub mod traits;

pub use http::{ExpectedResponse, HttpProber};
pub use retry::{probe_with_retry, RetryPolicy};
pub use traits::{ProbeOutcome, Prober, SharedProber};
