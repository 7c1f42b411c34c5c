//! # egressor - Outbound Port Prober
//!
//! egressor finds out which outbound TCP ports a network lets through. Each
//! port is probed with a small HTTP request against a cooperating endpoint
//! that answers on every port; a port counts as allowed when the expected
//! answer comes back.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use egressor::scanner::{ScanConfig, ScanCoordinator};
//! use egressor::sink::NullSink;
//! use egressor::types::{PortSet, ScanTarget};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let target = ScanTarget::resolve("letmeoutofyour.net").await?;
//!     let ports = PortSet::parse("22,80,443,8000-8010")?;
//!
//!     let coordinator = ScanCoordinator::new(ScanConfig::new(target, ports));
//!     let report = coordinator.run(&mut NullSink).await?;
//!
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`types`] - Ports, port sets, targets and scan identifiers
//! - [`prober`] - Single-attempt HTTP probing and the retry policy around it
//! - [`scanner`] - The bounded worker pool and the aggregate report
//! - [`sink`] - Result persistence (none, SQLite, PostgreSQL)
//! - [`config`] - User settings and XDG paths
//! - [`error`] - Error types
//! - [`output`] - Plain, JSON and CSV rendering

pub mod cli;
pub mod config;
pub mod error;
pub mod output;
pub mod prober;
pub mod scanner;
pub mod sink;
pub mod types;

// Re-export commonly used types
pub use error::{CliError, ProbeError, ScanError, SinkError};
pub use prober::{ProbeOutcome, Prober, RetryPolicy};
pub use scanner::{CancelFlag, ScanConfig, ScanCoordinator, ScanReport};
pub use sink::{ResultSink, SinkTarget};
pub use types::{Port, PortSet, ScanId, ScanTarget};
