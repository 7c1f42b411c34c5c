//! Scan subcommand implementation.
//!
//! Handles the `egressor scan [host]` command.

use crate::cli::OutputFormat;
use crate::config::Settings;
use crate::error::CliResult;
use crate::output;
use crate::prober::{ExpectedResponse, RetryPolicy};
use crate::scanner::{ScanConfig, ScanCoordinator};
use crate::sink::SinkTarget;
use crate::types::{PortSet, ScanTarget};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Probe outbound ports against an egress endpoint.
#[derive(Parser, Debug, Default)]
pub struct ScanCommand {
    /// Endpoint that answers on every port (hostname or IP)
    #[arg(value_name = "HOST")]
    pub host: Option<String>,

    /// Ports to probe (e.g. "80", "80,443", "1-1024", "22,80,8000-8100")
    #[arg(short, long)]
    pub ports: Option<String>,

    /// Number of concurrent workers
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Per-attempt timeout in milliseconds
    #[arg(short, long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Retries after the first failed attempt
    #[arg(short = 'r', long = "retries")]
    pub retries: Option<u32>,

    /// Pause between attempts in milliseconds
    #[arg(long, value_name = "MS")]
    pub retry_delay: Option<u64>,

    /// Request path on the endpoint
    #[arg(long)]
    pub path: Option<String>,

    /// Require this exact status code instead of any 2xx
    #[arg(long, value_parser = clap::value_parser!(u16).range(100..600))]
    pub expect_status: Option<u16>,

    /// Require the response body to contain this text
    #[arg(long, value_name = "TEXT")]
    pub expect_body: Option<String>,

    /// Maximum probes started per second (0 = unlimited)
    #[arg(long = "rate")]
    pub rate_limit: Option<u32>,

    /// Store results in a SQLite database (default location if no path)
    #[arg(long, value_name = "PATH", num_args = 0..=1, require_equals = true)]
    pub sqlite: Option<Option<PathBuf>>,

    /// Store results in PostgreSQL (connection string or URL)
    #[arg(long, env = "EGRESSOR_DSN", hide_env_values = true)]
    pub dsn: Option<String>,

    /// Output format for results
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Plain)]
    pub output: OutputFormat,
}

/// Flags merged over settings, before the host is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    pub host: String,
    pub path: String,
    pub ports: PortSet,
    pub concurrency: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub expect: ExpectedResponse,
    pub rate_limit: u32,
    pub sink: SinkTarget,
}

impl ScanPlan {
    /// Build the run configuration for a resolved target.
    pub fn into_config(self, target: ScanTarget) -> ScanConfig {
        ScanConfig::new(target, self.ports)
            .with_path(self.path)
            .with_concurrency(self.concurrency)
            .with_timeout(self.timeout)
            .with_retry(self.retry)
            .with_expected(self.expect)
            .with_rate_limit(self.rate_limit)
    }
}

impl ScanCommand {
    /// Merge flags over settings. Flags win.
    pub fn plan(&self, settings: &Settings) -> CliResult<ScanPlan> {
        let ports = PortSet::parse(self.ports.as_deref().unwrap_or(&settings.ports))?;

        let retry = RetryPolicy::new(self.retries.unwrap_or(settings.max_retries)).with_delay(
            Duration::from_millis(self.retry_delay.unwrap_or(settings.retry_delay_ms)),
        );

        let expect = ExpectedResponse {
            status: self.expect_status.or(settings.expect_status),
            body_marker: self
                .expect_body
                .clone()
                .or_else(|| settings.expect_body.clone()),
        };

        let sink = match (&self.sqlite, &self.dsn) {
            (Some(Some(path)), _) => SinkTarget::Sqlite(path.clone()),
            (Some(None), _) => SinkTarget::Sqlite(settings.sqlite_path_or_default()?),
            (None, Some(dsn)) => SinkTarget::Postgres(dsn.clone()),
            (None, None) => SinkTarget::None,
        };

        Ok(ScanPlan {
            host: self.host.clone().unwrap_or_else(|| settings.host.clone()),
            path: self.path.clone().unwrap_or_else(|| settings.path.clone()),
            ports,
            concurrency: self.concurrency.unwrap_or(settings.concurrency),
            timeout: Duration::from_millis(self.timeout.unwrap_or(settings.timeout_ms)),
            retry,
            expect,
            rate_limit: self.rate_limit.unwrap_or(settings.rate_limit),
            sink,
        })
    }

    /// Execute the scan command.
    pub async fn execute(&self, settings: &Settings, quiet: bool) -> CliResult<()> {
        let plan = self.plan(settings)?;
        let target = ScanTarget::resolve(&plan.host).await?;
        debug!(host = %plan.host, ip = %target.ip, "resolved target");

        let sink_target = plan.sink.clone();
        let port_count = plan.ports.len();
        let config = plan.into_config(target.clone());

        let show_progress = !quiet && self.output == OutputFormat::Plain;
        if show_progress {
            output::print_scan_header(
                &target.host,
                &target.ip.to_string(),
                port_count,
                &sink_target.to_string(),
            );
        }

        let coordinator = ScanCoordinator::new(config);
        let cancel = coordinator.cancel_flag();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        let spinner = if show_progress {
            spinner(port_count)
        } else {
            ProgressBar::hidden()
        };

        let mut sink = sink_target.build();
        let result = coordinator.run(sink.as_mut()).await;
        spinner.finish_and_clear();
        interrupt.abort();
        let report = result?;

        output::print_report(&report, self.output)?;

        if !quiet {
            if report.sink_failures > 0 {
                output::print_warning(&format!(
                    "{} of {} outcomes could not be stored in {}",
                    report.sink_failures,
                    report.probed(),
                    sink_target
                ));
            }
            if report.cancelled {
                output::print_warning(&format!(
                    "interrupted after {} of {} ports",
                    report.probed(),
                    report.ports_total
                ));
            } else if sink_target != SinkTarget::None && report.sink_failures == 0 {
                output::print_info(&format!(
                    "Results stored as scan {} in {}",
                    report.scan_id.short(),
                    sink_target
                ));
            }
        }

        Ok(())
    }
}

fn spinner(ports: usize) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(format!("probing {} ports (Ctrl-C to stop)", ports));
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
