//! PostgreSQL sink.
//!
//! Holds a single client connection. Writes are serialized because the
//! coordinator calls `record` from one task at a time.

use super::{ResultSink, RunInfo};
use crate::error::{SinkError, SinkResult};
use crate::prober::ProbeOutcome;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config, NoTls, Statement};
use tracing::{debug, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS probe_results (
    id          BIGSERIAL   PRIMARY KEY,
    scan_id     TEXT        NOT NULL,
    host        TEXT        NOT NULL,
    port        INTEGER     NOT NULL,
    allowed     BOOLEAN     NOT NULL,
    attempts    INTEGER     NOT NULL,
    elapsed_ms  BIGINT      NOT NULL,
    error       TEXT,
    recorded_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_probe_results_scan ON probe_results (scan_id);
";

const INSERT: &str = "
INSERT INTO probe_results (scan_id, host, port, allowed, attempts, elapsed_ms, error, recorded_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
";

/// Persists outcomes to a PostgreSQL server.
pub struct PostgresSink {
    dsn: String,
    client: Option<Client>,
    driver: Option<JoinHandle<()>>,
    insert: Option<Statement>,
    run: Option<RunInfo>,
}

impl PostgresSink {
    /// Create a sink for the given connection string (URL or key/value form).
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            client: None,
            driver: None,
            insert: None,
            run: None,
        }
    }
}

#[async_trait]
impl ResultSink for PostgresSink {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn open(&mut self, run: &RunInfo) -> SinkResult<()> {
        let config: Config = self
            .dsn
            .parse()
            .map_err(|e: tokio_postgres::Error| SinkError::InvalidDsn(e.to_string()))?;

        let (client, connection) = config.connect(NoTls).await?;
        // The connection object drives the socket; it ends once the client is dropped.
        self.driver = Some(tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection closed with error");
            }
        }));
        let client = self.client.insert(client);

        client.batch_execute(SCHEMA).await?;
        self.insert = Some(client.prepare(INSERT).await?);
        self.run = Some(run.clone());

        debug!("postgres sink ready");
        Ok(())
    }

    async fn record(&mut self, outcome: &ProbeOutcome) -> SinkResult<()> {
        let (Some(client), Some(insert), Some(run)) = (&self.client, &self.insert, &self.run)
        else {
            return Err(SinkError::NotOpen);
        };

        let scan_id = run.scan_id.to_string();
        let port = i32::from(outcome.port.as_u16());
        let attempts = i32::try_from(outcome.attempts).unwrap_or(i32::MAX);
        let elapsed_ms = i64::try_from(outcome.elapsed_ms()).unwrap_or(i64::MAX);
        let error = outcome.error.as_ref().map(ToString::to_string);

        client
            .execute(
                insert,
                &[
                    &scan_id,
                    &run.target.host,
                    &port,
                    &outcome.allowed,
                    &attempts,
                    &elapsed_ms,
                    &error,
                    &outcome.finished_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.insert = None;
        self.run = None;
        self.client = None;
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Port, ScanId, ScanTarget};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn run_info() -> RunInfo {
        RunInfo {
            scan_id: ScanId::new(),
            target: ScanTarget::new("127.0.0.1", IpAddr::V4(Ipv4Addr::LOCALHOST)),
            path: "/".to_string(),
        }
    }

    #[tokio::test]
    async fn test_invalid_dsn() {
        let mut sink = PostgresSink::new("host=localhost port=notanumber");
        let result = sink.open(&run_info()).await;
        assert!(matches!(result, Err(SinkError::InvalidDsn(_))));
        sink.close().await;
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dsn = format!("host=127.0.0.1 port={} user=egress connect_timeout=2", port);
        let mut sink = PostgresSink::new(dsn);
        assert!(matches!(
            sink.open(&run_info()).await,
            Err(SinkError::Postgres(_))
        ));
        sink.close().await;
        sink.close().await;
    }

    #[tokio::test]
    async fn test_record_requires_open() {
        let mut sink = PostgresSink::new("host=localhost");
        let outcome = ProbeOutcome::allowed(Port::new(80).unwrap(), 1, Duration::ZERO);
        assert!(matches!(sink.record(&outcome).await, Err(SinkError::NotOpen)));
    }
}
