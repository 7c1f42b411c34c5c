use super::{ResultSink, RunInfo};
use crate::error::SinkResult;
use crate::prober::ProbeOutcome;
use async_trait::async_trait;

/// Discards every outcome. Used when no persistence is requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl ResultSink for NullSink {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn open(&mut self, _run: &RunInfo) -> SinkResult<()> {
        Ok(())
    }

    async fn record(&mut self, _outcome: &ProbeOutcome) -> SinkResult<()> {
        Ok(())
    }

    async fn close(&mut self) {}
}
