//! CSV output formatting.

use crate::scanner::ScanReport;
use std::io::{self, Write};

/// Write one row per probed port, sorted by port.
pub fn write_csv<W: Write>(out: &mut W, report: &ScanReport) -> io::Result<()> {
    let mut wtr = csv::Writer::from_writer(out);

    wtr.write_record(["scan_id", "host", "port", "allowed", "attempts", "elapsed_ms", "error"])?;

    let scan_id = report.scan_id.to_string();
    for outcome in report.sorted_outcomes() {
        wtr.write_record([
            scan_id.clone(),
            report.target.host.clone(),
            outcome.port.to_string(),
            outcome.allowed.to_string(),
            outcome.attempts.to_string(),
            outcome.elapsed_ms().to_string(),
            outcome.error_detail(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
