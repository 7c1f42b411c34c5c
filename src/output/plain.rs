//! Plain text output formatting.
//!
//! Produces human-readable output with colors and formatting.

use crate::scanner::ScanReport;
use crate::sink::StoredProbe;
use console::{style, Style};
use std::io::{self, Write};

const RULE: &str = "═══════════════════════════════════════════════════════════════";
const THIN_RULE: &str = "───────────────────────────────────────────────────────────────";

/// Write the report in human-readable form.
pub fn write_plain<W: Write>(out: &mut W, report: &ScanReport) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", style(RULE).cyan())?;
    writeln!(out, "                  {} Egress Report", style("egressor").cyan().bold())?;
    writeln!(out, "{}", style(RULE).cyan())?;
    writeln!(out)?;

    writeln!(out, "  {} {}", style("Target:").bold(), report.target)?;
    writeln!(out, "  {} {}", style("Path:").bold(), report.path)?;
    writeln!(
        out,
        "  {} {}",
        style("Scan ID:").bold(),
        style(report.scan_id.short()).dim()
    )?;
    writeln!(out)?;

    writeln!(
        out,
        "  {} {} of {} ports probed in {:.2}s",
        style("Statistics:").bold(),
        report.probed(),
        report.ports_total,
        report.duration.as_secs_f64()
    )?;
    writeln!(
        out,
        "              {} allowed, {} denied",
        style(report.allowed).green().bold(),
        style(report.denied).red()
    )?;
    if report.sink_failures > 0 {
        writeln!(
            out,
            "              {} outcomes could not be stored",
            style(report.sink_failures).yellow()
        )?;
    }
    if report.cancelled {
        writeln!(out, "  {}", style("Scan was cancelled before completion.").yellow())?;
    }
    writeln!(out)?;

    if report.outcomes.is_empty() {
        writeln!(out, "  {}", style("No ports to display.").dim())?;
    } else {
        writeln!(out, "  {}", style(THIN_RULE).dim())?;
        writeln!(
            out,
            "  {:>6}  {:^9}  {:>8}  {:>8}  {}",
            style("PORT").bold(),
            style("STATE").bold(),
            style("ATTEMPTS").bold(),
            style("TIME").bold(),
            style("DETAIL").bold()
        )?;
        writeln!(out, "  {}", style(THIN_RULE).dim())?;

        for outcome in report.sorted_outcomes() {
            let (state, state_style) = state_of(outcome.allowed);
            writeln!(
                out,
                "  {:>6}  {:^9}  {:>8}  {:>6}ms  {}",
                outcome.port,
                state_style.apply_to(state),
                outcome.attempts,
                outcome.elapsed_ms(),
                style(truncate_string(&outcome.error_detail(), 35)).dim()
            )?;
        }

        writeln!(out, "  {}", style(THIN_RULE).dim())?;
    }

    writeln!(out)?;
    writeln!(out, "{}", style(RULE).cyan())?;
    writeln!(out)?;

    Ok(())
}

/// Write stored rows, newest first.
pub fn write_history<W: Write>(out: &mut W, rows: &[StoredProbe]) -> io::Result<()> {
    if rows.is_empty() {
        writeln!(out, "{}", style("No stored results.").dim())?;
        return Ok(());
    }

    writeln!(
        out,
        "{:<19}  {:<8}  {:<24}  {:>6}  {:^9}  {:>8}  {}",
        style("RECORDED").bold(),
        style("SCAN").bold(),
        style("HOST").bold(),
        style("PORT").bold(),
        style("STATE").bold(),
        style("ATTEMPTS").bold(),
        style("DETAIL").bold()
    )?;
    for row in rows {
        let (state, state_style) = state_of(row.allowed);
        writeln!(
            out,
            "{:<19}  {:<8}  {:<24}  {:>6}  {:^9}  {:>8}  {}",
            row.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            row.scan_id.chars().take(8).collect::<String>(),
            truncate_string(&row.host, 24),
            row.port,
            state_style.apply_to(state),
            row.attempts,
            style(truncate_string(row.error.as_deref().unwrap_or(""), 35)).dim()
        )?;
    }
    Ok(())
}

fn state_of(allowed: bool) -> (&'static str, Style) {
    if allowed {
        ("allowed", Style::new().green().bold())
    } else {
        ("denied", Style::new().red())
    }
}

/// Print a banner before the scan begins.
pub fn print_scan_header(target: &str, ip: &str, ports: usize, sink: &str) {
    eprintln!();
    eprintln!(
        "{} {} v{}",
        style("Starting").cyan(),
        style("egressor").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    eprintln!(
        "{} Target: {} ({})",
        style("•").dim(),
        style(target).white().bold(),
        ip
    );
    eprintln!("{} Results: {}", style("•").dim(), style(sink).yellow());
    eprintln!(
        "{} Probing {} ports...",
        style("•").dim(),
        style(ports).white().bold()
    );
    eprintln!();
}

/// Print an error message.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", style("Error:").red().bold(), msg);
}

/// Print a warning message.
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", style("Warning:").yellow().bold(), msg);
}

/// Print an info message.
pub fn print_info(msg: &str) {
    eprintln!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Truncate a string to a maximum length in characters, adding an ellipsis.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
