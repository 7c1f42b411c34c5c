//! CLI subcommand definitions and handlers.
//!
//! Implements a git-like subcommand architecture:
//! - `egressor scan [host]` - Probe which outbound ports are allowed
//! - `egressor history` - View results stored in the embedded database

mod history;
mod scan;

pub use history::HistoryCommand;
pub use scan::ScanCommand;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// egressor - find out which outbound ports a network lets through.
///
/// Each port is probed with an HTTP request to a cooperating endpoint that
/// answers on every port. A port is allowed when the expected answer comes
/// back.
#[derive(Parser, Debug)]
#[command(name = "egressor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Egress port prober", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to custom settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Probe outbound ports against an egress endpoint
    #[command(alias = "s")]
    Scan(ScanCommand),

    /// Show stored probe results
    #[command(alias = "h")]
    History(HistoryCommand),
}

impl Cli {
    /// Log filter directive implied by the verbosity flags.
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "info"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        }
    }
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable plain text
    #[default]
    Plain,
    /// JSON structured output
    Json,
    /// CSV format for data analysis
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_log_level() {
        let cli = Cli::try_parse_from(["egressor", "history"]).unwrap();
        assert_eq!(cli.log_level(), "warn");

        let cli = Cli::try_parse_from(["egressor", "-v", "history"]).unwrap();
        assert_eq!(cli.log_level(), "info");

        let cli = Cli::try_parse_from(["egressor", "history", "--quiet"]).unwrap();
        assert_eq!(cli.log_level(), "error");

        assert!(Cli::try_parse_from(["egressor", "-v", "-q", "history"]).is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["egressor"]).is_err());
    }
}
