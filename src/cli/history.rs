//! History subcommand implementation.
//!
//! Handles the `egressor history` command for auditing stored results.

use crate::cli::OutputFormat;
use crate::config::Settings;
use crate::error::{CliError, CliResult};
use crate::output;
use crate::sink::SqliteSink;
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;

/// Show the most recent results stored in a SQLite database.
#[derive(Parser, Debug)]
pub struct HistoryCommand {
    /// Database to read (the default store if not given)
    #[arg(long, value_name = "PATH")]
    pub sqlite: Option<PathBuf>,

    /// Number of rows to show
    #[arg(short = 'n', long, default_value_t = 20)]
    pub count: usize,

    /// Only show ports that were allowed
    #[arg(long)]
    pub allowed_only: bool,

    /// Output format (plain or json)
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Plain)]
    pub output: OutputFormat,
}

impl HistoryCommand {
    /// Execute the history command.
    pub fn execute(&self, settings: &Settings, quiet: bool) -> CliResult<()> {
        let path = match &self.sqlite {
            Some(path) => path.clone(),
            None => settings.sqlite_path_or_default()?,
        };

        if !path.exists() {
            if !quiet {
                output::print_info(&format!("No results stored at {}", path.display()));
            }
            return Ok(());
        }

        let rows = SqliteSink::load_recent(&path, self.count, self.allowed_only)?;

        let stdout = io::stdout();
        let mut out = stdout.lock();
        match self.output {
            OutputFormat::Plain => output::write_history(&mut out, &rows)?,
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut out, &rows)
                    .map_err(|e| CliError::Other(e.to_string()))?;
                writeln!(out)?;
            }
            OutputFormat::Csv => {
                return Err(CliError::Other(
                    "history supports plain or json output".to_string(),
                ))
            }
        }
        out.flush()?;
        Ok(())
    }
}
