use anyhow::Result;
use clap::Parser;
use egressor::cli::{Cli, Commands};
use egressor::config::Settings;
use egressor::output;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    match &cli.command {
        Commands::Scan(cmd) => cmd.execute(&settings, cli.quiet).await?,
        Commands::History(cmd) => cmd.execute(&settings, cli.quiet)?,
    }
    Ok(())
}

/// `RUST_LOG` wins over the verbosity flags.
fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
