use std::process::ExitCode;

use clap::Parser;
use sync_assets::cli::{run, Cli};
use sync_assets::report::{exit_code, EXIT_FATAL};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout carries only the per-entry lines and the summary.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    tracing::info!("CLI arguments parsed, invoking run");
    match run(cli).await {
        Ok(summary) => {
            let code = exit_code(&summary);
            tracing::info!(exit_code = code, "CLI completed");
            ExitCode::from(code)
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
