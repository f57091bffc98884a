//! netscanner
//!
//! Main entry point. Loads configuration, initializes logging, resolves the
//! license key and runs one scan, exiting 0 on success, 1 when the license
//! is rejected and 2 on any failure.

use anyhow::{Context, Result};
use clap::Parser;
use netscanner::{cli::Cli, config::AppConfig, core::Application, license, logging, RunOutcome};
use std::process::ExitCode;
use tracing::info;

const FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            eprintln!("netscanner: {:#}", e);
            ExitCode::from(FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<RunOutcome> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let mut config = AppConfig::load(&cli.config_path)?;
    cli.apply_to(&mut config);
    config.validate()?;

    // Held until exit so buffered file output is flushed.
    let _guard = logging::init_logging_with_config(&config.logging)?;
    info!("Starting netscanner against {}", cli.cidr);

    let key = license::resolve_license_key(cli.license.as_deref(), &config.license.env_var)
        .await
        .context("Failed to read license key")?;

    let app = Application::new(&config);
    let outcome = app.launch(&cli.cidr, &key).await;

    if let RunOutcome::Completed(run) = &outcome {
        info!("Application completed successfully: {} host(s) with open ports", run.len());
    }
    Ok(outcome)
}
