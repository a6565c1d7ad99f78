//! PostgreSQL data directory restore
//!
//! Prepares a fresh PGDATA from a catalogued base backup as one step of a
//! cluster lifecycle: refuses to touch an existing directory, validates the
//! request, then restores.

// pgdata-restore/src/main.rs
mod cli;
mod config;
mod errors;
mod logging;
mod restore;

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cli::Cli;
use config::AppConfig;
use errors::RestoreError;
use restore::RestoreOrchestrator;
use restore::engine::CatalogRestoreEngine;
use restore::probe::FsStorageProbe;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = logging::init_tracing(cli.log_format) {
        eprintln!("Error: {:?}", e);
        return ExitCode::FAILURE;
    }

    match run_app(cli).await {
        Ok(()) => {
            info!("restore completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            if !already_logged(&e) {
                eprintln!("Error: {:?}", e);
            }
            ExitCode::FAILURE
        }
    }
}

/// Restore failures are logged by the orchestrator at the point of detection.
fn already_logged(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RestoreError>().is_some()
}

async fn run_app(cli: Cli) -> Result<()> {
    let app_config = AppConfig::load_from_json(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;

    let request = cli.restore_request();
    let orchestrator = RestoreOrchestrator::new(
        FsStorageProbe,
        CatalogRestoreEngine::new(app_config.engine),
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling restore");
            on_interrupt.cancel();
        }
    });

    orchestrator.run(&cancel, request).await?;
    Ok(())
}
