//! `run` command implementation.

use anyhow::{Context, Result};
use config_loader::{ConfigLoader, RigOverrides};
use std::time::Duration;
use sync_engine::CancelToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Session, SessionConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading rig configuration");

    let mut blueprint = super::load_blueprint(&args.config)?;

    ConfigLoader::apply_overrides(&mut blueprint, &overrides(args)).map_err(CliError::Config)?;

    info!(
        rig = %blueprint.rig.name,
        devices = blueprint.devices.len(),
        tolerance_usec = blueprint.sync.tolerance_usec,
        timeout_ms = ?blueprint.sync.timeout_ms,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        super::info::print_blueprint(&blueprint, true);
        return Ok(());
    }

    let session = Session::new(SessionConfig {
        blueprint,
        captures: (args.captures != 0).then_some(args.captures),
        frame_interval: args.frame_interval_ms.map(Duration::from_millis),
        keep_going: args.keep_going,
    });

    let cancel = CancelToken::new();
    let signal_cancel = cancel.clone();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Received shutdown signal, stopping rig...");
        signal_cancel.cancel();
    });

    info!("Starting rig...");
    let joined = tokio::task::spawn_blocking(move || session.run(&cancel)).await;
    signal_task.abort();

    let stats = joined
        .map_err(|e| CliError::aborted(e.to_string()))?
        .context("Rig session failed")?;

    info!(
        synced = stats.captures_synced,
        failures = stats.failures,
        rate = format!("{:.2}", stats.rate()),
        "Run completed"
    );
    stats.print_summary();

    Ok(())
}

fn overrides(args: &RunArgs) -> RigOverrides {
    RigOverrides {
        timeout_ms: args.timeout_ms,
        tolerance_usec: args.tolerance_usec,
        compare_depth: args.compare_depth,
    }
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
