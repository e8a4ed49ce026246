//! ESET detection poller binary.
//! Loads configuration from the environment (and `.env` in dev), then runs
//! the poll loop until Ctrl-C or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use eset_detection_poller::config::PollerConfig;
use eset_detection_poller::ingest::poller::DetectionPoller;
use eset_detection_poller::ingest::scheduler::{shutdown_channel, spawn_scheduler, PollSchedulerCfg};
use eset_detection_poller::logging::{init_tracing, LogSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();

    init_tracing(&LogSettings::from_env())?;

    let cfg = PollerConfig::from_env().context("loading configuration")?;
    tracing::info!(
        region = %cfg.region,
        iam_url = %cfg.iam_url,
        detections_url = %cfg.detections_url(),
        output = %cfg.output_path.display(),
        checkpoint = %cfg.checkpoint_path.display(),
        username = %cfg.credentials.username,
        "configuration loaded"
    );

    let poller = Arc::new(DetectionPoller::from_config(&cfg)?);
    let (stop_tx, stop_rx) = shutdown_channel();
    let handle = spawn_scheduler(poller, PollSchedulerCfg::from(&cfg), stop_rx);

    shutdown_signal().await;
    tracing::info!("shutdown requested, waiting for the running cycle");
    let _ = stop_tx.send(true);

    let cycles = handle.await.context("poll loop task failed")?;
    tracing::info!(cycles, "exiting");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler: {e:#}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler: {e:#}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }
}
