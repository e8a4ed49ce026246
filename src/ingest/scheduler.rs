// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::PollerConfig;
use crate::ingest::poller::{CyclePhase, DetectionPoller};

#[derive(Clone, Copy, Debug)]
pub struct PollSchedulerCfg {
    /// Sleep between the end of one cycle and the start of the next.
    pub interval: Duration,
}

impl From<&PollerConfig> for PollSchedulerCfg {
    fn from(cfg: &PollerConfig) -> Self {
        Self {
            interval: cfg.interval,
        }
    }
}

/// `send(true)` (or dropping the sender) stops the loop at its next sleep.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Run cycles until shutdown: cycle, sleep `interval`, repeat. A failed
/// cycle was already logged by the poller and does not stop the loop.
/// Returns the number of cycles run.
pub async fn run_until_shutdown(
    poller: &DetectionPoller,
    cfg: PollSchedulerCfg,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    tracing::info!(
        target: "ingest",
        interval_secs = cfg.interval.as_secs(),
        "Starting ESET event fetcher."
    );
    let mut cycles = 0u64;

    'outer: loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let _ = poller.poll_once().await;
        cycles += 1;

        tracing::debug!(target: "ingest", phase = %CyclePhase::Sleeping, secs = cfg.interval.as_secs());
        let sleep = tokio::time::sleep(cfg.interval);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break 'outer;
                    }
                }
            }
        }
        tracing::debug!(target: "ingest", phase = %CyclePhase::Idle);
    }

    tracing::info!(target: "ingest", cycles, "ESET event fetcher stopped.");
    cycles
}

/// Spawn the loop on the runtime.
pub fn spawn_scheduler(
    poller: Arc<DetectionPoller>,
    cfg: PollSchedulerCfg,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<u64> {
    tokio::spawn(async move { run_until_shutdown(&poller, cfg, shutdown).await })
}
