// src/ingest/poller.rs
//! One poll cycle: authenticate, read the checkpoint, fetch, append, then
//! advance the checkpoint. The checkpoint is only written after the sink
//! has durably accepted the whole batch.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use metrics::{counter, gauge};
use serde_json::Value;
use tracing::Instrument;

use crate::config::{Credentials, PollerConfig, DATA_SOURCE};
use crate::error::CycleError;
use crate::ingest::checkpoint::{CheckpointStore, YamlCheckpointStore};
use crate::ingest::providers::eset::{build_http_client, IamAuthenticator, IncidentApiFetcher};
use crate::ingest::sink::JsonlFileSink;
use crate::ingest::types::{Authenticator, DetectionEvent, DetectionFetcher, EventSink};
use crate::ingest::{next_checkpoint, normalize_detection};
use crate::metrics::{
    ensure_metrics_described, CHECKPOINT_ADVANCED, CHECKPOINT_TS, DETECTIONS_APPENDED,
    POLL_CYCLES, POLL_CYCLE_ERRORS,
};
use crate::time::{format_utc_millis, SystemClock, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Authenticating,
    Fetching,
    Persisting,
    AdvancingCheckpoint,
    Sleeping,
}

impl CyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Authenticating => "authenticating",
            CyclePhase::Fetching => "fetching",
            CyclePhase::Persisting => "persisting",
            CyclePhase::AdvancingCheckpoint => "advancing_checkpoint",
            CyclePhase::Sleeping => "sleeping",
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Working set of a single cycle.
#[derive(Debug, Clone)]
pub struct PollCycle {
    pub window_start: Timestamp,
    pub events: Vec<DetectionEvent>,
    /// Newest parseable `occurTime` + 1s.
    pub newest_event_time: Option<Timestamp>,
}

impl PollCycle {
    pub fn new(window_start: Timestamp, events: Vec<DetectionEvent>) -> Self {
        let newest_event_time = next_checkpoint(&events);
        Self {
            window_start,
            events,
            newest_event_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointUpdate {
    Advanced(Timestamp),
    /// No event carried a usable `occurTime`.
    NoValidOccurTime,
    /// Candidate would not move the checkpoint forward.
    NotForward { candidate: Timestamp },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    NoNewDetections {
        window_start: Timestamp,
    },
    Persisted {
        window_start: Timestamp,
        appended: usize,
        checkpoint: CheckpointUpdate,
    },
}

pub struct DetectionPoller {
    credentials: Credentials,
    source_key: String,
    auth: Arc<dyn Authenticator>,
    fetcher: Arc<dyn DetectionFetcher>,
    sink: Arc<dyn EventSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    cycles: AtomicU64,
}

impl DetectionPoller {
    pub fn new(
        credentials: Credentials,
        auth: Arc<dyn Authenticator>,
        fetcher: Arc<dyn DetectionFetcher>,
        sink: Arc<dyn EventSink>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            credentials,
            source_key: DATA_SOURCE.to_string(),
            auth,
            fetcher,
            sink,
            checkpoints,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn with_source_key(mut self, key: impl Into<String>) -> Self {
        self.source_key = key.into();
        self
    }

    /// Production wiring: HTTP providers, JSONL sink, YAML checkpoint.
    pub fn from_config(cfg: &PollerConfig) -> anyhow::Result<Self> {
        let http = build_http_client(cfg).context("building HTTP client")?;
        let auth = Arc::new(IamAuthenticator::new(http.clone(), cfg.iam_url.clone()));
        let fetcher = Arc::new(
            IncidentApiFetcher::new(http, cfg.detections_url()).with_page_size(cfg.page_size),
        );
        let sink = Arc::new(JsonlFileSink::new(cfg.output_path.clone()));
        let checkpoints = Arc::new(YamlCheckpointStore::new(
            cfg.checkpoint_path.clone(),
            Arc::new(SystemClock),
        ));
        Ok(
            Self::new(cfg.credentials.clone(), auth, fetcher, sink, checkpoints)
                .with_source_key(cfg.source_key.clone()),
        )
    }

    pub fn cycles_started(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Run one cycle and log any failure with its cause chain. The error is
    /// still returned so callers can inspect it; the scheduler ignores it.
    pub async fn poll_once(&self) -> Result<CycleOutcome, CycleError> {
        ensure_metrics_described();
        let n = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        counter!(POLL_CYCLES).increment(1);

        let span = tracing::info_span!("poll_cycle", cycle = n, source = %self.source_key);
        let res = self.run_cycle().instrument(span.clone()).await;

        if let Err(e) = &res {
            let _g = span.enter();
            counter!(POLL_CYCLE_ERRORS, "phase" => e.phase().as_str()).increment(1);
            tracing::error!(
                target: "ingest",
                phase = %e.phase(),
                error = e as &(dyn std::error::Error + 'static),
                "poll cycle failed"
            );
        }
        res
    }

    /// The cycle itself, without error logging.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
        tracing::debug!(target: "ingest", phase = %CyclePhase::Authenticating);
        let token = self.auth.acquire_token(&self.credentials).await?;

        let window_start = self.checkpoints.load(&self.source_key).await.timestamp();

        tracing::debug!(target: "ingest", phase = %CyclePhase::Fetching);
        let events = self.fetcher.fetch_since(&token, &window_start).await?;
        if events.is_empty() {
            tracing::info!(target: "ingest", "No new detections found.");
            return Ok(CycleOutcome::NoNewDetections { window_start });
        }

        tracing::debug!(target: "ingest", phase = %CyclePhase::Persisting, fetched = events.len());
        let cycle = PollCycle::new(window_start, events);
        let next = cycle.newest_event_time;
        let records: Vec<Value> = cycle.events.into_iter().map(normalize_detection).collect();
        let appended = self.sink.append(&records).await?;
        counter!(DETECTIONS_APPENDED).increment(appended as u64);
        tracing::info!(target: "ingest", appended, "{appended} detections saved.");

        tracing::debug!(target: "ingest", phase = %CyclePhase::AdvancingCheckpoint);
        let checkpoint = match next {
            None => {
                tracing::warn!(target: "ingest", "No valid occurTime found in detections.");
                CheckpointUpdate::NoValidOccurTime
            }
            Some(candidate) if candidate <= window_start => {
                tracing::warn!(
                    target: "ingest",
                    candidate = %format_utc_millis(&candidate),
                    window_start = %format_utc_millis(&window_start),
                    "newest detection does not move the checkpoint forward, keeping it"
                );
                CheckpointUpdate::NotForward { candidate }
            }
            Some(candidate) => {
                self.checkpoints.save(&self.source_key, &candidate).await?;
                counter!(CHECKPOINT_ADVANCED).increment(1);
                gauge!(CHECKPOINT_TS).set(candidate.timestamp() as f64);
                tracing::info!(
                    target: "ingest",
                    "Updated last detection time to {}.",
                    format_utc_millis(&candidate)
                );
                CheckpointUpdate::Advanced(candidate)
            }
        };

        Ok(CycleOutcome::Persisted {
            window_start,
            appended,
            checkpoint,
        })
    }
}
