// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod time;

// ---- Re-exports for stable public API ----
pub use crate::config::{Credentials, PollerConfig};
pub use crate::error::{ApiError, AuthError, CheckpointError, CycleError, SinkError, TimeParseError};
pub use crate::ingest::checkpoint::{CheckpointStore, LoadedCheckpoint, YamlCheckpointStore};
pub use crate::ingest::poller::{CheckpointUpdate, CycleOutcome, CyclePhase, DetectionPoller};
pub use crate::ingest::types::{AccessToken, Authenticator, DetectionEvent, DetectionFetcher, EventSink};
