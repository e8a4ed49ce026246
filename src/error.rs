// src/error.rs
//! Error taxonomy for the poll cycle and its collaborators.

use std::path::PathBuf;

use thiserror::Error;

use crate::ingest::poller::CyclePhase;

/// Token exchange failure.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed")]
    Transport(#[source] reqwest::Error),
    #[error("token endpoint returned HTTP {status}")]
    Status { status: u16, body: String },
    #[error("token response is not valid JSON")]
    Decode(#[source] serde_json::Error),
    #[error("token response has no access_token")]
    MissingToken,
}

/// Detection fetch failure.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("detections request failed")]
    Transport(#[source] reqwest::Error),
    #[error("detections endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("detections response is not valid JSON")]
    Decode(#[source] serde_json::Error),
    #[error("pagination did not terminate: {0}")]
    Pagination(String),
}

impl ApiError {
    /// HTTP status, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Checkpoint document read/parse/write failure.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint file {path} could not be read")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint file {path} is not a YAML mapping")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("checkpoint file {path} could not be written")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint document could not be encoded")]
    Encode(#[source] serde_yaml::Error),
}

/// An `occurTime` (or stored checkpoint) that is not ISO-8601.
#[derive(Debug, Error)]
#[error("unparseable timestamp {raw:?}")]
pub struct TimeParseError {
    pub raw: String,
    #[source]
    pub source: chrono::ParseError,
}

/// Output log append failure.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("output file {path} could not be opened")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("output file {path} could not be written")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write to output file {path} failed in a batch starting at byte {offset}; the last line may be torn")]
    Partial {
        path: PathBuf,
        offset: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("detection could not be serialized")]
    Encode(#[source] serde_json::Error),
}

/// One failed poll cycle. The variant tells which phase aborted.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("authentication failed")]
    Auth(#[from] AuthError),
    #[error("fetching detections failed")]
    Fetch(#[from] ApiError),
    #[error("appending detections failed")]
    Persist(#[from] SinkError),
    #[error("saving checkpoint failed")]
    Checkpoint(#[from] CheckpointError),
}

impl CycleError {
    pub fn phase(&self) -> CyclePhase {
        match self {
            CycleError::Auth(_) => CyclePhase::Authenticating,
            CycleError::Fetch(_) => CyclePhase::Fetching,
            CycleError::Persist(_) => CyclePhase::Persisting,
            CycleError::Checkpoint(_) => CyclePhase::AdvancingCheckpoint,
        }
    }
}

/// Startup configuration problem.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}
