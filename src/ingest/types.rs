// src/ingest/types.rs
use std::fmt;

use serde_json::{Map, Value};

use crate::config::Credentials;
use crate::error::{ApiError, AuthError, SinkError, TimeParseError};
use crate::time::{parse_timestamp, Timestamp};

/// Field carrying the detection time in API payloads.
pub const OCCUR_TIME_FIELD: &str = "occurTime";

/// One detection as returned by the API; fields are kept verbatim.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DetectionEvent(pub Map<String, Value>);

impl DetectionEvent {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// `None` when the field is absent, null or empty.
    pub fn occur_time(&self) -> Option<Result<Timestamp, TimeParseError>> {
        match self.0.get(OCCUR_TIME_FIELD)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(parse_timestamp(s)),
            other => Some(parse_timestamp(&other.to_string())),
        }
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }
}

/// Bearer token. `Debug` hides the value.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<{} chars>)", self.0.len())
    }
}

#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    async fn acquire_token(&self, credentials: &Credentials) -> Result<AccessToken, AuthError>;
}

#[async_trait::async_trait]
pub trait DetectionFetcher: Send + Sync {
    /// Detections occurring at or after `start`.
    async fn fetch_since(
        &self,
        token: &AccessToken,
        start: &Timestamp,
    ) -> Result<Vec<DetectionEvent>, ApiError>;
}

#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// Durably append every record, in order. Returns the number written.
    async fn append(&self, records: &[Value]) -> Result<usize, SinkError>;
}
