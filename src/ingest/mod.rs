// src/ingest/mod.rs
pub mod checkpoint;
pub mod poller;
pub mod providers;
pub mod scheduler;
pub mod sink;
pub mod types;

use chrono::Duration;
use serde_json::{Map, Value};

use crate::ingest::types::DetectionEvent;
use crate::time::Timestamp;

/// Envelope key every output line is wrapped under.
pub const PROVIDER_KEY: &str = "eset";
/// Value injected as `providerName`.
pub const PROVIDER_NAME: &str = "ESET";
pub const PROVIDER_NAME_FIELD: &str = "providerName";

/// Tag a detection with the provider name and wrap it:
/// `{"eset": {..., "providerName": "ESET"}}`.
pub fn normalize_detection(event: DetectionEvent) -> Value {
    let mut fields = event.into_fields();
    fields.insert(
        PROVIDER_NAME_FIELD.to_string(),
        Value::String(PROVIDER_NAME.to_string()),
    );
    let mut envelope = Map::with_capacity(1);
    envelope.insert(PROVIDER_KEY.to_string(), Value::Object(fields));
    Value::Object(envelope)
}

/// Latest parseable `occurTime`, if any. Unparseable values are skipped.
pub fn newest_occur_time(events: &[DetectionEvent]) -> Option<Timestamp> {
    let mut newest: Option<Timestamp> = None;
    for ev in events {
        match ev.occur_time() {
            Some(Ok(ts)) => {
                if newest.map_or(true, |n| ts > n) {
                    newest = Some(ts);
                }
            }
            Some(Err(e)) => {
                tracing::debug!(target: "ingest", error = %e, "skipping detection with bad occurTime");
            }
            None => {}
        }
    }
    newest
}

/// Next window start: newest `occurTime` plus one second, so the
/// boundary event is not fetched again by the inclusive `startTime`.
pub fn next_checkpoint(events: &[DetectionEvent]) -> Option<Timestamp> {
    newest_occur_time(events).map(|t| t + Duration::seconds(1))
}
