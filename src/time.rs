// src/time.rs
//! Timestamp parsing/formatting and the wall clock used for default windows.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, SecondsFormat, SubsecRound, Utc};

use crate::error::TimeParseError;

/// Offset-aware instant. Checkpoints are stored with the host offset,
/// the API returns UTC, both compare by instant.
pub type Timestamp = DateTime<FixedOffset>;

/// How far back the first cycle looks when no checkpoint exists.
pub const DEFAULT_LOOKBACK_MINUTES: i64 = 30;

/// Source of "now". Tests swap in [`FixedClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut g = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *g += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Offset-bearing ISO-8601 layouts tried after RFC 3339. `%#z` takes
/// `+01`, `+0100` and `+01:00`.
const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%#z",
    "%Y%m%dT%H%M%S%.f%#z",
];

/// Offset-less layouts, read as UTC.
const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parse an ISO-8601 timestamp: extended or basic offsets, hour-only
/// offsets, minute precision, `Z`, and offset-less values (read as UTC).
pub fn parse_timestamp(raw: &str) -> Result<Timestamp, TimeParseError> {
    let s = raw.trim();
    let source = match DateTime::parse_from_rfc3339(s) {
        Ok(ts) => return Ok(ts),
        Err(e) => e,
    };

    let zulu = s
        .strip_suffix('Z')
        .or_else(|| s.strip_suffix('z'))
        .map(|head| format!("{head}+00:00"));
    let with_offset = zulu.as_deref().unwrap_or(s);
    for fmt in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(with_offset, fmt) {
            return Ok(ts);
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }
    Err(TimeParseError {
        raw: raw.to_string(),
        source,
    })
}

/// `2024-01-01T00:05:31.000Z`
pub fn format_utc_millis(ts: &Timestamp) -> String {
    ts.with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Same instant in the host's local zone, e.g. `2024-01-01T01:05:31.000+01:00`.
pub fn format_local_millis(ts: &Timestamp) -> String {
    ts.with_timezone(&Local)
        .to_rfc3339_opts(SecondsFormat::Millis, false)
}

/// Rendering used for the `startTime` query parameter: keeps the stored
/// offset, `Z` when it is UTC.
pub fn format_query_millis(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `now - 30 minutes`, truncated to milliseconds, in UTC.
pub fn default_window_start(clock: &dyn Clock) -> Timestamp {
    (clock.now() - Duration::minutes(DEFAULT_LOOKBACK_MINUTES))
        .trunc_subsecs(3)
        .fixed_offset()
}
