// src/ingest/checkpoint.rs
//! Durable `source key -> last detection time` document (YAML).
//!
//! Reads never fail: anything short of a valid stored timestamp degrades to
//! `now - 30 minutes` and says why. Writes keep foreign keys, store the
//! instant in host-local time and replace the file via tmp + rename.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};
use tokio::{fs, io::AsyncWriteExt};

use crate::error::{CheckpointError, TimeParseError};
use crate::time::{default_window_start, format_local_millis, parse_timestamp, Clock, Timestamp};

/// Why [`CheckpointStore::load`] fell back to the default window.
#[derive(Debug)]
pub enum FallbackReason {
    /// First run: nothing persisted yet.
    NoFile,
    /// Document exists but has no entry for the key.
    KeyAbsent,
    /// Entry exists but is not a string.
    NotAString,
    InvalidTimestamp(TimeParseError),
    Unreadable(CheckpointError),
}

impl FallbackReason {
    fn is_error(&self) -> bool {
        !matches!(self, FallbackReason::NoFile | FallbackReason::KeyAbsent)
    }
}

#[derive(Debug)]
pub enum LoadedCheckpoint {
    Stored(Timestamp),
    Default {
        value: Timestamp,
        reason: FallbackReason,
    },
}

impl LoadedCheckpoint {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            LoadedCheckpoint::Stored(ts) => *ts,
            LoadedCheckpoint::Default { value, .. } => *value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, LoadedCheckpoint::Default { .. })
    }
}

#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, key: &str) -> LoadedCheckpoint;
    async fn save(&self, key: &str, ts: &Timestamp) -> Result<(), CheckpointError>;
}

pub struct YamlCheckpointStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl YamlCheckpointStore {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }

    fn fallback(&self, key: &str, reason: FallbackReason) -> LoadedCheckpoint {
        let value = default_window_start(self.clock.as_ref());
        if reason.is_error() {
            tracing::warn!(
                target: "checkpoint",
                key,
                path = %self.path.display(),
                ?reason,
                "checkpoint unusable, falling back to default window"
            );
        } else {
            tracing::info!(
                target: "checkpoint",
                key,
                ?reason,
                "no checkpoint yet, starting from default window"
            );
        }
        LoadedCheckpoint::Default { value, reason }
    }
}

#[async_trait::async_trait]
impl CheckpointStore for YamlCheckpointStore {
    async fn load(&self, key: &str) -> LoadedCheckpoint {
        let doc = match read_document(&self.path).await {
            Ok(Some(doc)) => doc,
            Ok(None) => return self.fallback(key, FallbackReason::NoFile),
            Err(e) => return self.fallback(key, FallbackReason::Unreadable(e)),
        };
        let raw = match doc.get(key) {
            None | Some(Value::Null) => return self.fallback(key, FallbackReason::KeyAbsent),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return self.fallback(key, FallbackReason::NotAString),
        };
        match parse_timestamp(&raw) {
            Ok(ts) => LoadedCheckpoint::Stored(ts),
            Err(e) => self.fallback(key, FallbackReason::InvalidTimestamp(e)),
        }
    }

    async fn save(&self, key: &str, ts: &Timestamp) -> Result<(), CheckpointError> {
        let mut doc = match read_document(&self.path).await {
            Ok(doc) => doc.unwrap_or_default(),
            Err(CheckpointError::Parse { source, .. }) => {
                tracing::warn!(
                    target: "checkpoint",
                    path = %self.path.display(),
                    error = %source,
                    "existing checkpoint document is malformed, rewriting it"
                );
                Mapping::new()
            }
            Err(e) => return Err(e),
        };
        doc.insert(
            Value::String(key.to_string()),
            Value::String(format_local_millis(ts)),
        );
        let body = serde_yaml::to_string(&doc).map_err(CheckpointError::Encode)?;
        write_atomically(&self.path, body.as_bytes())
            .await
            .map_err(|source| CheckpointError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// `Ok(None)` when the file does not exist. Empty or `null` documents
/// read as an empty mapping.
async fn read_document(path: &Path) -> Result<Option<Mapping>, CheckpointError> {
    let content = match fs::read_to_string(path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CheckpointError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(Some(Mapping::new()));
    }
    let parse_err = |source| CheckpointError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let value: Value = serde_yaml::from_str(&content).map_err(parse_err)?;
    if value.is_null() {
        return Ok(Some(Mapping::new()));
    }
    serde_yaml::from_value::<Mapping>(value)
        .map(Some)
        .map_err(parse_err)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    let mut f = fs::File::create(&tmp).await?;
    f.write_all(bytes).await?;
    f.sync_all().await?;
    drop(f);
    fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{parse_timestamp, FixedClock};
    use chrono::{DateTime, Utc};

    fn clock() -> Arc<dyn Clock> {
        let now: DateTime<Utc> = "2024-05-01T12:00:00Z".parse().unwrap();
        Arc::new(FixedClock::new(now))
    }

    #[tokio::test]
    async fn missing_file_is_a_typed_first_run_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlCheckpointStore::new(dir.path().join("ck.yml"), clock());
        let loaded = store.load("EP").await;
        assert!(matches!(
            loaded,
            LoadedCheckpoint::Default {
                reason: FallbackReason::NoFile,
                ..
            }
        ));
        assert_eq!(
            loaded.timestamp(),
            parse_timestamp("2024-05-01T11:30:00.000Z").unwrap()
        );
    }

    #[tokio::test]
    async fn empty_file_reads_as_key_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ck.yml");
        std::fs::write(&path, "").unwrap();
        let store = YamlCheckpointStore::new(&path, clock());
        assert!(matches!(
            store.load("EP").await,
            LoadedCheckpoint::Default {
                reason: FallbackReason::KeyAbsent,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn tmp_file_does_not_linger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ck.yml");
        let store = YamlCheckpointStore::new(&path, clock());
        let ts = parse_timestamp("2024-01-01T00:05:31.000Z").unwrap();
        store.save("EP", &ts).await.unwrap();
        assert!(path.exists());
        assert!(!tmp_path(&path).exists());
    }
}
