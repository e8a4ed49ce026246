// tests/common/mod.rs
// In-memory doubles for the poll cycle collaborators.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use eset_detection_poller::config::Credentials;
use eset_detection_poller::error::{ApiError, AuthError, CheckpointError, SinkError};
use eset_detection_poller::ingest::checkpoint::{CheckpointStore, FallbackReason, LoadedCheckpoint};
use eset_detection_poller::ingest::poller::DetectionPoller;
use eset_detection_poller::ingest::types::{
    AccessToken, Authenticator, DetectionEvent, DetectionFetcher, EventSink,
};
use eset_detection_poller::time::{parse_timestamp, Timestamp};
use serde_json::Value;

pub fn ts(s: &str) -> Timestamp {
    parse_timestamp(s).expect("test timestamp")
}

pub fn event(v: Value) -> DetectionEvent {
    match v {
        Value::Object(m) => DetectionEvent::new(m),
        other => panic!("object expected, got {other}"),
    }
}

pub fn at(occur: &str) -> DetectionEvent {
    event(serde_json::json!({ "uuid": format!("det-{occur}"), "occurTime": occur }))
}

/// Raw stored string for `key` in a checkpoint YAML file.
pub fn read_raw(path: &Path, key: &str) -> Option<String> {
    let body = std::fs::read_to_string(path).ok()?;
    let doc: serde_yaml::Mapping = serde_yaml::from_str(&body).ok()?;
    doc.get(key)?.as_str().map(str::to_string)
}

// --- Log capture ---

/// Shared buffer the fmt layer writes into.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route this thread's events into a buffer until the guard drops.
/// Works with the default current-thread `#[tokio::test]` runtime.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buf = LogBuffer::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (buf, tracing::subscriber::set_default(subscriber))
}

// --- Authenticator ---

#[derive(Default)]
pub struct StaticAuthenticator {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait::async_trait]
impl Authenticator for StaticAuthenticator {
    async fn acquire_token(&self, _credentials: &Credentials) -> Result<AccessToken, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuthError::Status {
                status: 401,
                body: "invalid_grant".into(),
            });
        }
        Ok(AccessToken::new("test-token"))
    }
}

// --- Fetcher ---

/// Replays queued batches; an exhausted script yields empty batches.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<Vec<DetectionEvent>, ApiError>>>,
    pub starts: Mutex<Vec<Timestamp>>,
}

impl ScriptedFetcher {
    pub fn push(&self, batch: Vec<DetectionEvent>) {
        self.script.lock().unwrap().push_back(Ok(batch));
    }

    pub fn push_err(&self, err: ApiError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    pub fn starts(&self) -> Vec<Timestamp> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DetectionFetcher for ScriptedFetcher {
    async fn fetch_since(
        &self,
        _token: &AccessToken,
        start: &Timestamp,
    ) -> Result<Vec<DetectionEvent>, ApiError> {
        self.starts.lock().unwrap().push(*start);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

// --- Sink ---

#[derive(Default)]
pub struct MemorySink {
    pub records: Mutex<Vec<Value>>,
    pub appends: AtomicUsize,
    pub fail: AtomicBool,
}

impl MemorySink {
    pub fn records(&self) -> Vec<Value> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EventSink for MemorySink {
    async fn append(&self, records: &[Value]) -> Result<usize, SinkError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Write {
                path: "memory".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(records.len())
    }
}

// --- Checkpoint store ---

pub struct MemoryCheckpointStore {
    values: Mutex<HashMap<String, Timestamp>>,
    default: Timestamp,
    pub saves: Mutex<Vec<Timestamp>>,
    pub fail_save: AtomicBool,
}

impl MemoryCheckpointStore {
    pub fn new(default: Timestamp) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            default,
            saves: Mutex::new(Vec::new()),
            fail_save: AtomicBool::new(false),
        }
    }

    pub fn with_value(self, key: &str, value: Timestamp) -> Self {
        self.values.lock().unwrap().insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<Timestamp> {
        self.values.lock().unwrap().get(key).copied()
    }

    pub fn saves(&self) -> Vec<Timestamp> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, key: &str) -> LoadedCheckpoint {
        match self.get(key) {
            Some(v) => LoadedCheckpoint::Stored(v),
            None => LoadedCheckpoint::Default {
                value: self.default,
                reason: FallbackReason::KeyAbsent,
            },
        }
    }

    async fn save(&self, key: &str, ts: &Timestamp) -> Result<(), CheckpointError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(CheckpointError::Write {
                path: "memory".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        self.values.lock().unwrap().insert(key.to_string(), *ts);
        self.saves.lock().unwrap().push(*ts);
        Ok(())
    }
}

/// Poller wired to fresh doubles.
pub struct Harness {
    pub auth: Arc<StaticAuthenticator>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub sink: Arc<MemorySink>,
    pub store: Arc<MemoryCheckpointStore>,
    pub poller: DetectionPoller,
}

impl Harness {
    pub fn with_store(store: MemoryCheckpointStore) -> Self {
        let auth = Arc::new(StaticAuthenticator::default());
        let fetcher = Arc::new(ScriptedFetcher::default());
        let sink = Arc::new(MemorySink::default());
        let store = Arc::new(store);
        let poller = DetectionPoller::new(
            Credentials::new("svc@example.com", "s3cret-pass"),
            auth.clone(),
            fetcher.clone(),
            sink.clone(),
            store.clone(),
        );
        Self {
            auth,
            fetcher,
            sink,
            store,
            poller,
        }
    }

    pub fn starting_at(checkpoint: &str) -> Self {
        Self::with_store(
            MemoryCheckpointStore::new(ts("2023-12-31T23:30:00.000Z")).with_value("EP", ts(checkpoint)),
        )
    }
}
