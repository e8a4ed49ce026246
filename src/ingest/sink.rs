// src/ingest/sink.rs
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::SinkError;
use crate::ingest::types::EventSink;

/// Append-only JSONL file, one record per line. The file is never
/// truncated or rewritten.
///
/// A write that fails partway leaves a torn last line; the next append
/// starts after it. [`SinkError::Partial`] carries the offset the failed
/// batch started at so the damaged record can be located.
pub struct JsonlFileSink {
    path: PathBuf,
}

impl JsonlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Serialize the whole batch up front so an encoding error writes nothing.
pub fn encode_lines(records: &[Value]) -> Result<Vec<u8>, SinkError> {
    let mut buf = Vec::with_capacity(records.len() * 256);
    for rec in records {
        serde_json::to_writer(&mut buf, rec).map_err(SinkError::Encode)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

#[async_trait::async_trait]
impl EventSink for JsonlFileSink {
    async fn append(&self, records: &[Value]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }
        let buf = encode_lines(records)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| SinkError::Open {
                    path: self.path.clone(),
                    source,
                })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| SinkError::Open {
                path: self.path.clone(),
                source,
            })?;

        let offset = file
            .metadata()
            .await
            .map_err(|source| SinkError::Write {
                path: self.path.clone(),
                source,
            })?
            .len();
        write_batch(&mut file, &buf, &self.path, offset).await?;
        file.sync_data().await.map_err(|source| SinkError::Write {
            path: self.path.clone(),
            source,
        })?;

        Ok(records.len())
    }
}

async fn write_batch<W>(w: &mut W, buf: &[u8], path: &Path, offset: u64) -> Result<(), SinkError>
where
    W: AsyncWrite + Unpin,
{
    let partial = |source| SinkError::Partial {
        path: path.to_path_buf(),
        offset,
        source,
    };
    w.write_all(buf).await.map_err(partial)?;
    w.flush().await.map_err(partial)
}
