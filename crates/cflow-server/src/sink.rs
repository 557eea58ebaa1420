//! Downstream record sinks.
//!
//! Finalized feature vectors, trend signals and recommendation results
//! leave the service as discrete records. Retention and visualization are
//! somebody else's job.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sink serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    FeatureVector,
    TrendSignal,
    Recommendation,
}

impl RecordKind {
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            RecordKind::FeatureVector => "feature_vectors.jsonl",
            RecordKind::TrendSignal => "trend_signals.jsonl",
            RecordKind::Recommendation => "recommendations.jsonl",
        }
    }
}

/// One emitted record: the payload plus its envelope.
#[derive(Debug, Clone, Serialize)]
pub struct SinkRecord {
    pub record_id: Uuid,
    pub kind: RecordKind,
    pub emitted_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, records: Vec<SinkRecord>) -> Result<(), SinkError>;
}

/// Wrap and write `items`. Returns how many records were written.
///
/// # Errors
///
/// Returns [`SinkError`] if an item cannot be serialized or the sink
/// rejects the batch.
pub async fn emit<T: Serialize>(
    sink: &dyn RecordSink,
    kind: RecordKind,
    items: &[T],
) -> Result<usize, SinkError> {
    if items.is_empty() {
        return Ok(0);
    }
    let emitted_at = Utc::now();
    let records = items
        .iter()
        .map(|item| {
            Ok(SinkRecord {
                record_id: Uuid::new_v4(),
                kind,
                emitted_at,
                data: serde_json::to_value(item)?,
            })
        })
        .collect::<Result<Vec<_>, SinkError>>()?;
    let count = records.len();
    sink.write(records).await?;
    Ok(count)
}

/// One JSON-lines file per record kind under a directory.
#[derive(Debug)]
pub struct JsonlRecordSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRecordSink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path_for(&self, kind: RecordKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    async fn append(&self, path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
        let io_err = |source: std::io::Error| SinkError::Io {
            path: path.display().to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(io_err)?;
        file.write_all(bytes).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)
    }
}

#[async_trait]
impl RecordSink for JsonlRecordSink {
    async fn write(&self, records: Vec<SinkRecord>) -> Result<(), SinkError> {
        let mut by_kind: Vec<(RecordKind, Vec<u8>)> = Vec::new();
        for record in &records {
            let mut line = serde_json::to_vec(record)?;
            line.push(b'\n');
            match by_kind.iter_mut().find(|(k, _)| *k == record.kind) {
                Some((_, buf)) => buf.extend_from_slice(&line),
                None => by_kind.push((record.kind, line)),
            }
        }

        let _guard = self.write_lock.lock().await;
        for (kind, bytes) in by_kind {
            self.append(&self.path_for(kind), &bytes).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Item {
        id: &'static str,
    }

    #[tokio::test]
    async fn records_land_in_one_file_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlRecordSink::new(dir.path().join("out"));

        let written = emit(
            &sink,
            RecordKind::TrendSignal,
            &[Item { id: "a" }, Item { id: "b" }],
        )
        .await
        .unwrap();
        assert_eq!(written, 2);
        emit(&sink, RecordKind::Recommendation, &[Item { id: "c" }])
            .await
            .unwrap();
        assert_eq!(
            emit::<Item>(&sink, RecordKind::FeatureVector, &[]).await.unwrap(),
            0
        );

        let signals =
            std::fs::read_to_string(sink.path_for(RecordKind::TrendSignal)).unwrap();
        let lines: Vec<serde_json::Value> = signals
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "trend_signal");
        assert_eq!(lines[1]["data"]["id"], "b");
        assert_ne!(lines[0]["record_id"], lines[1]["record_id"]);
        assert!(lines[0]["emitted_at"].is_string());

        assert!(sink.path_for(RecordKind::Recommendation).exists());
        assert!(!sink.path_for(RecordKind::FeatureVector).exists());
    }
}
