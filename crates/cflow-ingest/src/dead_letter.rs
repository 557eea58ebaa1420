//! Dead-letter sinks for records the normalizer rejected.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use cflow_core::RawRecord;

use crate::error::{DeadLetterError, RejectReason, Rejected};

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub source: String,
    pub reason: RejectReason,
    pub detail: String,
    pub payload: serde_json::Value,
    pub quarantined_at: DateTime<Utc>,
}

impl DeadLetter {
    #[must_use]
    pub fn new(raw: &RawRecord, rejected: &Rejected) -> Self {
        Self {
            source: raw.source.clone(),
            reason: rejected.reason,
            detail: rejected.detail.clone(),
            payload: raw.payload.clone(),
            quarantined_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// # Errors
    ///
    /// Returns [`DeadLetterError`] if the letter could not be stored.
    async fn quarantine(&self, letter: DeadLetter) -> Result<(), DeadLetterError>;
}

/// Keeps letters in memory. Used by tests and the replay command.
#[derive(Debug, Default)]
pub struct MemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryDeadLetterSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn quarantine(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        self.letters.lock().await.push(letter);
        Ok(())
    }
}

/// Appends one JSON object per line.
#[derive(Debug)]
pub struct JsonlDeadLetterSink {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl JsonlDeadLetterSink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> DeadLetterError {
        DeadLetterError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl DeadLetterSink for JsonlDeadLetterSink {
    async fn quarantine(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        let mut line = serde_json::to_vec(&letter)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| self.io_error(e))?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(&line).await.map_err(|e| self.io_error(e))?;
            file.flush().await.map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }
}
