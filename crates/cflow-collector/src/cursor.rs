//! Persisted `source name → cursor` map.

use std::collections::BTreeMap;

use cflow_core::{CheckpointError, JsonCheckpointStore};
use tokio::sync::Mutex;

const NAMESPACE: &str = "collector/cursors";

/// Opaque per-source cursors, checkpointed on every commit.
///
/// A cursor is committed only after the records fetched with it were handed
/// to the downstream queue, so a restart re-fetches anything not yet accepted.
#[derive(Debug)]
pub struct CursorStore {
    store: JsonCheckpointStore,
    cursors: Mutex<BTreeMap<String, String>>,
}

impl CursorStore {
    /// Load previously committed cursors.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the existing checkpoint cannot be read.
    pub async fn open(store: JsonCheckpointStore) -> Result<Self, CheckpointError> {
        let cursors = store
            .load::<BTreeMap<String, String>>(NAMESPACE)
            .await?
            .unwrap_or_default();
        tracing::debug!(count = cursors.len(), "loaded collector cursors");
        Ok(Self {
            store,
            cursors: Mutex::new(cursors),
        })
    }

    pub async fn get(&self, source: &str) -> Option<String> {
        self.cursors.lock().await.get(source).cloned()
    }

    /// Record `cursor` for `source` and persist the full map.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the checkpoint cannot be written. The
    /// in-memory cursor is only updated when the write succeeds.
    pub async fn commit(&self, source: &str, cursor: &str) -> Result<(), CheckpointError> {
        let mut cursors = self.cursors.lock().await;
        if cursors.get(source).map(String::as_str) == Some(cursor) {
            return Ok(());
        }
        let mut next = cursors.clone();
        next.insert(source.to_owned(), cursor.to_owned());
        self.store.save(NAMESPACE, &next).await?;
        *cursors = next;
        Ok(())
    }

    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.cursors.lock().await.clone()
    }
}
