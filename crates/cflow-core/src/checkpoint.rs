//! Namespaced JSON checkpoints under the configured state directory.
//!
//! Each namespace maps to one file (`<state_dir>/<namespace>.json`). Writes go
//! to a sibling temp file first and are renamed into place, so a crash mid-write
//! leaves the previous checkpoint intact.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::CheckpointError;

#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    root: PathBuf,
}

impl JsonCheckpointStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the checkpoint stored under `namespace`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::InvalidNamespace`] for unsafe names,
    /// [`CheckpointError::Io`] on read failure other than not-found, and
    /// [`CheckpointError::Json`] if the file does not decode as `T`.
    pub async fn load<T: DeserializeOwned>(
        &self,
        namespace: &str,
    ) -> Result<Option<T>, CheckpointError> {
        let path = self.path_for(namespace)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CheckpointError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CheckpointError::Json {
                namespace: namespace.to_string(),
                source: e,
            })
    }

    /// Atomically replace the checkpoint stored under `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the namespace is invalid, the value
    /// cannot be serialized, or the file cannot be written.
    pub async fn save<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        value: &T,
    ) -> Result<(), CheckpointError> {
        let path = self.path_for(namespace)?;
        let io_err = |source: std::io::Error| CheckpointError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let bytes = serde_json::to_vec(value).map_err(|e| CheckpointError::Json {
            namespace: namespace.to_string(),
            source: e,
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;

        tracing::debug!(namespace, bytes = bytes.len(), "checkpoint saved");
        Ok(())
    }

    fn path_for(&self, namespace: &str) -> Result<PathBuf, CheckpointError> {
        if !is_valid_namespace(namespace) {
            return Err(CheckpointError::InvalidNamespace(namespace.to_string()));
        }
        let mut path = self.root.clone();
        let mut segments = namespace.split('/').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_some() {
                path.push(segment);
            } else {
                path.push(format!("{segment}.json"));
            }
        }
        Ok(path)
    }
}

/// Namespaces are `/`-separated segments of `[A-Za-z0-9_-]`, optionally with
/// interior dots. No empty segments and no `..`.
fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace.split('/').all(|segment| {
            !segment.is_empty()
                && !segment.starts_with('.')
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[tokio::test]
    async fn missing_namespace_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCheckpointStore::new(dir.path());
        let loaded: Option<BTreeMap<String, String>> = store.load("cursors").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn save_then_load_nested_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCheckpointStore::new(dir.path());
        let mut cursors = BTreeMap::new();
        cursors.insert("youtube".to_string(), "2026-01-01T00:00:00Z".to_string());

        store.save("features/decayed_1h", &cursors).await.unwrap();
        assert!(dir.path().join("features").join("decayed_1h.json").exists());

        let loaded: BTreeMap<String, String> =
            store.load("features/decayed_1h").await.unwrap().unwrap();
        assert_eq!(loaded, cursors);
    }

    #[tokio::test]
    async fn save_overwrites_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCheckpointStore::new(dir.path());
        store.save("counter", &1_u64).await.unwrap();
        store.save("counter", &2_u64).await.unwrap();
        let loaded: u64 = store.load("counter").await.unwrap().unwrap();
        assert_eq!(loaded, 2);
        assert!(!dir.path().join("counter.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cursors.json"), b"{not json").unwrap();
        let store = JsonCheckpointStore::new(dir.path());
        let err = store
            .load::<BTreeMap<String, String>>("cursors")
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Json { ref namespace, .. } if namespace == "cursors"));
    }

    #[test]
    fn rejects_path_traversal() {
        assert!(!is_valid_namespace("../etc/passwd"));
        assert!(!is_valid_namespace("a//b"));
        assert!(!is_valid_namespace(""));
        assert!(!is_valid_namespace("/abs"));
        assert!(is_valid_namespace("collector/cursors"));
        assert!(is_valid_namespace("features.v1"));
    }
}
