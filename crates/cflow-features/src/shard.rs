//! Lock striping by string key.

use tokio::sync::RwLock;

use cflow_ingest::partition_for;

/// A fixed set of independently locked maps. A key always lands on the same
/// stripe, so writers to different keys rarely contend.
#[derive(Debug)]
pub(crate) struct Striped<T> {
    stripes: Vec<RwLock<T>>,
}

impl<T: Default> Striped<T> {
    pub(crate) fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| RwLock::default()).collect(),
        }
    }
}

impl<T> Striped<T> {
    pub(crate) fn get(&self, key: &str) -> &RwLock<T> {
        &self.stripes[partition_for(key, self.stripes.len())]
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, RwLock<T>> {
        self.stripes.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.stripes.len()
    }
}
