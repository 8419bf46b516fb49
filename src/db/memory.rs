use async_trait::async_trait;
use tokio::sync::RwLock;

use super::models::Pass;
use super::store::{PassStore, Snapshot, StoreError};

pub struct MemoryPassStore {
    inner: RwLock<Snapshot>,
}

impl MemoryPassStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Snapshot::default()),
        }
    }

    pub fn with_passes(passes: Vec<Pass>) -> Self {
        Self {
            inner: RwLock::new(Snapshot {
                passes,
                revision: 1,
            }),
        }
    }
}

impl Default for MemoryPassStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PassStore for MemoryPassStore {
    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(self.inner.read().await.clone())
    }

    async fn save_all(&self, passes: Vec<Pass>) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.passes = passes;
        guard.revision += 1;
        Ok(())
    }

    async fn save_all_if(
        &self,
        expected_revision: u64,
        passes: Vec<Pass>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.revision != expected_revision {
            return Err(StoreError::Conflict {
                expected: expected_revision,
                found: guard.revision,
            });
        }
        guard.passes = passes;
        guard.revision += 1;
        Ok(())
    }
}
