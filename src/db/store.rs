//! Storage abstraction for the pass list.
//!
//! The whole list is read and written as one unit. Every write carries a
//! revision number so that a writer working from a stale snapshot is told
//! about it (`StoreError::Conflict`) instead of silently discarding the
//! other writer's change. `save_all` is the one deliberate exception: it
//! always wins, like the underlying blob store it models.

use async_trait::async_trait;
use thiserror::Error;

use super::models::{Pass, PassPatch};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("pass storage unavailable: {0}")]
    Unavailable(String),

    #[error("pass list changed underneath this write (expected revision {expected}, found {found})")]
    Conflict { expected: u64, found: u64 },
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Unavailable(format!("{err:#}"))
    }
}

/// The pass list together with the revision it was read at.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub passes: Vec<Pass>,
    pub revision: u64,
}

impl Snapshot {
    pub fn position(&self, id: &str) -> Option<usize> {
        self.passes.iter().position(|pass| pass.id == id)
    }
}

#[async_trait]
pub trait PassStore: Send + Sync {
    /// Read the full list and its revision. Missing data is an empty list at
    /// revision 0.
    async fn snapshot(&self) -> Result<Snapshot, StoreError>;

    /// Replace the whole list unconditionally.
    async fn save_all(&self, passes: Vec<Pass>) -> Result<(), StoreError>;

    /// Replace the whole list only if nobody wrote since `expected_revision`.
    async fn save_all_if(
        &self,
        expected_revision: u64,
        passes: Vec<Pass>,
    ) -> Result<(), StoreError>;

    /// Newest first.
    async fn get_all(&self) -> Result<Vec<Pass>, StoreError> {
        Ok(self.snapshot().await?.passes)
    }

    async fn get(&self, id: &str) -> Result<Option<Pass>, StoreError> {
        Ok(self
            .snapshot()
            .await?
            .passes
            .into_iter()
            .find(|pass| pass.id == id))
    }

    async fn add(&self, pass: Pass) -> Result<Pass, StoreError> {
        let Snapshot {
            mut passes,
            revision,
        } = self.snapshot().await?;
        passes.insert(0, pass.clone());
        self.save_all_if(revision, passes).await?;
        Ok(pass)
    }

    async fn update(&self, id: &str, patch: PassPatch) -> Result<Option<Pass>, StoreError> {
        let mut snapshot = self.snapshot().await?;
        let Some(index) = snapshot.position(id) else {
            return Ok(None);
        };
        patch.apply_to(&mut snapshot.passes[index]);
        let updated = snapshot.passes[index].clone();
        self.save_all_if(snapshot.revision, snapshot.passes).await?;
        Ok(Some(updated))
    }

    /// Removing an unknown id is not an error; the return value says whether
    /// anything was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let Snapshot {
            mut passes,
            revision,
        } = self.snapshot().await?;
        let before = passes.len();
        passes.retain(|pass| pass.id != id);
        if passes.len() == before {
            return Ok(false);
        }
        self.save_all_if(revision, passes).await?;
        Ok(true)
    }
}
