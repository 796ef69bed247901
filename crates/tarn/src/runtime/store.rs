//! Persistence for project records.

use crate::error::Result;
use crate::project::{ProjectId, ProjectRecord};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// Key-value persistence for [`ProjectRecord`]s, keyed by project id.
#[async_trait]
pub trait ProjectStore: Send + Sync + fmt::Debug {
    /// Load a record. `Ok(None)` means the project was never set up.
    async fn get(&self, id: &ProjectId) -> Result<Option<ProjectRecord>>;

    /// Insert or replace a record.
    async fn put(&self, record: ProjectRecord) -> Result<()>;

    /// Remove a record. Returns whether one existed.
    async fn delete(&self, id: &ProjectId) -> Result<bool>;
}

/// Process-local [`ProjectStore`].
#[derive(Debug, Default)]
pub struct MemoryProjectStore {
    records: RwLock<HashMap<ProjectId, ProjectRecord>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get(&self, id: &ProjectId) -> Result<Option<ProjectRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn put(&self, record: ProjectRecord) -> Result<()> {
        self.records.write().insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &ProjectId) -> Result<bool> {
        Ok(self.records.write().remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MemoryFs;

    #[tokio::test]
    async fn put_get_delete() {
        let store = MemoryProjectStore::new();
        let id = ProjectId::new("blog");
        assert!(store.get(&id).await.unwrap().is_none());

        store
            .put(ProjectRecord::new(id.clone(), MemoryFs::default().into_handle()))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&id).await.unwrap().unwrap().id, id);

        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.is_empty());
    }
}
