//! Project store.

use std::collections::HashMap;

use async_trait::async_trait;
use gantry_core::{Project, ProjectId};
use tokio::sync::RwLock;

use crate::{StoreError, StoreResult};

/// Read access to project definitions.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, id: ProjectId) -> StoreResult<Project>;
}

/// In-memory implementation of ProjectStore.
#[derive(Default)]
pub struct MemoryProjectStore {
    inner: RwLock<HashMap<ProjectId, Project>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project, replacing any previous definition.
    pub async fn insert(&self, project: Project) {
        self.inner.write().await.insert(project.id, project);
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get(&self, id: ProjectId) -> StoreResult<Project> {
        self.inner
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("project {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_unknown_project() {
        let store = MemoryProjectStore::new();
        let err = store.get(ProjectId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryProjectStore::new();
        let project = Project::new("svc", "https://example.com/svc.git", "/tmp/svc");
        let id = project.id;
        store.insert(project).await;
        assert_eq!(store.get(id).await.unwrap().name, "svc");
    }
}
