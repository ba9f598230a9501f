//! Build store.

use std::collections::HashMap;

use async_trait::async_trait;
use gantry_core::{Build, BuildId, BuildStatus, ProjectId};
use tokio::sync::RwLock;

use crate::{StoreError, StoreResult};

/// Criteria for listing a project's builds.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildFilter {
    /// Keep only builds with this status.
    pub status: Option<BuildStatus>,
}

impl BuildFilter {
    pub fn with_status(status: BuildStatus) -> Self {
        Self {
            status: Some(status),
        }
    }
}

/// Persistence for build records.
///
/// `update` replaces the whole record. Writers always mutate a freshly
/// loaded record so concurrent finishers resolve through
/// [`Build::try_finish`] rather than by clobbering each other.
#[async_trait]
pub trait BuildStore: Send + Sync {
    async fn get(&self, project_id: ProjectId, build_id: BuildId) -> StoreResult<Build>;
    async fn update(&self, build: &Build) -> StoreResult<()>;
    async fn list(&self, project_id: ProjectId, filter: BuildFilter) -> StoreResult<Vec<Build>>;
    async fn delete(&self, project_id: ProjectId, build_id: BuildId) -> StoreResult<()>;
}

/// In-memory implementation of BuildStore.
#[derive(Default)]
pub struct MemoryBuildStore {
    inner: RwLock<HashMap<(ProjectId, BuildId), Build>>,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new build record. Same write path as `update`; named
    /// separately so seeding reads as seeding.
    pub async fn insert(&self, build: Build) {
        self.inner
            .write()
            .await
            .insert((build.project_id, build.id), build);
    }
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn get(&self, project_id: ProjectId, build_id: BuildId) -> StoreResult<Build> {
        self.inner
            .read()
            .await
            .get(&(project_id, build_id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("build {}", build_id)))
    }

    async fn update(&self, build: &Build) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .insert((build.project_id, build.id), build.clone());
        Ok(())
    }

    async fn list(&self, project_id: ProjectId, filter: BuildFilter) -> StoreResult<Vec<Build>> {
        let inner = self.inner.read().await;
        let mut builds: Vec<Build> = inner
            .values()
            .filter(|build| build.project_id == project_id)
            .filter(|build| filter.status.is_none_or(|status| build.status == status))
            .cloned()
            .collect();
        builds.sort_by_key(|build| build.created_at);
        Ok(builds)
    }

    async fn delete(&self, project_id: ProjectId, build_id: BuildId) -> StoreResult<()> {
        self.inner.write().await.remove(&(project_id, build_id));
        Ok(())
    }
}
