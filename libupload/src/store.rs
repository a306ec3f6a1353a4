use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::{HostId, JobId, JobUpdate, SubjectId, SubjectKind, UploadJob, UploadMode, UploadStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("upload job {0} not found")]
    NotFound(JobId),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Durable home of upload job records. The monitor never touches a backend
/// directly; embedders plug their persistence in here.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new record and hands back its assigned id.
    async fn create(&self, job: UploadJob) -> Result<JobId, StoreError>;

    async fn update_by_id(&self, id: JobId, update: JobUpdate) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: JobId) -> Result<Option<UploadJob>, StoreError>;

    async fn list_by_subject_and_status(
        &self,
        subject_id: SubjectId,
        kind: SubjectKind,
        status: UploadStatus,
    ) -> Result<Vec<UploadJob>, StoreError>;

    async fn list_by_host_and_status(
        &self,
        host_id: HostId,
        status: UploadStatus,
    ) -> Result<Vec<UploadJob>, StoreError>;

    async fn list_by_mode_and_status(
        &self,
        mode: UploadMode,
        status: UploadStatus,
    ) -> Result<Vec<UploadJob>, StoreError>;

    async fn remove(&self, id: JobId) -> Result<(), StoreError>;
}

fn apply_update(job: &mut UploadJob, update: JobUpdate) {
    if let Some(status) = update.status {
        job.status = status;
    }
    if let Some(url) = update.upload_url {
        job.upload_url = Some(url);
    }
    if let Some(path) = update.install_path {
        job.install_path = Some(path);
    }
    if let Some(error) = update.error {
        job.error = Some(error);
    }
    if let Some(bytes) = update.uploaded_bytes {
        job.uploaded_bytes = bytes;
    }
    if let Some(percent) = update.upload_percent {
        job.upload_percent = percent;
    }
    if let Some(at) = update.last_updated {
        job.last_updated = at;
    }
}

/// In-memory store for tests and embedders without a durable backend.
pub struct MemorySessionStore {
    jobs: RwLock<HashMap<JobId, UploadJob>>,
    next_id: AtomicU64,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, mut job: UploadJob) -> Result<JobId, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        job.id = id;
        self.jobs.write().await.insert(id, job);
        Ok(id)
    }

    async fn update_by_id(&self, id: JobId, update: JobUpdate) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        apply_update(job, update);
        Ok(())
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<UploadJob>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_by_subject_and_status(
        &self,
        subject_id: SubjectId,
        kind: SubjectKind,
        status: UploadStatus,
    ) -> Result<Vec<UploadJob>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.subject_id == subject_id && j.subject_kind == kind && j.status == status)
            .cloned()
            .collect())
    }

    async fn list_by_host_and_status(
        &self,
        host_id: HostId,
        status: UploadStatus,
    ) -> Result<Vec<UploadJob>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.host_id == host_id && j.status == status)
            .cloned()
            .collect())
    }

    async fn list_by_mode_and_status(
        &self,
        mode: UploadMode,
        status: UploadStatus,
    ) -> Result<Vec<UploadJob>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.mode == mode && j.status == status)
            .cloned()
            .collect())
    }

    async fn remove(&self, id: JobId) -> Result<(), StoreError> {
        self.jobs
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}
