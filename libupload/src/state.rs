use std::sync::Arc;

use chrono::Utc;
use log::warn;

use common::{JobId, JobUpdate, UploadStatus};

use crate::error::UploadMonitorError;
use crate::store::SessionStore;

/// Legal status edges for both transfer modes. Terminal states have no
/// outgoing edges, so whichever terminal write lands first wins and later
/// ones are dropped. `CopyInProgress -> NotUploaded` is the pre-stage copy
/// handing the job back for dispatch.
pub fn can_transition(from: UploadStatus, to: UploadStatus) -> bool {
    use UploadStatus::*;
    if from == to {
        return false;
    }
    match from {
        NotUploaded => matches!(
            to,
            UploadInProgress | CopyInProgress | Uploaded | UploadError | Abandoned | Error
        ),
        CopyInProgress => matches!(
            to,
            NotUploaded | UploadInProgress | Uploaded | UploadError | Abandoned | Error
        ),
        UploadInProgress => matches!(to, Uploaded | UploadError | Abandoned | Error),
        DownloadUrlNotCreated => matches!(to, DownloadUrlCreated | Error),
        Uploaded | UploadError | Abandoned | Error | DownloadUrlCreated => false,
    }
}

/// Sole writer of job status. Every change is validated against the
/// transition table and advances the last-updated stamp.
pub struct SessionStateMachine {
    store: Arc<dyn SessionStore>,
}

impl SessionStateMachine {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Moves a job to `to`, recording `error` alongside when given. Returns
    /// whether the transition was applied; illegal ones are dropped with a
    /// warning instead of overwriting a settled outcome.
    pub async fn advance(
        &self,
        id: JobId,
        to: UploadStatus,
        error: Option<String>,
    ) -> Result<bool, UploadMonitorError> {
        let job = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(UploadMonitorError::JobNotFound(id))?;
        if !can_transition(job.status, to) {
            warn!("job {id}: dropping transition {} -> {to}", job.status);
            return Ok(false);
        }
        self.store
            .update_by_id(
                id,
                JobUpdate {
                    status: Some(to),
                    error,
                    last_updated: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(true)
    }

    /// Advisory progress counters; no status change involved.
    pub async fn record_progress(
        &self,
        id: JobId,
        uploaded_bytes: u64,
        percent: u8,
    ) -> Result<(), UploadMonitorError> {
        self.store
            .update_by_id(
                id,
                JobUpdate {
                    uploaded_bytes: Some(uploaded_bytes),
                    upload_percent: Some(percent),
                    last_updated: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Finishes URL creation: the job leaves `DownloadUrlNotCreated` carrying
    /// the public URL and the linked install path.
    pub async fn complete_download_url(
        &self,
        id: JobId,
        url: String,
        install_path: String,
    ) -> Result<bool, UploadMonitorError> {
        let job = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(UploadMonitorError::JobNotFound(id))?;
        if !can_transition(job.status, UploadStatus::DownloadUrlCreated) {
            warn!(
                "job {id}: dropping transition {} -> {}",
                job.status,
                UploadStatus::DownloadUrlCreated
            );
            return Ok(false);
        }
        self.store
            .update_by_id(
                id,
                JobUpdate {
                    status: Some(UploadStatus::DownloadUrlCreated),
                    upload_url: Some(url),
                    install_path: Some(install_path),
                    last_updated: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(true)
    }

    /// Readies a job for transfer dispatch: push target recorded, status back
    /// to `NotUploaded`. Only fresh jobs and finished pre-stage copies
    /// qualify.
    pub async fn mark_dispatch_ready(
        &self,
        id: JobId,
        url: &str,
        install_path: &str,
    ) -> Result<(), UploadMonitorError> {
        let job = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(UploadMonitorError::JobNotFound(id))?;
        if !matches!(
            job.status,
            UploadStatus::NotUploaded | UploadStatus::CopyInProgress
        ) {
            return Err(UploadMonitorError::JobNotDispatchable(id));
        }
        self.store
            .update_by_id(
                id,
                JobUpdate {
                    status: Some(UploadStatus::NotUploaded),
                    upload_url: Some(url.to_string()),
                    install_path: Some(install_path.to_string()),
                    last_updated: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}
