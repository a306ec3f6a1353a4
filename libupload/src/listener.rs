use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use log::{error, info, warn};
use tokio::time::sleep;

use common::{
    AgentEvent, HostId, JobId, StatusRequestKind, StorageCommand, UploadProgressCommand,
    UploadStatus,
};

use crate::channel::{AgentChannel, CommandListener};
use crate::state::SessionStateMachine;

/// Tracks one outstanding upload command and feeds agent notifications into
/// the state machine. Lives in the registry until a terminal notification
/// retires it.
pub struct UploadListener {
    job_id: JobId,
    host_id: HostId,
    machine: Arc<SessionStateMachine>,
    channel: Arc<dyn AgentChannel>,
    registry: Weak<ListenerRegistry>,
    status_check_delay: Duration,
    disconnected: AtomicBool,
    transfer_started: AtomicBool,
}

impl UploadListener {
    pub fn new(
        job_id: JobId,
        host_id: HostId,
        machine: Arc<SessionStateMachine>,
        channel: Arc<dyn AgentChannel>,
        registry: Weak<ListenerRegistry>,
        status_check_delay: Duration,
    ) -> Self {
        Self {
            job_id,
            host_id,
            machine,
            channel,
            registry,
            status_check_delay,
            disconnected: AtomicBool::new(false),
            transfer_started: AtomicBool::new(false),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn set_disconnected(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Schedules a delayed status request to the agent. The task keeps
    /// retrying while the host stays unreachable and ends as soon as the
    /// command gets through or the registry entry is gone.
    pub fn schedule_status_check(self: Arc<Self>, request: StatusRequestKind) {
        tokio::spawn(async move {
            loop {
                sleep(self.status_check_delay).await;
                let Some(registry) = self.registry.upgrade() else {
                    break;
                };
                if !registry.contains(self.job_id) {
                    // an outcome landed while we slept
                    break;
                }
                let cmd = StorageCommand::UploadProgress(UploadProgressCommand {
                    job_id: self.job_id,
                    request,
                });
                let listener = self.clone() as Arc<dyn CommandListener>;
                match self.channel.send(self.host_id, cmd, Some(listener)).await {
                    Ok(()) => {
                        self.disconnected.store(false, Ordering::SeqCst);
                        info!(
                            "job {}: status check reached host {}",
                            self.job_id, self.host_id
                        );
                        break;
                    }
                    Err(e) => {
                        self.disconnected.store(true, Ordering::SeqCst);
                        warn!(
                            "job {}: host {} still unreachable, will retry the status check: {e}",
                            self.job_id, self.host_id
                        );
                    }
                }
            }
        });
    }
}

#[async_trait]
impl CommandListener for UploadListener {
    async fn notify(self: Arc<Self>, event: AgentEvent) {
        match event {
            AgentEvent::InProgress {
                uploaded_bytes,
                percent,
            } => {
                self.disconnected.store(false, Ordering::SeqCst);
                if !self.transfer_started.swap(true, Ordering::SeqCst) {
                    if let Err(e) = self
                        .machine
                        .advance(self.job_id, UploadStatus::UploadInProgress, None)
                        .await
                    {
                        error!("job {}: failed to mark transfer start: {e:?}", self.job_id);
                    }
                }
                if let Err(e) = self
                    .machine
                    .record_progress(self.job_id, uploaded_bytes, percent)
                    .await
                {
                    error!("job {}: failed to record progress: {e:?}", self.job_id);
                }
            }
            AgentEvent::Completed => {
                self.disconnected.store(false, Ordering::SeqCst);
                match self
                    .machine
                    .advance(self.job_id, UploadStatus::Uploaded, None)
                    .await
                {
                    Ok(true) => info!("job {}: upload finished", self.job_id),
                    Ok(false) => {}
                    Err(e) => error!("job {}: failed to finalize upload: {e:?}", self.job_id),
                }
            }
            AgentEvent::Failed { error } => {
                self.disconnected.store(false, Ordering::SeqCst);
                if let Err(e) = self
                    .machine
                    .advance(self.job_id, UploadStatus::UploadError, Some(error))
                    .await
                {
                    error!("job {}: failed to record upload error: {e:?}", self.job_id);
                }
            }
            AgentEvent::Abandoned => {
                if let Err(e) = self
                    .machine
                    .advance(self.job_id, UploadStatus::Abandoned, None)
                    .await
                {
                    error!("job {}: failed to record abandonment: {e:?}", self.job_id);
                }
            }
            AgentEvent::Disconnected => {
                self.set_disconnected();
                warn!(
                    "job {}: agent on host {} disconnected, scheduling status check",
                    self.job_id, self.host_id
                );
                self.clone()
                    .schedule_status_check(StatusRequestKind::GetOrRestart);
            }
        }
    }
}

/// In-flight listeners keyed by persisted job id. One registry per monitor,
/// created with it.
pub struct ListenerRegistry {
    entries: DashMap<JobId, Arc<UploadListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn register(&self, listener: Arc<UploadListener>) {
        self.entries.insert(listener.job_id(), listener);
    }

    pub fn get(&self, job_id: JobId) -> Option<Arc<UploadListener>> {
        self.entries.get(&job_id).map(|e| e.value().clone())
    }

    pub fn remove(&self, job_id: JobId) -> Option<Arc<UploadListener>> {
        self.entries.remove(&job_id).map(|(_, listener)| listener)
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.entries.contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
