use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use common::{
    CreateDownloadUrlCommand, HostId, ImageFormat, JobId, ServiceVm, StatusRequestKind,
    StorageCommand, StorageHost, SubjectBinding, SubjectId, SubjectKind, TemplateInfo,
    UploadCommand, UploadJob, UploadMode, UploadStatus, VolumeInfo, ZoneId,
};

use crate::channel::{AgentChannel, CommandListener};
use crate::config::MonitorConfig;
use crate::error::UploadMonitorError;
use crate::gc::GarbageCollector;
use crate::listener::{ListenerRegistry, UploadListener};
use crate::lock::ClusterLock;
use crate::state::SessionStateMachine;
use crate::store::SessionStore;
use crate::topology::Topology;
use crate::url;

/// Fixed error recorded on jobs orphaned by an agent restart.
const UPLOAD_SYNC_ERROR: &str = "Could not complete the upload.";

/// Orchestrates upload jobs and extraction URL sessions across the storage
/// agents. One instance per process; the listener registry and the garbage
/// collector are created with it.
pub struct UploadMonitor {
    store: Arc<dyn SessionStore>,
    channel: Arc<dyn AgentChannel>,
    topology: Arc<dyn Topology>,
    lock: Arc<dyn ClusterLock>,
    machine: Arc<SessionStateMachine>,
    registry: Arc<ListenerRegistry>,
    config: MonitorConfig,
}

impl UploadMonitor {
    pub fn new(
        store: Arc<dyn SessionStore>,
        channel: Arc<dyn AgentChannel>,
        topology: Arc<dyn Topology>,
        lock: Arc<dyn ClusterLock>,
        config: MonitorConfig,
    ) -> Self {
        let machine = Arc::new(SessionStateMachine::new(store.clone()));
        Self {
            store,
            channel,
            topology,
            lock,
            machine,
            registry: Arc::new(ListenerRegistry::new()),
            config,
        }
    }

    /// Spawns the extraction URL garbage collector.
    pub fn start(&self) -> JoinHandle<()> {
        info!(
            "upload monitor started, url cleanup every {}s, url expiration {}s, {} workers",
            self.config.cleanup_interval_secs, self.config.url_expiration_secs, self.config.workers
        );
        GarbageCollector::new(
            self.store.clone(),
            self.channel.clone(),
            self.topology.clone(),
            self.lock.clone(),
            &self.config,
        )
        .start()
    }

    pub fn registry(&self) -> Arc<ListenerRegistry> {
        self.registry.clone()
    }

    /// Persists a fresh job record and hands it back with its assigned id.
    pub async fn create_upload_entry(
        &self,
        host_id: HostId,
        subject_id: SubjectId,
        kind: SubjectKind,
        status: UploadStatus,
        upload_url: Option<String>,
        mode: UploadMode,
    ) -> Result<UploadJob, UploadMonitorError> {
        let mut job = UploadJob::new(host_id, subject_id, kind, mode, status, upload_url);
        job.id = self.store.create(job.clone()).await?;
        Ok(job)
    }

    /// True iff the subject has at least one job mid-transfer or mid-copy.
    pub async fn is_upload_in_progress(
        &self,
        subject_id: SubjectId,
        kind: SubjectKind,
    ) -> Result<bool, UploadMonitorError> {
        for status in [UploadStatus::UploadInProgress, UploadStatus::CopyInProgress] {
            if !self
                .store
                .list_by_subject_and_status(subject_id, kind, status)
                .await?
                .is_empty()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Pushes a volume copy to an external URL. The job record already
    /// exists, created by the caller before any pre-stage copy.
    pub async fn start_volume_upload(
        &self,
        job_id: JobId,
        host: &StorageHost,
        volume: &VolumeInfo,
        upload_url: &str,
        install_path: &str,
    ) -> Result<(), UploadMonitorError> {
        self.machine
            .mark_dispatch_ready(job_id, upload_url, install_path)
            .await?;
        let cmd = StorageCommand::Upload(UploadCommand {
            job_id,
            subject_id: volume.id,
            kind: SubjectKind::Volume,
            url: upload_url.to_string(),
            install_path: install_path.to_string(),
            name: volume.name.clone(),
            size: volume.size,
        });
        self.dispatch_upload(job_id, host.id, cmd).await
    }

    /// Pushes a template or ISO copy to an external URL. Returns the new job
    /// id, or `None` when no host holds a source copy of the subject.
    pub async fn start_template_upload(
        &self,
        template: &TemplateInfo,
        upload_url: &str,
    ) -> Result<Option<JobId>, UploadMonitorError> {
        let hosts = self.topology.storage_hosts_in_zone(template.zone_id).await?;
        let Some(host) = hosts.first() else {
            return Err(UploadMonitorError::NoStorageHost(template.zone_id));
        };
        let kind = subject_kind_of(template.format);
        let Some(binding) = self
            .topology
            .find_subject_binding(host.id, template.id, kind)
            .await?
        else {
            warn!(
                "template {}: no source copy on host {}, nothing to upload",
                template.id, host.id
            );
            return Ok(None);
        };
        let job = self
            .create_upload_entry(
                host.id,
                template.id,
                kind,
                UploadStatus::NotUploaded,
                Some(upload_url.to_string()),
                UploadMode::FtpUpload,
            )
            .await?;
        let cmd = StorageCommand::Upload(UploadCommand {
            job_id: job.id,
            subject_id: template.id,
            kind,
            url: upload_url.to_string(),
            install_path: binding.install_path,
            name: template.name.clone(),
            size: binding.size,
        });
        self.dispatch_upload(job.id, host.id, cmd).await?;
        Ok(Some(job.id))
    }

    /// Hands a template or ISO out over a time-limited public URL. An
    /// existing live URL for the subject is reused instead of creating a
    /// second one.
    pub async fn create_template_download_url(
        &self,
        template: &TemplateInfo,
        source_copy: &SubjectBinding,
        zone: ZoneId,
    ) -> Result<UploadJob, UploadMonitorError> {
        let host = self
            .topology
            .find_storage_host(source_copy.host_id)
            .await?
            .ok_or(UploadMonitorError::NoStorageHost(zone))?;
        let vm = self
            .topology
            .pick_service_vm(host.id)
            .await?
            .ok_or(UploadMonitorError::NoServiceVm(host.id))?;

        let kind = subject_kind_of(template.format);
        let existing = self
            .store
            .list_by_subject_and_status(template.id, kind, UploadStatus::DownloadUrlCreated)
            .await?;
        if let Some(job) = existing.into_iter().next() {
            debug!(
                "template {}: reusing download url of job {}",
                template.id, job.id
            );
            return Ok(job);
        }

        let job = self
            .create_upload_entry(
                host.id,
                template.id,
                kind,
                UploadStatus::DownloadUrlNotCreated,
                None,
                UploadMode::HttpDownload,
            )
            .await?;
        let token = url::template_token(template.format.extension());
        self.finalize_download_url(job.id, &vm, &host, &source_copy.install_path, &token)
            .await?;
        self.store
            .find_by_id(job.id)
            .await?
            .ok_or(UploadMonitorError::JobNotFound(job.id))
    }

    /// Hands a volume copy out over a time-limited public URL, against a job
    /// record the caller created. Needs a running service VM with a public
    /// address somewhere in the zone.
    pub async fn create_volume_download_url(
        &self,
        subject_id: SubjectId,
        install_path: &str,
        kind: SubjectKind,
        zone: ZoneId,
        job_id: JobId,
    ) -> Result<String, UploadMonitorError> {
        let job = self
            .store
            .find_by_id(job_id)
            .await?
            .ok_or(UploadMonitorError::JobNotFound(job_id))?;
        debug!(
            "{kind:?} {subject_id}: creating download url for job {job_id} on host {}",
            job.host_id
        );

        let prepared = self.prepare_volume_link(&job, zone).await;
        match prepared {
            Ok((vm, host)) => {
                let token = url::volume_token(install_path);
                self.finalize_download_url(job_id, &vm, &host, install_path, &token)
                    .await
            }
            Err(e) => {
                self.record_url_failure(job_id, &e).await;
                Err(e)
            }
        }
    }

    async fn prepare_volume_link(
        &self,
        job: &UploadJob,
        zone: ZoneId,
    ) -> Result<(ServiceVm, StorageHost), UploadMonitorError> {
        let vm = self
            .topology
            .running_service_vm(zone)
            .await?
            .ok_or(UploadMonitorError::NoRunningServiceVm(zone))?;
        let host = self
            .topology
            .find_storage_host(job.host_id)
            .await?
            .ok_or(UploadMonitorError::NoStorageHost(zone))?;
        Ok((vm, host))
    }

    /// Links the copy on the service VM and publishes the URL. Exactly one
    /// of the success or failure updates is written, whatever path exits.
    async fn finalize_download_url(
        &self,
        job_id: JobId,
        vm: &ServiceVm,
        host: &StorageHost,
        install_path: &str,
        token: &str,
    ) -> Result<String, UploadMonitorError> {
        let result = self
            .establish_download_url(vm, host, install_path, token)
            .await;
        match result {
            Ok(public_url) => {
                if let Err(e) = self
                    .machine
                    .complete_download_url(job_id, public_url.clone(), install_path.to_string())
                    .await
                {
                    // the link command already succeeded; the record still
                    // settles on the error side
                    self.record_url_failure(job_id, &e).await;
                    return Err(e);
                }
                Ok(public_url)
            }
            Err(e) => {
                self.record_url_failure(job_id, &e).await;
                Err(e)
            }
        }
    }

    async fn establish_download_url(
        &self,
        vm: &ServiceVm,
        host: &StorageHost,
        install_path: &str,
        token: &str,
    ) -> Result<String, UploadMonitorError> {
        let address = vm
            .public_ip
            .as_deref()
            .ok_or(UploadMonitorError::ServiceVmWithoutAddress(vm.id))?;
        let cmd = StorageCommand::CreateDownloadUrl(CreateDownloadUrlCommand {
            parent_path: host.parent_path.clone(),
            install_path: install_path.to_string(),
            token: token.to_string(),
        });
        // listener-less send: resolves with the remote acknowledgement
        self.channel.send(vm.id, cmd, None).await?;
        Ok(url::generate_copy_url(
            self.config.secure_copy,
            address,
            token,
        ))
    }

    async fn record_url_failure(&self, job_id: JobId, cause: &UploadMonitorError) {
        match self
            .machine
            .advance(job_id, UploadStatus::Error, Some(cause.to_string()))
            .await
        {
            Ok(_) => {}
            Err(e) => warn!("job {job_id}: could not record url failure: {e:?}"),
        }
    }

    /// Agent reconnect hook: whatever was still in flight on that host died
    /// with the old agent process.
    pub async fn handle_sync(&self, host_id: HostId) -> Result<(), UploadMonitorError> {
        let mut failed = 0usize;
        for status in [UploadStatus::UploadInProgress, UploadStatus::CopyInProgress] {
            for job in self.store.list_by_host_and_status(host_id, status).await? {
                if self
                    .machine
                    .advance(
                        job.id,
                        UploadStatus::UploadError,
                        Some(UPLOAD_SYNC_ERROR.to_string()),
                    )
                    .await?
                {
                    self.registry.remove(job.id);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            info!("host {host_id} reconnected, failed {failed} in-flight uploads");
        }
        Ok(())
    }

    /// Terminal notification hook: retires the listener registry entry and
    /// nothing else.
    pub fn handle_upload_event(
        &self,
        host_id: HostId,
        subject_id: SubjectId,
        kind: SubjectKind,
        job_id: JobId,
        outcome: UploadStatus,
    ) {
        if matches!(outcome, UploadStatus::Uploaded | UploadStatus::Abandoned)
            && self.registry.remove(job_id).is_some()
        {
            debug!(
                "{kind:?} {subject_id}: listener for job {job_id} on host {host_id} retired after {outcome}"
            );
        }
    }

    /// Registers a listener for the job and sends the upload command. A host
    /// unreachable at dispatch flags the listener and leaves reconciliation
    /// to the scheduled status check; the job itself stays accepted.
    async fn dispatch_upload(
        &self,
        job_id: JobId,
        host_id: HostId,
        cmd: StorageCommand,
    ) -> Result<(), UploadMonitorError> {
        let listener = Arc::new(UploadListener::new(
            job_id,
            host_id,
            self.machine.clone(),
            self.channel.clone(),
            Arc::downgrade(&self.registry),
            Duration::from_secs(self.config.status_check_delay_secs),
        ));
        self.registry.register(listener.clone());
        match self
            .channel
            .send(host_id, cmd, Some(listener.clone() as Arc<dyn CommandListener>))
            .await
        {
            Ok(()) => {
                info!("job {job_id}: upload dispatched to host {host_id}");
                Ok(())
            }
            Err(e) => {
                warn!(
                    "job {job_id}: host {host_id} unreachable at dispatch, scheduling status check: {e}"
                );
                listener.set_disconnected();
                listener.schedule_status_check(StatusRequestKind::GetOrRestart);
                Ok(())
            }
        }
    }
}

fn subject_kind_of(format: ImageFormat) -> SubjectKind {
    if format == ImageFormat::Iso {
        SubjectKind::Iso
    } else {
        SubjectKind::Template
    }
}
