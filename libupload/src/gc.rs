use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use common::{DeleteDownloadUrlCommand, JobId, StorageCommand, UploadJob, UploadMode, UploadStatus};

use crate::channel::{AgentChannel, ChannelError};
use crate::config::MonitorConfig;
use crate::lock::ClusterLock;
use crate::store::SessionStore;
use crate::topology::Topology;

pub const GC_LOCK_NAME: &str = "uploadmonitor.storageGC";
pub const GC_LOCK_TIMEOUT: Duration = Duration::from_secs(3);
/// Consecutive sweeps a job may be skipped for a missing service VM before
/// the skip is raised to an error log.
pub const GC_SKIP_ESCALATE_AFTER: u32 = 3;

/// Periodic reclaim of expired extraction URLs. One instance cluster-wide
/// runs a sweep at a time; the rest skip silently.
pub struct GarbageCollector {
    store: Arc<dyn SessionStore>,
    channel: Arc<dyn AgentChannel>,
    topology: Arc<dyn Topology>,
    lock: Arc<dyn ClusterLock>,
    interval: Duration,
    expiration: chrono::Duration,
    skip_counts: HashMap<JobId, u32>,
}

impl GarbageCollector {
    pub fn new(
        store: Arc<dyn SessionStore>,
        channel: Arc<dyn AgentChannel>,
        topology: Arc<dyn Topology>,
        lock: Arc<dyn ClusterLock>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            store,
            channel,
            topology,
            lock,
            interval: Duration::from_secs(config.cleanup_interval_secs),
            expiration: chrono::Duration::seconds(config.url_expiration_secs as i64),
            skip_counts: HashMap::new(),
        }
    }

    /// Spawns the periodic sweep. The first run happens one full interval
    /// after start.
    pub fn start(mut self) -> JoinHandle<()> {
        info!(
            "extraction url cleanup scheduled every {}s, expiration {}s",
            self.interval.as_secs(),
            self.expiration.num_seconds()
        );
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }

    /// One guarded sweep. Nothing propagates out of here; a missed lock
    /// skips the run and any sweep error is logged.
    pub async fn run_once(&mut self) {
        match self.lock.try_acquire(GC_LOCK_NAME, GC_LOCK_TIMEOUT).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("extraction url cleanup skipped, another instance holds {GC_LOCK_NAME}");
                return;
            }
            Err(e) => {
                warn!("extraction url cleanup could not reach the lock service: {e:?}");
                return;
            }
        }
        let result = self.cleanup_storage().await;
        if let Err(e) = self.lock.release(GC_LOCK_NAME).await {
            error!("failed to release {GC_LOCK_NAME}: {e:?}");
        }
        match result {
            Ok(0) => debug!("extraction url cleanup found nothing expired"),
            Ok(removed) => info!("extraction url cleanup removed {removed} expired urls"),
            Err(e) => error!("extraction url cleanup failed: {e:?}"),
        }
    }

    async fn cleanup_storage(&mut self) -> anyhow::Result<usize> {
        let candidates = self
            .store
            .list_by_mode_and_status(UploadMode::HttpDownload, UploadStatus::DownloadUrlCreated)
            .await?;
        let now = Utc::now();
        let mut removed = 0;
        let mut still_skipped = HashSet::new();

        for job in candidates {
            let age = now.signed_duration_since(job.last_updated);
            if age <= self.expiration {
                continue;
            }
            debug!(
                "job {}: download url expired {}s ago",
                job.id,
                (age - self.expiration).num_seconds()
            );
            if self.expunge(&job).await? {
                removed += 1;
                self.skip_counts.remove(&job.id);
            } else if self.skip_counts.contains_key(&job.id) {
                still_skipped.insert(job.id);
            }
        }

        // counters only survive for jobs skipped again this sweep
        self.skip_counts.retain(|id, _| still_skipped.contains(id));
        Ok(removed)
    }

    /// Tears one expired URL down; returns whether the record is gone.
    async fn expunge(&mut self, job: &UploadJob) -> anyhow::Result<bool> {
        let Some(install_path) = job.install_path.clone() else {
            // nothing actionable remains on the agent side
            warn!("job {}: expired url has no install path, dropping the record", job.id);
            self.store.remove(job.id).await?;
            return Ok(true);
        };
        let Some(host) = self.topology.find_storage_host(job.host_id).await? else {
            self.count_skip(job, "storage host is gone from the directory");
            return Ok(false);
        };
        let Some(vm) = self.topology.pick_service_vm(host.id).await? else {
            self.count_skip(job, "no running service vm for the host");
            return Ok(false);
        };

        let cmd = StorageCommand::DeleteDownloadUrl(DeleteDownloadUrlCommand {
            install_path,
            kind: job.subject_kind,
            download_url: job.upload_url.clone(),
            parent_path: host.parent_path.clone(),
        });
        match self.channel.send(vm.id, cmd, None).await {
            Ok(()) => {
                self.store.remove(job.id).await?;
                info!("job {}: expired download url removed from host {}", job.id, host.id);
                Ok(true)
            }
            Err(ChannelError::HostUnavailable(id)) => {
                warn!(
                    "job {}: service vm {id} unreachable, keeping the url for the next sweep",
                    job.id
                );
                Ok(false)
            }
            Err(e) => {
                warn!("job {}: url removal failed, will retry next sweep: {e}", job.id);
                Ok(false)
            }
        }
    }

    fn count_skip(&mut self, job: &UploadJob, reason: &str) {
        let skips = self.skip_counts.entry(job.id).or_insert(0);
        *skips += 1;
        if *skips >= GC_SKIP_ESCALATE_AFTER {
            error!(
                "job {}: {reason} for {skips} consecutive sweeps, expired url on host {} is still live",
                job.id, job.host_id
            );
        } else {
            warn!(
                "job {}: {reason}, leaving the expired url for the next sweep",
                job.id
            );
        }
    }
}
