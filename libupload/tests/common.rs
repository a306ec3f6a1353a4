use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

pub use common::*;

use libupload::channel::{AgentChannel, ChannelError, CommandListener};
use libupload::config::MonitorConfig;
use libupload::lock::LocalClusterLock;
use libupload::monitor::UploadMonitor;
use libupload::store::{MemorySessionStore, SessionStore, StoreError};
use libupload::topology::Topology;

/// Agent channel double: records accepted commands and fails fast for hosts
/// marked unreachable.
pub struct MockChannel {
    unreachable: Mutex<HashSet<HostId>>,
    sent: Mutex<Vec<(HostId, StorageCommand)>>,
}

#[allow(dead_code)]
impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            unreachable: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_unreachable(&self, host_id: HostId) {
        self.unreachable.lock().unwrap().insert(host_id);
    }

    pub fn set_reachable(&self, host_id: HostId) {
        self.unreachable.lock().unwrap().remove(&host_id);
    }

    pub fn sent(&self) -> Vec<(HostId, StorageCommand)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentChannel for MockChannel {
    async fn send(
        &self,
        host_id: HostId,
        command: StorageCommand,
        _listener: Option<Arc<dyn CommandListener>>,
    ) -> Result<(), ChannelError> {
        if self.unreachable.lock().unwrap().contains(&host_id) {
            return Err(ChannelError::HostUnavailable(host_id));
        }
        self.sent.lock().unwrap().push((host_id, command));
        Ok(())
    }
}

/// Directory double built up front from fixed hosts, bindings and VMs.
#[derive(Default)]
pub struct MockTopology {
    zone_hosts: HashMap<ZoneId, Vec<StorageHost>>,
    bindings: HashMap<(HostId, SubjectId), SubjectBinding>,
    service_vms: HashMap<HostId, ServiceVm>,
    zone_vms: HashMap<ZoneId, ServiceVm>,
}

#[allow(dead_code)]
impl MockTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, zone: ZoneId, host: StorageHost) -> Self {
        self.zone_hosts.entry(zone).or_default().push(host);
        self
    }

    pub fn with_binding(
        mut self,
        host_id: HostId,
        subject_id: SubjectId,
        install_path: &str,
    ) -> Self {
        self.bindings.insert(
            (host_id, subject_id),
            SubjectBinding {
                host_id,
                install_path: install_path.to_string(),
                size: Some(1 << 30),
            },
        );
        self
    }

    pub fn with_service_vm(mut self, storage_host: HostId, vm: ServiceVm) -> Self {
        self.service_vms.insert(storage_host, vm);
        self
    }

    pub fn with_zone_vm(mut self, zone: ZoneId, vm: ServiceVm) -> Self {
        self.zone_vms.insert(zone, vm);
        self
    }
}

#[async_trait]
impl Topology for MockTopology {
    async fn storage_hosts_in_zone(&self, zone: ZoneId) -> anyhow::Result<Vec<StorageHost>> {
        Ok(self.zone_hosts.get(&zone).cloned().unwrap_or_default())
    }

    async fn find_storage_host(&self, host_id: HostId) -> anyhow::Result<Option<StorageHost>> {
        Ok(self
            .zone_hosts
            .values()
            .flatten()
            .find(|h| h.id == host_id)
            .cloned())
    }

    async fn find_subject_binding(
        &self,
        host_id: HostId,
        subject_id: SubjectId,
        _kind: SubjectKind,
    ) -> anyhow::Result<Option<SubjectBinding>> {
        Ok(self.bindings.get(&(host_id, subject_id)).cloned())
    }

    async fn pick_service_vm(&self, storage_host: HostId) -> anyhow::Result<Option<ServiceVm>> {
        Ok(self.service_vms.get(&storage_host).cloned())
    }

    async fn running_service_vm(&self, zone: ZoneId) -> anyhow::Result<Option<ServiceVm>> {
        Ok(self.zone_vms.get(&zone).cloned())
    }
}

/// Store double: forwards to a memory store, refusing the next update that
/// lands the given status.
#[allow(dead_code)]
pub struct OutageStore {
    inner: MemorySessionStore,
    refuse: Mutex<Option<UploadStatus>>,
}

#[allow(dead_code)]
impl OutageStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemorySessionStore::new(),
            refuse: Mutex::new(None),
        })
    }

    pub fn refuse_next(&self, status: UploadStatus) {
        *self.refuse.lock().unwrap() = Some(status);
    }
}

#[async_trait]
impl SessionStore for OutageStore {
    async fn create(&self, job: UploadJob) -> Result<JobId, StoreError> {
        self.inner.create(job).await
    }

    async fn update_by_id(&self, id: JobId, update: JobUpdate) -> Result<(), StoreError> {
        {
            let mut refuse = self.refuse.lock().unwrap();
            if refuse.is_some() && *refuse == update.status {
                refuse.take();
                return Err(StoreError::Backend(anyhow::anyhow!("store outage")));
            }
        }
        self.inner.update_by_id(id, update).await
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<UploadJob>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn list_by_subject_and_status(
        &self,
        subject_id: SubjectId,
        kind: SubjectKind,
        status: UploadStatus,
    ) -> Result<Vec<UploadJob>, StoreError> {
        self.inner
            .list_by_subject_and_status(subject_id, kind, status)
            .await
    }

    async fn list_by_host_and_status(
        &self,
        host_id: HostId,
        status: UploadStatus,
    ) -> Result<Vec<UploadJob>, StoreError> {
        self.inner.list_by_host_and_status(host_id, status).await
    }

    async fn list_by_mode_and_status(
        &self,
        mode: UploadMode,
        status: UploadStatus,
    ) -> Result<Vec<UploadJob>, StoreError> {
        self.inner.list_by_mode_and_status(mode, status).await
    }

    async fn remove(&self, id: JobId) -> Result<(), StoreError> {
        self.inner.remove(id).await
    }
}

#[allow(dead_code)]
pub fn make_host(id: HostId) -> StorageHost {
    StorageHost {
        id,
        name: format!("sec-{id}"),
        parent_path: "/mnt/sec".to_string(),
    }
}

#[allow(dead_code)]
pub fn make_vm(id: HostId, public_ip: Option<&str>) -> ServiceVm {
    ServiceVm {
        id,
        public_ip: public_ip.map(str::to_string),
    }
}

#[allow(dead_code)]
pub fn make_template(id: SubjectId, zone_id: ZoneId) -> TemplateInfo {
    TemplateInfo {
        id,
        name: format!("tmpl-{id}"),
        format: ImageFormat::Vhd,
        zone_id,
    }
}

#[allow(dead_code)]
pub fn make_volume(id: SubjectId, zone_id: ZoneId) -> VolumeInfo {
    VolumeInfo {
        id,
        name: format!("vol-{id}"),
        zone_id,
        size: Some(5 << 30),
    }
}

#[allow(dead_code)]
pub fn make_monitor<S: SessionStore + 'static>(
    store: Arc<S>,
    channel: Arc<MockChannel>,
    topology: MockTopology,
    config: MonitorConfig,
) -> UploadMonitor {
    UploadMonitor::new(
        store,
        channel,
        Arc::new(topology),
        Arc::new(LocalClusterLock::new()),
        config,
    )
}
