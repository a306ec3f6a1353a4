use async_trait::async_trait;

use common::{HostId, ServiceVm, StorageHost, SubjectBinding, SubjectId, SubjectKind, ZoneId};

/// Narrow view of the zone and host directory. Host selection policy lives
/// behind this seam, not in the monitor.
#[async_trait]
pub trait Topology: Send + Sync {
    /// Secondary storage hosts serving a zone, preferred host first.
    async fn storage_hosts_in_zone(&self, zone: ZoneId) -> anyhow::Result<Vec<StorageHost>>;

    async fn find_storage_host(&self, host_id: HostId) -> anyhow::Result<Option<StorageHost>>;

    /// Where a subject's source copy lives on a host, if it is bound there.
    async fn find_subject_binding(
        &self,
        host_id: HostId,
        subject_id: SubjectId,
        kind: SubjectKind,
    ) -> anyhow::Result<Option<SubjectBinding>>;

    /// The service VM fronting a storage host, if one is up.
    async fn pick_service_vm(&self, storage_host: HostId) -> anyhow::Result<Option<ServiceVm>>;

    /// Any running service VM in the zone, for flows that need a public
    /// address rather than a particular host.
    async fn running_service_vm(&self, zone: ZoneId) -> anyhow::Result<Option<ServiceVm>>;
}
