use common::{HostId, JobId, ZoneId};

use crate::channel::ChannelError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum UploadMonitorError {
    #[error("no secondary storage host available in zone {0}")]
    NoStorageHost(ZoneId),
    #[error("no service vm is running for storage host {0}")]
    NoServiceVm(HostId),
    #[error("no running service vm in zone {0}")]
    NoRunningServiceVm(ZoneId),
    #[error("service vm {0} has no public address")]
    ServiceVmWithoutAddress(HostId),
    #[error("upload job {0} not found")]
    JobNotFound(JobId),
    #[error("upload job {0} is not in a dispatchable state")]
    JobNotDispatchable(JobId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
