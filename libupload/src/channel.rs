use std::sync::Arc;

use async_trait::async_trait;

use common::{AgentEvent, HostId, StorageCommand};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("host {0} is not reachable")]
    HostUnavailable(HostId),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Callback sink bound to one outstanding command. Agents deliver follow-up
/// notifications here after the send call has already returned.
#[async_trait]
pub trait CommandListener: Send + Sync {
    async fn notify(self: Arc<Self>, event: AgentEvent);
}

/// Command path to the storage agents.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Dispatches a command to the agent on `host_id`.
    ///
    /// With a listener the call resolves once the transport has accepted the
    /// command; outcomes arrive later through the listener. Without one the
    /// call resolves only with the remote acknowledgement or failure.
    /// Unreachable hosts fail immediately with [`ChannelError::HostUnavailable`].
    async fn send(
        &self,
        host_id: HostId,
        command: StorageCommand,
        listener: Option<Arc<dyn CommandListener>>,
    ) -> Result<(), ChannelError>;
}
