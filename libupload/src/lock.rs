use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

const ACQUIRE_POLL_MILLIS: u64 = 50;

/// Named mutual exclusion across monitor instances. Acquire and release are
/// always paired by callers.
#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// Bounded attempt; `Ok(true)` means the named lock is now held.
    async fn try_acquire(&self, name: &str, timeout: Duration) -> anyhow::Result<bool>;

    async fn release(&self, name: &str) -> anyhow::Result<()>;
}

/// Process-local lock table for single-instance deployments and tests.
/// Multi-instance deployments plug a distributed lock in instead.
pub struct LocalClusterLock {
    held: Mutex<HashSet<String>>,
}

impl LocalClusterLock {
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for LocalClusterLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterLock for LocalClusterLock {
    async fn try_acquire(&self, name: &str, timeout: Duration) -> anyhow::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut held = self.held.lock().await;
                if held.insert(name.to_string()) {
                    return Ok(true);
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(Duration::from_millis(ACQUIRE_POLL_MILLIS)).await;
        }
    }

    async fn release(&self, name: &str) -> anyhow::Result<()> {
        self.held.lock().await.remove(name);
        Ok(())
    }
}
