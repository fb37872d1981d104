use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Timed out waiting for lock {0}")]
    Timeout(String),
    #[error("Lock backend error: {0}")]
    Backend(String),
}

/// Proof of ownership of a named cluster lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    pub token: String,
}

/// Distributed lock coordinator: named mutual-exclusion locks.
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Blocks until the lock is granted or `wait` elapses. Waiters are served
    /// in arrival order.
    async fn lock_fair(&self, name: &str, wait: Duration) -> Result<LockHandle, LockError>;

    /// Single non-blocking attempt.
    async fn try_lock(&self, name: &str) -> Result<Option<LockHandle>, LockError>;

    /// Releasing a lock that is no longer owned (lease expired) is not an error.
    async fn unlock(&self, handle: &LockHandle) -> Result<(), LockError>;
}
