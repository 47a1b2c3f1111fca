//! Per-tenant tree locks.
//!
//! Mutations take the write lock for their duration, traversals take the
//! read lock. Acquisition is fallible: a locker that cannot grant the lock
//! within its bound returns [`VfsError::BackendUnavailable`] instead of
//! blocking forever.

use async_trait::async_trait;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::constants::LOCK_TIMEOUT;
use crate::error::{VfsError, VfsResult};

/// A held lock. Dropping it releases the lock.
pub struct LockGuard {
    _inner: Box<dyn Any + Send + Sync>,
}

impl LockGuard {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LockGuard")
    }
}

/// Locking collaborator, keyed by tenant domain.
///
/// Locks are not reentrant. A caller already holding the write lock must use
/// the `*_already_locked` entry points of the engine.
#[async_trait]
pub trait TreeLocker: Send + Sync {
    async fn read(&self, domain: &str) -> VfsResult<LockGuard>;
    async fn write(&self, domain: &str) -> VfsResult<LockGuard>;
}

/// In-process locker: one `tokio` RwLock per domain.
#[derive(Debug)]
pub struct LocalLocker {
    locks: DashMap<String, Arc<RwLock<()>>>,
    timeout: Duration,
}

impl Default for LocalLocker {
    fn default() -> Self {
        Self::new(LOCK_TIMEOUT)
    }
}

impl LocalLocker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    fn lock_for(&self, domain: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }
}

#[async_trait]
impl TreeLocker for LocalLocker {
    async fn read(&self, domain: &str) -> VfsResult<LockGuard> {
        let lock = self.lock_for(domain);
        match tokio::time::timeout(self.timeout, lock.read_owned()).await {
            Ok(guard) => Ok(LockGuard::new(guard)),
            Err(_) => Err(VfsError::unavailable(
                "lock",
                format!("read lock on {domain} not acquired within {:?}", self.timeout),
            )),
        }
    }

    async fn write(&self, domain: &str) -> VfsResult<LockGuard> {
        let lock = self.lock_for(domain);
        match tokio::time::timeout(self.timeout, lock.write_owned()).await {
            Ok(guard) => Ok(LockGuard::new(guard)),
            Err(_) => Err(VfsError::unavailable(
                "lock",
                format!("write lock on {domain} not acquired within {:?}", self.timeout),
            )),
        }
    }
}
