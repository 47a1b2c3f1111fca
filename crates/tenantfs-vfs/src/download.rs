//! Ephemeral download links.
//!
//! A [`DownloadStore`] maps unguessable secrets to a prepared file path or an
//! [`Archive`] descriptor. Entries expire a fixed time after creation; lookups
//! evict expired entries lazily and [`DownloadRegistry::sweep`] clears the
//! rest. Nothing is persisted: a restart invalidates every link.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::archive::Archive;
use crate::constants::DOWNLOAD_STORE_TTL;

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Download links of one tenant.
#[derive(Debug)]
pub struct DownloadStore {
    ttl: Duration,
    files: Mutex<HashMap<String, Entry<String>>>,
    archives: Mutex<HashMap<String, Entry<Archive>>>,
}

impl DownloadStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            files: Mutex::new(HashMap::new()),
            archives: Mutex::new(HashMap::new()),
        }
    }

    /// Register a file path; returns its secret.
    pub fn add_file(&self, path: impl Into<String>) -> String {
        let secret = new_secret();
        self.files.lock().insert(
            secret.clone(),
            Entry {
                value: path.into(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        secret
    }

    /// Register an archive; returns its secret. The archive's expiry is set.
    pub fn add_archive(&self, mut archive: Archive) -> String {
        let secret = new_secret();
        archive.expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .map(|ttl| Utc::now() + ttl);
        self.archives.lock().insert(
            secret.clone(),
            Entry {
                value: archive,
                expires_at: Instant::now() + self.ttl,
            },
        );
        secret
    }

    /// Path behind `secret`, unless unknown or expired.
    pub fn get_file(&self, secret: &str) -> Option<String> {
        let mut files = self.files.lock();
        let entry = files.get(secret)?;
        if entry.expired(Instant::now()) {
            files.remove(secret);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Archive behind `secret`, unless unknown or expired.
    pub fn get_archive(&self, secret: &str) -> Option<Archive> {
        let mut archives = self.archives.lock();
        let entry = archives.get(secret)?;
        if entry.expired(Instant::now()) {
            archives.remove(secret);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Drop expired entries; returns how many were removed.
    pub fn clean(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        {
            let mut files = self.files.lock();
            let before = files.len();
            files.retain(|_, e| !e.expired(now));
            removed += before - files.len();
        }
        let mut archives = self.archives.lock();
        let before = archives.len();
        archives.retain(|_, e| !e.expired(now));
        removed + before - archives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty() && self.archives.lock().is_empty()
    }
}

/// Process-wide registry of per-tenant download stores.
///
/// Created once at startup; stores are created on first use and dropped by
/// the sweep once empty.
#[derive(Debug)]
pub struct DownloadRegistry {
    ttl: Duration,
    stores: DashMap<String, Arc<DownloadStore>>,
}

impl Default for DownloadRegistry {
    fn default() -> Self {
        Self::new(DOWNLOAD_STORE_TTL)
    }
}

impl DownloadRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            stores: DashMap::new(),
        }
    }

    /// The store of `domain`, created if needed.
    pub fn store(&self, domain: &str) -> Arc<DownloadStore> {
        self.stores
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DownloadStore::new(self.ttl)))
            .clone()
    }

    /// Number of live tenant stores.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Drop expired entries everywhere and forget empty stores.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        self.stores.retain(|_, store| {
            removed += store.clean();
            !store.is_empty()
        });
        removed
    }

    /// Sweep every `interval` until `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("download sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = registry.sweep();
                        if removed > 0 {
                            debug!(removed, stores = registry.len(), "download links expired");
                        }
                    }
                }
            }
        })
    }
}

fn new_secret() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_links() {
        let store = DownloadStore::new(Duration::from_secs(60));
        let secret = store.add_file("/foo/bar.txt");
        assert_eq!(secret.len(), 32);
        assert_eq!(store.get_file(&secret).as_deref(), Some("/foo/bar.txt"));
        assert!(store.get_file("nope").is_none());
        assert!(store.get_archive(&secret).is_none());
    }

    #[test]
    fn test_expired_entries_are_absent() {
        let store = DownloadStore::new(Duration::ZERO);
        let secret = store.add_file("/foo");
        assert!(store.get_file(&secret).is_none());
        assert!(store.is_empty());

        let secret = store.add_archive(Archive::new("test"));
        assert!(store.get_archive(&secret).is_none());
    }

    #[test]
    fn test_archive_gets_expiry() {
        let store = DownloadStore::new(Duration::from_secs(60));
        let secret = store.add_archive(Archive::new("test"));
        let archive = store.get_archive(&secret).unwrap();
        assert!(archive.expires_at.unwrap() > Utc::now());
    }

    #[test]
    fn test_sweep_drops_empty_stores() {
        let registry = DownloadRegistry::new(Duration::ZERO);
        registry.store("alice.example").add_file("/a");
        registry.store("bob.example").add_file("/b");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.sweep(), 2);
        assert!(registry.is_empty());

        let registry = DownloadRegistry::new(Duration::from_secs(60));
        let secret = registry.store("alice.example").add_file("/a");
        assert_eq!(registry.sweep(), 0);
        assert_eq!(registry.store("alice.example").get_file(&secret).as_deref(), Some("/a"));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let registry = Arc::new(DownloadRegistry::new(Duration::ZERO));
        registry.store("alice.example").add_file("/a");
        let token = CancellationToken::new();
        let handle = registry.spawn_sweeper(Duration::from_millis(10), token.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.is_empty());

        token.cancel();
        handle.await.unwrap();
    }
}
