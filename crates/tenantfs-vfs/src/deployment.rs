//! Opening configured tenants.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TenantfsConfig;
use crate::download::DownloadRegistry;
use crate::engine::Vfs;
use crate::error::{VfsError, VfsResult};
use crate::index::SqliteIndex;
use crate::lock::LocalLocker;
use crate::model::name::check_name;
use crate::storage::{DirObjectStore, ObjectStore, open_backend};

/// Process-wide state shared by every tenant of one deployment.
///
/// Created once at startup from the configuration. Tenants opened through
/// the same deployment share one locker, so their tree locks are honoured
/// across every [`Vfs`] handle of a domain.
///
/// When created inside a Tokio runtime, expired download links are swept in
/// the background until [`Deployment::shutdown`] is called or the deployment
/// is dropped.
pub struct Deployment {
    config: TenantfsConfig,
    locker: Arc<LocalLocker>,
    objects: Arc<dyn ObjectStore>,
    downloads: Arc<DownloadRegistry>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deployment")
            .field("config", &self.config)
            .field("downloads", &self.downloads.len())
            .field("sweeping", &self.sweeper.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl Deployment {
    pub fn new(config: TenantfsConfig) -> Self {
        let objects: Arc<dyn ObjectStore> = Arc::new(DirObjectStore::new(config.objects_dir()));
        Self::with_object_store(config, objects)
    }

    /// Use a different object store for the object layouts.
    pub fn with_object_store(config: TenantfsConfig, objects: Arc<dyn ObjectStore>) -> Self {
        let locker = Arc::new(LocalLocker::new(config.lock.timeout()));
        let downloads = Arc::new(DownloadRegistry::new(config.download.ttl()));
        let shutdown = CancellationToken::new();
        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(_) => Some(downloads.spawn_sweeper(config.download.sweep_interval(), shutdown.clone())),
            Err(_) => {
                debug!("no runtime, download links are not swept");
                None
            }
        };
        Self {
            config,
            locker,
            objects,
            downloads,
            shutdown,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!(error = %e, "download sweeper did not stop cleanly");
            }
        }
    }

    pub fn config(&self) -> &TenantfsConfig {
        &self.config
    }

    pub fn downloads(&self) -> &Arc<DownloadRegistry> {
        &self.downloads
    }

    /// Open the file system of a configured tenant.
    ///
    /// The storage layout is read here, once; the returned handle never
    /// looks at it again.
    pub fn open(&self, domain: &str) -> VfsResult<Vfs> {
        check_name(domain)?;
        let instance = self
            .config
            .instance(domain)
            .map_err(|_| VfsError::not_found(format!("instance {domain}")))?;
        let index_dir = self.config.index_dir();
        std::fs::create_dir_all(&index_dir)?;
        let index = SqliteIndex::open(index_dir.join(format!("{domain}.db")))?;
        let storage = open_backend(
            instance.layout,
            domain,
            &self.config.files_dir(),
            Arc::clone(&self.objects),
            self.config.limits.max_file_size,
        );
        Ok(Vfs::new(domain, Arc::new(index), storage, self.locker.clone()).with_disk_quota(instance.disk_quota))
    }
}

impl Drop for Deployment {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
