//! Deployment configuration.
//!
//! Read from a TOML file; every field has a default so an empty file is a
//! valid single-node setup with no tenants.
//!
//! ```toml
//! [storage]
//! root = "/var/lib/tenantfs"
//!
//! [download]
//! ttl_secs = 3600
//!
//! [[instances]]
//! domain = "alice.example.net"
//! disk_quota = 10737418240
//! layout = "object_v3"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::constants::{DOWNLOAD_STORE_TTL, DOWNLOAD_SWEEP_INTERVAL, LOCK_TIMEOUT};
use crate::storage::StorageLayout;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "tenantfs.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot encode configuration: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("instance {0} is declared twice")]
    DuplicateInstance(String),

    #[error("unknown instance: {0}")]
    UnknownInstance(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantfsConfig {
    pub storage: StorageConfig,
    pub download: DownloadConfig,
    pub lock: LockConfig,
    pub limits: LimitsConfig,
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Local content, object containers and index databases live here.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("tenantfs-data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DOWNLOAD_STORE_TTL.as_secs(),
            sweep_interval_secs: DOWNLOAD_SWEEP_INTERVAL.as_secs(),
        }
    }
}

impl DownloadConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub timeout_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: LOCK_TIMEOUT.as_secs(),
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Hard per-file maximum, in bytes. Object layouts are capped further.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
}

/// One tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub domain: String,
    /// Bytes; 0 means unlimited.
    #[serde(default)]
    pub disk_quota: u64,
    #[serde(default)]
    pub layout: StorageLayout,
}

impl Instance {
    pub fn new(domain: impl Into<String>, layout: StorageLayout) -> Self {
        Self {
            domain: domain.into(),
            disk_quota: 0,
            layout,
        }
    }
}

impl TenantfsConfig {
    /// Parse and validate TOML text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        let mut seen = HashSet::new();
        for instance in &config.instances {
            if !seen.insert(instance.domain.as_str()) {
                return Err(ConfigError::DuplicateInstance(instance.domain.clone()));
            }
        }
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write back to `path`, replacing it atomically.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(&tmp, text).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)
    }

    pub fn instance(&self, domain: &str) -> Result<&Instance, ConfigError> {
        self.instances
            .iter()
            .find(|i| i.domain == domain)
            .ok_or_else(|| ConfigError::UnknownInstance(domain.to_string()))
    }

    pub fn instance_mut(&mut self, domain: &str) -> Result<&mut Instance, ConfigError> {
        self.instances
            .iter_mut()
            .find(|i| i.domain == domain)
            .ok_or_else(|| ConfigError::UnknownInstance(domain.to_string()))
    }

    /// Directory holding one SQLite index per tenant.
    pub fn index_dir(&self) -> PathBuf {
        self.storage.root.join("index")
    }

    /// Directory holding local-layout content.
    pub fn files_dir(&self) -> PathBuf {
        self.storage.root.join("files")
    }

    /// Directory holding object-layout containers.
    pub fn objects_dir(&self) -> PathBuf {
        self.storage.root.join("objects")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TenantfsConfig::parse("").unwrap();
        assert_eq!(config, TenantfsConfig::default());
        assert_eq!(config.download.ttl(), DOWNLOAD_STORE_TTL);
        assert_eq!(config.lock.timeout(), LOCK_TIMEOUT);
        assert!(config.limits.max_file_size.is_none());
    }

    #[test]
    fn test_parse_instances() {
        let text = r#"
[storage]
root = "/srv/tenantfs"

[limits]
max_file_size = 1048576

[[instances]]
domain = "alice.example.net"
disk_quota = 1024
layout = "object_v2"

[[instances]]
domain = "bob.example.net"
"#;
        let config = TenantfsConfig::parse(text).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/srv/tenantfs"));
        assert_eq!(config.limits.max_file_size, Some(1048576));
        let alice = config.instance("alice.example.net").unwrap();
        assert_eq!(alice.disk_quota, 1024);
        assert_eq!(alice.layout, StorageLayout::ObjectV2);
        let bob = config.instance("bob.example.net").unwrap();
        assert_eq!(bob.disk_quota, 0);
        assert_eq!(bob.layout, StorageLayout::Local);
        assert!(matches!(
            config.instance("carol.example.net"),
            Err(ConfigError::UnknownInstance(_))
        ));
    }

    #[test]
    fn test_duplicate_instance_rejected() {
        let text = r#"
[[instances]]
domain = "alice.example.net"

[[instances]]
domain = "alice.example.net"
"#;
        assert!(matches!(
            TenantfsConfig::parse(text),
            Err(ConfigError::DuplicateInstance(_))
        ));
    }

    #[test]
    fn test_unknown_layout_rejected() {
        let text = r#"
[[instances]]
domain = "alice.example.net"
layout = "object_v9"
"#;
        assert!(matches!(TenantfsConfig::parse(text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DEFAULT_CONFIG_FILE);
        assert_eq!(TenantfsConfig::load(&path).unwrap(), TenantfsConfig::default());

        let mut config = TenantfsConfig::default();
        config.instances.push(Instance::new("alice.example.net", StorageLayout::ObjectV3));
        config.instance_mut("alice.example.net").unwrap().disk_quota = 4096;
        config.save(&path).unwrap();

        let loaded = TenantfsConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
