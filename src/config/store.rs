//! Versioned configuration snapshots with atomic publish
//!
//! A [`ConfigStore`] owns the path of the routing file and the currently
//! published [`ConfigSnapshot`]. Snapshots are immutable; a reload builds a new
//! one with the next version and swaps it in. Requests that captured an older
//! `Arc<ConfigSnapshot>` keep using it until they finish.

use super::{AgentConfig, ConfigError, RegistryConfig, RouterConfig, RoutingConfig};
use crate::observability::metrics::metrics;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Immutable, versioned view of a validated configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    /// Monotonically increasing, assigned on publish
    pub version: u64,
    pub agents: BTreeMap<String, AgentConfig>,
    pub registry: Option<RegistryConfig>,
    pub routing: RoutingConfig,
    pub loaded_at: DateTime<Utc>,
}

impl ConfigSnapshot {
    pub fn new(config: RouterConfig, version: u64) -> Self {
        Self {
            version,
            agents: config.agents,
            registry: config.registry,
            routing: config.routing,
            loaded_at: Utc::now(),
        }
    }

    pub fn agent(&self, key: &str) -> Option<&AgentConfig> {
        self.agents.get(key)
    }

    /// Rebuild the file-level configuration this snapshot was made from
    pub fn to_config(&self) -> RouterConfig {
        RouterConfig {
            agents: self.agents.clone(),
            registry: self.registry.clone(),
            routing: self.routing.clone(),
        }
    }
}

/// Holder of the currently published configuration snapshot
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: ArcSwap<ConfigSnapshot>,
    next_version: AtomicU64,
}

impl ConfigStore {
    /// Load the file and publish version 1. Failure here is fatal to the caller.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = RouterConfig::load_from_file(&path)?;
        info!(path = %path.display(), agents = config.agents.len(), "Configuration loaded");
        Ok(Self::with_config(path, config))
    }

    /// Build a store around an already validated configuration
    pub fn with_config(path: impl Into<PathBuf>, config: RouterConfig) -> Self {
        let snapshot = ConfigSnapshot::new(config, 1);
        metrics().set_config_version(snapshot.version);

        Self {
            path: path.into(),
            current: ArcSwap::from_pointee(snapshot),
            next_version: AtomicU64::new(2),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest published snapshot; never blocks
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    /// Re-read the backing file and publish it as a new snapshot.
    ///
    /// On failure the previously published snapshot stays current.
    pub fn load(&self) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        match RouterConfig::load_from_file(&self.path) {
            Ok(config) => Ok(self.publish(config)),
            Err(e) => {
                metrics().record_config_reload_failure();
                error!(
                    path = %self.path.display(),
                    error = %e,
                    current_version = self.current.load().version,
                    "Configuration reload failed, keeping previous snapshot"
                );
                Err(e)
            }
        }
    }

    /// Publish a validated configuration as the next version
    pub fn publish(&self, config: RouterConfig) -> Arc<ConfigSnapshot> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let snapshot = Arc::new(ConfigSnapshot::new(config, version));
        self.current.store(Arc::clone(&snapshot));

        metrics().record_config_reload();
        metrics().set_config_version(version);
        info!(version, agents = snapshot.agents.len(), "Published configuration snapshot");

        snapshot
    }
}
