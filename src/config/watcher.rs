//! File watcher that hot-reloads the routing configuration
//!
//! Watches the directory containing the config file (editors often replace
//! files by rename, which a watch on the file itself would miss), debounces
//! bursts of events and calls [`ConfigStore::load`]. A failed reload is logged
//! and the previous snapshot keeps serving.

use super::{ConfigError, ConfigStore};
use crate::reload_span;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default window for collapsing bursts of file events into one reload
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Running config watcher; dropping it stops watching
pub struct ConfigWatcher {
    watcher: Option<RecommendedWatcher>,
    handle: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Start watching the store's backing file on a background thread
    pub fn spawn(store: Arc<ConfigStore>, debounce: Duration) -> Result<Self, ConfigError> {
        let config_path = absolute(store.path());
        let watch_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (tx, rx) = channel::<Event>();
        let mut watcher = notify::recommended_watcher(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if is_content_event(&event.kind) {
                        let _ = tx.send(event);
                    }
                }
                Err(e) => warn!(error = %e, "Config watch error"),
            },
        )
        .map_err(watch_error)?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        info!(path = %config_path.display(), "Watching configuration file");

        let handle = std::thread::Builder::new()
            .name("config-watcher".to_string())
            .spawn(move || reload_loop(store, config_path, rx, debounce))?;

        Ok(Self {
            watcher: Some(watcher),
            handle: Some(handle),
        })
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        // Dropping the notify watcher drops the sender, which ends the reload loop
        self.watcher.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn reload_loop(
    store: Arc<ConfigStore>,
    config_path: PathBuf,
    rx: Receiver<Event>,
    debounce: Duration,
) {
    let mut last_hash = content_hash(&config_path);

    while let Ok(first) = rx.recv() {
        let mut touched = touches(&first, &config_path);
        while let Ok(event) = rx.recv_timeout(debounce) {
            touched |= touches(&event, &config_path);
        }

        if !touched {
            continue;
        }

        let current_hash = content_hash(&config_path);
        if current_hash == last_hash {
            debug!("Config file event without content change, skipping reload");
            continue;
        }
        last_hash = current_hash;

        let span = reload_span!(path = %config_path.display());
        let _guard = span.enter();
        info!("Configuration change detected, reloading");

        match store.load() {
            Ok(snapshot) => info!(version = snapshot.version, "Configuration reloaded"),
            Err(e) => error!(error = %e, "Keeping previous configuration"),
        }
    }

    debug!("Config watcher stopped");
}

fn is_content_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn touches(event: &Event, config_path: &Path) -> bool {
    let file_name = config_path.file_name();
    event
        .paths
        .iter()
        .any(|p| p == config_path || (file_name.is_some() && p.file_name() == file_name))
}

fn content_hash(path: &Path) -> Option<u64> {
    std::fs::read(path).ok().map(|bytes| {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        hasher.finish()
    })
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn watch_error(e: notify::Error) -> ConfigError {
    ConfigError::InvalidConfig(format!("failed to watch config file: {e}"))
}
