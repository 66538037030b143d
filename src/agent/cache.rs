//! Identifier cache for discovered assistants
//!
//! Maps agent key to the discovered assistant identifier and the last thread
//! id the agent returned. Every entry records the config version it was
//! computed against; an entry is served only while that version is current and
//! its age is below the TTL. Stale entries are evicted on lookup.
//!
//! Requests that captured an older snapshot may still be finishing after a
//! reload. Their writes and lookups never displace an entry recorded against a
//! newer version.

use crate::observability::metrics::metrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default TTL for cached identifiers (1 hour)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// A cached resolution for one agent key
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub agent_key: String,
    pub assistant_id: String,
    pub thread_id: Option<String>,
    pub config_version: u64,
    pub fetched_at: Instant,
}

impl CacheEntry {
    pub fn new(
        agent_key: impl Into<String>,
        assistant_id: impl Into<String>,
        config_version: u64,
    ) -> Self {
        Self {
            agent_key: agent_key.into(),
            assistant_id: assistant_id.into(),
            thread_id: None,
            config_version,
            fetched_at: Instant::now(),
        }
    }

    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Valid only for the matching config version and while younger than `ttl`
    pub fn is_valid(&self, config_version: u64, ttl: Duration) -> bool {
        self.config_version == config_version && self.fetched_at.elapsed() < ttl
    }

    /// Recorded against a later config than `config_version`
    pub fn is_newer_than(&self, config_version: u64) -> bool {
        self.config_version > config_version
    }
}

/// Thread-safe identifier cache
///
/// Locks are held only for map operations, never across network calls, so
/// discovery for one agent never waits on another.
#[derive(Debug)]
pub struct IdentifierCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl_ms: AtomicU64,
    /// Highest config version whose TTL has been applied
    ttl_version: Mutex<u64>,
}

impl Default for IdentifierCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl IdentifierCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_ms: AtomicU64::new(duration_ms(ttl)),
            ttl_version: Mutex::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }

    /// Apply the TTL from the current config; zero disables caching
    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_ms.store(duration_ms(ttl), Ordering::Relaxed);
    }

    /// Apply the TTL of config `version` the first time that version is seen.
    ///
    /// Returns false, leaving the TTL alone, when a version at least as new
    /// has already been applied.
    pub fn apply_ttl(&self, version: u64, ttl: Duration) -> bool {
        let mut applied = self
            .ttl_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if version <= *applied {
            return false;
        }

        *applied = version;
        self.set_ttl(ttl);
        debug!(version, ttl_secs = ttl.as_secs(), "Applied identifier cache TTL");
        true
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl().is_zero()
    }

    /// Return a valid entry for `agent_key`, evicting it if stale
    pub fn get(&self, agent_key: &str, config_version: u64) -> Option<CacheEntry> {
        let ttl = self.ttl();

        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(agent_key) {
                None => {
                    metrics().record_cache_miss();
                    return None;
                }
                Some(entry) if entry.is_valid(config_version, ttl) => {
                    metrics().record_cache_hit();
                    return Some(entry.clone());
                }
                Some(_) => {}
            }
        }

        // Re-check under the write lock; a concurrent put may have refreshed it
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(agent_key) {
            if entry.is_valid(config_version, ttl) {
                metrics().record_cache_hit();
                return Some(entry.clone());
            }
            if entry.is_newer_than(config_version) {
                metrics().record_cache_miss();
                return None;
            }
            debug!(
                agent_key,
                entry_version = entry.config_version,
                config_version,
                "Evicting stale identifier cache entry"
            );
            entries.remove(agent_key);
        }

        metrics().record_cache_miss();
        None
    }

    /// Store or overwrite the entry for `agent_key`.
    ///
    /// Skipped when the existing entry belongs to a newer config version.
    pub fn put(&self, agent_key: &str, entry: CacheEntry) {
        if !self.is_enabled() {
            return;
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(agent_key) {
            if existing.is_newer_than(entry.config_version) {
                debug!(
                    agent_key,
                    entry_version = existing.config_version,
                    config_version = entry.config_version,
                    "Keeping identifier cached under a newer config"
                );
                return;
            }
        }
        entries.insert(agent_key.to_string(), entry);
    }

    /// Remove the entry for `agent_key`, returning it if present
    pub fn invalidate(&self, agent_key: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.remove(agent_key);
        if removed.is_some() {
            debug!(agent_key, "Invalidated identifier cache entry");
        }
        removed
    }

    /// Remove the entry only if it still names `assistant_id` and is not
    /// from a newer config than `config_version`
    pub fn invalidate_assistant(
        &self,
        agent_key: &str,
        assistant_id: &str,
        config_version: u64,
    ) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let matches = entries.get(agent_key).is_some_and(|entry| {
            entry.assistant_id == assistant_id && !entry.is_newer_than(config_version)
        });
        if matches {
            entries.remove(agent_key);
            debug!(agent_key, assistant_id, "Invalidated identifier cache entry");
        }
        matches
    }

    /// Attach the thread id an agent returned to its entry.
    ///
    /// Updates the existing entry when it is valid and names the same
    /// assistant, and leaves an entry from a newer config untouched. Otherwise
    /// stores a fresh entry. `fetched_at` of an existing entry is left alone
    /// so the TTL still measures discovery age.
    pub fn record_thread(
        &self,
        agent_key: &str,
        assistant_id: &str,
        config_version: u64,
        thread_id: &str,
    ) {
        if !self.is_enabled() {
            return;
        }

        let ttl = self.ttl();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        match entries.get_mut(agent_key) {
            Some(entry) if entry.is_newer_than(config_version) => {
                debug!(
                    agent_key,
                    entry_version = entry.config_version,
                    config_version,
                    "Dropping thread from a request on an older config"
                );
            }
            Some(entry)
                if entry.is_valid(config_version, ttl) && entry.assistant_id == assistant_id =>
            {
                entry.thread_id = Some(thread_id.to_string());
            }
            _ => {
                entries.insert(
                    agent_key.to_string(),
                    CacheEntry::new(agent_key, assistant_id, config_version)
                        .with_thread(Some(thread_id.to_string())),
                );
            }
        }
    }

    /// Forget the thread id for `agent_key`, keeping the identifier
    pub fn clear_thread(&self, agent_key: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(agent_key) {
            Some(entry) => entry.thread_id.take().is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aged(entry: CacheEntry, age: Duration) -> CacheEntry {
        CacheEntry {
            fetched_at: Instant::now()
                .checked_sub(age)
                .expect("test clock should allow subtraction"),
            ..entry
        }
    }

    #[test]
    fn test_put_then_get() {
        let cache = IdentifierCache::default();
        cache.put("jira", CacheEntry::new("jira", "a1", 1));

        let entry = cache.get("jira", 1).unwrap();
        assert_eq!(entry.assistant_id, "a1");
        assert_eq!(entry.config_version, 1);
    }

    #[test]
    fn test_version_mismatch_never_served() {
        let cache = IdentifierCache::default();
        cache.put("jira", CacheEntry::new("jira", "a1", 1));

        assert!(cache.get("jira", 2).is_none());
        // Lazily evicted
        assert!(cache.is_empty());
        assert!(cache.get("jira", 1).is_none());
    }

    #[test]
    fn test_expired_entry_evicted() {
        let cache = IdentifierCache::new(Duration::from_secs(60));
        cache.put(
            "jira",
            aged(CacheEntry::new("jira", "a1", 1), Duration::from_secs(61)),
        );

        assert!(cache.get("jira", 1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_disables_caching() {
        let cache = IdentifierCache::new(Duration::ZERO);
        cache.put("jira", CacheEntry::new("jira", "a1", 1));
        cache.record_thread("jira", "a1", 1, "t1");

        assert!(cache.is_empty());
        assert!(cache.get("jira", 1).is_none());
    }

    #[test]
    fn test_set_ttl_applies_to_existing_entries() {
        let cache = IdentifierCache::new(Duration::from_secs(3600));
        cache.put(
            "jira",
            aged(CacheEntry::new("jira", "a1", 1), Duration::from_secs(120)),
        );
        assert!(cache.get("jira", 1).is_some());

        cache.set_ttl(Duration::from_secs(60));
        assert!(cache.get("jira", 1).is_none());
    }

    #[test]
    fn test_invalidate() {
        let cache = IdentifierCache::default();
        cache.put("jira", CacheEntry::new("jira", "a1", 1));

        let removed = cache.invalidate("jira").unwrap();
        assert_eq!(removed.assistant_id, "a1");
        assert!(cache.get("jira", 1).is_none());
        assert!(cache.invalidate("jira").is_none());
    }

    #[test]
    fn test_record_thread_updates_matching_entry() {
        let cache = IdentifierCache::default();
        let entry = aged(CacheEntry::new("jira", "a1", 1), Duration::from_secs(10));
        let fetched_at = entry.fetched_at;
        cache.put("jira", entry);

        cache.record_thread("jira", "a1", 1, "t1");

        let entry = cache.get("jira", 1).unwrap();
        assert_eq!(entry.thread_id.as_deref(), Some("t1"));
        assert_eq!(entry.fetched_at, fetched_at);
    }

    #[test]
    fn test_record_thread_creates_entry_for_preset_identifier() {
        let cache = IdentifierCache::default();
        cache.record_thread("jira", "preset", 3, "t1");

        let entry = cache.get("jira", 3).unwrap();
        assert_eq!(entry.assistant_id, "preset");
        assert_eq!(entry.thread_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_record_thread_replaces_entry_for_other_assistant() {
        let cache = IdentifierCache::default();
        cache.put(
            "jira",
            CacheEntry::new("jira", "old", 1).with_thread(Some("t0".to_string())),
        );

        cache.record_thread("jira", "new", 1, "t1");

        let entry = cache.get("jira", 1).unwrap();
        assert_eq!(entry.assistant_id, "new");
        assert_eq!(entry.thread_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_record_thread_from_older_config_keeps_newer_entry() {
        let cache = IdentifierCache::default();
        cache.put(
            "jira",
            CacheEntry::new("jira", "a2", 2).with_thread(Some("t2".to_string())),
        );

        cache.record_thread("jira", "a1", 1, "t-old");

        let entry = cache.get("jira", 2).unwrap();
        assert_eq!(entry.assistant_id, "a2");
        assert_eq!(entry.thread_id.as_deref(), Some("t2"));
    }

    #[test]
    fn test_record_thread_replaces_entry_from_older_config() {
        let cache = IdentifierCache::default();
        cache.put("jira", CacheEntry::new("jira", "a1", 1));

        cache.record_thread("jira", "a2", 2, "t2");

        let entry = cache.get("jira", 2).unwrap();
        assert_eq!(entry.assistant_id, "a2");
        assert_eq!(entry.thread_id.as_deref(), Some("t2"));
    }

    #[test]
    fn test_older_config_cannot_displace_newer_entry() {
        let cache = IdentifierCache::default();
        cache.put("jira", CacheEntry::new("jira", "a2", 2));

        cache.put("jira", CacheEntry::new("jira", "a1", 1));
        assert!(cache.get("jira", 1).is_none());
        assert!(!cache.invalidate_assistant("jira", "a2", 1));

        assert_eq!(cache.get("jira", 2).unwrap().assistant_id, "a2");
    }

    #[test]
    fn test_invalidate_assistant_only_removes_matching_identifier() {
        let cache = IdentifierCache::default();
        cache.put("jira", CacheEntry::new("jira", "a2", 1));

        assert!(!cache.invalidate_assistant("jira", "a1", 1));
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate_assistant("jira", "a2", 1));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_apply_ttl_ignores_older_versions() {
        let cache = IdentifierCache::new(Duration::from_secs(3600));

        assert!(cache.apply_ttl(2, Duration::from_secs(60)));
        assert!(!cache.apply_ttl(1, Duration::from_secs(3600)));
        assert!(!cache.apply_ttl(2, Duration::from_secs(10)));
        assert_eq!(cache.ttl(), Duration::from_secs(60));

        assert!(cache.apply_ttl(3, Duration::ZERO));
        assert!(!cache.is_enabled());
    }

    #[test]
    fn test_clear_thread_keeps_identifier() {
        let cache = IdentifierCache::default();
        cache.put(
            "jira",
            CacheEntry::new("jira", "a1", 1).with_thread(Some("t1".to_string())),
        );

        assert!(cache.clear_thread("jira"));
        assert!(!cache.clear_thread("jira"));

        let entry = cache.get("jira", 1).unwrap();
        assert_eq!(entry.assistant_id, "a1");
        assert_eq!(entry.thread_id, None);
    }

    #[test]
    fn test_unrelated_keys_independent() {
        let cache = IdentifierCache::default();
        cache.put("jira", CacheEntry::new("jira", "a1", 1));
        cache.put("gitlab", CacheEntry::new("gitlab", "b1", 1));

        cache.invalidate("jira");

        assert!(cache.get("jira", 1).is_none());
        assert_eq!(cache.get("gitlab", 1).unwrap().assistant_id, "b1");
        assert_eq!(cache.len(), 1);
    }
}
