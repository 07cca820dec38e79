//! Durable storage shared by every tab of one origin.
//!
//! A `SharedStorage` owns the items and the change channel. Each tab gets
//! its own `TabStorage` handle; a write through one handle is broadcast as
//! a `StorageEvent` to every handle *except* the writer, the same way a
//! browser only fires `storage` events in sibling contexts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{Storage, StorageError};

/// Capacity of the change channel. A tab that falls further behind than
/// this skips the oldest events and logs the gap.
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub type TabId = u64;

/// A change made by another tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
    pub source: TabId,
}

struct SharedInner {
    items: Mutex<BTreeMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
    path: Option<PathBuf>,
    next_tab: AtomicU64,
}

/// Origin-scoped durable storage.
/// Clone is cheap - all clones share the same items and change channel.
#[derive(Clone)]
pub struct SharedStorage {
    inner: Arc<SharedInner>,
}

impl SharedStorage {
    /// Storage that lives only as long as the process
    pub fn in_memory() -> Self {
        Self::with_items(BTreeMap::new(), None)
    }

    /// Open storage persisted at `path`, loading existing items if the file exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let items = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), items = items.len(), "Opened durable storage");
        Ok(Self::with_items(items, Some(path)))
    }

    fn with_items(items: BTreeMap<String, String>, path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SharedInner {
                items: Mutex::new(items),
                events,
                path,
                next_tab: AtomicU64::new(1),
            }),
        }
    }

    /// Create a handle for a new tab
    pub fn tab(&self) -> TabStorage {
        let id = self.inner.next_tab.fetch_add(1, Ordering::Relaxed);
        TabStorage {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }
}

impl SharedInner {
    /// Apply a write and notify other tabs. Writes that leave the value
    /// unchanged are dropped without an event. A write that cannot be
    /// persisted is undone and reported; no tab sees it.
    fn write(&self, source: TabId, key: &str, value: Option<&str>) -> Result<(), StorageError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);

        let old_value = items.get(key).cloned();
        if old_value.as_deref() == value {
            return Ok(());
        }

        set_entry(&mut items, key, value);

        // Persist while still holding the lock so the file reflects write order
        if let Err(e) = self.persist(&items) {
            set_entry(&mut items, key, old_value.as_deref());
            warn!(key = key, error = %e, "Durable write failed, change discarded");
            return Err(e);
        }

        // No receivers is fine: nobody is listening yet
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            old_value,
            new_value: value.map(str::to_string),
            source,
        });
        Ok(())
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(items)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn set_entry(items: &mut BTreeMap<String, String>, key: &str, value: Option<&str>) {
    match value {
        Some(v) => {
            items.insert(key.to_string(), v.to_string());
        }
        None => {
            items.remove(key);
        }
    }
}

/// One tab's view of the shared durable storage.
pub struct TabStorage {
    id: TabId,
    inner: Arc<SharedInner>,
}

impl TabStorage {
    pub fn id(&self) -> TabId {
        self.id
    }

    /// Subscribe to changes made by other tabs.
    /// Only changes made after this call are delivered.
    pub fn subscribe(&self) -> StorageEvents {
        StorageEvents {
            tab: self.id,
            rx: self.inner.events.subscribe(),
        }
    }
}

impl Storage for TabStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.inner
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.write(self.id, key, Some(value))
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.inner.write(self.id, key, None)
    }
}

/// Stream of storage changes made by tabs other than the subscriber.
pub struct StorageEvents {
    tab: TabId,
    rx: broadcast::Receiver<StorageEvent>,
}

impl StorageEvents {
    /// Wait for the next change from another tab.
    /// Returns `None` once the shared storage has been dropped.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.source == self.tab => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(tab = self.tab, skipped = skipped, "Storage events dropped, tab fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next already-delivered change without waiting
    pub fn try_recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.source == self.tab => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(tab = self.tab, skipped = skipped, "Storage events dropped, tab fell behind");
                }
                Err(_) => return None,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_is_visible_to_all_tabs() {
        let shared = SharedStorage::in_memory();
        let tab1 = shared.tab();
        let tab2 = shared.tab();
        assert_ne!(tab1.id(), tab2.id());

        tab1.set_item("k", "v").unwrap();
        assert_eq!(tab2.get_item("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_events_skip_the_writing_tab() {
        let shared = SharedStorage::in_memory();
        let tab1 = shared.tab();
        let tab2 = shared.tab();
        let mut events1 = tab1.subscribe();
        let mut events2 = tab2.subscribe();

        tab1.set_item("k", "v").unwrap();

        assert_eq!(events1.try_recv(), None);
        let event = events2.try_recv().unwrap();
        assert_eq!(event.key, "k");
        assert_eq!(event.old_value, None);
        assert_eq!(event.new_value.as_deref(), Some("v"));
        assert_eq!(event.source, tab1.id());
    }

    #[test]
    fn test_remove_emits_none_value() {
        let shared = SharedStorage::in_memory();
        let tab1 = shared.tab();
        let tab2 = shared.tab();
        tab1.set_item("k", "v").unwrap();
        let mut events2 = tab2.subscribe();

        tab1.remove_item("k").unwrap();

        let event = events2.try_recv().unwrap();
        assert_eq!(event.old_value.as_deref(), Some("v"));
        assert_eq!(event.new_value, None);
    }

    #[test]
    fn test_unchanged_write_emits_nothing() {
        let shared = SharedStorage::in_memory();
        let tab1 = shared.tab();
        let tab2 = shared.tab();
        tab1.set_item("k", "v").unwrap();
        let mut events2 = tab2.subscribe();

        tab1.set_item("k", "v").unwrap();
        tab1.remove_item("missing").unwrap();

        assert_eq!(events2.try_recv(), None);
    }

    #[test]
    fn test_persisted_storage_reopens_with_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("durable.json");

        {
            let shared = SharedStorage::open(&path).unwrap();
            let tab = shared.tab();
            tab.set_item("ae_user", "{\"id\":\"1\"}").unwrap();
            tab.set_item("gone", "x").unwrap();
            tab.remove_item("gone").unwrap();
        }

        let reopened = SharedStorage::open(&path).unwrap();
        let tab = reopened.tab();
        assert_eq!(tab.get_item("ae_user").as_deref(), Some("{\"id\":\"1\"}"));
        assert_eq!(tab.get_item("gone"), None);
    }

    #[test]
    fn test_open_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("durable.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(SharedStorage::open(&path), Err(StorageError::Json(_))));
    }

    #[test]
    fn test_failed_persist_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("durable.json");
        let shared = SharedStorage::open(&path).unwrap();
        assert_eq!(shared.path(), Some(path.as_path()));

        let tab1 = shared.tab();
        let tab2 = shared.tab();
        tab1.set_item("ae_user", "before").unwrap();
        let mut events = tab2.subscribe();

        // A directory where the file should be makes every write fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(matches!(tab1.set_item("ae_user", "after"), Err(StorageError::Io(_))));
        assert!(tab1.remove_item("ae_user").is_err());

        assert_eq!(tab1.get_item("ae_user").as_deref(), Some("before"));
        assert_eq!(tab2.get_item("ae_user").as_deref(), Some("before"));
        assert!(events.try_recv().is_none());
    }
}
