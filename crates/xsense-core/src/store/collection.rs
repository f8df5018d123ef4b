// ── Generic reactive entity collection ──
//
// Concurrent storage keyed by id with a secondary serial index. The
// published snapshot lives in a `watch` channel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A concurrent, reactive collection for a single entity type.
///
/// Every mutation republishes the snapshot.
pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    /// Primary storage: id -> entity.
    by_key: DashMap<String, Arc<T>>,

    /// Secondary index: serial -> id.
    serial_to_key: DashMap<String, String>,

    /// Reverse of `serial_to_key` for efficient removal.
    key_to_serial: DashMap<String, String>,

    /// Full snapshot, rebuilt on mutation for efficient subscription.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_key: DashMap::new(),
            serial_to_key: DashMap::new(),
            key_to_serial: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or replace an entity. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: String, serial: Option<String>, entity: T) -> bool {
        // Drop a stale serial mapping if the key is re-indexed.
        if let Some((_, old_serial)) = self.key_to_serial.remove(&key) {
            if serial.as_deref() != Some(old_serial.as_str()) {
                self.serial_to_key.remove_if(&old_serial, |_, k| *k == key);
            }
        }

        let is_new = !self.by_key.contains_key(&key);
        self.by_key.insert(key.clone(), Arc::new(entity));
        if let Some(serial) = serial.filter(|s| !s.is_empty()) {
            self.serial_to_key.insert(serial.clone(), key.clone());
            self.key_to_serial.insert(key, serial);
        }

        self.rebuild_snapshot();

        is_new
    }

    /// Replace an existing entity with `f(current)` in one step.
    ///
    /// Returns the new value, or `None` if the key is unknown.
    pub(crate) fn update(&self, key: &str, f: impl FnOnce(&T) -> T) -> Option<Arc<T>> {
        let updated = {
            let mut entry = self.by_key.get_mut(key)?;
            let next = Arc::new(f(entry.value()));
            *entry = Arc::clone(&next);
            next
        };
        // The shard guard is released above; rebuilding iterates every shard.
        self.rebuild_snapshot();
        Some(updated)
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Id of the entity with `serial`: exact, then upper-case, then a
    /// case-insensitive scan.
    pub(crate) fn key_for_serial(&self, serial: &str) -> Option<String> {
        if serial.is_empty() {
            return None;
        }
        if let Some(key) = self.serial_to_key.get(serial) {
            return Some(key.value().clone());
        }
        if let Some(key) = self.serial_to_key.get(&serial.to_uppercase()) {
            return Some(key.value().clone());
        }
        self.serial_to_key
            .iter()
            .find(|entry| entry.key().eq_ignore_ascii_case(serial))
            .map(|entry| entry.value().clone())
    }

    pub(crate) fn get_by_serial(&self, serial: &str) -> Option<Arc<T>> {
        let key = self.key_for_serial(serial)?;
        self.get(&key)
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Remove all entities.
    pub(crate) fn clear(&self) {
        self.by_key.clear();
        self.serial_to_key.clear();
        self.key_to_serial.clear();
        self.rebuild_snapshot();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Copy all values into a fresh snapshot and publish it.
    ///
    /// The copy is taken under the channel's write lock, so publishers are
    /// serialized and the last one to run sees every completed write.
    /// Callers must not hold a `by_key` guard.
    fn rebuild_snapshot(&self) {
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| {
            *snap = Arc::new(self.by_key.iter().map(|r| Arc::clone(r.value())).collect());
        });
    }
}
