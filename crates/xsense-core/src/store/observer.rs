// ── Update fan-out ──
//
// Observers are plain callbacks registered through `on_update`; each
// registration returns a `Subscription` handle that unregisters on drop.
// A panicking observer is logged and skipped. The same events are also
// broadcast for async consumers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;
use xsense_api::ApiNotice;

use crate::model::Device;

const UPDATE_CHANNEL_SIZE: usize = 256;

/// What observers receive.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    /// The merged record after a device changed.
    Device(Arc<Device>),
    /// A house's realtime connection came up or went down.
    RealtimeHealth { house_id: String, healthy: bool },
    /// A user-facing notice (persistent 5xx, failed re-login).
    Error(ApiNotice),
}

impl UpdateEvent {
    pub fn device(&self) -> Option<&Arc<Device>> {
        match self {
            Self::Device(device) => Some(device),
            _ => None,
        }
    }
}

pub type UpdateCallback = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

pub(crate) struct Observers {
    next_id: AtomicU64,
    callbacks: DashMap<u64, UpdateCallback>,
    tx: broadcast::Sender<UpdateEvent>,
}

impl Observers {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        Self {
            next_id: AtomicU64::new(1),
            callbacks: DashMap::new(),
            tx,
        }
    }

    pub(crate) fn register(self: &Arc<Self>, callback: UpdateCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.insert(id, callback);
        Subscription {
            id,
            observers: Arc::downgrade(self),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub(crate) fn clear(&self) {
        self.callbacks.clear();
    }

    /// Deliver `event` to every observer, in registration order.
    pub(crate) fn emit(&self, event: &UpdateEvent) {
        let _ = self.tx.send(event.clone());

        // Callbacks run outside the map's shard locks so an observer may
        // unsubscribe itself.
        let mut callbacks: Vec<(u64, UpdateCallback)> = self
            .callbacks
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        callbacks.sort_unstable_by_key(|(id, _)| *id);

        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(observer = id, "update observer panicked");
            }
        }
    }
}

/// Registration handle returned by `on_update`.
///
/// Dropping it removes the callback.
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    id: u64,
    observers: Weak<Observers>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unregister now. Same as dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.callbacks.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
