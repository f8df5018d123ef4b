// ── Client registry ──
//
// Shares one initialized controller per account within a process. Keys
// are the SHA-256 of `email:password`, so changing the password yields a
// fresh client. A failed initialization is evicted so the next caller
// retries from scratch.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::controller::{ClientState, Controller};
use crate::error::CoreError;

type Slot = Arc<OnceCell<Controller>>;

/// Process-wide cache of initialized controllers.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, Slot>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the ready controller for this account, creating and
    /// initializing it on first use. Concurrent callers for the same
    /// account share a single initialization.
    pub async fn get_or_init(&self, config: ClientConfig) -> Result<Controller, CoreError> {
        let key = config.credential_key();
        let mut slot = self.slot(&key);

        if let Some(existing) = slot.get() {
            if *existing.state().borrow() != ClientState::Destroyed {
                return Ok(existing.clone());
            }
            debug!("cached client was destroyed, creating a new one");
            self.evict(&key, &slot);
            slot = self.slot(&key);
        }

        let result = slot
            .get_or_try_init(|| async move {
                let controller = Controller::new(config)?;
                if let Err(e) = controller.init().await {
                    controller.destroy().await;
                    return Err(e);
                }
                Ok(controller)
            })
            .await
            .cloned();

        match result {
            Ok(controller) => Ok(controller),
            Err(e) => {
                self.evict(&key, &slot);
                Err(e)
            }
        }
    }

    /// Destroy and forget the controller for this account.
    pub async fn remove(&self, config: &ClientConfig) -> bool {
        let Some((_, slot)) = self.clients.remove(&config.credential_key()) else {
            return false;
        };
        if let Some(controller) = slot.get() {
            controller.destroy().await;
        }
        true
    }

    /// Destroy every cached controller.
    pub async fn destroy_all(&self) {
        let slots: Vec<Slot> = self.clients.iter().map(|e| Arc::clone(e.value())).collect();
        self.clients.clear();
        for slot in slots {
            if let Some(controller) = slot.get() {
                controller.destroy().await;
            }
        }
        info!("all clients destroyed");
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn slot(&self, key: &str) -> Slot {
        Arc::clone(
            self.clients
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        )
    }

    /// Drop the slot only if nobody replaced it in the meantime.
    fn evict(&self, key: &str, slot: &Slot) {
        self.clients.remove_if(key, |_, current| Arc::ptr_eq(current, slot));
    }
}
