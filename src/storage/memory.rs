//! In-Memory Shared Storage
//!
//! A single backing map with per-process views, used in tests and in hosts
//! where all coordinating parties live in one address space. Data written
//! through any view is immediately visible to every view (the map is
//! shared); the external-change event fires on every view except the
//! writer's own, which is the signal a real cross-process store delivers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::SharedStorage;
use crate::error::Result;

/// Capacity of each view's change-event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct Backing {
    data: Mutex<HashMap<String, Vec<u8>>>,
    views: Mutex<Vec<ViewChannel>>,
    next_view_id: AtomicU64,
}

#[derive(Debug)]
struct ViewChannel {
    view_id: u64,
    events: broadcast::Sender<String>,
}

/// Shared in-memory store. Create one, then hand a [`share`](Self::share)
/// view to each coordinating party.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    backing: Arc<Backing>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a view representing one process over the shared backing map
    pub fn share(&self) -> MemoryStorageView {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let view_id = self.backing.next_view_id.fetch_add(1, Ordering::Relaxed);
        self.backing.views.lock().unwrap().push(ViewChannel {
            view_id,
            events: events.clone(),
        });
        MemoryStorageView {
            backing: Arc::clone(&self.backing),
            view_id,
            events,
        }
    }
}

/// One process's view over a [`MemoryStorage`]
#[derive(Debug)]
pub struct MemoryStorageView {
    backing: Arc<Backing>,
    view_id: u64,
    events: broadcast::Sender<String>,
}

impl MemoryStorageView {
    /// Raise the external-change event on every view but this one
    fn notify_others(&self, key: &str) {
        let views = self.backing.views.lock().unwrap();
        for view in views.iter() {
            if view.view_id != self.view_id {
                // Views with no live subscribers are fine to skip over
                let _ = view.events.send(key.to_string());
            }
        }
    }
}

#[async_trait]
impl SharedStorage for MemoryStorageView {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.backing.data.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.backing
            .data
            .lock()
            .unwrap()
            .insert(key.to_string(), value);
        self.notify_others(key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let removed = self.backing.data.lock().unwrap().remove(key);
        if removed.is_some() {
            self.notify_others(key);
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }
}
