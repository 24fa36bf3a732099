//! Process Status Watcher
//!
//! Keeps a single active/inactive flag for this process and fires listeners
//! on real transitions. State changes come either from an
//! [`ActivitySignal`] pumped in the background, or from direct
//! [`set_active`](StatusWatcher::set_active) calls on a manual watcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::signal::ActivitySignal;
use crate::error::{Error, Result};

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Ordered callback registry with stable removal
#[derive(Default)]
struct ListenerSet {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback)>>,
}

impl ListenerSet {
    fn add(&self, callback: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().push((id, callback));
        id
    }

    fn remove(&self, id: u64) {
        self.entries
            .lock()
            .unwrap()
            .retain(|(entry_id, _)| *entry_id != id);
    }

    fn snapshot(&self) -> Vec<Callback> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }
}

/// Handle returned by listener registration.
///
/// [`unsubscribe`](Self::unsubscribe) detaches exactly the listener it was
/// returned for. Dropping the handle leaves the listener attached for the
/// watcher's lifetime.
pub struct Subscription {
    set: Weak<ListenerSet>,
    id: u64,
}

impl Subscription {
    /// Detach the listener
    pub fn unsubscribe(self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}

/// State shared between the watcher and its signal pump task
struct WatcherShared {
    is_active: Mutex<bool>,
    on_active: Arc<ListenerSet>,
    on_inactive: Arc<ListenerSet>,
}

impl WatcherShared {
    /// Apply a transition; a set to the current state is a no-op
    fn set_active(&self, active: bool) {
        {
            let mut state = self.is_active.lock().unwrap();
            if *state == active {
                return;
            }
            *state = active;
        }

        tracing::debug!(active, "process status changed");

        // Fire outside the state lock: listeners may re-enter the watcher
        let listeners = if active {
            self.on_active.snapshot()
        } else {
            self.on_inactive.snapshot()
        };
        for listener in listeners {
            listener();
        }
    }
}

/// Watches whether this process is currently the active one
pub struct StatusWatcher {
    signal: Option<Arc<dyn ActivitySignal>>,
    shared: Arc<WatcherShared>,
    started: Mutex<bool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl StatusWatcher {
    /// Create a watcher wired to a host liveness signal
    pub fn new(signal: Arc<dyn ActivitySignal>) -> Self {
        Self::build(Some(signal))
    }

    /// Create a watcher with no external signal, driven entirely through
    /// [`set_active`](Self::set_active), for tests and for hosts without a
    /// liveness source
    pub fn manual() -> Self {
        Self::build(None)
    }

    fn build(signal: Option<Arc<dyn ActivitySignal>>) -> Self {
        Self {
            signal,
            shared: Arc::new(WatcherShared {
                is_active: Mutex::new(false),
                on_active: Arc::new(ListenerSet::default()),
                on_inactive: Arc::new(ListenerSet::default()),
            }),
            started: Mutex::new(false),
            pump: Mutex::new(None),
        }
    }

    /// Whether this process is currently active
    pub fn is_active(&self) -> bool {
        *self.shared.is_active.lock().unwrap()
    }

    /// Apply a transition directly.
    ///
    /// Signal-wired watchers normally receive transitions through the pump
    /// task; manual watchers have only this entry point.
    pub fn set_active(&self, active: bool) {
        self.shared.set_active(active);
    }

    /// Register a listener fired on every transition to active.
    /// Listeners run in registration order.
    pub fn on_active(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.shared.on_active.add(Arc::new(listener));
        Subscription {
            set: Arc::downgrade(&self.shared.on_active),
            id,
        }
    }

    /// Register a listener fired on every transition to inactive.
    /// Listeners run in registration order.
    pub fn on_inactive(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.shared.on_inactive.add(Arc::new(listener));
        Subscription {
            set: Arc::downgrade(&self.shared.on_inactive),
            id,
        }
    }

    /// Start watching. Starting twice is a usage error.
    pub fn start(&self) -> Result<()> {
        let mut started = self.started.lock().unwrap();
        if *started {
            return Err(Error::AlreadyStarted("StatusWatcher"));
        }
        *started = true;

        if let Some(signal) = &self.signal {
            // The initial state is sampled, not a transition: no listeners fire
            *self.shared.is_active.lock().unwrap() = signal.is_active();

            let mut events = signal.subscribe();
            let shared = Arc::clone(&self.shared);
            let handle = tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(active) => shared.set_active(active),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Intermediate transitions collapse anyway; the
                            // newest value is still in the channel
                            tracing::trace!(skipped, "liveness signal lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            *self.pump.lock().unwrap() = Some(handle);
        }

        Ok(())
    }

    /// Stop watching. Stopping a watcher that isn't started is a usage error.
    pub fn stop(&self) -> Result<()> {
        let mut started = self.started.lock().unwrap();
        if !*started {
            return Err(Error::NotStarted("StatusWatcher"));
        }
        *started = false;

        if let Some(handle) = self.pump.lock().unwrap().take() {
            handle.abort();
        }

        Ok(())
    }
}

impl std::fmt::Debug for StatusWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusWatcher")
            .field("signal", &self.signal)
            .field("is_active", &self.is_active())
            .field("started", &*self.started.lock().unwrap())
            .finish()
    }
}

impl Drop for StatusWatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.lock().unwrap().take() {
            handle.abort();
        }
    }
}
