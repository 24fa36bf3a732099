//! Process Liveness Signal
//!
//! Where "is this process the active one" comes from. The origin is
//! host-specific (window focus, page visibility) and irrelevant to the
//! protocols; the core consumes only the boolean and
//! its transitions.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Capacity of the transition channel
const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Capability interface over the host's liveness signal
pub trait ActivitySignal: Send + Sync + std::fmt::Debug {
    /// Current value of the signal
    fn is_active(&self) -> bool;

    /// Subscribe to future transitions. Each message carries the new value.
    fn subscribe(&self) -> broadcast::Receiver<bool>;
}

/// Host-driven liveness signal.
///
/// The embedding process forwards its own notion of focus or visibility by
/// calling [`set_active`](Self::set_active); however many distinct host
/// events feed it (focus, blur, hide, unload), they collapse to the two
/// boolean transitions before reaching subscribers. Repeated sets of the
/// same value are dropped.
#[derive(Debug)]
pub struct HostSignal {
    active: AtomicBool,
    events: broadcast::Sender<bool>,
}

impl HostSignal {
    /// Create a signal with the given initial value
    pub fn new(initially_active: bool) -> Self {
        let (events, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            active: AtomicBool::new(initially_active),
            events,
        }
    }

    /// Record a transition reported by the host
    pub fn set_active(&self, active: bool) {
        if self.active.swap(active, Ordering::SeqCst) == active {
            return;
        }
        // No subscribers yet is fine
        let _ = self.events.send(active);
    }
}

impl ActivitySignal for HostSignal {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.events.subscribe()
    }
}
