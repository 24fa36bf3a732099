//! Process Status Module
//!
//! Tracks whether this process is the active (foreground) one, based on a
//! pluggable host liveness signal, and notifies listeners on transitions.

mod signal;
mod watcher;

pub use signal::{ActivitySignal, HostSignal};
pub use watcher::{StatusWatcher, Subscription};
