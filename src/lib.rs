//! Wolfpack - Cross-Process Coordination Primitives
//!
//! Coordination between independent processes that share nothing but an
//! eventually consistent key-value store: no compare-and-swap, no
//! transactions, and a write made by one process reaches the others only
//! after an unspecified propagation delay.
//!
//! # Architecture
//!
//! Two protocols ride on that store, both optimistic (write, wait,
//! re-read, compare) because the substrate offers nothing stronger:
//!
//! - **Lease lock**: mutual exclusion over a named resource. An acquirer
//!   writes a tokened lease record, waits a short settle delay in place of
//!   the missing atomic write, then re-reads to learn whether its write
//!   survived. Losers receive a retry hint instead of an error.
//! - **Active-process discovery**: any process asks "who is active" by
//!   writing a request record; the process whose status watcher reports it
//!   as the foreground one answers by writing its identity.
//!
//! The storage medium, the clock and the liveness signal are all injected,
//! so the same protocols run against a browser storage bridge, a shared
//! file, or the in-memory store used in tests.
//!
//! # Features
//!
//! - Lease-style locking with contention outcomes carrying retry hints
//! - Request/announce discovery of the single active process
//! - Process status watching with ordered transition listeners
//! - Deterministic virtual clock and multi-view in-memory store for tests

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod status;
pub mod storage;

pub use config::WolfpackConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock, VirtualClock};
    pub use crate::config::{CoordinatorConfig, LockConfig, WolfpackConfig};
    pub use crate::coordinator::Coordinator;
    pub use crate::error::{Error, Result};
    pub use crate::lock::{AcquireOutcome, ContentionReason, LeaseGuard, LeaseLock};
    pub use crate::status::{ActivitySignal, HostSignal, StatusWatcher};
    pub use crate::storage::{MemoryStorage, SharedStorage};
}
