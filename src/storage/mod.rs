//! Shared Storage Module
//!
//! The key-value store every coordinating process reads and writes. The
//! store is eventually consistent: it offers no compare-and-swap and no
//! transactions, and a write made in one process becomes visible to the
//! others only after an unspecified propagation delay. Change notifications
//! may be delayed, coalesced or dropped; the protocols built on top stay
//! correct without them.

mod memory;

pub use memory::{MemoryStorage, MemoryStorageView};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;

/// Abstraction over the process-shared key-value store.
///
/// Implementations bridge to whatever medium the host provides,
/// such as a shared file or a browser storage area. Values are opaque
/// bytes; the records this crate writes are JSON-encoded.
#[async_trait]
pub trait SharedStorage: Send + Sync + std::fmt::Debug {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Unconditionally overwrite the value under `key`
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove the value under `key`
    async fn delete(&self, key: &str) -> Result<()>;

    /// Subscribe to keys mutated by *other* processes.
    ///
    /// Delivery is best-effort: receivers may lag or miss events entirely.
    fn watch(&self) -> broadcast::Receiver<String>;
}
