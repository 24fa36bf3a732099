//! Lease Lock
//!
//! Mutual exclusion between processes that share nothing but an eventually
//! consistent key-value store. The store has no compare-and-swap, so the
//! acquire path is optimistic: write a fresh lease, wait for concurrent
//! writes to settle, then re-read and see whose write survived. Two
//! processes racing inside the propagation window both reach the write step;
//! the settle delay lets whichever write was effectively last win, and the
//! loser backs off with a retry hint.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::{Clock, Millis};
use crate::config::LockConfig;
use crate::error::{Error, Result};
use crate::storage::SharedStorage;

/// Prefix of the storage key holding a lock's lease record.
///
/// Part of the cross-process contract: every implementation sharing the
/// store must agree on it.
const LOCK_KEY_PREFIX: &str = "Lock.";

/// Lease record stored under the lock's key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// Token identifying the holder that wrote this lease
    pub id: Uuid,
    /// When the lease was written
    pub created_at: Millis,
    /// When the lease lapses. A record with `expires_at == now` is expired.
    pub expires_at: Millis,
}

/// Why an acquisition attempt produced no lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentionReason {
    /// Another holder's lease was still valid when we looked
    HeldByOther,
    /// Our write lost the settle race to a concurrent writer
    OverwrittenByOther,
}

impl std::fmt::Display for ContentionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentionReason::HeldByOther => write!(f, "LOCK_HELD_BY_OTHER"),
            ContentionReason::OverwrittenByOther => write!(f, "LOCK_OVERWRITTEN_BY_OTHER"),
        }
    }
}

/// Result of [`LeaseLock::acquire`].
///
/// Contention is a normal outcome of the optimistic protocol, not an error:
/// the caller is expected to retry after `retry_after_ms`.
#[derive(Debug)]
pub enum AcquireOutcome {
    /// The lease is held; the guard owns it
    Acquired(LeaseGuard),
    /// Another process holds or took the lease
    Contended {
        reason: ContentionReason,
        /// Milliseconds until a retry has a chance of succeeding
        retry_after_ms: u64,
    },
}

/// Lease-style mutual exclusion over a named resource.
///
/// One instance per resource name; the lease lasts `timeout_ms` and is not
/// renewed automatically. A holder that outlives its lease must notice via
/// [`LeaseGuard::has_timed_out`] and re-acquire.
#[derive(Debug)]
pub struct LeaseLock {
    name: String,
    key: String,
    storage: Arc<dyn SharedStorage>,
    clock: Arc<dyn Clock>,
    config: LockConfig,
}

impl LeaseLock {
    /// Create a lock for the named resource.
    ///
    /// Fails fast with a configuration error on an empty name or a zero
    /// lease duration.
    pub fn new(
        name: impl Into<String>,
        storage: Arc<dyn SharedStorage>,
        clock: Arc<dyn Clock>,
        config: LockConfig,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config("lock name cannot be empty".into()));
        }
        config.validate()?;

        let key = format!("{}{}", LOCK_KEY_PREFIX, name);
        Ok(Self {
            name,
            key,
            storage,
            clock,
            config,
        })
    }

    /// The resource name this lock guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attempt to acquire the lease.
    ///
    /// Suspends once, for the verification delay. Storage failures
    /// propagate; contention does not.
    pub async fn acquire(&self) -> Result<AcquireOutcome> {
        let now = self.clock.now();

        // A valid lease by someone else: back off until it lapses
        if let Some(lease) = self.read_lease().await? {
            if lease.expires_at > now {
                tracing::debug!(name = %self.name, "lock is held by a concurrent process");
                return Ok(AcquireOutcome::Contended {
                    reason: ContentionReason::HeldByOther,
                    retry_after_ms: lease.expires_at - now,
                });
            }
        }

        let token = Uuid::new_v4();
        let lease = LeaseRecord {
            id: token,
            created_at: now,
            expires_at: now + self.config.timeout_ms,
        };
        self.write_lease(&lease).await?;

        // The store has no conditional write. Waiting here lets a concurrent
        // acquirer's own write land before we check whose survived.
        self.clock.sleep(self.config.verify_delay_ms).await;

        match self.read_lease().await? {
            Some(current) if current.id == token => {
                tracing::debug!(name = %self.name, "lock acquired");
                Ok(AcquireOutcome::Acquired(LeaseGuard {
                    key: self.key.clone(),
                    token,
                    storage: Arc::clone(&self.storage),
                    clock: Arc::clone(&self.clock),
                }))
            }
            current => {
                tracing::debug!(name = %self.name, "a concurrent process acquired the lock");
                let retry_after_ms = current
                    .map(|winner| winner.expires_at.saturating_sub(self.clock.now()))
                    .unwrap_or(0)
                    // Never 0: callers treat 0 as "no retry needed"
                    .max(1);
                Ok(AcquireOutcome::Contended {
                    reason: ContentionReason::OverwrittenByOther,
                    retry_after_ms,
                })
            }
        }
    }

    async fn read_lease(&self) -> Result<Option<LeaseRecord>> {
        read_lease(self.storage.as_ref(), &self.key).await
    }

    async fn write_lease(&self, lease: &LeaseRecord) -> Result<()> {
        self.storage.set(&self.key, serde_json::to_vec(lease)?).await
    }
}

/// Handle to a successfully acquired lease.
///
/// The guard stays safely callable after the underlying record changes
/// hands: it merely stops matching, and every operation accounts for that.
#[derive(Debug)]
pub struct LeaseGuard {
    key: String,
    token: Uuid,
    storage: Arc<dyn SharedStorage>,
    clock: Arc<dyn Clock>,
}

impl LeaseGuard {
    /// The token this guard's lease was written with
    pub fn token(&self) -> Uuid {
        self.token
    }

    /// Release the lease if this process still holds it.
    ///
    /// Never deletes a record owned by someone else. Idempotent: a second
    /// call, or a call after the lease vanished or was overwritten, is a
    /// no-op.
    pub async fn release(&self) -> Result<()> {
        if let Some(lease) = self.read_lease().await? {
            if lease.id == self.token {
                self.storage.delete(&self.key).await?;
            }
        }
        Ok(())
    }

    /// True once the stored record is absent or carries a foreign token,
    /// meaning some other process has taken over since acquisition
    pub async fn has_timed_out(&self) -> Result<bool> {
        let still_held = matches!(
            self.read_lease().await?,
            Some(lease) if lease.id == self.token
        );
        Ok(!still_held)
    }

    /// Time remaining until the current occupant's lease expires, telling a
    /// caller that lost the lock when re-acquisition may succeed.
    /// 0 when no record is present.
    pub async fn retry_delay_after_timeout(&self) -> Result<u64> {
        match self.read_lease().await? {
            Some(lease) => Ok(lease.expires_at.saturating_sub(self.clock.now())),
            None => Ok(0),
        }
    }

    async fn read_lease(&self) -> Result<Option<LeaseRecord>> {
        read_lease(self.storage.as_ref(), &self.key).await
    }
}

async fn read_lease(storage: &dyn SharedStorage, key: &str) -> Result<Option<LeaseRecord>> {
    match storage.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::storage::MemoryStorage;

    const TIMEOUT: u64 = 5000;
    const VERIFY_DELAY: u64 = 200;

    fn lock(
        storage: &MemoryStorage,
        clock: &Arc<VirtualClock>,
    ) -> LeaseLock {
        LeaseLock::new(
            "resource",
            Arc::new(storage.share()),
            Arc::clone(clock) as Arc<dyn Clock>,
            LockConfig::new(TIMEOUT),
        )
        .unwrap()
    }

    #[test]
    fn test_name_and_timeout_are_required() {
        let storage = MemoryStorage::new();
        let clock: Arc<VirtualClock> = Arc::new(VirtualClock::new());

        let error = LeaseLock::new(
            "",
            Arc::new(storage.share()),
            Arc::clone(&clock) as Arc<dyn Clock>,
            LockConfig::new(TIMEOUT),
        )
        .unwrap_err();
        assert!(matches!(error, Error::Config(_)));

        let error = LeaseLock::new(
            "resource",
            Arc::new(storage.share()),
            clock as Arc<dyn Clock>,
            LockConfig::new(0),
        )
        .unwrap_err();
        assert!(matches!(error, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_two_contenders_one_wins() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(VirtualClock::new());

        let lock1 = lock(&storage, &clock);
        let lock2 = lock(&storage, &clock);

        let first = tokio::spawn(async move { lock1.acquire().await });
        clock.wait_for_sleepers(1).await;

        // The second contender sees the first one's valid lease
        match lock2.acquire().await.unwrap() {
            AcquireOutcome::Contended {
                reason,
                retry_after_ms,
            } => {
                assert_eq!(reason, ContentionReason::HeldByOther);
                assert_eq!(retry_after_ms, TIMEOUT);
            }
            AcquireOutcome::Acquired(_) => panic!("second contender must not acquire"),
        }

        clock.advance(VERIFY_DELAY);
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));
    }

    #[tokio::test]
    async fn test_overwrite_during_propagation_window() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(VirtualClock::new());

        let lock1 = lock(&storage, &clock);
        let lock2 = lock(&storage, &clock);
        let eraser = storage.share();

        let first = tokio::spawn(async move { lock1.acquire().await });
        clock.wait_for_sleepers(1).await;

        // Simulate the store not having propagated the first write: the
        // second contender finds no record and writes its own
        eraser.delete("Lock.resource").await.unwrap();

        let second = tokio::spawn(async move { lock2.acquire().await });
        clock.wait_for_sleepers(2).await;
        clock.advance(VERIFY_DELAY);

        match first.await.unwrap().unwrap() {
            AcquireOutcome::Contended {
                reason,
                retry_after_ms,
            } => {
                assert_eq!(reason, ContentionReason::OverwrittenByOther);
                assert_eq!(retry_after_ms, TIMEOUT - VERIFY_DELAY);
            }
            AcquireOutcome::Acquired(_) => panic!("first contender lost the race"),
        }

        let outcome = second.await.unwrap().unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));
    }

    #[tokio::test]
    async fn test_reacquire_after_expiry() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(VirtualClock::new());

        let lock1 = lock(&storage, &clock);
        let first = tokio::spawn(async move { lock1.acquire().await });
        clock.wait_for_sleepers(1).await;
        clock.advance(VERIFY_DELAY);

        let guard = match first.await.unwrap().unwrap() {
            AcquireOutcome::Acquired(guard) => guard,
            AcquireOutcome::Contended { .. } => panic!("uncontended acquire failed"),
        };
        assert!(!guard.has_timed_out().await.unwrap());

        // Let the lease lapse without releasing it
        clock.advance(TIMEOUT);

        let lock2 = lock(&storage, &clock);
        let second = tokio::spawn(async move { lock2.acquire().await });
        clock.wait_for_sleepers(1).await;
        clock.advance(VERIFY_DELAY);

        let outcome = second.await.unwrap().unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));

        // The original holder can see it was overtaken
        assert!(guard.has_timed_out().await.unwrap());
        let delay = guard.retry_delay_after_timeout().await.unwrap();
        assert_eq!(delay, TIMEOUT - VERIFY_DELAY);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(VirtualClock::new());

        let lock1 = lock(&storage, &clock);
        let first = tokio::spawn(async move { lock1.acquire().await });
        clock.wait_for_sleepers(1).await;
        clock.advance(VERIFY_DELAY);

        let guard = match first.await.unwrap().unwrap() {
            AcquireOutcome::Acquired(guard) => guard,
            AcquireOutcome::Contended { .. } => panic!("uncontended acquire failed"),
        };

        guard.release().await.unwrap();
        let reader = storage.share();
        assert_eq!(reader.get("Lock.resource").await.unwrap(), None);

        // Second release is a no-op
        guard.release().await.unwrap();

        // After release the lease is gone: no occupant, no delay
        assert!(guard.has_timed_out().await.unwrap());
        assert_eq!(guard.retry_delay_after_timeout().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_release_never_deletes_a_foreign_lease() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(VirtualClock::new());

        let lock1 = lock(&storage, &clock);
        let first = tokio::spawn(async move { lock1.acquire().await });
        clock.wait_for_sleepers(1).await;
        clock.advance(VERIFY_DELAY);

        let guard = match first.await.unwrap().unwrap() {
            AcquireOutcome::Acquired(guard) => guard,
            AcquireOutcome::Contended { .. } => panic!("uncontended acquire failed"),
        };

        // Another process takes the key over
        let foreign = LeaseRecord {
            id: Uuid::new_v4(),
            created_at: clock.now(),
            expires_at: clock.now() + TIMEOUT,
        };
        let writer = storage.share();
        writer
            .set("Lock.resource", serde_json::to_vec(&foreign).unwrap())
            .await
            .unwrap();

        guard.release().await.unwrap();

        // The foreign lease must survive our release
        let stored = writer.get("Lock.resource").await.unwrap().unwrap();
        let stored: LeaseRecord = serde_json::from_slice(&stored).unwrap();
        assert_eq!(stored.id, foreign.id);
        assert!(guard.has_timed_out().await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_at_exact_boundary_is_reacquirable() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(VirtualClock::new());

        // Plant a lease expiring exactly now: strict `>` means it is expired
        let planted = LeaseRecord {
            id: Uuid::new_v4(),
            created_at: 0,
            expires_at: clock.now(),
        };
        let writer = storage.share();
        writer
            .set("Lock.resource", serde_json::to_vec(&planted).unwrap())
            .await
            .unwrap();

        let lock1 = lock(&storage, &clock);
        let attempt = tokio::spawn(async move { lock1.acquire().await });
        clock.wait_for_sleepers(1).await;
        clock.advance(VERIFY_DELAY);

        let outcome = attempt.await.unwrap().unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));
    }
}
