//! Clock Abstraction
//!
//! Injectable time source for the coordination protocols. Every wait the
//! lock and the coordinator perform goes through this trait, so tests drive
//! a virtual timeline instead of waiting on wall-clock time.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

/// Millisecond timestamp produced by a [`Clock`]
pub type Millis = u64;

/// Time source used by the coordination protocols
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds
    fn now(&self) -> Millis;

    /// Suspend the calling task for `delay_ms` milliseconds
    async fn sleep(&self, delay_ms: u64);
}

/// Wall-clock implementation backed by the tokio timer
#[derive(Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Millis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before Unix epoch")
            .as_millis() as u64
    }

    async fn sleep(&self, delay_ms: u64) {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

/// Deterministic clock for tests and simulations.
///
/// Sleeps registered on this clock never complete on their own: time moves
/// only when a driver calls [`advance`](VirtualClock::advance) or
/// [`advance_to_next`](VirtualClock::advance_to_next).
#[derive(Debug)]
pub struct VirtualClock {
    inner: Mutex<VirtualClockInner>,
}

#[derive(Debug)]
struct VirtualClockInner {
    now: Millis,
    sleepers: Vec<Sleeper>,
}

#[derive(Debug)]
struct Sleeper {
    deadline: Millis,
    waker: oneshot::Sender<()>,
}

impl VirtualClock {
    /// Create a virtual clock starting at time zero
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a virtual clock starting at the given timestamp
    pub fn starting_at(now: Millis) -> Self {
        Self {
            inner: Mutex::new(VirtualClockInner {
                now,
                sleepers: Vec::new(),
            }),
        }
    }

    /// Number of tasks currently parked in `sleep`
    pub fn sleeper_count(&self) -> usize {
        self.inner.lock().unwrap().sleepers.len()
    }

    /// Park until at least `count` tasks are sleeping on this clock.
    ///
    /// Lets a test driver sequence itself against tasks it has spawned:
    /// once they are parked, advancing the clock wakes them deterministically.
    pub async fn wait_for_sleepers(&self, count: usize) {
        while self.sleeper_count() < count {
            tokio::task::yield_now().await;
        }
    }

    /// Move the timeline forward by `delta_ms`, releasing sleepers in
    /// deadline order as their deadlines pass
    pub fn advance(&self, delta_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        let target = inner.now + delta_ms;

        loop {
            let due = inner
                .sleepers
                .iter()
                .enumerate()
                .filter(|(_, sleeper)| sleeper.deadline <= target)
                .min_by_key(|(_, sleeper)| sleeper.deadline)
                .map(|(index, _)| index);

            match due {
                Some(index) => {
                    let sleeper = inner.sleepers.remove(index);
                    inner.now = inner.now.max(sleeper.deadline);
                    // The receiver may be gone if the sleeping task was dropped
                    let _ = sleeper.waker.send(());
                }
                None => break,
            }
        }

        inner.now = target;
    }

    /// Jump to the earliest pending deadline, releasing that sleeper.
    /// Returns the new time, or `None` when nothing is sleeping.
    pub fn advance_to_next(&self) -> Option<Millis> {
        let delta = {
            let inner = self.inner.lock().unwrap();
            let deadline = inner
                .sleepers
                .iter()
                .map(|sleeper| sleeper.deadline)
                .min()?;
            deadline - inner.now
        };
        self.advance(delta);
        Some(self.now())
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for VirtualClock {
    fn now(&self) -> Millis {
        self.inner.lock().unwrap().now
    }

    async fn sleep(&self, delay_ms: u64) {
        let receiver = {
            let mut inner = self.inner.lock().unwrap();
            let deadline = inner.now + delay_ms;
            let (waker, receiver) = oneshot::channel();
            inner.sleepers.push(Sleeper { deadline, waker });
            receiver
        };
        // The sender is dropped without firing only if the clock itself is
        // dropped; resume in that case too.
        let _ = receiver.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_advance_releases_due_sleepers() {
        let clock = Arc::new(VirtualClock::new());

        let sleeper = {
            let clock = Arc::clone(&clock);
            tokio::spawn(async move { clock.sleep(100).await })
        };

        clock.wait_for_sleepers(1).await;
        clock.advance(100);
        sleeper.await.unwrap();

        assert_eq!(clock.now(), 100);
        assert_eq!(clock.sleeper_count(), 0);
    }

    #[tokio::test]
    async fn test_sleep_does_not_complete_early() {
        let clock = Arc::new(VirtualClock::new());

        let sleeper = {
            let clock = Arc::clone(&clock);
            tokio::spawn(async move { clock.sleep(100).await })
        };

        clock.wait_for_sleepers(1).await;
        clock.advance(50);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sleeper.is_finished());
        assert_eq!(clock.now(), 50);

        clock.advance(50);
        sleeper.await.unwrap();
    }

    #[tokio::test]
    async fn test_advance_to_next_jumps_to_earliest_deadline() {
        let clock = Arc::new(VirtualClock::starting_at(1000));

        let near = {
            let clock = Arc::clone(&clock);
            tokio::spawn(async move { clock.sleep(50).await })
        };
        let far = {
            let clock = Arc::clone(&clock);
            tokio::spawn(async move { clock.sleep(300).await })
        };

        clock.wait_for_sleepers(2).await;
        assert_eq!(clock.advance_to_next(), Some(1050));
        near.await.unwrap();
        assert!(!far.is_finished());

        assert_eq!(clock.advance_to_next(), Some(1300));
        far.await.unwrap();
        assert_eq!(clock.advance_to_next(), None);
    }

    #[tokio::test]
    async fn test_system_clock_sleeps() {
        let clock = SystemClock::new();
        let before = clock.now();
        clock.sleep(10).await;
        assert!(clock.now() >= before);
    }
}
