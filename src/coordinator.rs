//! Active-Process Coordinator
//!
//! Lets any process in the set discover the identity of the currently
//! active one, using the shared store as a broadcast medium. Every process
//! runs an identical instance: a requester writes a request record, and the
//! process whose status watcher says it is active answers by writing its
//! identity. Request and announcement records are superseded by later
//! writes and never deleted.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::{Clock, Millis};
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::status::StatusWatcher;
use crate::storage::SharedStorage;

/// Storage key a requester writes to ask which process is active.
///
/// Key names are part of the cross-process contract: every implementation
/// sharing the store must use the same strings.
const GET_ACTIVE_KEY: &str = "Tab.GetActive";

/// Storage key the active process answers on
const ACTIVE_KEY: &str = "Tab.Active";

/// Discovery request record. Superseded by the next request; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveRequest {
    requested_at: Millis,
}

/// Announcement written by the active process in response to a request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveAnnouncement {
    id: String,
    active_at: Millis,
}

/// Discovers which process in the set is currently active.
///
/// While started, the coordinator also answers other processes' requests
/// whenever its own status watcher reports this process as the active one.
#[derive(Debug)]
pub struct Coordinator {
    id: String,
    storage: Arc<dyn SharedStorage>,
    clock: Arc<dyn Clock>,
    watcher: Arc<StatusWatcher>,
    config: CoordinatorConfig,
    started: Mutex<bool>,
    responder: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Create a coordinator over the shared store.
    ///
    /// The process identity comes from the configuration, or is generated
    /// when not set.
    pub fn new(
        storage: Arc<dyn SharedStorage>,
        clock: Arc<dyn Clock>,
        watcher: Arc<StatusWatcher>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let id = config
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Self {
            id,
            storage,
            clock,
            watcher,
            config,
            started: Mutex::new(false),
            responder: Mutex::new(None),
        })
    }

    /// This process's identity
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this process is currently the active one
    pub fn is_active(&self) -> bool {
        self.watcher.is_active()
    }

    /// Start the coordinator and its status watcher, and begin answering
    /// discovery requests. Starting twice is a usage error.
    pub fn start(&self) -> Result<()> {
        let mut started = self.started.lock().unwrap();
        if *started {
            return Err(Error::AlreadyStarted("Coordinator"));
        }

        self.watcher.start()?;

        let mut events = self.storage.watch();
        let storage = Arc::clone(&self.storage);
        let clock = Arc::clone(&self.clock);
        let watcher = Arc::clone(&self.watcher);
        let id = self.id.clone();

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(key) if key == GET_ACTIVE_KEY => {
                        if !watcher.is_active() {
                            continue;
                        }
                        let announcement = ActiveAnnouncement {
                            id: id.clone(),
                            active_at: clock.now(),
                        };
                        match serde_json::to_vec(&announcement) {
                            Ok(bytes) => {
                                if let Err(error) = storage.set(ACTIVE_KEY, bytes).await {
                                    tracing::warn!(%error, "failed to answer a discovery request");
                                }
                            }
                            Err(error) => {
                                tracing::warn!(%error, "failed to encode an announcement");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Requests are re-issued by their pollers; a missed
                        // event only delays the answer
                        tracing::trace!(skipped, "storage change events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        *self.responder.lock().unwrap() = Some(handle);
        *started = true;
        Ok(())
    }

    /// Stop the coordinator and its status watcher. Stopping a coordinator
    /// that isn't started is a usage error.
    pub fn stop(&self) -> Result<()> {
        let mut started = self.started.lock().unwrap();
        if !*started {
            return Err(Error::NotStarted("Coordinator"));
        }
        *started = false;

        self.watcher.stop()?;
        if let Some(handle) = self.responder.lock().unwrap().take() {
            handle.abort();
        }
        Ok(())
    }

    /// Identity of the currently active process.
    ///
    /// Returns immediately when this process is itself active. Otherwise
    /// broadcasts a request and polls for an answer, giving up after
    /// 1.5 poll intervals. `None` means no process answered in time, which is a
    /// legitimate steady state, not an error.
    pub async fn active_id(&self) -> Result<Option<String>> {
        tracing::debug!(id = %self.id, "looking up the active process");

        if self.watcher.is_active() {
            return Ok(Some(self.id.clone()));
        }

        let requested_at = self.clock.now();
        let request = ActiveRequest { requested_at };
        self.storage
            .set(GET_ACTIVE_KEY, serde_json::to_vec(&request)?)
            .await?;

        let timeout_ms = self.config.request_timeout_ms();
        while self.clock.now() - requested_at < timeout_ms {
            self.clock.sleep(self.config.refresh_interval_ms).await;

            if let Some(bytes) = self.storage.get(ACTIVE_KEY).await? {
                let announcement: ActiveAnnouncement = serde_json::from_slice(&bytes)?;
                // An announcement older than our request answers a stale
                // question from a previous round
                if announcement.active_at >= requested_at {
                    tracing::debug!(active = %announcement.id, "active process answered");
                    return Ok(Some(announcement.id));
                }
            }
        }

        tracing::debug!("no active process answered");
        Ok(None)
    }
}
