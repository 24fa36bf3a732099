//! Wolfpack Configuration
//!
//! This module provides configuration structures for the coordination
//! primitives. Hosts can embed them in their own configuration or load a
//! standalone TOML file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main wolfpack configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WolfpackConfig {
    /// Active-process coordination configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Per-resource lock configuration, keyed by lock name
    #[serde(default)]
    pub locks: HashMap<String, LockConfig>,
}

/// Lease lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease duration in milliseconds. Required and must be positive.
    pub timeout_ms: u64,

    /// Delay between writing a lease and re-reading it to verify the
    /// acquisition, in milliseconds
    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,
}

/// Active-process coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Process identity advertised in announcements.
    /// A random UUID is generated when not set.
    #[serde(default)]
    pub id: Option<String>,

    /// Discovery poll interval in milliseconds.
    ///
    /// Some hosts coalesce scheduled callbacks for background processes to a
    /// one-second floor, so polling finer than that buys nothing.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

// Default value functions
fn default_verify_delay_ms() -> u64 {
    200
}

fn default_refresh_interval_ms() -> u64 {
    1000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            id: None,
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

impl LockConfig {
    /// Create a lock configuration with the given lease duration and the
    /// default verification delay
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            verify_delay_ms: default_verify_delay_ms(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.timeout_ms == 0 {
            return Err(crate::Error::Config(
                "lock timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Get the lease duration as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CoordinatorConfig {
    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.refresh_interval_ms == 0 {
            return Err(crate::Error::Config(
                "coordinator refresh_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// How long a discovery request waits before giving up.
    ///
    /// 1.5 poll intervals: enough headroom for exactly one scheduled retry
    /// even when the host coalesces background callbacks.
    pub fn request_timeout_ms(&self) -> u64 {
        self.refresh_interval_ms * 3 / 2
    }

    /// Get the poll interval as a Duration
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl WolfpackConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WolfpackConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfpackConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        self.coordinator.validate()?;

        for (name, lock) in &self.locks {
            if name.is_empty() {
                return Err(crate::Error::Config("lock name cannot be empty".into()));
            }
            if lock.timeout_ms == 0 {
                return Err(crate::Error::Config(format!(
                    "locks.{}: timeout_ms must be positive",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Get the configuration for a named lock
    pub fn lock(&self, name: &str) -> Option<&LockConfig> {
        self.locks.get(name)
    }
}
