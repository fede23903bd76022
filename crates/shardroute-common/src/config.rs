//! Configuration types for ShardRoute
//!
//! This module defines configuration structures used across components.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Registry configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Periodic topology reload interval (milliseconds)
    pub reload_interval_ms: u64,
}

impl RegistryConfig {
    /// The periodic reload interval as a `Duration`
    #[must_use]
    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reload_interval_ms: 30_000,
        }
    }
}
