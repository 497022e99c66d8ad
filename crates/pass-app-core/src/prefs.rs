// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker preferences, stored through the config service.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Config key of [`WorkerPrefs`].
pub const WORKER_PREFS_KEY: &str = "pass_worker";

/// Saved preferences for the worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPrefs {
    /// Unix socket the hub listens on; platform default when `None`.
    pub socket_path: Option<String>,
    /// Encrypted cache file; platform data dir when `None`.
    pub cache_path: Option<String>,
    /// Event polling cadence.
    pub polling: PollingPrefs,
    /// Cap on messages kept for replicas that have not woken up yet. Zero,
    /// the default, keeps every message; a cap drops the oldest first.
    pub buffer_limit: usize,
}

impl Default for WorkerPrefs {
    fn default() -> Self {
        Self {
            socket_path: None,
            cache_path: None,
            polling: PollingPrefs::default(),
            buffer_limit: 0,
        }
    }
}

/// Event channel polling intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingPrefs {
    /// User-scope feed interval, in milliseconds.
    pub user_interval_ms: u64,
    /// Share-scope feed interval, in milliseconds.
    pub share_interval_ms: u64,
}

impl Default for PollingPrefs {
    fn default() -> Self {
        Self {
            user_interval_ms: 30_000,
            share_interval_ms: 30_000,
        }
    }
}

/// Shortest polling interval; hand-edited configs may carry zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl PollingPrefs {
    /// User-scope interval, never below [`MIN_POLL_INTERVAL`].
    pub fn user_interval(&self) -> Duration {
        Duration::from_millis(self.user_interval_ms).max(MIN_POLL_INTERVAL)
    }

    /// Share-scope interval, never below [`MIN_POLL_INTERVAL`].
    pub fn share_interval(&self) -> Duration {
        Duration::from_millis(self.share_interval_ms).max(MIN_POLL_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_intervals_are_clamped() {
        let polling = PollingPrefs {
            user_interval_ms: 0,
            share_interval_ms: 0,
        };
        assert_eq!(polling.user_interval(), MIN_POLL_INTERVAL);
        assert_eq!(polling.share_interval(), MIN_POLL_INTERVAL);
        assert_eq!(
            PollingPrefs::default().share_interval(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn default_buffer_keeps_every_message() {
        assert_eq!(WorkerPrefs::default().buffer_limit, 0);
    }
}
