//! Pacing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Randomized pacing between items. Durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Lower bound of the per-item delay.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Upper bound of the per-item delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Take a longer pause every this many items (0 disables).
    #[serde(default = "default_long_pause_every")]
    pub long_pause_every: u64,
    #[serde(default = "default_long_pause_min_ms")]
    pub long_pause_min_ms: u64,
    #[serde(default = "default_long_pause_max_ms")]
    pub long_pause_max_ms: u64,
}

fn default_min_delay_ms() -> u64 {
    3000
}

fn default_max_delay_ms() -> u64 {
    8000
}

fn default_long_pause_every() -> u64 {
    10
}

fn default_long_pause_min_ms() -> u64 {
    5000
}

fn default_long_pause_max_ms() -> u64 {
    10_000
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            long_pause_every: default_long_pause_every(),
            long_pause_min_ms: default_long_pause_min_ms(),
            long_pause_max_ms: default_long_pause_max_ms(),
        }
    }
}

impl PacingConfig {
    /// No pacing.
    pub fn disabled() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 0,
            long_pause_every: 0,
            long_pause_min_ms: 0,
            long_pause_max_ms: 0,
        }
    }

    /// Short pacing used for the HTTP listing source.
    pub fn light() -> Self {
        Self {
            min_delay_ms: 500,
            max_delay_ms: 1500,
            long_pause_every: 0,
            long_pause_min_ms: 0,
            long_pause_max_ms: 0,
        }
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms))
    }
}

/// Snapshot of what the limiter has handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacingStats {
    pub delays_issued: u64,
    pub long_pauses: u64,
    pub total_paced: Duration,
}
