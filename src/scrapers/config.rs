//! Engine timing and search configuration.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::MatchMode;

/// Bounded waits used throughout the browser engine. All values in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause after an interaction that triggers a partial reload.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Longest wait for a stability signal after an interaction.
    #[serde(default = "default_element_timeout_ms")]
    pub element_timeout_ms: u64,
    /// Longest wait for a results page to load or verify.
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,
    /// Challenge checkbox readiness: number of polls and spacing.
    #[serde(default = "default_checkbox_attempts")]
    pub checkbox_attempts: u32,
    #[serde(default = "default_checkbox_poll_ms")]
    pub checkbox_poll_ms: u64,
    /// Random wait after clicking the checkbox.
    #[serde(default = "default_challenge_settle_min_ms")]
    pub challenge_settle_min_ms: u64,
    #[serde(default = "default_challenge_settle_max_ms")]
    pub challenge_settle_max_ms: u64,
    /// Longest time the extractor may take per notice.
    #[serde(default = "default_extraction_timeout_ms")]
    pub extraction_timeout_ms: u64,
}

fn default_settle_ms() -> u64 {
    3000
}

fn default_element_timeout_ms() -> u64 {
    10_000
}

fn default_page_timeout_ms() -> u64 {
    15_000
}

fn default_checkbox_attempts() -> u32 {
    10
}

fn default_checkbox_poll_ms() -> u64 {
    1500
}

fn default_challenge_settle_min_ms() -> u64 {
    6780
}

fn default_challenge_settle_max_ms() -> u64 {
    15_100
}

fn default_extraction_timeout_ms() -> u64 {
    60_000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            element_timeout_ms: default_element_timeout_ms(),
            page_timeout_ms: default_page_timeout_ms(),
            checkbox_attempts: default_checkbox_attempts(),
            checkbox_poll_ms: default_checkbox_poll_ms(),
            challenge_settle_min_ms: default_challenge_settle_min_ms(),
            challenge_settle_max_ms: default_challenge_settle_max_ms(),
            extraction_timeout_ms: default_extraction_timeout_ms(),
        }
    }
}

impl TimingConfig {
    /// No waiting at all, for driving the engine against an in-memory site.
    pub fn immediate() -> Self {
        Self {
            settle_ms: 0,
            element_timeout_ms: 0,
            page_timeout_ms: 0,
            checkbox_attempts: 1,
            checkbox_poll_ms: 0,
            challenge_settle_min_ms: 0,
            challenge_settle_max_ms: 0,
            extraction_timeout_ms: 1000,
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    /// Total time the checkbox may take to become interactive.
    pub fn checkbox_timeout(&self) -> Duration {
        Duration::from_millis(self.checkbox_poll_ms * u64::from(self.checkbox_attempts))
    }

    pub fn challenge_settle(&self) -> Duration {
        let min = self.challenge_settle_min_ms.min(self.challenge_settle_max_ms);
        let max = self.challenge_settle_max_ms.max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }
}

/// What to search for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub match_mode: MatchMode,
    /// Requested rows per results page. Advisory; the portal may ignore it.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_keywords() -> Vec<String> {
    vec!["foreclosure".to_string(), "bankruptcy".to_string()]
}

fn default_per_page() -> u32 {
    50
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            match_mode: MatchMode::default(),
            per_page: default_per_page(),
        }
    }
}
