//! Randomized pacing between detail views.
//!
//! Draws a uniform delay before every item and a longer pause every N items so the
//! request rhythm never settles into a fixed interval.

mod config;

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

pub use config::{PacingConfig, PacingStats};

/// Issues pacing delays. Holds no state beyond counters of what it issued.
#[derive(Debug)]
pub struct RateLimiter {
    config: PacingConfig,
    stats: PacingStats,
}

impl RateLimiter {
    /// Create a new rate limiter with default config.
    pub fn new() -> Self {
        Self::with_config(PacingConfig::default())
    }

    /// Create a new rate limiter with custom config.
    pub fn with_config(config: PacingConfig) -> Self {
        Self {
            config,
            stats: PacingStats::default(),
        }
    }

    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Delay to wait before the next item, uniform in `[min, max]`.
    pub fn delay_before_item(&mut self) -> Duration {
        let delay = uniform(self.config.min_delay(), self.config.max_delay());
        self.stats.delays_issued += 1;
        self.stats.total_paced += delay;
        delay
    }

    /// Longer pause owed after `item_count` items, if this count is a multiple of the interval.
    pub fn maybe_long_pause(&mut self, item_count: u64) -> Option<Duration> {
        let every = self.config.long_pause_every;
        if every == 0 || item_count == 0 || item_count % every != 0 {
            return None;
        }
        let pause = uniform(
            Duration::from_millis(self.config.long_pause_min_ms),
            Duration::from_millis(self.config.long_pause_max_ms.max(self.config.long_pause_min_ms)),
        );
        self.stats.long_pauses += 1;
        self.stats.total_paced += pause;
        Some(pause)
    }

    /// Sleep for the per-item delay plus any long pause owed at `item_count`.
    pub async fn pace(&mut self, item_count: u64) {
        let delay = self.delay_before_item();
        if !delay.is_zero() {
            debug!("Pacing delay: {:.1}s", delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }
        if let Some(pause) = self.maybe_long_pause(item_count) {
            info!(
                "Taking a longer break after {} items: {:.1}s",
                item_count,
                pause.as_secs_f64()
            );
            tokio::time::sleep(pause).await;
        }
    }

    pub fn stats(&self) -> PacingStats {
        self.stats
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn uniform(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_within_bounds_and_vary() {
        let mut limiter = RateLimiter::new();
        let draws: Vec<Duration> = (0..1000).map(|_| limiter.delay_before_item()).collect();

        assert!(draws
            .iter()
            .all(|d| *d >= Duration::from_secs(3) && *d <= Duration::from_secs(8)));
        assert!(draws.iter().any(|d| *d != draws[0]));
        assert_eq!(limiter.stats().delays_issued, 1000);
    }

    #[test]
    fn long_pause_every_tenth_item() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.maybe_long_pause(9).is_none());
        let pause = limiter.maybe_long_pause(10).unwrap();
        assert!(pause >= Duration::from_secs(5) && pause <= Duration::from_secs(10));
        assert!(limiter.maybe_long_pause(0).is_none());
        assert!(limiter.maybe_long_pause(20).is_some());
        assert_eq!(limiter.stats().long_pauses, 2);
    }

    #[test]
    fn disabled_pacing_is_zero() {
        let mut limiter = RateLimiter::with_config(PacingConfig::disabled());
        assert_eq!(limiter.delay_before_item(), Duration::ZERO);
        assert!(limiter.maybe_long_pause(10).is_none());
    }

    #[tokio::test]
    async fn pace_accumulates_total() {
        let mut limiter = RateLimiter::with_config(PacingConfig {
            min_delay_ms: 1,
            max_delay_ms: 2,
            long_pause_every: 1,
            long_pause_min_ms: 1,
            long_pause_max_ms: 1,
        });
        limiter.pace(1).await;
        let stats = limiter.stats();
        assert_eq!(stats.delays_issued, 1);
        assert_eq!(stats.long_pauses, 1);
        assert!(stats.total_paced >= Duration::from_millis(2));
    }
}
