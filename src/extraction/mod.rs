//! Turning raw notice content into structured records.
//!
//! [`FallbackExtractor`] is what runs in production: it asks the language model
//! when a key is configured and falls back to [`PatternExtractor`] otherwise.

mod clean;
mod fallback;
mod llm;
mod patterns;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ExtractionRecord;

pub use clean::{clean_notice_text, MAX_CLEANED_CHARS};
pub use fallback::FallbackExtractor;
pub use llm::{LlmConfig, LlmExtractor};
pub use patterns::PatternExtractor;

/// Estimated price of one language-model call, in USD.
pub const COST_PER_LLM_CALL: f64 = 0.002;

/// Errors from extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Notice body is empty")]
    EmptyContent,

    #[error("No usable fields found")]
    NothingFound,

    #[error("Language model is not configured")]
    Disabled,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub total: u64,
    pub llm_calls: u64,
    pub llm_successes: u64,
    pub pattern_fallbacks: u64,
}

impl ExtractionStats {
    /// Share of extractions answered by the language model, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.llm_successes as f64 / self.total as f64 * 100.0
    }
}

/// Thread-safe counters behind [`ExtractionStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    total: AtomicU64,
    llm_calls: AtomicU64,
    llm_successes: AtomicU64,
    pattern_fallbacks: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_llm_call(&self) {
        self.llm_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_llm_success(&self) {
        self.llm_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.pattern_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ExtractionStats {
        ExtractionStats {
            total: self.total.load(Ordering::Relaxed),
            llm_calls: self.llm_calls.load(Ordering::Relaxed),
            llm_successes: self.llm_successes.load(Ordering::Relaxed),
            pattern_fallbacks: self.pattern_fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Something that can read a notice.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Pull fields out of `content`. `source_url` becomes the record's link.
    async fn extract(
        &self,
        content: &str,
        source_url: &str,
    ) -> Result<ExtractionRecord, ExtractionError>;

    fn stats(&self) -> ExtractionStats {
        ExtractionStats::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_handles_zero() {
        assert_eq!(ExtractionStats::default().success_rate(), 0.0);
        let stats = ExtractionStats {
            total: 4,
            llm_calls: 4,
            llm_successes: 3,
            pattern_fallbacks: 1,
        };
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn counters_snapshot() {
        let counters = StatsCounters::default();
        counters.record_total();
        counters.record_llm_call();
        counters.record_fallback();
        let stats = counters.snapshot();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.llm_calls, 1);
        assert_eq!(stats.llm_successes, 0);
        assert_eq!(stats.pattern_fallbacks, 1);
    }
}
