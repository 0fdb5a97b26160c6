use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    ExtractionError, ExtractionStats, Extractor, LlmConfig, LlmExtractor, PatternExtractor,
    StatsCounters,
};
use crate::models::ExtractionRecord;

/// Language model first, patterns when it is unavailable, fails, or finds no name.
pub struct FallbackExtractor {
    llm: Option<LlmExtractor>,
    patterns: PatternExtractor,
    stats: StatsCounters,
}

impl FallbackExtractor {
    pub fn new(config: LlmConfig) -> Result<Self, ExtractionError> {
        let llm = if config.is_configured() {
            Some(LlmExtractor::new(config)?)
        } else {
            debug!("No language model key configured, using patterns only");
            None
        };
        Ok(Self {
            llm,
            patterns: PatternExtractor::new(),
            stats: StatsCounters::default(),
        })
    }

    /// Patterns only.
    pub fn patterns_only() -> Self {
        Self {
            llm: None,
            patterns: PatternExtractor::new(),
            stats: StatsCounters::default(),
        }
    }

    pub fn uses_llm(&self) -> bool {
        self.llm.is_some()
    }
}

#[async_trait]
impl Extractor for FallbackExtractor {
    async fn extract(
        &self,
        content: &str,
        source_url: &str,
    ) -> Result<ExtractionRecord, ExtractionError> {
        if content.trim().is_empty() {
            return Err(ExtractionError::EmptyContent);
        }
        self.stats.record_total();

        if let Some(llm) = &self.llm {
            self.stats.record_llm_call();
            match llm.extract(content, source_url).await {
                Ok(record) => {
                    self.stats.record_llm_success();
                    return Ok(record);
                }
                Err(e) => warn!("Language model extraction failed ({}), using patterns", e),
            }
        }

        self.stats.record_fallback();
        Ok(self.patterns.parse(content, source_url))
    }

    fn stats(&self) -> ExtractionStats {
        self.stats.snapshot()
    }
}
