//! Regular-expression extraction for notices the language model cannot read.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{clean_notice_text, ExtractionError, ExtractionStats, Extractor, StatsCounters};
use crate::models::ExtractionRecord;

static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:MORTGAGOR|DEBTOR)(?:\(S\))?:\s*([A-Z][a-zA-Z'\-\.]+)\s+([A-Z][a-zA-Z'\-\.]+)")
        .unwrap()
});

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+\s+[A-Za-z0-9\s\#\.\-]+?),\s*([A-Za-z\s]+?),\s*(?:MN|Minnesota)\s*(\d{5}(?:-\d{4})?)",
    )
    .unwrap()
});

/// Sale date phrasings, most specific first.
static SALE_DATE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)DATE\s+(?:AND\s+TIME\s+)?OF\s+SALE:?\s*([A-Za-z]+ \d{1,2}, \d{4})").unwrap(),
        Regex::new(r"(?i)DATE\s+(?:AND\s+TIME\s+)?OF\s+SALE:?\s*(\d{1,2}[/-]\d{1,2}[/-]\d{4})")
            .unwrap(),
        Regex::new(r"(?i)DATE\s+(?:AND\s+TIME\s+)?OF\s+SALE:?\s*(\d{4}[/-]\d{1,2}[/-]\d{1,2})")
            .unwrap(),
    ]
});

static ANY_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,2}/\d{1,2}/\d{4})").unwrap());

static PLAINTIFF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:MORTGAGEE|CREDITOR|PLAINTIFF):\s*([^,\n<]+)").unwrap()
});

/// Pull the date of sale out of notice text, if it states one.
pub(crate) fn sale_date(text: &str) -> Option<String> {
    SALE_DATE
        .iter()
        .find_map(|re| re.captures(text))
        .map(|caps| caps[1].trim().to_string())
}

/// Extracts fields with fixed regular expressions. Never calls out.
#[derive(Debug, Default)]
pub struct PatternExtractor {
    stats: StatsCounters,
}

impl PatternExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill whatever fields the patterns find. Missing fields stay empty.
    pub fn parse(&self, content: &str, source_url: &str) -> ExtractionRecord {
        let text = if content.contains('<') {
            clean_notice_text(content)
        } else {
            content.to_string()
        };
        let mut record = ExtractionRecord::for_source(source_url);

        if let Some(caps) = NAME.captures(&text) {
            record.first_name = caps[1].trim().to_string();
            record.last_name = caps[2].trim().to_string();
        } else {
            debug!("No mortgagor name found");
        }

        if let Some(caps) = ADDRESS.captures(&text) {
            record.street = caps[1].trim().to_string();
            record.city = caps[2].trim().to_string();
            record.zip = caps[3].trim().to_string();
        } else {
            debug!("No property address found");
        }

        record.date_filed = sale_date(&text)
            .or_else(|| ANY_DATE.captures(&text).map(|caps| caps[1].to_string()))
            .unwrap_or_default();

        if let Some(caps) = PLAINTIFF.captures(&text) {
            record.plaintiff = caps[1].trim().to_string();
        }

        record
    }
}

#[async_trait]
impl Extractor for PatternExtractor {
    async fn extract(
        &self,
        content: &str,
        source_url: &str,
    ) -> Result<ExtractionRecord, ExtractionError> {
        if content.trim().is_empty() {
            return Err(ExtractionError::EmptyContent);
        }
        self.stats.record_total();
        self.stats.record_fallback();
        Ok(self.parse(content, source_url))
    }

    fn stats(&self) -> ExtractionStats {
        self.stats.snapshot()
    }
}
