//! Data models for search runs.

mod record;
mod run;

use chrono::{Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::browser::ElementHandle;

pub use record::{ExtractionRecord, CSV_HEADER};
pub use run::{AbortHandle, Counter, RunOutcome, RunReport, RunState, RunStats};

/// How the portal should combine the search keywords.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMode {
    /// Match notices containing any of the words.
    #[default]
    Any,
    /// Match notices containing all of the words.
    All,
    /// Match the keywords as one exact phrase.
    Exact,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::All => "all",
            Self::Exact => "exact",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "any" => Some(Self::Any),
            "all" => Some(Self::All),
            "exact" | "phrase" => Some(Self::Exact),
            _ => None,
        }
    }
}

impl std::fmt::Display for MatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search parameters for one run. Never mutated once the run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    pub keywords: Vec<String>,
    pub match_mode: MatchMode,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SearchCriteria {
    /// Criteria covering a single day.
    pub fn for_day(keywords: Vec<String>, match_mode: MatchMode, day: NaiveDate) -> Self {
        Self {
            keywords,
            match_mode,
            start: day,
            end: day,
        }
    }

    /// Criteria for the day before today, which is what the daily run targets.
    pub fn for_previous_day(keywords: Vec<String>, match_mode: MatchMode) -> Self {
        let yesterday = Local::now().date_naive() - Duration::days(1);
        Self::for_day(keywords, match_mode, yesterday)
    }

    /// Keywords as typed into the search box.
    pub fn query(&self) -> String {
        self.keywords.join(" ")
    }

    /// Dates in the portal's `MM/DD/YYYY` input format.
    pub fn form_dates(&self) -> (String, String) {
        (
            self.start.format("%m/%d/%Y").to_string(),
            self.end.format("%m/%d/%Y").to_string(),
        )
    }

    /// Identifier used to name this run's output file.
    pub fn run_identifier(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

/// One actionable result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReference {
    /// Stable notice identifier; uniqueness is by this field alone.
    pub id: String,
    /// Absolute detail URL when it could be derived from the row control.
    pub detail_url: Option<String>,
    /// Control that opens the detail view. Valid until the next navigation.
    pub control: ElementHandle,
    /// 1-based page the reference was enumerated on.
    pub page: usize,
    /// 0-based position on that page.
    pub position: usize,
}

/// One page of the result grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultPage {
    /// 1-based page index.
    pub index: usize,
    pub total_pages: Option<usize>,
    pub items: Vec<ItemReference>,
}

impl ResultPage {
    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.id.clone()).collect()
    }

    pub fn is_last(&self) -> bool {
        matches!(self.total_pages, Some(total) if self.index >= total)
    }
}
