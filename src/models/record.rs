//! Extracted notice record.

use serde::{Deserialize, Serialize};

/// Output columns, in file order.
pub const CSV_HEADER: [&str; 10] = [
    "first_name",
    "last_name",
    "street",
    "city",
    "state",
    "zip",
    "date_filed",
    "plaintiff",
    "link",
    "notice_id",
];

/// Structured fields pulled out of one notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub zip: String,
    #[serde(default)]
    pub date_filed: String,
    #[serde(default)]
    pub plaintiff: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub notice_id: String,
}

fn default_state() -> String {
    "MN".to_string()
}

impl Default for ExtractionRecord {
    fn default() -> Self {
        Self {
            first_name: String::new(),
            last_name: String::new(),
            street: String::new(),
            city: String::new(),
            state: default_state(),
            zip: String::new(),
            date_filed: String::new(),
            plaintiff: String::new(),
            link: String::new(),
            notice_id: String::new(),
        }
    }
}

impl ExtractionRecord {
    /// Empty record pointing at its source.
    pub fn for_source(link: &str) -> Self {
        Self {
            link: link.to_string(),
            ..Default::default()
        }
    }

    /// A record is useful once it names someone.
    pub fn has_name(&self) -> bool {
        !self.first_name.trim().is_empty() || !self.last_name.trim().is_empty()
    }

    /// Field values in [`CSV_HEADER`] order.
    pub fn fields(&self) -> [&str; 10] {
        [
            &self.first_name,
            &self.last_name,
            &self.street,
            &self.city,
            &self.state,
            &self.zip,
            &self.date_filed,
            &self.plaintiff,
            &self.link,
            &self.notice_id,
        ]
    }
}
