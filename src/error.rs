//! Error types shared by the browser engine.

use std::time::Duration;

use thiserror::Error;

use crate::storage::PersistError;

/// Failures reported by a [`BrowserDriver`](crate::browser::BrowserDriver).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Element handle {0} is stale or unknown")]
    StaleHandle(u64),

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Browser unavailable: {0}")]
    Unavailable(String),
}

/// Run-level failure taxonomy.
///
/// Only [`ScrapeError::SearchSubmission`], [`ScrapeError::SessionFatal`] and
/// [`ScrapeError::Persist`] leave the per-item loop; the others are absorbed and
/// counted against the item that produced them.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Search submission failed: {0}")]
    SearchSubmission(String),

    #[error("Navigation anomaly: {0}")]
    TransientNavigation(String),

    #[error("Challenge unsolvable: {0}")]
    ChallengeUnsolvable(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("Session lost and could not be restored: {0}")]
    SessionFatal(String),

    #[error("Output error: {0}")]
    Persist(#[from] PersistError),
}

impl ScrapeError {
    /// Whether this error ends the run rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScrapeError::SearchSubmission(_) | ScrapeError::SessionFatal(_) | ScrapeError::Persist(_)
        )
    }
}

impl From<DriverError> for ScrapeError {
    fn from(err: DriverError) -> Self {
        ScrapeError::TransientNavigation(err.to_string())
    }
}
