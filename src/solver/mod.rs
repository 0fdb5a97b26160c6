//! External challenge-solving service.

mod twocaptcha;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use twocaptcha::{SolverConfig, TwoCaptchaSolver};

/// Estimated price of one solve, in USD.
pub const COST_PER_SOLVE: f64 = 0.003;

/// Errors from the solving service.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Solver account has insufficient funds")]
    ZeroBalance,

    #[error("Solver API key is invalid")]
    InvalidKey,

    #[error("Solver has no workers available")]
    NoSlot,

    #[error("Challenge could not be solved: {0}")]
    Unsolvable(String),

    #[error("Solver did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error: {0}")]
    Api(String),
}

/// A service that turns a site key and page URL into a challenge token.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Submit a challenge, returning a ticket to poll.
    async fn submit(&self, site_key: &str, page_url: &str) -> Result<String, SolverError>;

    /// Wait for the ticket's token, giving up after `timeout`.
    async fn poll(&self, ticket: &str, timeout: Duration) -> Result<String, SolverError>;

    /// Submit and wait in one call.
    async fn solve(
        &self,
        site_key: &str,
        page_url: &str,
        timeout: Duration,
    ) -> Result<String, SolverError> {
        let ticket = self.submit(site_key, page_url).await?;
        self.poll(&ticket, timeout).await
    }
}
