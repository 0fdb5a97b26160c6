//! Notice sources and the navigation engine behind them.
//!
//! The browser engine is assembled from small components that all take the
//! driver and the run's [`RunState`](crate::models::RunState) explicitly:
//! [`SearchSession`] submits the query, [`PageTraversal`] yields items,
//! [`ChallengeGate`] gets past verification, [`NavigationRecovery`] repairs the
//! session, and [`RunOrchestrator`] ties them together.

pub mod challenge;
pub mod config;
pub mod orchestrator;
pub mod rate_limiter;
pub mod recovery;
pub mod search;
pub mod site;
pub mod star_tribune;
pub mod traversal;

use std::time::Duration;

use crate::browser::{BrowserDriver, ElementHandle, Scope};
use crate::error::DriverError;

pub use crate::browser::find_first;
pub use challenge::{ChallengeEvent, ChallengeGate, ChallengeState};
pub use config::{SearchConfig, TimingConfig};
pub use orchestrator::{OrchestratorConfig, RunOrchestrator};
pub use rate_limiter::{PacingConfig, PacingStats, RateLimiter};
pub use recovery::{
    default_strategies, inspect_results, Anomaly, Landing, NavigationRecovery, RecoveryContext,
    RecoveryStrategy,
};
pub use search::SearchSession;
pub use site::SiteProfile;
pub use star_tribune::{StarTribuneConfig, StarTribuneSource};
pub use traversal::{read_page, PageTraversal};

/// Sleep unless the duration is zero.
pub(crate) async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// First visible element in scope.
pub(crate) async fn first_visible(
    driver: &mut dyn BrowserDriver,
    scope: &Scope,
) -> Result<Option<ElementHandle>, DriverError> {
    for element in driver.find(scope).await? {
        if driver.is_visible(element).await? {
            return Ok(Some(element));
        }
    }
    Ok(None)
}
