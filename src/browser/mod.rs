//! Browser capability used by the engine.
//!
//! Everything the engine needs from a browser goes through [`BrowserDriver`]. The
//! Chromium backend lives behind the `browser` feature; tests drive the engine with
//! an in-memory implementation.

mod config;
mod stealth;

#[cfg(feature = "browser")]
mod chromium;

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::DriverError;

pub use config::BrowserEngineConfig;
pub use stealth::{random_user_agent, STEALTH_SCRIPTS, USER_AGENTS};

#[cfg(feature = "browser")]
pub use chromium::ChromiumDriver;

/// Interval between readiness checks in [`BrowserDriver::wait_for`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Opaque reference to an element found by [`BrowserDriver::find`].
///
/// Handles are invalidated by navigation; using one afterwards yields
/// [`DriverError::StaleHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

impl ElementHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Where to look for elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// CSS selector against the top-level document.
    Document(String),
    /// CSS selector inside the document of the first frame matching `frame`.
    Frame { frame: String, selector: String },
}

impl Scope {
    pub fn css(selector: impl Into<String>) -> Self {
        Scope::Document(selector.into())
    }

    pub fn in_frame(frame: impl Into<String>, selector: impl Into<String>) -> Self {
        Scope::Frame {
            frame: frame.into(),
            selector: selector.into(),
        }
    }

    pub fn selector(&self) -> &str {
        match self {
            Scope::Document(selector) => selector,
            Scope::Frame { selector, .. } => selector,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Document(selector) => write!(f, "{}", selector),
            Scope::Frame { frame, selector } => write!(f, "{} >> {}", frame, selector),
        }
    }
}

/// Condition awaited by [`BrowserDriver::wait_for`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// At least one element matches.
    Present(Scope),
    /// A matching element is visible and not disabled.
    Interactive(Scope),
    /// A matching element is visible and carries the attribute (any value).
    Attributed { scope: Scope, attribute: String },
}

impl WaitCondition {
    pub fn scope(&self) -> &Scope {
        match self {
            WaitCondition::Present(scope) => scope,
            WaitCondition::Interactive(scope) => scope,
            WaitCondition::Attributed { scope, .. } => scope,
        }
    }
}

impl std::fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitCondition::Present(scope) => write!(f, "presence of {}", scope),
            WaitCondition::Interactive(scope) => write!(f, "interactive {}", scope),
            WaitCondition::Attributed { scope, attribute } => {
                write!(f, "{} with [{}]", scope, attribute)
            }
        }
    }
}

/// Browser session owned by a single run.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Load a URL and wait for the document to become ready.
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    async fn current_url(&mut self) -> Result<String, DriverError>;

    /// All elements matching the scope, in document order.
    async fn find(&mut self, scope: &Scope) -> Result<Vec<ElementHandle>, DriverError>;

    async fn click(&mut self, element: ElementHandle) -> Result<(), DriverError>;

    /// Replace the value of a text input.
    async fn fill(&mut self, element: ElementHandle, value: &str) -> Result<(), DriverError>;

    /// Choose an option of a `<select>` by value and fire its change event.
    async fn select_option(&mut self, element: ElementHandle, value: &str)
        -> Result<(), DriverError>;

    async fn read_text(&mut self, element: ElementHandle) -> Result<String, DriverError>;

    async fn attribute(
        &mut self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    async fn is_visible(&mut self, element: ElementHandle) -> Result<bool, DriverError>;

    /// Serialized HTML of the top-level document.
    async fn content(&mut self) -> Result<String, DriverError>;

    /// Source URLs of the frames embedded in the current document.
    async fn frame_urls(&mut self) -> Result<Vec<String>, DriverError>;

    /// One step back in session history.
    async fn go_back(&mut self) -> Result<(), DriverError>;

    /// Hand a solved challenge token to the page and fire its callback.
    async fn inject_token(&mut self, token: &str) -> Result<(), DriverError>;

    /// Drop session-local state (cookies, storage) so the next navigation starts fresh.
    async fn reset_session(&mut self) -> Result<(), DriverError>;

    /// Free memory accumulated by the page. Called periodically on long runs.
    async fn release_transient_state(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Shut the session down. Safe to call more than once.
    async fn close(&mut self) -> Result<(), DriverError>;

    /// Poll until the condition holds or the timeout elapses.
    async fn wait_for(
        &mut self,
        condition: &WaitCondition,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.condition_holds(condition).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                debug!("Gave up waiting for {}", condition);
                return Err(DriverError::Timeout(timeout, condition.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL.min(timeout)).await;
        }
    }

    /// Single evaluation of a wait condition.
    async fn condition_holds(&mut self, condition: &WaitCondition) -> Result<bool, DriverError> {
        let elements = self.find(condition.scope()).await?;
        for element in elements {
            let ready = match condition {
                WaitCondition::Present(_) => true,
                WaitCondition::Interactive(_) => {
                    self.is_visible(element).await?
                        && self.attribute(element, "disabled").await?.is_none()
                }
                WaitCondition::Attributed { attribute, .. } => {
                    self.is_visible(element).await?
                        && self.attribute(element, attribute).await?.is_some()
                }
            };
            if ready {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Find the first element matching any of the selectors, trying them in order.
pub async fn find_first(
    driver: &mut dyn BrowserDriver,
    selectors: &[String],
) -> Result<Option<ElementHandle>, DriverError> {
    for selector in selectors {
        let found = driver.find(&Scope::css(selector.as_str())).await?;
        if let Some(first) = found.into_iter().next() {
            return Ok(Some(first));
        }
    }
    Ok(None)
}
