//! Human-verification challenges in front of detail views.
//!
//! Each detail visit runs through [`ChallengeState`] via the pure
//! [`ChallengeState::on`] transition. [`ChallengeGate`] performs the browser work
//! and feeds events into it. One checkbox click and one solver submission per
//! visit, never more.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use super::{first_visible, pause, SiteProfile, TimingConfig};
use crate::browser::{BrowserDriver, ElementHandle, Scope, WaitCondition};
use crate::error::{DriverError, ScrapeError};
use crate::models::{Counter, RunState};
use crate::solver::ChallengeSolver;

static FRAME_SITE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]k=([^&#]+)").unwrap());
static SCRIPT_SITE_KEYS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#"data-sitekey\s*=\s*["']([\w-]{20,})["']"#).unwrap(),
        Regex::new(r#"sitekey["']?\s*[:=]\s*["']([\w-]{20,})["']"#).unwrap(),
        Regex::new(r#"grecaptcha\.render\([^)]*["']([\w-]{40})["']"#).unwrap(),
    ]
});

/// Where a detail visit stands with respect to its challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    /// No challenge on the page.
    None,
    CheckboxPending,
    ImagePending,
    Solved,
    Unsolvable,
}

/// Observations that move a visit between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeEvent {
    MarkerAbsent,
    MarkerPresent,
    CheckboxCleared,
    CheckboxBlocked,
    AutomationDetected,
    TokenAccepted,
    SolverFailed,
}

impl ChallengeState {
    /// Transition table. Terminal states absorb every event; events that make no
    /// sense in a state leave it unchanged.
    pub fn on(self, event: ChallengeEvent) -> ChallengeState {
        use ChallengeEvent as E;
        use ChallengeState as S;
        match (self, event) {
            (S::Solved, _) | (S::Unsolvable, _) => self,
            (S::None, E::MarkerPresent) => S::CheckboxPending,
            (S::None, E::MarkerAbsent) => S::None,
            (S::CheckboxPending, E::CheckboxCleared) => S::Solved,
            (S::CheckboxPending, E::CheckboxBlocked) => S::ImagePending,
            (S::CheckboxPending, E::AutomationDetected) => S::Unsolvable,
            (S::ImagePending, E::TokenAccepted) => S::Solved,
            (S::ImagePending, E::SolverFailed) => S::Unsolvable,
            (S::ImagePending, E::AutomationDetected) => S::Unsolvable,
            (state, _) => state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChallengeState::None | ChallengeState::Solved | ChallengeState::Unsolvable
        )
    }
}

/// Resolves the challenge on the current detail page.
pub struct ChallengeGate {
    profile: SiteProfile,
    timings: TimingConfig,
    solver: Option<Arc<dyn ChallengeSolver>>,
    /// Longest time one submission may take, polling included.
    solver_timeout: Duration,
}

impl ChallengeGate {
    pub fn new(
        profile: SiteProfile,
        timings: TimingConfig,
        solver: Option<Arc<dyn ChallengeSolver>>,
        solver_timeout: Duration,
    ) -> Self {
        Self {
            profile,
            timings,
            solver,
            solver_timeout,
        }
    }

    /// Get past the challenge, if any.
    ///
    /// Returns [`ChallengeState::None`] or [`ChallengeState::Solved`];
    /// an unsolvable challenge is [`ScrapeError::ChallengeUnsolvable`].
    pub async fn pass(
        &self,
        driver: &mut dyn BrowserDriver,
        run: &mut RunState,
    ) -> Result<ChallengeState, ScrapeError> {
        let mut state = ChallengeState::None;
        let mut reason = String::new();

        let event = if self.marker_present(driver).await? {
            ChallengeEvent::MarkerPresent
        } else {
            ChallengeEvent::MarkerAbsent
        };
        state = state.on(event);

        if state == ChallengeState::CheckboxPending {
            info!("Challenge present, trying the checkbox");
            let event = self.try_checkbox(driver).await?;
            if event == ChallengeEvent::AutomationDetected {
                reason = "session flagged as automated".to_string();
            }
            state = state.on(event);
        }

        if state == ChallengeState::ImagePending {
            let event = match self.try_solver(driver, run).await? {
                Ok(()) => ChallengeEvent::TokenAccepted,
                Err(why) => {
                    reason = why;
                    ChallengeEvent::SolverFailed
                }
            };
            state = state.on(event);
        }

        match state {
            ChallengeState::Solved => {
                run.increment(Counter::Solved);
                info!("Challenge solved");
                Ok(state)
            }
            ChallengeState::Unsolvable => {
                warn!("Challenge unsolvable: {}", reason);
                Err(ScrapeError::ChallengeUnsolvable(reason))
            }
            other => Ok(other),
        }
    }

    async fn marker_present(&self, driver: &mut dyn BrowserDriver) -> Result<bool, DriverError> {
        let content = driver.content().await?;
        if content.contains(&self.profile.challenge_marker_text) {
            return Ok(true);
        }
        Ok(!driver
            .find(&Scope::css(self.profile.challenge_frame.as_str()))
            .await?
            .is_empty())
    }

    fn checkbox_scope(&self) -> Scope {
        Scope::in_frame(
            self.profile.challenge_frame.as_str(),
            self.profile.checkbox_selector(),
        )
    }

    /// The single checkbox attempt.
    async fn try_checkbox(
        &self,
        driver: &mut dyn BrowserDriver,
    ) -> Result<ChallengeEvent, DriverError> {
        let scope = self.checkbox_scope();
        let ready = WaitCondition::Attributed {
            scope: scope.clone(),
            attribute: "aria-checked".to_string(),
        };
        if let Err(e) = driver.wait_for(&ready, self.timings.checkbox_timeout()).await {
            debug!("Checkbox never reported readiness: {}", e);
        }

        let Some(checkbox) = first_visible(driver, &scope).await? else {
            debug!("No checkbox to click");
            return Ok(ChallengeEvent::CheckboxBlocked);
        };
        driver.click(checkbox).await?;
        pause(self.timings.challenge_settle()).await;

        if self.automation_flagged(driver).await? {
            return Ok(ChallengeEvent::AutomationDetected);
        }

        let checked = self.checkbox_checked(driver, checkbox).await;
        if !checked && self.marker_present(driver).await? {
            debug!("Checkbox did not clear the challenge");
            return Ok(ChallengeEvent::CheckboxBlocked);
        }

        if self.confirm(driver).await? {
            Ok(ChallengeEvent::CheckboxCleared)
        } else {
            Ok(ChallengeEvent::CheckboxBlocked)
        }
    }

    async fn checkbox_checked(&self, driver: &mut dyn BrowserDriver, checkbox: ElementHandle) -> bool {
        match driver.attribute(checkbox, "aria-checked").await {
            Ok(Some(value)) => value == "true",
            _ => false,
        }
    }

    async fn automation_flagged(&self, driver: &mut dyn BrowserDriver) -> Result<bool, DriverError> {
        let mut text = driver.content().await?.to_lowercase();
        let frame_body = Scope::in_frame(self.profile.challenge_frame.as_str(), "body");
        if let Ok(bodies) = driver.find(&frame_body).await {
            for body in bodies {
                if let Ok(inner) = driver.read_text(body).await {
                    text.push(' ');
                    text.push_str(&inner.to_lowercase());
                }
            }
        }
        Ok(self
            .profile
            .automation_messages
            .iter()
            .any(|m| text.contains(&m.to_lowercase())))
    }

    /// Click the view-confirmation control and check the challenge is gone.
    async fn confirm(&self, driver: &mut dyn BrowserDriver) -> Result<bool, DriverError> {
        let button = Scope::css(self.profile.view_notice_button.as_str());
        if let Some(view) = first_visible(driver, &button).await? {
            driver.click(view).await?;
            pause(self.timings.settle()).await;
        }
        Ok(!self.marker_present(driver).await?)
    }

    /// The single solver submission. The inner `Err` carries the reason it failed.
    async fn try_solver(
        &self,
        driver: &mut dyn BrowserDriver,
        run: &mut RunState,
    ) -> Result<Result<(), String>, DriverError> {
        let Some(solver) = &self.solver else {
            return Ok(Err("no solver configured".to_string()));
        };
        let Some(site_key) = self.site_key(driver).await? else {
            return Ok(Err("site key not found".to_string()));
        };
        let page_url = driver.current_url().await?;

        run.increment(Counter::SolverCalls);
        info!("Submitting challenge to solver");
        let timeout = self.solver_timeout;
        let token = match tokio::time::timeout(timeout, solver.solve(&site_key, &page_url, timeout))
            .await
        {
            Ok(Ok(token)) => token,
            Ok(Err(e)) => return Ok(Err(e.to_string())),
            Err(_) => return Ok(Err(format!("solver timed out after {:?}", timeout))),
        };

        driver.inject_token(&token).await?;
        if self.confirm(driver).await? {
            Ok(Ok(()))
        } else {
            Ok(Err("token was not accepted".to_string()))
        }
    }

    /// Site key from the data attribute, then the frame URL, then inline script.
    async fn site_key(&self, driver: &mut dyn BrowserDriver) -> Result<Option<String>, DriverError> {
        let holders = driver
            .find(&Scope::css(self.profile.site_key_holder.as_str()))
            .await?;
        for holder in holders {
            if let Some(key) = driver.attribute(holder, "data-sitekey").await? {
                if !key.trim().is_empty() {
                    return Ok(Some(key.trim().to_string()));
                }
            }
        }

        for url in driver.frame_urls().await? {
            if let Some(key) = site_key_from_frame_url(&url) {
                return Ok(Some(key));
            }
        }

        let content = driver.content().await?;
        Ok(site_key_from_script(&content))
    }
}

fn site_key_from_frame_url(url: &str) -> Option<String> {
    if !url.contains("recaptcha") {
        return None;
    }
    FRAME_SITE_KEY.captures(url).map(|c| c[1].to_string())
}

fn site_key_from_script(content: &str) -> Option<String> {
    SCRIPT_SITE_KEYS
        .iter()
        .find_map(|re| re.captures(content))
        .map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChallengeEvent as E;
    use ChallengeState as S;

    #[test]
    fn checkbox_path() {
        let state = S::None.on(E::MarkerPresent);
        assert_eq!(state, S::CheckboxPending);
        assert_eq!(state.on(E::CheckboxCleared), S::Solved);
    }

    #[test]
    fn image_path() {
        let state = S::None.on(E::MarkerPresent).on(E::CheckboxBlocked);
        assert_eq!(state, S::ImagePending);
        assert_eq!(state.on(E::TokenAccepted), S::Solved);
        assert_eq!(state.on(E::SolverFailed), S::Unsolvable);
    }

    #[test]
    fn automation_detection_is_unsolvable() {
        assert_eq!(S::CheckboxPending.on(E::AutomationDetected), S::Unsolvable);
    }

    #[test]
    fn terminal_states_absorb() {
        for event in [E::MarkerPresent, E::CheckboxBlocked, E::SolverFailed] {
            assert_eq!(S::Solved.on(event), S::Solved);
            assert_eq!(S::Unsolvable.on(event), S::Unsolvable);
        }
    }

    #[test]
    fn unexpected_events_do_not_move() {
        assert_eq!(S::None.on(E::TokenAccepted), S::None);
        assert_eq!(S::CheckboxPending.on(E::TokenAccepted), S::CheckboxPending);
        assert!(!S::ImagePending.is_terminal());
    }

    #[test]
    fn site_key_sources() {
        assert_eq!(
            site_key_from_frame_url(
                "https://www.google.com/recaptcha/api2/anchor?ar=1&k=6LdAbCdEfGhIjKlMnOpQrStUvWxYz0123456789&co=aHR0"
            )
            .as_deref(),
            Some("6LdAbCdEfGhIjKlMnOpQrStUvWxYz0123456789")
        );
        assert_eq!(site_key_from_frame_url("https://example.com/?k=abc"), None);
        assert_eq!(
            site_key_from_script(r#"grecaptcha.render('box', {'sitekey': '6LdAbCdEfGhIjKlMnOpQrStUv'});"#)
                .as_deref(),
            Some("6LdAbCdEfGhIjKlMnOpQrStUv")
        );
    }
}
