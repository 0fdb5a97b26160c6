//! Repairing broken navigation state.
//!
//! When a navigation lands somewhere unexpected, [`NavigationRecovery`] tries an
//! ordered list of strategies until one brings back a healthy results page at the
//! page index recorded in [`RunState`]. Adding a tier means adding a
//! [`RecoveryStrategy`] to the list.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::traversal::{find_next, is_stale, read_page, same_ids};
use super::{find_first, pause, SearchSession, SiteProfile, TimingConfig};
use crate::browser::{BrowserDriver, Scope, WaitCondition};
use crate::error::ScrapeError;
use crate::models::{Counter, ResultPage, RunState, SearchCriteria};

/// Something wrong with the page the session landed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// The session left the results view on purpose (a detail visit).
    Departed,
    /// Landed on the portal home page; the server dropped the session.
    Redirect { url: String },
    /// The results list did not change or lacks diversity.
    Stale,
    /// Not a usable results page for another reason.
    NotResults { url: String, reason: String },
}

impl Anomaly {
    /// Expected departures are not counted as recoveries.
    pub fn is_routine(&self) -> bool {
        matches!(self, Anomaly::Departed)
    }

    fn not_results(url: &str, reason: impl Into<String>) -> Self {
        Anomaly::NotResults {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anomaly::Departed => write!(f, "left the results view"),
            Anomaly::Redirect { url } => write!(f, "redirected to {}", url),
            Anomaly::Stale => write!(f, "stale results"),
            Anomaly::NotResults { url, reason } if url.is_empty() => write!(f, "{}", reason),
            Anomaly::NotResults { url, reason } => write!(f, "{} at {}", reason, url),
        }
    }
}

/// Check that the session shows a usable results page.
///
/// `previous` is the identifier list of the page before an advance, if any.
pub async fn inspect_results(
    driver: &mut dyn BrowserDriver,
    profile: &SiteProfile,
    timings: &TimingConfig,
    index_hint: usize,
    previous: Option<&[String]>,
) -> Result<ResultPage, Anomaly> {
    let url = driver
        .current_url()
        .await
        .map_err(|e| Anomaly::not_results("", e.to_string()))?;
    if profile.is_home_url(&url) {
        return Err(Anomaly::Redirect { url });
    }
    if !profile.is_results_url(&url) {
        return Err(Anomaly::not_results(&url, "not the results view"));
    }

    let grid = WaitCondition::Present(Scope::css(profile.results_grid.as_str()));
    if let Err(e) = driver.wait_for(&grid, timings.page_timeout()).await {
        return Err(Anomaly::not_results(&url, e.to_string()));
    }

    let page = read_page(driver, profile, index_hint)
        .await
        .map_err(|e| Anomaly::not_results(&url, e.to_string()))?;
    if page.items.is_empty() {
        return Err(Anomaly::not_results(&url, "no item controls"));
    }
    if is_stale(&page.ids(), previous) {
        return Err(Anomaly::Stale);
    }
    Ok(page)
}

/// Where a strategy believes it left the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    /// A freshly loaded result list whose page index is known.
    Known(usize),
    /// Somewhere in history. Only a page indicator or the identifiers can tell
    /// which page this is.
    Unplaced,
}

/// Everything a strategy may touch while it works.
pub struct RecoveryContext<'a> {
    pub driver: &'a mut dyn BrowserDriver,
    pub profile: &'a SiteProfile,
    pub timings: &'a TimingConfig,
    pub session: &'a SearchSession,
    pub criteria: &'a SearchCriteria,
    /// Page index the run was on.
    pub target_page: usize,
    /// Identifiers of the target page when it has been read before.
    pub expected: Option<&'a [String]>,
}

impl RecoveryContext<'_> {
    /// Inspect the current page and fast-forward to the target page.
    pub async fn verify(&mut self, landing: Landing) -> Result<ResultPage, Anomaly> {
        let index_hint = match landing {
            Landing::Known(index) => index,
            Landing::Unplaced => self.target_page,
        };
        let mut page =
            inspect_results(self.driver, self.profile, self.timings, index_hint, None).await?;

        if landing == Landing::Unplaced && page.total_pages.is_none() {
            match self.expected {
                Some(expected) if same_ids(expected, &page.ids()) => {}
                _ => {
                    return Err(Anomaly::not_results(
                        "",
                        "landed on a page that cannot be placed without an indicator",
                    ))
                }
            }
        }
        if page.index > self.target_page {
            return Err(Anomaly::not_results(
                "",
                format!("landed on page {} past target {}", page.index, self.target_page),
            ));
        }

        while page.index < self.target_page {
            let next = find_next(self.driver, self.profile)
                .await
                .map_err(|e| Anomaly::not_results("", e.to_string()))?
                .ok_or_else(|| {
                    Anomaly::not_results(
                        "",
                        format!(
                            "no next control on page {} of target {}",
                            page.index, self.target_page
                        ),
                    )
                })?;
            let previous = page.ids();
            self.driver
                .click(next)
                .await
                .map_err(|e| Anomaly::not_results("", e.to_string()))?;
            pause(self.timings.settle()).await;
            page = inspect_results(
                self.driver,
                self.profile,
                self.timings,
                page.index + 1,
                Some(&previous),
            )
            .await?;
            debug!("Fast-forwarded to page {}", page.index);
        }
        Ok(page)
    }
}

/// One way of getting back to the results view.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this is ordinary navigation rather than repair.
    fn is_routine(&self) -> bool {
        false
    }

    async fn attempt(&self, ctx: &mut RecoveryContext<'_>) -> Result<ResultPage, Anomaly>;
}

/// Click the page's own "back to results" control.
pub struct ReturnLink;

#[async_trait]
impl RecoveryStrategy for ReturnLink {
    fn name(&self) -> &'static str {
        "return link"
    }

    fn is_routine(&self) -> bool {
        true
    }

    async fn attempt(&self, ctx: &mut RecoveryContext<'_>) -> Result<ResultPage, Anomaly> {
        let link = find_first(ctx.driver, &ctx.profile.return_links)
            .await
            .map_err(|e| Anomaly::not_results("", e.to_string()))?
            .ok_or_else(|| Anomaly::not_results("", "no return control"))?;
        ctx.driver
            .click(link)
            .await
            .map_err(|e| Anomaly::not_results("", e.to_string()))?;
        pause(ctx.timings.settle()).await;
        ctx.verify(Landing::Unplaced).await
    }
}

/// Step back through session history.
pub struct HistoryBack {
    pub steps: usize,
}

#[async_trait]
impl RecoveryStrategy for HistoryBack {
    fn name(&self) -> &'static str {
        "history back"
    }

    fn is_routine(&self) -> bool {
        true
    }

    async fn attempt(&self, ctx: &mut RecoveryContext<'_>) -> Result<ResultPage, Anomaly> {
        let mut last = Anomaly::not_results("", "no history steps configured");
        for step in 1..=self.steps {
            if let Err(e) = ctx.driver.go_back().await {
                return Err(Anomaly::not_results("", e.to_string()));
            }
            pause(ctx.timings.settle()).await;
            match ctx.verify(Landing::Unplaced).await {
                Ok(page) => return Ok(page),
                Err(anomaly) => {
                    debug!("History step {} did not restore results: {}", step, anomaly);
                    last = anomaly;
                }
            }
        }
        Err(last)
    }
}

/// Load the results URL directly.
pub struct DirectUrl;

#[async_trait]
impl RecoveryStrategy for DirectUrl {
    fn name(&self) -> &'static str {
        "direct url"
    }

    async fn attempt(&self, ctx: &mut RecoveryContext<'_>) -> Result<ResultPage, Anomaly> {
        let url = ctx.profile.search_url();
        ctx.driver
            .navigate(&url)
            .await
            .map_err(|e| Anomaly::not_results(&url, e.to_string()))?;
        pause(ctx.timings.settle()).await;
        ctx.verify(Landing::Known(1)).await
    }
}

/// Clear the session, search again and fast-forward.
pub struct SessionReset;

#[async_trait]
impl RecoveryStrategy for SessionReset {
    fn name(&self) -> &'static str {
        "session reset"
    }

    async fn attempt(&self, ctx: &mut RecoveryContext<'_>) -> Result<ResultPage, Anomaly> {
        ctx.driver
            .reset_session()
            .await
            .map_err(|e| Anomaly::not_results("", e.to_string()))?;
        let first = ctx
            .session
            .submit(ctx.driver, ctx.criteria)
            .await
            .map_err(|e| Anomaly::not_results("", e.to_string()))?;
        if first.items.is_empty() {
            return Err(Anomaly::not_results("", "search returned nothing after reset"));
        }
        ctx.verify(Landing::Known(first.index)).await
    }
}

/// The standard tiers, cheapest first.
pub fn default_strategies() -> Vec<Box<dyn RecoveryStrategy>> {
    vec![
        Box::new(ReturnLink),
        Box::new(HistoryBack { steps: 2 }),
        Box::new(DirectUrl),
        Box::new(SessionReset),
    ]
}

/// Ordered recovery tiers for one run.
pub struct NavigationRecovery {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
    profile: SiteProfile,
    timings: TimingConfig,
    session: SearchSession,
    criteria: SearchCriteria,
}

impl NavigationRecovery {
    pub fn new(
        profile: SiteProfile,
        timings: TimingConfig,
        session: SearchSession,
        criteria: SearchCriteria,
    ) -> Self {
        Self::with_strategies(default_strategies(), profile, timings, session, criteria)
    }

    pub fn with_strategies(
        strategies: Vec<Box<dyn RecoveryStrategy>>,
        profile: SiteProfile,
        timings: TimingConfig,
        session: SearchSession,
        criteria: SearchCriteria,
    ) -> Self {
        Self {
            strategies,
            profile,
            timings,
            session,
            criteria,
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the tiers in order until one restores the results view at the run's
    /// current page. Exhausting every tier is fatal to the run.
    ///
    /// `expected` holds the identifiers of that page if it was read before; a
    /// page advance that failed has none.
    pub async fn restore(
        &self,
        driver: &mut dyn BrowserDriver,
        run: &mut RunState,
        anomaly: Anomaly,
        expected: Option<&[String]>,
    ) -> Result<ResultPage, ScrapeError> {
        let target_page = run.current_page().max(1);
        if !anomaly.is_routine() {
            warn!("Navigation anomaly on page {}: {}", target_page, anomaly);
        }

        let mut ctx = RecoveryContext {
            driver,
            profile: &self.profile,
            timings: &self.timings,
            session: &self.session,
            criteria: &self.criteria,
            target_page,
            expected,
        };

        let mut last = anomaly.clone();
        for strategy in &self.strategies {
            debug!("Trying recovery: {}", strategy.name());
            match strategy.attempt(&mut ctx).await {
                Ok(page) => {
                    if !(anomaly.is_routine() && strategy.is_routine()) {
                        run.increment(Counter::Recoveries);
                        info!(
                            "Recovered via {} on page {} ({} items)",
                            strategy.name(),
                            page.index,
                            page.items.len()
                        );
                    }
                    run.set_current_page(page.index);
                    return Ok(page);
                }
                Err(e) => {
                    debug!("Recovery via {} failed: {}", strategy.name(), e);
                    last = e;
                }
            }
        }

        Err(ScrapeError::SessionFatal(format!(
            "all recovery tiers failed after {} (last: {})",
            anomaly, last
        )))
    }

    /// Bring the results view back after a detail visit to `current`.
    pub async fn return_to_results(
        &self,
        driver: &mut dyn BrowserDriver,
        run: &mut RunState,
        current: &ResultPage,
    ) -> Result<ResultPage, ScrapeError> {
        let expected = current.ids();
        let url = match driver.current_url().await {
            Ok(url) => url,
            Err(e) => {
                debug!("Could not read the URL after a detail visit: {}", e);
                String::new()
            }
        };
        let anomaly = if self.profile.is_home_url(&url) {
            Anomaly::Redirect { url }
        } else if self.profile.is_results_url(&url) {
            match inspect_results(driver, &self.profile, &self.timings, run.current_page(), None)
                .await
            {
                Ok(page) if page.total_pages.is_some() && page.index == run.current_page() => {
                    return Ok(page)
                }
                Ok(page) if page.total_pages.is_none() && same_ids(&expected, &page.ids()) => {
                    return Ok(page)
                }
                Ok(_) => Anomaly::Departed,
                Err(anomaly) => anomaly,
            }
        } else {
            Anomaly::Departed
        };
        self.restore(driver, run, anomaly, Some(&expected)).await
    }
}
