//! Walking result pages one item at a time.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use super::recovery::{inspect_results, Anomaly, NavigationRecovery};
use super::{pause, SiteProfile, TimingConfig};
use crate::browser::{BrowserDriver, ElementHandle, Scope};
use crate::error::{DriverError, ScrapeError};
use crate::models::{Counter, ItemReference, ResultPage, RunState};

/// Recoveries allowed on one page before the session is given up.
const MAX_RECOVERIES_PER_PAGE: u32 = 3;

static NOTICE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bID=(\d+)").unwrap());
static DETAIL_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"['"]([^'"]*Details\.aspx[^'"]*)['"]"#).unwrap());
static PAGE_INDICATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)page\s+(\d+)\s+of\s+(\d+)").unwrap());

/// Notice identifier from a row control's `onclick`.
pub fn parse_notice_id(onclick: &str) -> Option<String> {
    NOTICE_ID.captures(onclick).map(|c| c[1].to_string())
}

/// Relative detail link from a row control's `onclick`.
pub fn parse_detail_href(onclick: &str) -> Option<String> {
    DETAIL_HREF.captures(onclick).map(|c| c[1].to_string())
}

/// `(current, total)` from a "Page X of Y" indicator.
pub fn parse_page_indicator(text: &str) -> Option<(usize, usize)> {
    let caps = PAGE_INDICATOR.captures(text)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Whether freshly enumerated identifiers look like a stale render.
///
/// Stale means all identical, fewer than one tenth distinct, or the same set as
/// the page before an advance.
pub fn is_stale(ids: &[String], previous: Option<&[String]>) -> bool {
    if ids.is_empty() {
        return false;
    }
    let distinct: HashSet<&String> = ids.iter().collect();
    if ids.len() > 1 && distinct.len() == 1 {
        return true;
    }
    if distinct.len() < (ids.len() / 10).max(1) {
        return true;
    }
    match previous {
        Some(previous) if !previous.is_empty() => {
            let before: HashSet<&String> = previous.iter().collect();
            distinct == before
        }
        _ => false,
    }
}

/// Whether two identifier lists hold the same notices, in any order.
pub fn same_ids(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    a == b
}

/// Enumerate the visible item controls on the current results page.
///
/// Without a page indicator the page is labelled `index_hint`; callers must
/// only pass a hint they can vouch for.
pub async fn read_page(
    driver: &mut dyn BrowserDriver,
    profile: &SiteProfile,
    index_hint: usize,
) -> Result<ResultPage, DriverError> {
    let controls = driver
        .find(&Scope::css(profile.view_buttons.as_str()))
        .await?;

    let mut items = Vec::with_capacity(controls.len());
    for control in controls {
        if !driver.is_visible(control).await? {
            continue;
        }
        let onclick = driver.attribute(control, "onclick").await?.unwrap_or_default();
        let Some(id) = parse_notice_id(&onclick) else {
            debug!("Control without notice id: {:?}", onclick);
            continue;
        };
        if items.iter().any(|item: &ItemReference| item.id == id) {
            debug!("Repeated control for notice {}", id);
            continue;
        }
        let detail_url = parse_detail_href(&onclick).and_then(|href| profile.resolve(&href));
        items.push(ItemReference {
            id,
            detail_url,
            control,
            page: index_hint,
            position: items.len(),
        });
    }

    let (index, total_pages) = match read_indicator(driver, profile).await? {
        Some((current, total)) => (current, Some(total)),
        None => (index_hint, None),
    };
    for item in &mut items {
        item.page = index;
    }

    Ok(ResultPage {
        index,
        total_pages,
        items,
    })
}

async fn read_indicator(
    driver: &mut dyn BrowserDriver,
    profile: &SiteProfile,
) -> Result<Option<(usize, usize)>, DriverError> {
    let pagers = driver.find(&Scope::css(profile.pager.as_str())).await?;
    for pager in pagers {
        let text = driver.read_text(pager).await?;
        if let Some(found) = parse_page_indicator(&text) {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// First visible, enabled "next" control.
pub async fn find_next(
    driver: &mut dyn BrowserDriver,
    profile: &SiteProfile,
) -> Result<Option<ElementHandle>, DriverError> {
    for selector in &profile.next_buttons {
        for candidate in driver.find(&Scope::css(selector.as_str())).await? {
            if driver.is_visible(candidate).await?
                && driver.attribute(candidate, "disabled").await?.is_none()
            {
                return Ok(Some(candidate));
            }
        }
    }
    Ok(None)
}

/// Lazy walk over every item on every page.
///
/// Each identifier is yielded at most once per run; it is marked seen in
/// [`RunState`] at the moment it is handed out.
#[derive(Debug)]
pub struct PageTraversal {
    profile: SiteProfile,
    timings: TimingConfig,
    page: ResultPage,
    needs_refresh: bool,
    last_completed: usize,
    exhausted: bool,
}

impl PageTraversal {
    pub fn new(profile: SiteProfile, timings: TimingConfig, first: ResultPage) -> Self {
        Self {
            profile,
            timings,
            page: first,
            needs_refresh: false,
            last_completed: 0,
            exhausted: false,
        }
    }

    pub fn current_page(&self) -> &ResultPage {
        &self.page
    }

    /// Next unseen item, or `None` when every page is done.
    ///
    /// After an item is yielded the caller is expected to navigate away, so the
    /// next call first brings the results view back.
    pub async fn next_item(
        &mut self,
        driver: &mut dyn BrowserDriver,
        run: &mut RunState,
        recovery: &NavigationRecovery,
    ) -> Result<Option<ItemReference>, ScrapeError> {
        if self.exhausted {
            return Ok(None);
        }
        run.set_current_page(self.page.index.max(1));

        if self.needs_refresh {
            let page = recovery.return_to_results(driver, run, &self.page).await?;
            self.page = page;
            self.needs_refresh = false;
        }

        let mut recoveries_here = 0u32;
        loop {
            if let Some(item) = self.page.items.iter().find(|i| !run.is_seen(&i.id)).cloned() {
                run.mark_seen(&item.id);
                self.needs_refresh = true;
                debug!(
                    "Yielding notice {} (page {}, position {})",
                    item.id, item.page, item.position
                );
                return Ok(Some(item));
            }

            if self.page.index > self.last_completed {
                self.last_completed = self.page.index;
                run.increment(Counter::PagesCompleted);
                info!("Page {} complete", self.page.index);
            }

            if self.page.is_last() {
                self.exhausted = true;
                return Ok(None);
            }

            match self.advance(driver, run).await {
                Ok(Some(page)) => {
                    self.page = page;
                    run.set_current_page(self.page.index);
                }
                Ok(None) => {
                    debug!("No next control after page {}", self.page.index);
                    self.exhausted = true;
                    return Ok(None);
                }
                Err(anomaly) => {
                    recoveries_here += 1;
                    if recoveries_here > MAX_RECOVERIES_PER_PAGE {
                        return Err(ScrapeError::SessionFatal(format!(
                            "page {} kept failing: {}",
                            self.page.index + 1,
                            anomaly
                        )));
                    }
                    warn!("Advancing past page {} failed: {}", self.page.index, anomaly);
                    run.set_current_page(self.page.index + 1);
                    self.page = recovery.restore(driver, run, anomaly, None).await?;
                }
            }
        }
    }

    /// Click "next" and verify the new page. `Ok(None)` when there is no next page.
    async fn advance(
        &mut self,
        driver: &mut dyn BrowserDriver,
        run: &RunState,
    ) -> Result<Option<ResultPage>, Anomaly> {
        let next = match find_next(driver, &self.profile).await {
            Ok(Some(next)) => next,
            Ok(None) => return Ok(None),
            Err(e) => {
                return Err(Anomaly::NotResults {
                    url: String::new(),
                    reason: e.to_string(),
                })
            }
        };

        let previous = self.page.ids();
        let target = self.page.index + 1;
        debug!("Advancing to page {} (seen so far: {})", target, run.seen_count());
        if let Err(e) = driver.click(next).await {
            return Err(Anomaly::NotResults {
                url: String::new(),
                reason: e.to_string(),
            });
        }
        pause(self.timings.settle()).await;

        let page = inspect_results(driver, &self.profile, &self.timings, target, Some(&previous))
            .await?;
        Ok(Some(page))
    }
}
