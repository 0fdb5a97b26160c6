//! Search form submission.

use tracing::{debug, info, warn};

use super::traversal::read_page;
use super::{first_visible, pause, SiteProfile, TimingConfig};
use crate::browser::{BrowserDriver, ElementHandle, Scope, WaitCondition};
use crate::error::{DriverError, ScrapeError};
use crate::models::{ResultPage, SearchCriteria};

/// Drives the portal's search form and returns the first page of results.
#[derive(Debug, Clone)]
pub struct SearchSession {
    profile: SiteProfile,
    timings: TimingConfig,
    per_page: u32,
}

impl SearchSession {
    pub fn new(profile: SiteProfile, timings: TimingConfig, per_page: u32) -> Self {
        Self {
            profile,
            timings,
            per_page,
        }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Submit the criteria. An empty result set is an empty page, not an error.
    pub async fn submit(
        &self,
        driver: &mut dyn BrowserDriver,
        criteria: &SearchCriteria,
    ) -> Result<ResultPage, ScrapeError> {
        let p = &self.profile;
        info!(
            "Searching for '{}' ({}) from {} to {}",
            criteria.query(),
            criteria.match_mode,
            criteria.start,
            criteria.end
        );

        driver
            .navigate(&p.search_url())
            .await
            .map_err(|e| submission(format!("search form did not load: {}", e)))?;

        let keyword_scope = Scope::css(p.keyword_input.as_str());
        self.stable(driver, WaitCondition::Interactive(keyword_scope.clone()), "keyword input")
            .await?;
        let keyword = first_visible(driver, &keyword_scope)
            .await?
            .ok_or_else(|| submission("keyword input not visible"))?;
        driver.fill(keyword, &criteria.query()).await?;
        debug!("Entered keywords");

        self.select_match_mode(driver, criteria).await?;

        self.click_when_ready(driver, &p.date_range_toggle, "date range panel")
            .await?;
        pause(self.timings.settle()).await;
        self.click_when_ready(driver, &p.date_range_radio, "date range option")
            .await?;
        pause(self.timings.settle()).await;

        self.fill_dates(driver, criteria, keyword).await?;

        self.click_when_ready(driver, &p.search_button, "search button")
            .await?;
        pause(self.timings.settle()).await;

        let grid = WaitCondition::Present(Scope::css(p.results_grid.as_str()));
        if driver
            .wait_for(&grid, self.timings.page_timeout())
            .await
            .is_err()
        {
            let content = driver.content().await.unwrap_or_default();
            if content.contains(&p.no_results_text) {
                info!("Search returned no notices");
                return Ok(ResultPage {
                    index: 1,
                    total_pages: Some(1),
                    items: Vec::new(),
                });
            }
            return Err(submission("results never appeared"));
        }

        self.request_page_size(driver).await;

        let page = read_page(driver, p, 1).await?;
        info!(
            "First results page: {} items, {} pages",
            page.items.len(),
            page.total_pages
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        Ok(page)
    }

    async fn select_match_mode(
        &self,
        driver: &mut dyn BrowserDriver,
        criteria: &SearchCriteria,
    ) -> Result<(), ScrapeError> {
        let selector = self.profile.match_radio(criteria.match_mode);
        let radio = self.wait_single(driver, selector, "match mode").await?;
        if driver.attribute(radio, "checked").await?.is_some() {
            debug!("Match mode '{}' already selected", criteria.match_mode);
            return Ok(());
        }
        driver.click(radio).await?;
        pause(self.timings.settle()).await;
        Ok(())
    }

    /// Fill the visible from/to inputs. Both must exist.
    async fn fill_dates(
        &self,
        driver: &mut dyn BrowserDriver,
        criteria: &SearchCriteria,
        keyword: ElementHandle,
    ) -> Result<(), ScrapeError> {
        let (from, to) = criteria.form_dates();
        let inputs = driver
            .find(&Scope::css(self.profile.text_inputs.as_str()))
            .await?;

        let mut from_field = None;
        let mut to_field = None;
        for input in inputs {
            if input == keyword || !driver.is_visible(input).await? {
                continue;
            }
            let id = driver.attribute(input, "id").await?.unwrap_or_default();
            let name = driver.attribute(input, "name").await?.unwrap_or_default();
            let label = format!("{} {}", id, name).to_lowercase();
            if label.contains("from") {
                from_field.get_or_insert(input);
            } else if label.contains("to") {
                to_field.get_or_insert(input);
            }
        }

        let from_field = from_field.ok_or_else(|| submission("no 'from' date input"))?;
        let to_field = to_field.ok_or_else(|| submission("no 'to' date input"))?;
        driver.fill(from_field, &from).await?;
        driver.fill(to_field, &to).await?;
        debug!("Set date range {} to {}", from, to);
        Ok(())
    }

    /// Ask for the largest page size. Advisory only.
    async fn request_page_size(&self, driver: &mut dyn BrowserDriver) {
        let value = self.per_page.to_string();
        let result: Result<(), DriverError> = async {
            let select = driver
                .find(&Scope::css(self.profile.per_page_select.as_str()))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| DriverError::NotFound(self.profile.per_page_select.clone()))?;
            driver.select_option(select, &value).await?;
            pause(self.timings.settle()).await;
            driver
                .wait_for(
                    &WaitCondition::Present(Scope::css(self.profile.results_grid.as_str())),
                    self.timings.page_timeout(),
                )
                .await
        }
        .await;

        match result {
            Ok(()) => debug!("Requested {} results per page", value),
            Err(e) => warn!("Could not set results per page: {}", e),
        }
    }

    async fn stable(
        &self,
        driver: &mut dyn BrowserDriver,
        condition: WaitCondition,
        what: &str,
    ) -> Result<(), ScrapeError> {
        driver
            .wait_for(&condition, self.timings.element_timeout())
            .await
            .map_err(|e| submission(format!("{} never became ready: {}", what, e)))
    }

    async fn wait_single(
        &self,
        driver: &mut dyn BrowserDriver,
        selector: &str,
        what: &str,
    ) -> Result<ElementHandle, ScrapeError> {
        let scope = Scope::css(selector);
        self.stable(driver, WaitCondition::Interactive(scope.clone()), what)
            .await?;
        first_visible(driver, &scope)
            .await?
            .ok_or_else(|| submission(format!("{} not visible", what)))
    }

    async fn click_when_ready(
        &self,
        driver: &mut dyn BrowserDriver,
        selector: &str,
        what: &str,
    ) -> Result<(), ScrapeError> {
        let element = self.wait_single(driver, selector, what).await?;
        driver.click(element).await?;
        Ok(())
    }
}

fn submission(message: impl Into<String>) -> ScrapeError {
    ScrapeError::SearchSubmission(message.into())
}
