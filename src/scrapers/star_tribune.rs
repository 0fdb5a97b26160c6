//! Star Tribune foreclosure classifieds.
//!
//! Plain HTTP listing pages sorted newest first. No challenge, no session state:
//! fetch a page, read each listing posted within the window, stop at the first
//! older one.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveTime, TimeZone};
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{PacingConfig, RateLimiter};
use crate::browser::random_user_agent;
use crate::extraction::Extractor;
use crate::models::{AbortHandle, Counter, ExtractionRecord, RunOutcome, RunReport, RunState};
use crate::storage::{StreamPersister, DEFAULT_RELEASE_EVERY};

static QUANTITY_AGO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+(minute|hour|day|week)").unwrap());
static CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(today|yesterday)?\s*at\s*(\d{1,2}):(\d{2})\s*(am|pm)").unwrap()
});

/// Settings for the classifieds source.
#[derive(Debug, Clone)]
pub struct StarTribuneConfig {
    pub base_url: String,
    pub search_path: String,
    /// Listings per page requested from the site.
    pub limit: u32,
    /// Only listings posted within this many hours are read.
    pub window_hours: i64,
    /// Hard stop on pagination.
    pub max_pages: usize,
    /// Longest time the extractor may take per notice.
    pub extraction_timeout: Duration,
    pub pacing: PacingConfig,
    pub output_dir: PathBuf,
    pub release_every: u64,
    pub file_prefix: String,
}

impl StarTribuneConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_url: "https://classifieds.startribune.com".to_string(),
            search_path: "/default/foreclosures/search".to_string(),
            limit: 240,
            window_hours: 24,
            max_pages: 50,
            extraction_timeout: Duration::from_secs(60),
            pacing: PacingConfig::light(),
            output_dir: output_dir.into(),
            release_every: DEFAULT_RELEASE_EVERY,
            file_prefix: "startribune_notices".to_string(),
        }
    }
}

/// One entry of the listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub notice_id: String,
    pub url: String,
    pub title: String,
    pub posted_text: String,
}

/// Fetches and extracts recent classifieds.
pub struct StarTribuneSource {
    config: StarTribuneConfig,
    extractor: Arc<dyn Extractor>,
    client: Client,
}

impl StarTribuneSource {
    pub fn new(config: StarTribuneConfig, extractor: Arc<dyn Extractor>) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(random_user_agent())
            .timeout(Duration::from_secs(30))
            .cookie_store(true)
            .build()?;
        Ok(Self {
            config,
            extractor,
            client,
        })
    }

    fn page_url(&self, page: usize) -> String {
        let mut url = format!(
            "{}{}?sort_by=date&order=desc&limit={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.search_path,
            self.config.limit
        );
        if page > 1 {
            url.push_str(&format!("&p={}", page));
        }
        url
    }

    async fn fetch(&self, url: &str) -> reqwest::Result<String> {
        self.client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// Read every listing posted within the window.
    pub async fn run(&self, abort: AbortHandle) -> RunReport {
        let started = Instant::now();
        let now = Local::now();
        let cutoff = now - chrono::Duration::hours(self.config.window_hours);
        let mut run = RunState::new(abort);
        let mut limiter = RateLimiter::with_config(self.config.pacing.clone());

        info!("Fetching classifieds page 1");
        let first = match self.fetch(&self.page_url(1)).await {
            Ok(html) => html,
            Err(e) => {
                error!("Listing page failed: {}", e);
                return self.report(
                    RunOutcome::SearchFailed {
                        reason: e.to_string(),
                    },
                    &run,
                    None,
                    started,
                    Duration::ZERO,
                );
            }
        };

        let stem = format!("{}_{}", self.config.file_prefix, now.format("%Y-%m-%d"));
        let mut persister = match StreamPersister::open_with_release(
            &self.config.output_dir,
            &stem,
            self.config.release_every,
        ) {
            Ok(p) => p,
            Err(e) => {
                error!("Cannot open output: {}", e);
                return self.report(
                    RunOutcome::SearchFailed {
                        reason: e.to_string(),
                    },
                    &run,
                    None,
                    started,
                    Duration::ZERO,
                );
            }
        };

        let outcome = self
            .walk(first, &mut run, &mut persister, &mut limiter, now, cutoff)
            .await;

        if let Err(e) = persister.close() {
            error!("Failed to close output: {}", e);
        }
        info!(
            "Classifieds run finished, {} rows written",
            persister.rows_written()
        );
        self.report(
            outcome,
            &run,
            Some(&persister),
            started,
            limiter.stats().total_paced,
        )
    }

    async fn walk(
        &self,
        first: String,
        run: &mut RunState,
        persister: &mut StreamPersister,
        limiter: &mut RateLimiter,
        now: DateTime<Local>,
        cutoff: DateTime<Local>,
    ) -> RunOutcome {
        let mut fetched = Some(first);
        for page in 1..=self.config.max_pages {
            if run.should_stop() {
                break;
            }
            run.set_current_page(page);

            let html = match fetched.take() {
                Some(html) => html,
                None => {
                    info!("Fetching classifieds page {}", page);
                    match self.fetch(&self.page_url(page)).await {
                        Ok(html) => html,
                        Err(e) => {
                            warn!("Listing page {} failed, stopping: {}", page, e);
                            break;
                        }
                    }
                }
            };

            let (listings, has_next) = parse_listing_page(&html, &self.config.base_url);
            if listings.is_empty() {
                info!("No listings on page {}", page);
                break;
            }
            debug!("{} listings on page {}", listings.len(), page);

            let mut reached_cutoff = false;
            for listing in listings {
                if run.should_stop() {
                    break;
                }
                if !run.mark_seen(&listing.notice_id) {
                    continue;
                }
                let posted = parse_posted(&listing.posted_text, now).unwrap_or(now);
                if posted < cutoff {
                    info!("Reached listings older than the window ({})", listing.posted_text);
                    reached_cutoff = true;
                    break;
                }

                run.increment(Counter::Attempted);
                match self.read_listing(&listing).await {
                    Ok(mut record) => {
                        record.notice_id = listing.notice_id.clone();
                        record.link = listing.url.clone();
                        match persister.append(&record) {
                            Ok(_) => {
                                run.increment(Counter::Extracted);
                                info!("Saved notice {} ({})", listing.notice_id, listing.title);
                            }
                            Err(e) => {
                                run.request_abort(e.to_string());
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        run.increment(Counter::Failed);
                        warn!("Notice {} failed: {}", listing.notice_id, e);
                    }
                }
                limiter.pace(run.stats().attempted()).await;
            }

            run.increment(Counter::PagesCompleted);
            if reached_cutoff || !has_next {
                break;
            }
        }

        match run.abort_reason() {
            Some(reason) => RunOutcome::Aborted { reason },
            None => RunOutcome::Completed,
        }
    }

    async fn read_listing(&self, listing: &Listing) -> Result<ExtractionRecord, String> {
        let html = self.fetch(&listing.url).await.map_err(|e| e.to_string())?;
        let body = parse_notice_body(&html).ok_or_else(|| "no notice body".to_string())?;
        let timeout = self.config.extraction_timeout;
        match tokio::time::timeout(timeout, self.extractor.extract(&body, &listing.url)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("no answer within {:?}", timeout)),
        }
    }

    fn report(
        &self,
        outcome: RunOutcome,
        run: &RunState,
        persister: Option<&StreamPersister>,
        started: Instant,
        time_paced: Duration,
    ) -> RunReport {
        RunReport {
            source: self.config.file_prefix.clone(),
            outcome,
            stats: run.stats(),
            extraction: self.extractor.stats(),
            output: persister.map(|p| p.path().to_path_buf()),
            rows_written: persister.map(|p| p.rows_written()).unwrap_or(0),
            elapsed: started.elapsed(),
            time_paced,
        }
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Listings on a search page and whether a next page exists.
pub fn parse_listing_page(html: &str, base_url: &str) -> (Vec<Listing>, bool) {
    let document = Html::parse_document(html);
    let (Some(wrap), Some(link), Some(title), Some(date), Some(next)) = (
        selector("div.ap_ad_wrap"),
        selector("a[href]"),
        selector(".post-summary-title"),
        selector(".post-summary-date"),
        selector(".ap_paginator_next_page a"),
    ) else {
        return (Vec::new(), false);
    };
    let base = Url::parse(base_url).ok();

    let mut listings = Vec::new();
    for ad in document.select(&wrap) {
        let Some(notice_id) = ad.value().attr("data-id").filter(|id| !id.is_empty()) else {
            continue;
        };
        let Some(href) = ad.select(&link).next().and_then(|a| a.value().attr("href")) else {
            continue;
        };
        let url = match &base {
            Some(base) => match base.join(href) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            },
            None => href.to_string(),
        };
        listings.push(Listing {
            notice_id: notice_id.to_string(),
            url,
            title: ad
                .select(&title)
                .next()
                .map(text_of)
                .unwrap_or_else(|| "Notice".to_string()),
            posted_text: ad.select(&date).next().map(text_of).unwrap_or_default(),
        });
    }

    let has_next = document.select(&next).next().is_some();
    (listings, has_next)
}

/// Text of the notice body on a detail page.
pub fn parse_notice_body(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let body = selector(".details-body")?;
    let text = document
        .select(&body)
        .next()
        .map(|e| e.text().collect::<Vec<_>>().join("\n"))?;
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// When a listing was posted, from phrases like "Posted online 3 hours ago" or
/// "yesterday at 4:30 pm". `None` when the phrase is not understood.
pub fn parse_posted(text: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let normalized = text.to_lowercase().replace("posted online", "");
    let normalized = normalized.trim();
    if normalized.is_empty() {
        return None;
    }
    if normalized == "just now" || normalized == "moments ago" {
        return Some(now);
    }

    if let Some(caps) = QUANTITY_AGO.captures(normalized) {
        let value: i64 = caps[1].parse().ok()?;
        let delta = match &caps[2] {
            "minute" => chrono::Duration::minutes(value),
            "hour" => chrono::Duration::hours(value),
            "day" => chrono::Duration::days(value),
            _ => chrono::Duration::weeks(value),
        };
        return Some(now - delta);
    }

    let caps = CLOCK.captures(normalized)?;
    let days_back = if normalized.contains("yesterday") { 1 } else { 0 };
    let mut hour: u32 = caps[2].parse().ok()?;
    let minute: u32 = caps[3].parse().ok()?;
    if hour == 12 {
        hour = 0;
    }
    if &caps[4] == "pm" {
        hour += 12;
    }
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let day = now.date_naive() - chrono::Duration::days(days_back);
    Local.from_local_datetime(&day.and_time(time)).earliest()
}
