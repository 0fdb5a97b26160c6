//! In-memory notice portal for driving the browser engine in tests.
//!
//! The fake answers selector queries by exact comparison against the
//! [`SiteProfile`] it was built from, so the engine sees the same selectors it
//! would send to a real browser.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use pubnotice::browser::{BrowserDriver, ElementHandle, Scope};
use pubnotice::error::DriverError;
use pubnotice::extraction::FallbackExtractor;
use pubnotice::models::{AbortHandle, MatchMode, SearchCriteria};
use pubnotice::scrapers::{
    OrchestratorConfig, PacingConfig, RunOrchestrator, SiteProfile, TimingConfig,
};
use pubnotice::solver::{ChallengeSolver, SolverError};
use pubnotice::vpn::{NoVpn, VpnController};

pub const BASE: &str = "https://notices.test";
pub const SITE_KEY: &str = "6LfakeSiteKey0123456789abcdefghijklmnopqr";

/// How the detail view of a notice is guarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Captcha {
    Clear,
    /// Cleared by the checkbox alone.
    Checkbox,
    /// Needs a solver token.
    Image,
    /// Image challenge with no discoverable site key.
    Unsolvable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum View {
    Home,
    SearchForm,
    Results(usize),
    Detail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Element {
    KeywordInput,
    DateFrom,
    DateTo,
    MatchRadio,
    DateToggle,
    DateRadio,
    SearchButton,
    Grid,
    PerPage,
    ViewButton(String),
    /// Collapsed copy of a row control from an alternate layout.
    HiddenViewButton(String),
    /// Second visible control for a row that is already listed.
    RepeatViewButton(String),
    Next,
    Pager,
    ReturnLink,
    Frame,
    Checkbox,
    FrameBody,
    SiteKeyHolder,
    ViewNotice,
}

struct SiteState {
    profile: SiteProfile,
    ids: Vec<String>,
    page_size: usize,
    captcha: HashMap<String, Captcha>,

    view: View,
    history: Vec<View>,
    results_page: usize,
    session_alive: bool,
    checkbox_checked: bool,
    token_injected: bool,
    challenge_cleared: bool,

    elements: Vec<(ElementHandle, Element)>,
    next_handle: u64,

    redirect_on_page: Option<usize>,
    stale_after_page: Option<usize>,
    search_broken: bool,
    pager: bool,
    duplicate_controls: bool,
    url_glitch: Option<String>,
    url_glitch_armed: bool,
    detail_url_reads: usize,
    abort_after: Option<(usize, AbortHandle)>,

    opened: Vec<String>,
    closed: bool,
}

/// Shared handle to the fake portal. Clones see the same state.
#[derive(Clone)]
pub struct FakeSite(Arc<Mutex<SiteState>>);

impl FakeSite {
    /// A portal with `total` notices split into pages of `page_size`.
    pub fn new(total: usize, page_size: usize) -> Self {
        let ids = (1..=total).map(|n| (1000 + n).to_string()).collect();
        Self(Arc::new(Mutex::new(SiteState {
            profile: SiteProfile::with_base_url(BASE),
            ids,
            page_size,
            captcha: HashMap::new(),
            view: View::Home,
            history: Vec::new(),
            results_page: 1,
            session_alive: false,
            checkbox_checked: false,
            token_injected: false,
            challenge_cleared: true,
            elements: Vec::new(),
            next_handle: 1,
            redirect_on_page: None,
            stale_after_page: None,
            search_broken: false,
            pager: true,
            duplicate_controls: false,
            url_glitch: None,
            url_glitch_armed: false,
            detail_url_reads: 0,
            abort_after: None,
            opened: Vec::new(),
            closed: false,
        })))
    }

    pub fn with_captcha(self, id: &str, captcha: Captcha) -> Self {
        self.state().captcha.insert(id.to_string(), captcha);
        self
    }

    /// Drop the session the first time a notice on `page` is opened.
    pub fn redirect_on_open_at(self, page: usize) -> Self {
        self.state().redirect_on_page = Some(page);
        self
    }

    /// The first "next" click on `page` re-renders the same rows.
    pub fn stale_after(self, page: usize) -> Self {
        self.state().stale_after_page = Some(page);
        self
    }

    /// The search form never renders its inputs.
    pub fn broken_search(self) -> Self {
        self.state().search_broken = true;
        self
    }

    /// Result pages carry no "Page X of Y" indicator.
    pub fn without_pager(self) -> Self {
        self.state().pager = false;
        self
    }

    /// Every row control has a hidden twin, and the first row is listed twice.
    pub fn with_duplicate_controls(self) -> Self {
        self.state().duplicate_controls = true;
        self
    }

    /// Once notice `id` has been extracted, the next URL lookup fails.
    pub fn url_glitch_after(self, id: &str) -> Self {
        self.state().url_glitch = Some(id.to_string());
        self
    }

    /// Trigger `abort` when the `n`th detail view is opened.
    pub fn abort_after(self, n: usize, abort: AbortHandle) -> Self {
        self.state().abort_after = Some((n, abort));
        self
    }

    /// Notice ids in the order their detail controls were clicked.
    pub fn opened(&self) -> Vec<String> {
        self.state().opened.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn ids_on_page(&self, page: usize) -> Vec<String> {
        self.state().page_ids(page)
    }

    pub fn driver(&self) -> Box<dyn BrowserDriver> {
        Box::new(self.clone())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SiteState> {
        self.0.lock().unwrap()
    }
}

impl SiteState {
    fn total_pages(&self) -> usize {
        self.ids.len().div_ceil(self.page_size).max(1)
    }

    fn page_ids(&self, page: usize) -> Vec<String> {
        let start = (page - 1) * self.page_size;
        let end = (start + self.page_size).min(self.ids.len());
        if start >= end {
            return Vec::new();
        }
        self.ids[start..end].to_vec()
    }

    fn captcha_for(&self, id: &str) -> Captcha {
        self.captcha.get(id).copied().unwrap_or(Captcha::Clear)
    }

    fn challenge_showing(&self) -> bool {
        match &self.view {
            View::Detail(id) => self.captcha_for(id) != Captcha::Clear && !self.challenge_cleared,
            _ => false,
        }
    }

    fn url(&self) -> String {
        match &self.view {
            View::Home => format!("{}/", BASE),
            View::SearchForm | View::Results(_) => format!("{}/Search.aspx", BASE),
            View::Detail(id) => format!("{}/Details.aspx?SID=abc&ID={}", BASE, id),
        }
    }

    /// Show a view without touching history. Pages behind the session bounce home.
    fn render(&mut self, view: View) {
        let view = match view {
            View::Results(_) | View::Detail(_) if !self.session_alive => View::Home,
            other => other,
        };
        match &view {
            View::Results(page) => self.results_page = *page,
            View::Detail(id) => {
                self.challenge_cleared = self.captcha_for(id) == Captcha::Clear;
                self.checkbox_checked = false;
                self.token_injected = false;
            }
            _ => {}
        }
        self.view = view;
        self.elements.clear();
        self.detail_url_reads = 0;
    }

    fn go(&mut self, view: View) {
        let previous = self.view.clone();
        self.history.push(previous);
        self.render(view);
    }

    fn handle_for(&mut self, element: Element) -> ElementHandle {
        if let Some((handle, _)) = self.elements.iter().find(|(_, e)| *e == element) {
            return *handle;
        }
        let handle = ElementHandle(self.next_handle);
        self.next_handle += 1;
        self.elements.push((handle, element));
        handle
    }

    fn element(&self, handle: ElementHandle) -> Result<Element, DriverError> {
        self.elements
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, e)| e.clone())
            .ok_or(DriverError::StaleHandle(handle.id()))
    }

    fn matching(&self, scope: &Scope) -> Vec<Element> {
        let p = &self.profile;
        match scope {
            Scope::Frame { frame, selector } => {
                if *frame != p.challenge_frame || !self.challenge_showing() {
                    Vec::new()
                } else if *selector == p.checkbox_selector() {
                    vec![Element::Checkbox]
                } else if selector == "body" {
                    vec![Element::FrameBody]
                } else {
                    Vec::new()
                }
            }
            Scope::Document(sel) => match &self.view {
                View::SearchForm if !self.search_broken => {
                    if *sel == p.text_inputs {
                        vec![Element::KeywordInput, Element::DateFrom, Element::DateTo]
                    } else if *sel == p.match_any_radio
                        || *sel == p.match_all_radio
                        || *sel == p.match_exact_radio
                    {
                        vec![Element::MatchRadio]
                    } else if *sel == p.date_range_toggle {
                        vec![Element::DateToggle]
                    } else if *sel == p.date_range_radio {
                        vec![Element::DateRadio]
                    } else if *sel == p.search_button {
                        vec![Element::SearchButton]
                    } else {
                        Vec::new()
                    }
                }
                View::Results(page) if !self.ids.is_empty() => {
                    if *sel == p.results_grid {
                        vec![Element::Grid]
                    } else if *sel == p.view_buttons {
                        self.row_controls(*page)
                    } else if *sel == p.per_page_select {
                        vec![Element::PerPage]
                    } else if *sel == p.next_buttons[0] && *page < self.total_pages() {
                        vec![Element::Next]
                    } else if *sel == p.pager && self.pager {
                        vec![Element::Pager]
                    } else {
                        Vec::new()
                    }
                }
                View::Detail(id) => {
                    let showing = self.challenge_showing();
                    if *sel == p.return_links[0] {
                        vec![Element::ReturnLink]
                    } else if showing && *sel == p.challenge_frame {
                        vec![Element::Frame]
                    } else if showing
                        && *sel == p.site_key_holder
                        && self.captcha_for(id) != Captcha::Unsolvable
                    {
                        vec![Element::SiteKeyHolder]
                    } else if showing && *sel == p.view_notice_button {
                        vec![Element::ViewNotice]
                    } else {
                        Vec::new()
                    }
                }
                _ => Vec::new(),
            },
        }
    }

    fn row_controls(&self, page: usize) -> Vec<Element> {
        let ids = self.page_ids(page);
        if !self.duplicate_controls {
            return ids.into_iter().map(Element::ViewButton).collect();
        }
        let mut controls = Vec::new();
        for id in &ids {
            controls.push(Element::HiddenViewButton(id.clone()));
            controls.push(Element::ViewButton(id.clone()));
        }
        if let Some(first) = ids.first() {
            controls.push(Element::RepeatViewButton(first.clone()));
        }
        controls
    }

    fn click(&mut self, element: Element) {
        match element {
            Element::SearchButton => {
                self.session_alive = true;
                self.go(View::Results(1));
            }
            Element::Next => {
                let View::Results(page) = self.view else {
                    return;
                };
                if self.stale_after_page == Some(page) {
                    self.stale_after_page = None;
                    self.render(View::Results(page));
                } else {
                    self.go(View::Results(page + 1));
                }
            }
            Element::ViewButton(id)
            | Element::HiddenViewButton(id)
            | Element::RepeatViewButton(id) => {
                self.opened.push(id.clone());
                if let Some((n, abort)) = &self.abort_after {
                    if self.opened.len() >= *n {
                        abort.trigger();
                    }
                }
                let page = self.results_page;
                if self.redirect_on_page == Some(page) {
                    self.redirect_on_page = None;
                    self.session_alive = false;
                    self.go(View::Home);
                } else {
                    self.go(View::Detail(id));
                }
            }
            Element::ReturnLink => {
                let page = self.results_page;
                self.go(View::Results(page));
            }
            Element::Checkbox => {
                if let View::Detail(id) = &self.view {
                    if self.captcha_for(id) == Captcha::Checkbox {
                        self.checkbox_checked = true;
                    }
                }
            }
            Element::ViewNotice => {
                if self.checkbox_checked || self.token_injected {
                    self.challenge_cleared = true;
                }
            }
            _ => {}
        }
    }

    fn content(&self) -> String {
        let p = &self.profile;
        match &self.view {
            View::Home => "<html><body><h1>Public Notices</h1></body></html>".to_string(),
            View::SearchForm => "<html><body><form id='search'></form></body></html>".to_string(),
            View::Results(_) if self.ids.is_empty() => {
                format!("<html><body><p>{}</p></body></html>", p.no_results_text)
            }
            View::Results(page) if !self.pager => format!(
                "<html><body><table id='grid'>{}</table></body></html>",
                self.page_ids(*page).join(" ")
            ),
            View::Results(page) => format!(
                "<html><body><table id='grid'>{}</table><div class='pager'>Page {} of {}</div></body></html>",
                self.page_ids(*page).join(" "),
                page,
                self.total_pages()
            ),
            View::Detail(_) if self.challenge_showing() => format!(
                "<html><body><div id='recaptcha'></div><p>{} in order to view this notice.</p></body></html>",
                p.challenge_marker_text
            ),
            View::Detail(_) => notice_body(),
        }
    }
}

/// Detail body the pattern extractor can read.
pub fn notice_body() -> String {
    "<html><body><div id='notice'>NOTICE OF MORTGAGE FORECLOSURE SALE<br>\
     MORTGAGOR: Jane Doe<br>\
     PROPERTY ADDRESS: 123 Main St, Minneapolis, MN 55401<br>\
     DATE OF SALE: March 5, 2026<br>\
     MORTGAGEE: First National Bank<br></div></body></html>"
        .to_string()
}

#[async_trait]
impl BrowserDriver for FakeSite {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        let mut s = self.state();
        if url.eq_ignore_ascii_case(&format!("{}/Search.aspx", BASE)) {
            let view = if s.session_alive {
                View::Results(1)
            } else {
                View::SearchForm
            };
            s.go(view);
        } else if let Some((_, id)) = url.rsplit_once("ID=") {
            s.go(View::Detail(id.to_string()));
        } else if url.trim_end_matches('/') == BASE {
            s.go(View::Home);
        } else {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                message: "unknown page".to_string(),
            });
        }
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, DriverError> {
        let mut s = self.state();
        if s.url_glitch_armed {
            s.url_glitch_armed = false;
            return Err(DriverError::Unavailable("target closed".to_string()));
        }
        if matches!(s.view, View::Detail(_)) {
            s.detail_url_reads += 1;
        }
        Ok(s.url())
    }

    async fn find(&mut self, scope: &Scope) -> Result<Vec<ElementHandle>, DriverError> {
        let mut s = self.state();
        let found = s.matching(scope);
        Ok(found.into_iter().map(|e| s.handle_for(e)).collect())
    }

    async fn click(&mut self, element: ElementHandle) -> Result<(), DriverError> {
        let mut s = self.state();
        let element = s.element(element)?;
        s.click(element);
        Ok(())
    }

    async fn fill(&mut self, element: ElementHandle, _value: &str) -> Result<(), DriverError> {
        self.state().element(element).map(|_| ())
    }

    async fn select_option(
        &mut self,
        element: ElementHandle,
        _value: &str,
    ) -> Result<(), DriverError> {
        let mut s = self.state();
        s.element(element)?;
        let view = s.view.clone();
        s.render(view);
        Ok(())
    }

    async fn read_text(&mut self, element: ElementHandle) -> Result<String, DriverError> {
        let s = self.state();
        Ok(match (s.element(element)?, &s.view) {
            (Element::Pager, View::Results(page)) => {
                format!("Page {} of {}", page, s.total_pages())
            }
            (Element::FrameBody, _) => "Select all images with traffic lights".to_string(),
            _ => String::new(),
        })
    }

    async fn attribute(
        &mut self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let s = self.state();
        let value = match (s.element(element)?, name) {
            (Element::KeywordInput, "id" | "name") => Some("txtKeywords".to_string()),
            (Element::DateFrom, "id" | "name") => Some("txtDateFrom".to_string()),
            (Element::DateTo, "id" | "name") => Some("txtDateTo".to_string()),
            (
                Element::ViewButton(id)
                | Element::HiddenViewButton(id)
                | Element::RepeatViewButton(id),
                "onclick",
            ) => Some(format!(
                "javascript:location.href='Details.aspx?SID=abc&ID={}';return false;",
                id
            )),
            (Element::Checkbox, "aria-checked") => Some(s.checkbox_checked.to_string()),
            (Element::SiteKeyHolder, "data-sitekey") => Some(SITE_KEY.to_string()),
            _ => None,
        };
        Ok(value)
    }

    async fn is_visible(&mut self, element: ElementHandle) -> Result<bool, DriverError> {
        self.state()
            .element(element)
            .map(|e| !matches!(e, Element::HiddenViewButton(_)))
    }

    async fn content(&mut self) -> Result<String, DriverError> {
        let mut s = self.state();
        if let View::Detail(id) = &s.view {
            // The engine reads the link and then the body; arm after both.
            if s.url_glitch.as_ref() == Some(id) && s.detail_url_reads >= 2 {
                s.url_glitch = None;
                s.url_glitch_armed = true;
            }
        }
        Ok(s.content())
    }

    async fn frame_urls(&mut self) -> Result<Vec<String>, DriverError> {
        let s = self.state();
        match &s.view {
            View::Detail(id) if s.challenge_showing() && s.captcha_for(id) == Captcha::Image => {
                Ok(vec![format!(
                    "https://www.google.com/recaptcha/api2/anchor?ar=1&k={}",
                    SITE_KEY
                )])
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn go_back(&mut self) -> Result<(), DriverError> {
        let mut s = self.state();
        if let Some(previous) = s.history.pop() {
            s.render(previous);
        }
        Ok(())
    }

    async fn inject_token(&mut self, _token: &str) -> Result<(), DriverError> {
        let mut s = self.state();
        if matches!(s.view, View::Detail(_)) {
            s.token_injected = true;
        }
        Ok(())
    }

    async fn reset_session(&mut self) -> Result<(), DriverError> {
        self.state().session_alive = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.state().closed = true;
        Ok(())
    }
}

/// Solver that always answers with the same token.
#[derive(Default)]
pub struct FakeSolver {
    pub submissions: AtomicUsize,
}

impl FakeSolver {
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSolver for FakeSolver {
    async fn submit(&self, site_key: &str, _page_url: &str) -> Result<String, SolverError> {
        assert_eq!(site_key, SITE_KEY);
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok("ticket-1".to_string())
    }

    async fn poll(&self, _ticket: &str, _timeout: Duration) -> Result<String, SolverError> {
        Ok("03AGdBq-fake-token".to_string())
    }
}

/// Engine settings pointed at the fake portal with every wait removed.
pub fn test_config(dir: &Path) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::new(dir);
    config.profile = SiteProfile::with_base_url(BASE);
    config.timings = TimingConfig::immediate();
    config.pacing = PacingConfig::disabled();
    config.release_every = 5;
    config
}

pub fn orchestrator(dir: &Path, solver: Option<Arc<dyn ChallengeSolver>>) -> RunOrchestrator {
    with_vpn(dir, solver, Box::new(NoVpn))
}

pub fn with_vpn(
    dir: &Path,
    solver: Option<Arc<dyn ChallengeSolver>>,
    vpn: Box<dyn VpnController>,
) -> RunOrchestrator {
    RunOrchestrator::new(
        test_config(dir),
        Arc::new(FallbackExtractor::patterns_only()),
        solver,
        vpn,
    )
}

pub fn criteria() -> SearchCriteria {
    SearchCriteria::for_day(
        vec!["foreclosure".to_string()],
        MatchMode::Any,
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
    )
}

/// Data rows of a CSV output, header excluded.
pub fn rows(path: &Path) -> Vec<String> {
    let text = std::fs::read_to_string(path).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("first_name,last_name,street,city,state,zip,date_filed,plaintiff,link,notice_id")
    );
    lines.map(|l| l.to_string()).collect()
}

/// Notice ids from the last column of every row.
pub fn notice_ids(path: &Path) -> Vec<String> {
    rows(path)
        .iter()
        .map(|row| row.rsplit(',').next().unwrap_or_default().to_string())
        .collect()
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    files.sort();
    files
}
