//! Selectors and URLs describing the notice portal.

use url::Url;

use crate::models::MatchMode;

/// Static description of the portal's markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteProfile {
    pub base_url: String,
    /// Path of the search form. Results are rendered on the same page by postback.
    pub search_path: String,
    /// URL fragment shared by detail views.
    pub detail_path: String,

    pub keyword_input: String,
    pub match_any_radio: String,
    pub match_all_radio: String,
    pub match_exact_radio: String,
    pub date_range_toggle: String,
    pub date_range_radio: String,
    pub text_inputs: String,
    pub search_button: String,

    pub results_grid: String,
    pub view_buttons: String,
    pub per_page_select: String,
    pub next_buttons: Vec<String>,
    pub pager: String,
    pub no_results_text: String,

    pub challenge_marker_text: String,
    pub challenge_frame: String,
    pub checkbox_selectors: Vec<String>,
    pub site_key_holder: String,
    pub view_notice_button: String,
    pub automation_messages: Vec<String>,

    pub return_links: Vec<String>,
}

impl SiteProfile {
    /// Minnesota public notice portal.
    pub fn mn_public_notice() -> Self {
        Self::with_base_url("https://www.mnpublicnotice.com")
    }

    /// Same markup served from another origin.
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            search_path: "/Search.aspx".into(),
            detail_path: "Details.aspx".into(),

            keyword_input: "input[type='text']".into(),
            match_any_radio: "#ctl00_ContentPlaceHolder1_as1_rdoType_1".into(),
            match_all_radio: "#ctl00_ContentPlaceHolder1_as1_rdoType_0".into(),
            match_exact_radio: "#ctl00_ContentPlaceHolder1_as1_rdoType_2".into(),
            date_range_toggle: "#ctl00_ContentPlaceHolder1_as1_divDateRange".into(),
            date_range_radio: "#ctl00_ContentPlaceHolder1_as1_rbRange".into(),
            text_inputs: "input[type='text']".into(),
            search_button: "#ctl00_ContentPlaceHolder1_as1_btnGo".into(),

            results_grid: "#ctl00_ContentPlaceHolder1_WSExtendedGridNP1_GridView1".into(),
            view_buttons:
                "#ctl00_ContentPlaceHolder1_WSExtendedGridNP1_GridView1 input[id*='btnView2'].viewButton"
                    .into(),
            per_page_select:
                "#ctl00_ContentPlaceHolder1_WSExtendedGridNP1_GridView1_ctl01_ddlPerPage".into(),
            next_buttons: vec![
                "input[id*='btnNext']".into(),
                "input[value='Next']".into(),
                "input[title*='Next']".into(),
                "a[title*='Next']".into(),
                ".pager input[type='image'][title*='Next']".into(),
                "input[type='image'][src*='next']".into(),
            ],
            pager: "#ctl00_ContentPlaceHolder1_WSExtendedGridNP1_GridView1 .pager".into(),
            no_results_text: "No notices found".into(),

            challenge_marker_text: "You must complete the reCAPTCHA".into(),
            challenge_frame: "#recaptcha iframe".into(),
            checkbox_selectors: vec![
                "#recaptcha-anchor".into(),
                ".rc-anchor-checkbox".into(),
                "span[role='checkbox']".into(),
            ],
            site_key_holder: "[data-sitekey]".into(),
            view_notice_button: "#ctl00_ContentPlaceHolder1_PublicNoticeDetailsBody1_btnViewNotice"
                .into(),
            automation_messages: vec![
                "automated processes".into(),
                "automated traffic".into(),
                "unusual traffic".into(),
                "automated queries".into(),
            ],

            return_links: vec![
                "#ctl00_ContentPlaceHolder1_PublicNoticeDetailsBody1_lnkBackToResults".into(),
                "a[id*='BackToResults']".into(),
                "input[value='Back to Results']".into(),
            ],
        }
    }

    pub fn search_url(&self) -> String {
        format!("{}{}", self.base_url, self.search_path)
    }

    pub fn match_radio(&self, mode: MatchMode) -> &str {
        match mode {
            MatchMode::Any => &self.match_any_radio,
            MatchMode::All => &self.match_all_radio,
            MatchMode::Exact => &self.match_exact_radio,
        }
    }

    /// Checkbox selectors as one selector list.
    pub fn checkbox_selector(&self) -> String {
        self.checkbox_selectors.join(", ")
    }

    /// Whether the URL is the results view (the search page after postback).
    pub fn is_results_url(&self, url: &str) -> bool {
        url.to_lowercase()
            .contains(&self.search_path.trim_start_matches('/').to_lowercase())
    }

    pub fn is_detail_url(&self, url: &str) -> bool {
        url.to_lowercase().contains(&self.detail_path.to_lowercase())
    }

    /// Whether the URL is the portal's landing page, where expired sessions are sent.
    pub fn is_home_url(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Ok(base) = Url::parse(&self.base_url) else {
            return false;
        };
        if parsed.host_str() != base.host_str() {
            return false;
        }
        let path = parsed.path().to_lowercase();
        path.is_empty() || path == "/" || path.ends_with("/default.aspx") || path.ends_with("/home.aspx")
    }

    /// Resolve a detail link taken from a row control against the search page.
    pub fn resolve(&self, href: &str) -> Option<String> {
        let base = Url::parse(&self.search_url()).ok()?;
        base.join(href).ok().map(|u| u.to_string())
    }
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self::mn_public_notice()
    }
}
