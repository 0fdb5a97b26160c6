//! Chromium backend for [`BrowserDriver`] using chromiumoxide (CDP).
//!
//! Launches Chrome with anti-automation flags, or attaches to a remote DevTools
//! endpoint. Top-level elements are held as CDP element handles; elements inside
//! frames are tracked in a page-side registry because CDP element lookups only
//! cover the main frame. Reaching into the challenge frame needs site isolation
//! disabled, which the launch flags take care of.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, GetNavigationHistoryParams,
    NavigateToHistoryEntryParams,
};
use chromiumoxide::cdp::js_protocol::heap_profiler::CollectGarbageParams;
use chromiumoxide::element::Element;
use chromiumoxide::layout::Point;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{random_user_agent, BrowserDriver, BrowserEngineConfig, ElementHandle, Scope};
use super::STEALTH_SCRIPTS;
use crate::error::DriverError;

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/google/chrome/google-chrome",
];

const CHROME_COMMANDS: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

enum Slot {
    /// Element in the top-level document.
    Native(Element),
    /// Element inside a frame, registered page-side under its handle id.
    Framed,
}

/// Chromium-backed browser session.
pub struct ChromiumDriver {
    config: BrowserEngineConfig,
    browser: Option<Browser>,
    page: Option<Page>,
    handler: Option<JoinHandle<()>>,
    handles: HashMap<u64, Slot>,
    next_handle: u64,
}

impl ChromiumDriver {
    /// Launch (or attach to) a browser and open the working tab.
    pub async fn launch(config: BrowserEngineConfig) -> Result<Self, DriverError> {
        let (browser, mut handler) = match config.remote_url.clone() {
            Some(remote_url) => Self::connect_remote(&remote_url).await?,
            None => {
                info!("Launching browser (headless={})", config.headless);
                let chrome_path = find_chrome()?;
                let cdp_config = build_config(&config, chrome_path)?;
                Browser::launch(cdp_config)
                    .await
                    .map_err(|e| DriverError::Unavailable(format!("Failed to launch browser: {}", e)))?
            }
        };

        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Unavailable(format!("Failed to open tab: {}", e)))?;

        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| random_user_agent().to_string());
        debug!("Using user agent: {}", user_agent);
        page.execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(script_error)?;

        if config.stealth {
            for script in STEALTH_SCRIPTS {
                if let Err(e) = page
                    .execute(AddScriptToEvaluateOnNewDocumentParams::new(script.to_string()))
                    .await
                {
                    debug!("Stealth script registration skipped: {}", e);
                }
            }
        }

        Ok(Self {
            config,
            browser: Some(browser),
            page: Some(page),
            handler: Some(handler),
            handles: HashMap::new(),
            next_handle: 1,
        })
    }

    /// Connect to a remote Chrome instance.
    async fn connect_remote(
        url: &str,
    ) -> Result<(Browser, chromiumoxide::Handler), DriverError> {
        info!("Connecting to remote browser at {}", url);

        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .map_err(|e| DriverError::Unavailable(format!("Remote browser unreachable: {}", e)))?
            .json()
            .await
            .map_err(|e| DriverError::Unavailable(format!("Bad version info: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DriverError::Unavailable("No webSocketDebuggerUrl in response".into()))?;

        info!("Connecting to WebSocket: {}", ws_url);
        Browser::connect(ws_url)
            .await
            .map_err(|e| DriverError::Unavailable(format!("Failed to connect: {}", e)))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout)
    }

    fn page(&self) -> Result<&Page, DriverError> {
        self.page
            .as_ref()
            .ok_or_else(|| DriverError::Unavailable("browser session is closed".into()))
    }

    fn slot(&self, element: ElementHandle) -> Result<&Slot, DriverError> {
        self.handles
            .get(&element.id())
            .ok_or(DriverError::StaleHandle(element.id()))
    }

    fn invalidate_handles(&mut self) {
        self.handles.clear();
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T, DriverError> {
        let page = self.page()?;
        let result = bounded(self.timeout(), "evaluate", page.evaluate(script)).await?;
        result
            .into_value::<T>()
            .map_err(|e| DriverError::Script(format!("unexpected script result: {}", e)))
    }

    /// Run a function with `this` bound to a top-level element and return its value.
    async fn call_on(
        &self,
        element: &Element,
        function: &str,
    ) -> Result<Option<serde_json::Value>, DriverError> {
        let returns = bounded(
            self.timeout(),
            "call function",
            element.call_js_fn(function.to_string(), false),
        )
        .await?;
        Ok(returns.result.value)
    }

    /// Evaluate an expression against a registered frame element bound to `el`.
    async fn eval_framed(&self, id: u64, body: &str) -> Result<serde_json::Value, DriverError> {
        let script = format!(
            "(() => {{ const el = (window.__pnHandles || {{}})[{id}]; if (!el) return {{ stale: true }}; return {{ value: ({body}) }}; }})()",
        );
        let result: serde_json::Value = self.eval(script).await?;
        if result.get("stale").is_some() {
            return Err(DriverError::StaleHandle(id));
        }
        Ok(result.get("value").cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn wait_until_loaded(&self) -> Result<(), DriverError> {
        let page = self.page()?;
        match tokio::time::timeout(self.timeout(), page.wait_for_navigation()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(script_error(e)),
            Err(_) => {
                warn!("Timeout waiting for navigation to settle");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        debug!("Navigating to {}", url);
        self.invalidate_handles();
        let page = self.page()?;
        match tokio::time::timeout(self.timeout(), page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(DriverError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(DriverError::Timeout(self.timeout(), format!("navigation to {}", url))),
        }
    }

    async fn current_url(&mut self) -> Result<String, DriverError> {
        let page = self.page()?;
        let url = bounded(self.timeout(), "read url", page.url()).await?;
        Ok(url.unwrap_or_default())
    }

    async fn find(&mut self, scope: &Scope) -> Result<Vec<ElementHandle>, DriverError> {
        match scope {
            Scope::Document(selector) => {
                let page = self.page()?;
                let elements = match bounded(self.timeout(), "find", page.find_elements(selector.as_str())).await {
                    Ok(elements) => elements,
                    // CDP reports "no node found" as an error
                    Err(DriverError::Script(_)) => Vec::new(),
                    Err(e) => return Err(e),
                };
                let mut found = Vec::with_capacity(elements.len());
                for element in elements {
                    let id = self.next_handle;
                    self.next_handle += 1;
                    self.handles.insert(id, Slot::Native(element));
                    found.push(ElementHandle(id));
                }
                Ok(found)
            }
            Scope::Frame { frame, selector } => {
                let start = self.next_handle;
                let script = format!(
                    r#"(() => {{
                        const frame = document.querySelector({frame});
                        if (!frame) return 0;
                        let doc = null;
                        try {{ doc = frame.contentDocument; }} catch (e) {{ return 0; }}
                        if (!doc) return 0;
                        window.__pnHandles = window.__pnHandles || {{}};
                        const found = Array.from(doc.querySelectorAll({selector}));
                        found.forEach((el, i) => {{
                            el.__pnFrame = frame;
                            window.__pnHandles[{start} + i] = el;
                        }});
                        return found.length;
                    }})()"#,
                    frame = js_string(frame),
                    selector = js_string(selector),
                    start = start,
                );
                let count: u64 = self.eval(script).await?;
                self.next_handle += count;
                Ok((start..start + count)
                    .map(|id| {
                        self.handles.insert(id, Slot::Framed);
                        ElementHandle(id)
                    })
                    .collect())
            }
        }
    }

    async fn click(&mut self, element: ElementHandle) -> Result<(), DriverError> {
        match self.slot(element)? {
            Slot::Native(el) => {
                bounded(self.timeout(), "click", el.click()).await?;
                Ok(())
            }
            Slot::Framed => {
                let center = self
                    .eval_framed(
                        element.id(),
                        "(() => { const r = el.getBoundingClientRect(); \
                         const f = el.__pnFrame ? el.__pnFrame.getBoundingClientRect() : { left: 0, top: 0 }; \
                         return [f.left + r.left + r.width / 2, f.top + r.top + r.height / 2]; })()",
                    )
                    .await?;
                let x = center.get(0).and_then(|v| v.as_f64()).unwrap_or_default();
                let y = center.get(1).and_then(|v| v.as_f64()).unwrap_or_default();
                let page = self.page()?;
                bounded(self.timeout(), "click", page.click(Point::new(x, y))).await?;
                Ok(())
            }
        }
    }

    async fn fill(&mut self, element: ElementHandle, value: &str) -> Result<(), DriverError> {
        match self.slot(element)? {
            Slot::Native(el) => {
                self.call_on(el, "function() { this.value = ''; }").await?;
                bounded(self.timeout(), "focus", el.focus()).await?;
                bounded(self.timeout(), "type", el.type_str(value)).await?;
                Ok(())
            }
            Slot::Framed => {
                self.eval_framed(
                    element.id(),
                    &format!(
                        "(() => {{ el.value = {}; el.dispatchEvent(new Event('input', {{ bubbles: true }})); return true; }})()",
                        js_string(value)
                    ),
                )
                .await?;
                Ok(())
            }
        }
    }

    async fn select_option(
        &mut self,
        element: ElementHandle,
        value: &str,
    ) -> Result<(), DriverError> {
        let function = format!(
            "function() {{ this.value = {}; this.dispatchEvent(new Event('change', {{ bubbles: true }})); }}",
            js_string(value)
        );
        match self.slot(element)? {
            Slot::Native(el) => {
                self.call_on(el, &function).await?;
                Ok(())
            }
            Slot::Framed => Err(DriverError::Script(
                "select_option is not supported inside frames".into(),
            )),
        }
    }

    async fn read_text(&mut self, element: ElementHandle) -> Result<String, DriverError> {
        match self.slot(element)? {
            Slot::Native(el) => {
                let text = bounded(self.timeout(), "read text", el.inner_text()).await?;
                Ok(text.unwrap_or_default())
            }
            Slot::Framed => {
                let value = self
                    .eval_framed(element.id(), "el.innerText || el.textContent || ''")
                    .await?;
                Ok(value.as_str().unwrap_or_default().to_string())
            }
        }
    }

    async fn attribute(
        &mut self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        match self.slot(element)? {
            Slot::Native(el) => bounded(self.timeout(), "read attribute", el.attribute(name)).await,
            Slot::Framed => {
                let value = self
                    .eval_framed(element.id(), &format!("el.getAttribute({})", js_string(name)))
                    .await?;
                Ok(value.as_str().map(str::to_string))
            }
        }
    }

    async fn is_visible(&mut self, element: ElementHandle) -> Result<bool, DriverError> {
        const VISIBLE: &str = "const r = el.getBoundingClientRect(); \
             const s = (el.ownerDocument.defaultView || window).getComputedStyle(el); \
             return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';";
        let value = match self.slot(element)? {
            Slot::Native(el) => {
                let function = format!("function() {{ const el = this; {} }}", VISIBLE);
                self.call_on(el, &function).await?
            }
            Slot::Framed => Some(
                self.eval_framed(element.id(), &format!("(() => {{ {} }})()", VISIBLE))
                    .await?,
            ),
        };
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn content(&mut self) -> Result<String, DriverError> {
        let page = self.page()?;
        bounded(self.timeout(), "read content", page.content()).await
    }

    async fn frame_urls(&mut self) -> Result<Vec<String>, DriverError> {
        self.eval(
            "Array.from(document.querySelectorAll('iframe')).map(f => f.src || '')".to_string(),
        )
        .await
    }

    async fn go_back(&mut self) -> Result<(), DriverError> {
        self.invalidate_handles();
        let page = self.page()?;
        let history = bounded(
            self.timeout(),
            "read history",
            page.execute(GetNavigationHistoryParams::default()),
        )
        .await?;
        let index = history.result.current_index;
        if index <= 0 {
            return Err(DriverError::Navigation {
                url: "history".into(),
                message: "no earlier history entry".into(),
            });
        }
        let entry = history
            .result
            .entries
            .get((index - 1) as usize)
            .ok_or_else(|| DriverError::Script("history entry out of range".into()))?;
        bounded(
            self.timeout(),
            "history back",
            page.execute(NavigateToHistoryEntryParams::new(entry.id)),
        )
        .await?;
        self.wait_until_loaded().await
    }

    async fn inject_token(&mut self, token: &str) -> Result<(), DriverError> {
        let token = js_string(token);
        let script = format!(
            r#"(() => {{
                const field = document.getElementById('g-recaptcha-response')
                    || document.querySelector('textarea[name="g-recaptcha-response"]');
                if (!field) return 'element_not_found';
                field.style.display = 'block';
                field.innerHTML = {token};
                field.value = {token};
                try {{
                    const clients = (window.___grecaptcha_cfg || {{}}).clients || {{}};
                    for (const key of Object.keys(clients)) {{
                        const stack = [clients[key]];
                        while (stack.length) {{
                            const node = stack.pop();
                            if (!node || typeof node !== 'object') continue;
                            if (typeof node.callback === 'function') {{ node.callback({token}); stack.length = 0; break; }}
                            for (const child of Object.values(node)) {{
                                if (child && typeof child === 'object') stack.push(child);
                            }}
                        }}
                    }}
                }} catch (e) {{}}
                field.dispatchEvent(new Event('change', {{ bubbles: true }}));
                field.dispatchEvent(new Event('input', {{ bubbles: true }}));
                return 'success';
            }})()"#
        );
        let result: String = self.eval(script).await?;
        if result == "success" {
            Ok(())
        } else {
            Err(DriverError::NotFound("g-recaptcha-response".into()))
        }
    }

    async fn reset_session(&mut self) -> Result<(), DriverError> {
        info!("Resetting browser session state");
        self.invalidate_handles();
        let page = self.page()?;
        bounded(
            self.timeout(),
            "clear cookies",
            page.execute(ClearBrowserCookiesParams::default()),
        )
        .await?;
        if let Err(e) = page
            .evaluate("try { localStorage.clear(); sessionStorage.clear(); } catch (e) {}".to_string())
            .await
        {
            debug!("Storage clear skipped: {}", e);
        }
        self.navigate("about:blank").await
    }

    async fn release_transient_state(&mut self) -> Result<(), DriverError> {
        self.invalidate_handles();
        let page = self.page()?;
        if let Err(e) = page.evaluate("window.__pnHandles = {};".to_string()).await {
            debug!("Handle registry reset skipped: {}", e);
        }
        bounded(
            self.timeout(),
            "collect garbage",
            page.execute(CollectGarbageParams::default()),
        )
        .await?;
        debug!("Released transient browser memory");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.invalidate_handles();
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("Browser close reported: {}", e);
            }
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        Ok(())
    }
}

/// Find a Chrome executable on well-known paths, then on PATH.
fn find_chrome() -> Result<PathBuf, DriverError> {
    for path in CHROME_PATHS {
        let p = std::path::Path::new(path);
        if p.exists() {
            info!("Found Chrome at: {}", path);
            return Ok(p.to_path_buf());
        }
    }

    for cmd in CHROME_COMMANDS {
        if let Ok(path) = which::which(cmd) {
            info!("Found Chrome in PATH: {}", path.display());
            return Ok(path);
        }
    }

    Err(DriverError::Unavailable(
        "Chrome/Chromium not found. Please install it:\n\
         - Arch/Manjaro: sudo pacman -S chromium\n\
         - Ubuntu/Debian: sudo apt install chromium-browser\n\
         - Fedora: sudo dnf install chromium\n\
         - Or download from: https://www.google.com/chrome/"
            .into(),
    ))
}

fn build_config(config: &BrowserEngineConfig, chrome_path: PathBuf) -> Result<BrowserConfig, DriverError> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .window_size(config.window_width, config.window_height);

    // with_head means NOT headless
    if !config.headless {
        builder = builder.with_head();
    }

    if let Some(ref proxy) = config.proxy {
        builder = builder.arg(format!("--proxy-server={}", proxy));
    }

    builder = builder
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-dev-shm-usage")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--no-sandbox")
        .arg("--disable-gpu")
        // challenge frame documents must be reachable from the top-level page
        .arg("--disable-web-security")
        .arg("--disable-site-isolation-trials")
        .arg("--disable-features=IsolateOrigins,site-per-process");

    for arg in &config.chrome_args {
        builder = builder.arg(arg);
    }

    builder
        .build()
        .map_err(|e| DriverError::Unavailable(format!("Failed to build browser config: {}", e)))
}

/// Await a CDP future under the session timeout, mapping both failure modes.
async fn bounded<T, E, F>(timeout: Duration, what: &str, fut: F) -> Result<T, DriverError>
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DriverError::Script(format!("{}: {}", what, e))),
        Err(_) => Err(DriverError::Timeout(timeout, what.to_string())),
    }
}

fn script_error(e: impl std::fmt::Display) -> DriverError {
    DriverError::Script(e.to_string())
}

/// Quote a value as a JavaScript string literal.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}
