//! Native browser management using `chromiumoxide`.
//!
//! This module is the **single source of truth** for:
//! * Finding a usable browser executable (Chrome → Chromium → Brave, cross-platform).
//! * Building the launch config (headless flags, UA rotation).
//! * [`ChromeLauncher`]: one fresh browser per apply cycle.
//! * [`ChromeSession`] / [`ChromePage`]: the CDP implementation of the
//!   [`super::browser`] traits, including tab tracking for apply popups.
//!
//! Element lookup works by evaluating a small script that finds the first
//! *visible* match for a [`Locator`], tags it with a one-off data attribute and
//! then resolves that attribute through CDP so clicks and key presses are real
//! input events rather than synthetic `el.click()` calls.

use super::browser::{
    BrowserError, BrowserLauncher, BrowserSession, BrowserTab, CardQuery, CardSnapshot, Locator,
    PageSurface,
};
use async_trait::async_trait;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::element::Element;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const TAB_CLICK_TIMEOUT: Duration = Duration::from_secs(5);
const MARK_ATTR: &str = "data-autoapply-target";
const APPLY_ATTR: &str = "data-autoapply-apply";

// ── Realistic User-Agent pool ────────────────────────────────────────────────

const DESKTOP_USER_AGENTS: &[&str] = &[
    // Chrome 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 132 – macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 131 – Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Edge 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 Edg/132.0.0.0",
];

/// Returns a randomly-chosen Chromium desktop User-Agent string.
///
/// Only Chromium UAs are in the pool: the engine underneath is always Blink,
/// and a Firefox/Safari UA on top of it is an easy bot tell.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    DESKTOP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. PATH scan – finds package-manager installs on all platforms.
/// 2. OS-specific well-known install paths.
///
/// The `CHROME_EXECUTABLE` override is resolved by the config layer and wins
/// over both (see [`ChromeLauncher::new`]).
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
            "brave",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/local/bin/chromium",
            "/snap/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Launch config builder ────────────────────────────────────────────────────

/// Build a `BrowserConfig` with automation-friendly defaults.
///
/// * `--no-sandbox` / `--disable-dev-shm-usage` keep Chromium alive in
///   containers and on small VPS hosts.
/// * `--disable-blink-features=AutomationControlled` hides `navigator.webdriver`.
pub fn build_config(
    exe: &str,
    headless: bool,
    width: u32,
    height: u32,
) -> Result<BrowserConfig, BrowserError> {
    let ua = random_user_agent();

    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width,
            height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(width, height)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--mute-audio")
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", ua));

    if !headless {
        builder = builder.with_head();
    }

    builder
        .build()
        .map_err(|e| BrowserError::Launch(format!("failed to build browser config: {}", e)))
}

// ── Launcher ─────────────────────────────────────────────────────────────────

/// Launches one isolated browser per cycle.
///
/// Every cycle gets a brand-new profile, so the only state carried between
/// runs is what the session cache re-injects as cookies.
pub struct ChromeLauncher {
    exe: Option<String>,
    headless: bool,
}

impl ChromeLauncher {
    /// `exe_override` wins over auto-discovery when set.
    pub fn new(exe_override: Option<String>, headless: bool) -> Self {
        let exe = exe_override.or_else(find_chrome_executable);
        match &exe {
            Some(path) => info!("browser: using executable {}", path),
            None => warn!(
                "browser: no Chromium-family executable found; cycles will fail until one is installed or CHROME_EXECUTABLE is set"
            ),
        }
        Self { exe, headless }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let exe = self.exe.as_deref().ok_or_else(|| {
            BrowserError::Launch(
                "No browser found. Install Chrome or Chromium, or set CHROME_EXECUTABLE.".into(),
            )
        })?;

        info!("🚀 browser: launching {} (headless={})", exe, self.headless);
        let config = build_config(exe, self.headless, 1366, 900)?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(format!("{} ({})", e, exe)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser: CDP handler error: {}", e);
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(p) => p,
            Err(e) => {
                let _ = browser.close().await;
                handler_task.abort();
                return Err(BrowserError::Launch(format!("failed to open tab: {}", e)));
            }
        };

        Ok(Box::new(ChromeSession {
            browser: Mutex::new(Some(browser)),
            main: ChromePage { page },
            handler_task: std::sync::Mutex::new(Some(handler_task)),
        }))
    }
}

// ── DOM helper scripts ───────────────────────────────────────────────────────

const DOM_HELPERS: &str = r#"
const __aaText = (el) => String(el.innerText || el.textContent || '').trim();
const __aaVisible = (el) => {
    const r = el.getBoundingClientRect();
    const s = window.getComputedStyle(el);
    return r.width > 0 && r.height > 0
        && s.visibility !== 'hidden'
        && s.display !== 'none'
        && !el.disabled;
};
const __aaMatch = (root, loc) => Array.from(root.querySelectorAll(loc.css)).filter(
    (el) => loc.kind !== 'text'
        || __aaText(el).toLowerCase().includes(String(loc.contains).toLowerCase())
);
"#;

fn mark_script(locator: &Locator, token: &str, clear: bool) -> Result<String, BrowserError> {
    let loc = serde_json::to_string(locator).map_err(|e| BrowserError::Protocol(e.to_string()))?;
    Ok(format!(
        r#"(() => {{
    {helpers}
    try {{
        const el = __aaMatch(document, {loc}).find(__aaVisible);
        if (!el) return false;
        if ({clear}) {{ el.value = ''; }}
        el.setAttribute('{attr}', '{token}');
        return true;
    }} catch (e) {{
        return false;
    }}
}})()"#,
        helpers = DOM_HELPERS,
        loc = loc,
        clear = clear,
        attr = MARK_ATTR,
        token = token,
    ))
}

fn snapshot_script(query: &CardQuery<'_>, limit: usize, token: &str) -> Result<String, BrowserError> {
    let q = serde_json::json!({
        "cards": query.cards,
        "titles": query.titles,
        "links": query.links,
        "apply": query.apply_buttons,
        "limit": limit,
        "token": token,
    });
    Ok(format!(
        r#"(() => {{
    {helpers}
    const q = {q};
    let cards;
    try {{
        cards = Array.from(document.querySelectorAll(q.cards.join(', '))).slice(0, q.limit);
    }} catch (e) {{
        return [];
    }}
    return cards.map((card, i) => {{
        let title = null;
        for (const sel of q.titles) {{
            try {{
                const el = card.querySelector(sel);
                const t = el ? __aaText(el) : '';
                if (t) {{ title = t; break; }}
            }} catch (e) {{}}
        }}
        let href = null;
        for (const sel of q.links) {{
            try {{
                const a = card.querySelector(sel);
                if (a && a.getAttribute('href')) {{ href = a.getAttribute('href'); break; }}
            }} catch (e) {{}}
        }}
        let apply = null;
        for (const loc of q.apply) {{
            try {{
                const el = __aaMatch(card, loc).find(__aaVisible);
                if (el) {{
                    apply = q.token + '-' + i;
                    el.setAttribute('{attr}', apply);
                    break;
                }}
            }} catch (e) {{}}
        }}
        return {{ title, href, apply }};
    }});
}})()"#,
        helpers = DOM_HELPERS,
        q = q,
        attr = APPLY_ATTR,
    ))
}

#[derive(Debug, Deserialize)]
struct RawCard {
    title: Option<String>,
    href: Option<String>,
    apply: Option<String>,
}

impl RawCard {
    fn into_snapshot(self) -> CardSnapshot {
        CardSnapshot {
            title: self.title,
            apply_handle: self
                .apply
                .map(|id| Locator::css(format!("[{}='{}']", APPLY_ATTR, id))),
            href: self.href,
        }
    }
}

fn protocol(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

fn fresh_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ── Page ─────────────────────────────────────────────────────────────────────

/// One CDP tab. Used directly as a [`BrowserTab`] for apply popups.
pub struct ChromePage {
    page: Page,
}

impl ChromePage {
    /// Tag the first visible match; returns the selector that resolves to it.
    async fn mark(&self, locator: &Locator, clear: bool) -> Option<String> {
        let token = fresh_token();
        let script = mark_script(locator, &token, clear).ok()?;
        match self.page.evaluate(script).await {
            Ok(v) => v
                .into_value::<bool>()
                .unwrap_or(false)
                .then(|| format!("[{}='{}']", MARK_ATTR, token)),
            Err(e) => {
                // Evaluation races with in-flight navigations; treat as not-yet-present.
                debug!("browser: probe {} evaluation failed: {}", locator, e);
                None
            }
        }
    }

    async fn wait_for(
        &self,
        locator: &Locator,
        clear: bool,
        timeout: Duration,
    ) -> Result<Element, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(selector) = self.mark(locator, clear).await {
                return self.page.find_element(selector).await.map_err(protocol);
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::NotFound(locator.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn ready_state(&self) -> Option<String> {
        self.page
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
    }
}

#[async_trait]
impl PageSurface for ChromePage {
    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self
            .page
            .url()
            .await
            .map_err(protocol)?
            .unwrap_or_default())
    }

    async fn wait_loaded(&self, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.ready_state().await.as_deref() {
                Some("interactive") | Some("complete") => return Ok(()),
                _ if Instant::now() >= deadline => return Err(BrowserError::Timeout(timeout)),
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    async fn is_visible(&self, locator: &Locator, timeout: Duration) -> bool {
        self.wait_for(locator, false, timeout).await.is_ok()
    }

    async fn click(&self, locator: &Locator, timeout: Duration) -> Result<(), BrowserError> {
        let el = self.wait_for(locator, false, timeout).await?;
        el.click().await.map_err(protocol)?;
        Ok(())
    }

    async fn fill(
        &self,
        locator: &Locator,
        value: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let el = self.wait_for(locator, true, timeout).await?;
        el.click().await.map_err(protocol)?;
        el.type_str(value).await.map_err(protocol)?;
        Ok(())
    }

    async fn press_enter(&self, locator: &Locator) -> Result<(), BrowserError> {
        let el = self.wait_for(locator, false, POLL_INTERVAL).await?;
        el.press_key("Enter").await.map_err(protocol)?;
        Ok(())
    }
}

#[async_trait]
impl BrowserTab for ChromePage {
    async fn close(self: Box<Self>) {
        if let Err(e) = self.page.close().await {
            debug!("browser: tab close error (non-fatal): {}", e);
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

pub struct ChromeSession {
    browser: Mutex<Option<Browser>>,
    main: ChromePage,
    handler_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ChromeSession {
    async fn open_target_ids(&self) -> Result<HashSet<String>, BrowserError> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| BrowserError::Protocol("browser already closed".into()))?;
        let pages = browser.pages().await.map_err(protocol)?;
        Ok(pages.iter().map(|p| p.target_id().inner().clone()).collect())
    }

    async fn find_new_page(&self, known: &HashSet<String>) -> Result<Option<Page>, BrowserError> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| BrowserError::Protocol("browser already closed".into()))?;
        let pages = browser.pages().await.map_err(protocol)?;
        Ok(pages
            .into_iter()
            .find(|p| !known.contains(p.target_id().inner())))
    }
}

#[async_trait]
impl PageSurface for ChromeSession {
    async fn current_url(&self) -> Result<String, BrowserError> {
        self.main.current_url().await
    }

    async fn wait_loaded(&self, timeout: Duration) -> Result<(), BrowserError> {
        self.main.wait_loaded(timeout).await
    }

    async fn is_visible(&self, locator: &Locator, timeout: Duration) -> bool {
        self.main.is_visible(locator, timeout).await
    }

    async fn click(&self, locator: &Locator, timeout: Duration) -> Result<(), BrowserError> {
        self.main.click(locator, timeout).await
    }

    async fn fill(
        &self,
        locator: &Locator,
        value: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        self.main.fill(locator, value, timeout).await
    }

    async fn press_enter(&self, locator: &Locator) -> Result<(), BrowserError> {
        self.main.press_enter(locator).await
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        match tokio::time::timeout(timeout, self.main.page.goto(url)).await {
            Ok(Ok(_)) => {
                self.main.wait_loaded(timeout).await?;
                Ok(())
            }
            Ok(Err(e)) => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(BrowserError::Timeout(timeout)),
        }
    }

    async fn set_cookies(&self, cookies: &[serde_json::Value]) -> Result<(), BrowserError> {
        use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetCookiesParams};

        // Malformed entries are skipped so a partially broken cache never blocks a run.
        let params: Vec<CookieParam> = cookies
            .iter()
            .filter_map(|v| serde_json::from_value::<CookieParam>(v.clone()).ok())
            .collect();
        if params.is_empty() {
            return Err(BrowserError::Protocol(
                "cookie cache contained no valid cookies".into(),
            ));
        }

        let count = params.len();
        self.main
            .page
            .execute(SetCookiesParams::new(params))
            .await
            .map_err(protocol)?;
        info!("browser: 💉 injected {} cached cookies", count);
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<serde_json::Value>, BrowserError> {
        let cookies = self.main.page.get_cookies().await.map_err(protocol)?;
        cookies
            .iter()
            .map(|c| serde_json::to_value(c).map_err(protocol))
            .collect()
    }

    async fn snapshot_cards(
        &self,
        query: &CardQuery<'_>,
        limit: usize,
    ) -> Result<Vec<CardSnapshot>, BrowserError> {
        let script = snapshot_script(query, limit, &fresh_token())?;
        let raw: Vec<RawCard> = self
            .main
            .page
            .evaluate(script)
            .await
            .map_err(protocol)?
            .into_value()
            .map_err(protocol)?;
        Ok(raw.into_iter().map(RawCard::into_snapshot).collect())
    }

    async fn click_watching_tabs(
        &self,
        locator: &Locator,
        watch: Duration,
    ) -> Result<Option<Box<dyn BrowserTab>>, BrowserError> {
        let known = self.open_target_ids().await?;
        self.main.click(locator, TAB_CLICK_TIMEOUT).await?;

        let deadline = Instant::now() + watch;
        loop {
            if let Some(page) = self.find_new_page(&known).await? {
                debug!("browser: apply action opened a new tab");
                return Ok(Some(Box::new(ChromePage { page })));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(&self) {
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                warn!("browser: close error (non-fatal): {}", e);
            }
            info!("🛑 browser: session released");
        }
        if let Some(task) = self
            .handler_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        // Drop cannot await; hand the close to the runtime so no Chromium is left behind.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        if let Ok(mut guard) = self.browser.try_lock() {
            if let Some(mut browser) = guard.take() {
                handle.spawn(async move {
                    let _ = browser.close().await;
                });
            }
        }
    }
}
