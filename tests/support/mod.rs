//! Scripted in-memory browser and recording notifier for cycle tests.
#![allow(dead_code)]

use async_trait::async_trait;
use autoapply::bot::commands::Replier;
use autoapply::bot::Notifier;
use autoapply::core::config::{AppConfig, ProbeConfig};
use autoapply::scraping::browser::{
    BrowserError, BrowserLauncher, BrowserSession, BrowserTab, CardQuery, CardSnapshot, Locator,
    PageSurface,
};
use autoapply::AppState;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE: &str = "https://www.naukri.com";

pub fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// What clicking a listing's apply control does.
#[derive(Debug, Clone)]
pub enum Behaviour {
    NewTab(Popup),
    SameTab,
    Fail,
}

/// A tab popped by an apply click.
#[derive(Debug, Clone)]
pub struct Popup {
    pub url: String,
    /// `current_url` reads that still report `about:blank`.
    pub blank_reads: u32,
    pub confirmation: bool,
    pub load_fails: bool,
}

impl Popup {
    pub fn to(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            blank_reads: 0,
            confirmation: true,
            load_fails: false,
        }
    }

    pub fn blank_for(mut self, reads: u32) -> Self {
        self.blank_reads = reads;
        self
    }

    pub fn without_confirmation(mut self) -> Self {
        self.confirmation = false;
        self
    }

    pub fn never_loads(mut self) -> Self {
        self.load_fails = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Listing {
    pub title: String,
    pub href: Option<String>,
    pub actionable: bool,
    pub behaviour: Behaviour,
}

impl Listing {
    /// On-site listing that applies through a popped tab.
    pub fn applies(title: &str, slug: &str) -> Self {
        Self {
            title: title.to_string(),
            href: Some(format!("/{slug}")),
            actionable: true,
            behaviour: Behaviour::NewTab(Popup::to(format!("{BASE}/apply/{slug}"))),
        }
    }

    pub fn with(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn ledger_key(&self) -> String {
        match &self.href {
            Some(h) => format!("{BASE}{h}"),
            None => self.title.clone(),
        }
    }

    fn handle(&self, index: usize) -> Locator {
        Locator::css(format!("[data-test-apply='{index}']"))
    }
}

/// Site behaviour for one test.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub logged_in: bool,
    pub otp_required: bool,
    pub listings: Vec<Listing>,
    /// Results navigations that fail transiently before one succeeds.
    pub results_nav_failures: u32,
    pub launch_fails: bool,
}

#[derive(Debug, Default)]
pub struct Log {
    pub launches: usize,
    pub sessions_closed: usize,
    pub tabs_opened: usize,
    pub tabs_closed: usize,
    pub gotos: Vec<String>,
    pub cookies_injected: usize,
    /// Titles whose apply control was clicked, in order.
    pub apply_clicks: Vec<String>,
    pub confirmations: usize,
    pub fills: Vec<(Locator, String)>,
    pub enters: usize,
}

#[derive(Clone)]
pub struct Site {
    script: Arc<Mutex<Script>>,
    pub log: Arc<Mutex<Log>>,
    probes: Arc<ProbeConfig>,
}

impl Site {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            log: Arc::new(Mutex::new(Log::default())),
            probes: Arc::new(ProbeConfig::default()),
        }
    }

    pub fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, Log> {
        self.log.lock().unwrap()
    }

    pub fn launcher(&self) -> Arc<FakeLauncher> {
        Arc::new(FakeLauncher { site: self.clone() })
    }

    fn listing_for(&self, locator: &Locator) -> Option<Listing> {
        let script = self.script();
        script
            .listings
            .iter()
            .enumerate()
            .find(|(i, l)| &l.handle(*i) == locator)
            .map(|(_, l)| l.clone())
    }
}

pub struct FakeLauncher {
    site: Site,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.site.log().launches += 1;
        if self.site.script().launch_fails {
            return Err(BrowserError::Launch("no chrome in test".into()));
        }
        Ok(Box::new(FakeSession {
            site: self.site.clone(),
            closed: Mutex::new(false),
        }))
    }
}

pub struct FakeSession {
    site: Site,
    closed: Mutex<bool>,
}

#[async_trait]
impl PageSurface for FakeSession {
    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.site.log().gotos.last().cloned().unwrap_or_default())
    }

    async fn wait_loaded(&self, _timeout: Duration) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn is_visible(&self, locator: &Locator, timeout: Duration) -> bool {
        let probes = &self.site.probes;
        let visible = {
            let script = self.site.script();
            (script.logged_in && probes.logged_in_markers.first() == Some(locator))
                || (script.otp_required && probes.otp_fields.first() == Some(locator))
        };
        if !visible {
            tokio::time::sleep(timeout).await;
        }
        visible
    }

    async fn click(&self, _locator: &Locator, _timeout: Duration) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn fill(
        &self,
        locator: &Locator,
        value: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let probes = &self.site.probes;
        let known = probes.identity_fields.first() == Some(locator)
            || probes.secret_fields.first() == Some(locator)
            || probes.otp_fields.first() == Some(locator);
        if !known {
            tokio::time::sleep(timeout).await;
            return Err(BrowserError::NotFound(locator.to_string()));
        }
        self.site
            .log()
            .fills
            .push((locator.clone(), value.to_string()));
        Ok(())
    }

    async fn press_enter(&self, _locator: &Locator) -> Result<(), BrowserError> {
        self.site.log().enters += 1;
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.site.log().gotos.push(url.to_string());
        if url.contains("-jobs-in-") {
            let mut script = self.site.script();
            if script.results_nav_failures > 0 {
                script.results_nav_failures -= 1;
                return Err(BrowserError::Timeout(timeout));
            }
        }
        Ok(())
    }

    async fn set_cookies(&self, cookies: &[serde_json::Value]) -> Result<(), BrowserError> {
        self.site.log().cookies_injected += cookies.len();
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<serde_json::Value>, BrowserError> {
        Ok(vec![serde_json::json!({
            "name": "nauk_at",
            "value": "token",
            "domain": ".naukri.com",
            "path": "/"
        })])
    }

    async fn snapshot_cards(
        &self,
        _query: &CardQuery<'_>,
        limit: usize,
    ) -> Result<Vec<CardSnapshot>, BrowserError> {
        let script = self.site.script();
        Ok(script
            .listings
            .iter()
            .enumerate()
            .take(limit)
            .map(|(i, l)| CardSnapshot {
                title: Some(l.title.clone()),
                apply_handle: l.actionable.then(|| l.handle(i)),
                href: l.href.clone(),
            })
            .collect())
    }

    async fn click_watching_tabs(
        &self,
        locator: &Locator,
        watch: Duration,
    ) -> Result<Option<Box<dyn BrowserTab>>, BrowserError> {
        let listing = self
            .site
            .listing_for(locator)
            .ok_or_else(|| BrowserError::NotFound(locator.to_string()))?;
        self.site.log().apply_clicks.push(listing.title.clone());

        match listing.behaviour {
            Behaviour::NewTab(popup) => {
                self.site.log().tabs_opened += 1;
                Ok(Some(Box::new(FakeTab {
                    site: self.site.clone(),
                    blank_reads: Mutex::new(popup.blank_reads),
                    popup,
                })))
            }
            Behaviour::SameTab => {
                tokio::time::sleep(watch).await;
                Ok(None)
            }
            Behaviour::Fail => Err(BrowserError::Protocol("node detached".into())),
        }
    }

    async fn close(&self) {
        let mut closed = self.closed.lock().unwrap();
        if !*closed {
            *closed = true;
            self.site.log().sessions_closed += 1;
        }
    }
}

pub struct FakeTab {
    site: Site,
    popup: Popup,
    blank_reads: Mutex<u32>,
}

#[async_trait]
impl PageSurface for FakeTab {
    async fn current_url(&self) -> Result<String, BrowserError> {
        let mut blank = self.blank_reads.lock().unwrap();
        if *blank > 0 {
            *blank -= 1;
            return Ok("about:blank".to_string());
        }
        Ok(self.popup.url.clone())
    }

    async fn wait_loaded(&self, timeout: Duration) -> Result<(), BrowserError> {
        if self.popup.load_fails {
            tokio::time::sleep(timeout).await;
            return Err(BrowserError::Timeout(timeout));
        }
        Ok(())
    }

    async fn is_visible(&self, locator: &Locator, timeout: Duration) -> bool {
        if self.popup.confirmation && self.site.probes.apply_confirmations.first() == Some(locator) {
            return true;
        }
        tokio::time::sleep(timeout).await;
        false
    }

    async fn click(&self, _locator: &Locator, _timeout: Duration) -> Result<(), BrowserError> {
        self.site.log().confirmations += 1;
        Ok(())
    }

    async fn fill(&self, l: &Locator, _v: &str, _t: Duration) -> Result<(), BrowserError> {
        Err(BrowserError::NotFound(l.to_string()))
    }

    async fn press_enter(&self, l: &Locator) -> Result<(), BrowserError> {
        Err(BrowserError::NotFound(l.to_string()))
    }
}

#[async_trait]
impl BrowserTab for FakeTab {
    async fn close(self: Box<Self>) {
        self.site.log().tabs_closed += 1;
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, bool)>>,
    target: Mutex<Option<i64>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str, emphasis: bool) {
        self.sent.lock().unwrap().push((text.to_string(), emphasis));
    }

    fn register_target(&self, chat_id: i64) -> bool {
        let mut target = self.target.lock().unwrap();
        if target.is_some() {
            return false;
        }
        *target = Some(chat_id);
        true
    }
}

#[derive(Default)]
pub struct RecordingReplier {
    pub replies: Mutex<Vec<String>>,
}

impl RecordingReplier {
    pub fn replies(&self) -> Vec<String> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Replier for RecordingReplier {
    async fn reply(&self, text: &str, _emphasis: bool) {
        self.replies.lock().unwrap().push(text.to_string());
    }
}

/// Config rooted in `data_dir`, with `extra` env pairs on top.
pub fn config(data_dir: &Path, extra: &[(&str, &str)]) -> AppConfig {
    let mut env: HashMap<String, String> = [
        ("TELEGRAM_BOT_TOKEN", "123:test"),
        ("SITE_EMAIL", "me@example.com"),
        ("SITE_PASSWORD", "hunter2"),
        ("SEARCH_KEYWORDS", "Rust Developer"),
        ("SEARCH_LOCATION", "Chennai"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    env.insert("AUTOAPPLY_DATA_DIR".into(), data_dir.display().to_string());
    for (k, v) in extra {
        env.insert(k.to_string(), v.to_string());
    }
    AppConfig::from_lookup(|k| env.get(k).cloned()).unwrap()
}

pub struct Harness {
    pub site: Site,
    pub notifier: Arc<RecordingNotifier>,
    pub state: Arc<AppState>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(script: Script, extra: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir, script, extra)
    }

    pub fn in_dir(dir: tempfile::TempDir, script: Script, extra: &[(&str, &str)]) -> Self {
        let site = Site::new(script);
        let notifier = Arc::new(RecordingNotifier::default());
        let state = Arc::new(AppState::new(
            config(dir.path(), extra),
            notifier.clone(),
            site.launcher(),
        ));
        Self {
            site,
            notifier,
            state,
            dir,
        }
    }

    pub fn ledger_path(&self) -> std::path::PathBuf {
        self.state.config.ledger_path()
    }

    pub fn ledger_entries(&self) -> Vec<String> {
        match std::fs::read_to_string(self.ledger_path()) {
            Ok(raw) => serde_json::from_str(&raw).unwrap(),
            Err(_) => Vec::new(),
        }
    }
}
