//! Browser seam for the apply cycle.
//!
//! The cycle never talks to chromiumoxide directly. It drives a
//! [`BrowserSession`] (the authenticated main tab), the [`BrowserTab`]s that
//! apply flows pop open, and a [`BrowserLauncher`] that hands out a fresh
//! session per cycle. The native CDP implementation lives in
//! [`super::browser_manager`]; tests drive the same traits with scripted fakes.
//!
//! Elements are addressed through [`Locator`]s rather than raw selectors so
//! that text-matching probes ("a button that says Apply") can be expressed as
//! data and overridden from the probe file without code changes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("no visible element matched {0}")]
    NotFound(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl BrowserError {
    /// Network-level failures that are worth another navigation attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Navigation { .. } | Self::Timeout(_))
    }
}

/// One way of finding an element on a page.
///
/// `Text` matches elements selected by `css` whose rendered text contains
/// `contains` (case-insensitive), which covers the `button:has-text('Apply')`
/// style probes that plain CSS cannot express.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    Css { css: String },
    Text { css: String, contains: String },
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Self::Css { css: css.into() }
    }

    pub fn text(css: impl Into<String>, contains: impl Into<String>) -> Self {
        Self::Text {
            css: css.into(),
            contains: contains.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css { css } => write!(f, "{css}"),
            Self::Text { css, contains } => write!(f, "{css} containing {contains:?}"),
        }
    }
}

/// Selector lists used to enumerate result entries on a search page.
#[derive(Debug, Clone, Copy)]
pub struct CardQuery<'a> {
    /// Result entry containers, joined into one selector so document order holds.
    pub cards: &'a [String],
    /// Title probes tried in order inside each entry.
    pub titles: &'a [String],
    /// Link probes tried in order inside each entry.
    pub links: &'a [String],
    /// Apply-action probes tried in order inside each entry.
    pub apply_buttons: &'a [Locator],
}

/// Raw per-entry extraction, before any filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardSnapshot {
    pub title: Option<String>,
    /// Set only when an apply control is present *and* visibly actionable.
    pub apply_handle: Option<Locator>,
    pub href: Option<String>,
}

/// Page-level DOM primitives shared by the main tab and popped tabs.
#[async_trait]
pub trait PageSurface: Send + Sync {
    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Wait until the document has parsed (`readyState != "loading"`).
    async fn wait_loaded(&self, timeout: Duration) -> Result<(), BrowserError>;

    /// Poll for a visible match until `timeout`. Never fails.
    async fn is_visible(&self, locator: &Locator, timeout: Duration) -> bool;

    async fn click(&self, locator: &Locator, timeout: Duration) -> Result<(), BrowserError>;

    /// Replace the current value of an input with `value`.
    async fn fill(
        &self,
        locator: &Locator,
        value: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    async fn press_enter(&self, locator: &Locator) -> Result<(), BrowserError>;
}

/// A secondary browsing context opened by an apply action.
#[async_trait]
pub trait BrowserTab: PageSurface {
    async fn close(self: Box<Self>);
}

/// The main tab of one cycle's browser.
#[async_trait]
pub trait BrowserSession: PageSurface {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn set_cookies(&self, cookies: &[serde_json::Value]) -> Result<(), BrowserError>;

    async fn cookies(&self) -> Result<Vec<serde_json::Value>, BrowserError>;

    /// Snapshot at most `limit` result entries in document order.
    async fn snapshot_cards(
        &self,
        query: &CardQuery<'_>,
        limit: usize,
    ) -> Result<Vec<CardSnapshot>, BrowserError>;

    /// Click `locator` and report a browsing context that opened within `watch`.
    async fn click_watching_tabs(
        &self,
        locator: &Locator,
        watch: Duration,
    ) -> Result<Option<Box<dyn BrowserTab>>, BrowserError>;

    /// Release the browser. Safe to call more than once.
    async fn close(&self);
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// First locator in `probes` that becomes visible within its own `timeout`.
pub async fn first_visible<'l, S>(
    surface: &S,
    probes: &'l [Locator],
    timeout: Duration,
) -> Option<&'l Locator>
where
    S: PageSurface + ?Sized,
{
    for locator in probes {
        if surface.is_visible(locator, timeout).await {
            return Some(locator);
        }
    }
    None
}

/// Click the first locator in `probes` that accepts a click within `timeout`.
pub async fn click_first<'l, S>(
    surface: &S,
    probes: &'l [Locator],
    timeout: Duration,
) -> Result<&'l Locator, BrowserError>
where
    S: PageSurface + ?Sized,
{
    let mut last = None;
    for locator in probes {
        match surface.click(locator, timeout).await {
            Ok(()) => return Ok(locator),
            Err(e) => last = Some(e),
        }
    }
    Err(last.unwrap_or_else(|| BrowserError::NotFound("<empty probe list>".to_string())))
}

/// Fill the first locator in `probes` that accepts input within `timeout`.
pub async fn fill_first<'l, S>(
    surface: &S,
    probes: &'l [Locator],
    value: &str,
    timeout: Duration,
) -> Result<&'l Locator, BrowserError>
where
    S: PageSurface + ?Sized,
{
    let mut last = None;
    for locator in probes {
        match surface.fill(locator, value, timeout).await {
            Ok(()) => return Ok(locator),
            Err(e) => last = Some(e),
        }
    }
    Err(last.unwrap_or_else(|| BrowserError::NotFound("<empty probe list>".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_round_trips_through_probe_file_shape() {
        let raw = r##"[
            {"kind": "css", "css": "#login_Layer"},
            {"kind": "text", "css": "button", "contains": "Apply"}
        ]"##;
        let parsed: Vec<Locator> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed[0], Locator::css("#login_Layer"));
        assert_eq!(parsed[1], Locator::text("button", "Apply"));
    }

    #[test]
    fn only_network_failures_are_transient() {
        assert!(BrowserError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(BrowserError::Navigation {
            url: "https://example.com".into(),
            reason: "net::ERR_CONNECTION_RESET".into()
        }
        .is_transient());
        assert!(!BrowserError::NotFound("h2".into()).is_transient());
        assert!(!BrowserError::Launch("no chrome".into()).is_transient());
    }

    #[test]
    fn text_locator_display_names_both_parts() {
        let l = Locator::text("button", "Submit");
        assert_eq!(l.to_string(), "button containing \"Submit\"");
    }
}
