//! Listing discovery on the search-results page.
//!
//! Document order is application priority; there is no separate ranking.

use crate::core::config::{ProbeConfig, Timings};
use crate::core::types::Candidate;
use crate::scraping::browser::{BrowserError, BrowserSession, CardQuery, CardSnapshot};
use aho_corasick::AhoCorasick;
use backoff::backoff::Backoff;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("search unavailable after {attempts} attempt(s): {source}")]
    SearchUnavailable {
        attempts: u32,
        #[source]
        source: BrowserError,
    },

    #[error("could not read search results: {0}")]
    Extraction(#[source] BrowserError),
}

/// Search parameters for one scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanParams<'a> {
    pub keywords: &'a str,
    pub location: &'a str,
    pub exclude: &'a [String],
    pub max_candidates: usize,
}

/// `{base}/{kw-slug}-jobs-in-{loc-slug}?k={kw}&l={loc}`.
pub fn search_url(base: &Url, keywords: &str, location: &str) -> Url {
    let slug = |s: &str| s.split_whitespace().collect::<Vec<_>>().join("-");
    let mut url = base.clone();
    url.set_path(&format!(
        "{}-jobs-in-{}",
        slug(keywords),
        slug(location)
    ));
    url.query_pairs_mut()
        .clear()
        .append_pair("k", keywords)
        .append_pair("l", location);
    url
}

/// Case-insensitive substring exclusion over listing titles.
pub struct ExclusionFilter {
    patterns: Vec<String>,
    matcher: Option<AhoCorasick>,
}

impl ExclusionFilter {
    pub fn new(tokens: &[String]) -> Self {
        let patterns: Vec<String> = tokens
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        let matcher = if patterns.is_empty() {
            None
        } else {
            match AhoCorasick::new(&patterns) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("scanner: exclusion matcher build failed ({}); using linear scan", e);
                    None
                }
            }
        };
        Self { patterns, matcher }
    }

    pub fn is_excluded(&self, title: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let lowered = title.to_lowercase();
        match &self.matcher {
            Some(m) => m.is_match(&lowered),
            None => self.patterns.iter().any(|p| lowered.contains(p.as_str())),
        }
    }
}

/// Fixed delay between a bounded number of attempts.
#[derive(Debug, Clone)]
struct FixedRetries {
    delay: Duration,
    retries: u32,
    used: u32,
}

impl FixedRetries {
    fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            delay,
            retries: attempts.saturating_sub(1),
            used: 0,
        }
    }
}

impl Backoff for FixedRetries {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.used >= self.retries {
            return None;
        }
        self.used += 1;
        Some(self.delay)
    }

    fn reset(&mut self) {
        self.used = 0;
    }
}

pub struct ListingScanner<'a> {
    pub base_url: &'a Url,
    pub probes: &'a ProbeConfig,
    pub timings: &'a Timings,
}

impl ListingScanner<'_> {
    pub async fn scan(
        &self,
        session: &dyn BrowserSession,
        params: ScanParams<'_>,
    ) -> Result<Vec<Candidate>, ScanError> {
        let url = search_url(self.base_url, params.keywords, params.location);
        self.open_results(session, url.as_str()).await?;
        tokio::time::sleep(self.timings.results_settle).await;

        let query = CardQuery {
            cards: &self.probes.result_cards,
            titles: &self.probes.card_titles,
            links: &self.probes.card_links,
            apply_buttons: &self.probes.card_apply_buttons,
        };
        let cards = session
            .snapshot_cards(&query, params.max_candidates)
            .await
            .map_err(ScanError::Extraction)?;

        let candidates = self.filter(cards, params);
        info!(
            "scanner: {} candidate(s) for {:?} in {:?}",
            candidates.len(),
            params.keywords,
            params.location
        );
        Ok(candidates)
    }

    async fn open_results(&self, session: &dyn BrowserSession, url: &str) -> Result<(), ScanError> {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let navigation = self.timings.navigation;

        backoff::future::retry(
            FixedRetries::new(self.timings.scan_attempts, self.timings.scan_retry_delay),
            move || async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                match session.goto(url, navigation).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_transient() => {
                        warn!("scanner: results navigation attempt {} failed: {}", n, e);
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            },
        )
        .await
        .map_err(|source| ScanError::SearchUnavailable {
            attempts: counter.load(Ordering::SeqCst),
            source,
        })
    }

    /// Drop untitled, excluded, non-actionable and duplicate entries.
    fn filter(&self, cards: Vec<CardSnapshot>, params: ScanParams<'_>) -> Vec<Candidate> {
        let exclusions = ExclusionFilter::new(params.exclude);
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for card in cards.into_iter().take(params.max_candidates) {
            let title = card.title.as_deref().map(str::trim).unwrap_or_default();
            if title.is_empty() {
                continue;
            }
            if exclusions.is_excluded(title) {
                debug!("scanner: excluded {:?}", title);
                continue;
            }
            let Some(apply_handle) = card.apply_handle else {
                debug!("scanner: no actionable apply control for {:?}", title);
                continue;
            };
            let external_link = card
                .href
                .as_deref()
                .filter(|h| !h.trim().is_empty())
                .and_then(|h| self.base_url.join(h.trim()).ok())
                .map(|u| u.to_string());

            let candidate = Candidate {
                title: title.to_string(),
                apply_handle,
                external_link,
            };
            if seen.insert(candidate.ledger_key().to_string()) {
                out.push(candidate);
            }
        }
        out
    }
}
