//! Single-listing apply attempt.

use crate::core::config::{ProbeConfig, Timings};
use crate::core::types::{ApplyOutcome, Candidate};
use crate::scraping::browser::{first_visible, BrowserError, BrowserSession, BrowserTab};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

const TAB_URL_POLL: Duration = Duration::from_millis(250);

pub struct ApplyExecutor<'a> {
    /// Registrable domain of the target site, without `www.`.
    pub site_domain: &'a str,
    pub probes: &'a ProbeConfig,
    pub timings: &'a Timings,
}

impl ApplyExecutor<'_> {
    /// Click the candidate's apply control and classify what happened.
    ///
    /// Never fails: every error becomes [`ApplyOutcome::Failed`]. A tab opened
    /// by the click is always closed before returning.
    pub async fn apply(&self, session: &dyn BrowserSession, candidate: &Candidate) -> ApplyOutcome {
        let tab = match session
            .click_watching_tabs(&candidate.apply_handle, self.timings.tab_watch)
            .await
        {
            Ok(tab) => tab,
            Err(e) => {
                warn!("apply: click failed for {:?}: {}", candidate.title, e);
                return ApplyOutcome::Failed(e.to_string());
            }
        };

        let Some(tab) = tab else {
            tokio::time::sleep(self.timings.apply_settle).await;
            info!("apply: ✅ {:?} (same tab)", candidate.title);
            return ApplyOutcome::AppliedSameTab;
        };

        let outcome = match self.finish_in_tab(tab.as_ref()).await {
            Ok(outcome) => outcome,
            Err(e) => ApplyOutcome::Failed(e.to_string()),
        };
        tab.close().await;

        match &outcome {
            ApplyOutcome::Failed(reason) => {
                warn!("apply: ⛔ {:?}: {}", candidate.title, reason)
            }
            other => info!("apply: {:?}: {}", candidate.title, other),
        }
        outcome
    }

    async fn finish_in_tab(&self, tab: &dyn BrowserTab) -> Result<ApplyOutcome, BrowserError> {
        let Some(url) = self.resolved_url(tab).await? else {
            return Ok(ApplyOutcome::Failed("tab never left about:blank".to_string()));
        };
        if !is_on_site(&url, self.site_domain) {
            debug!("apply: tab left the site ({})", url);
            return Ok(ApplyOutcome::SkippedExternal);
        }

        if let Some(confirm) = first_visible(
            tab,
            &self.probes.apply_confirmations,
            self.timings.confirmation_probe,
        )
        .await
        {
            if let Err(e) = tab.click(confirm, self.timings.confirmation_probe).await {
                debug!("apply: confirmation {} not clicked: {}", confirm, e);
            }
        }
        tokio::time::sleep(self.timings.apply_settle).await;
        Ok(ApplyOutcome::Applied)
    }

    /// A popped tab starts on an already-complete `about:blank`. Wait, within
    /// the tab load budget, for a real address and its document to parse.
    /// `None` when the tab never navigated.
    async fn resolved_url(&self, tab: &dyn BrowserTab) -> Result<Option<String>, BrowserError> {
        let deadline = Instant::now() + self.timings.tab_load;
        loop {
            let url = tab.current_url().await?;
            if !is_blank(&url) {
                tab.wait_loaded(deadline.saturating_duration_since(Instant::now()))
                    .await?;
                return tab.current_url().await.map(Some);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(TAB_URL_POLL).await;
        }
    }
}

fn is_blank(url: &str) -> bool {
    let url = url.trim();
    url.is_empty() || url.starts_with("about:blank")
}

/// Host is `domain` or a subdomain of it. Anything unparseable or hostless
/// counts as off-site.
pub fn is_on_site(url: &str, domain: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomains_of_the_site_are_on_site() {
        assert!(is_on_site("https://www.naukri.com/job-listings-x", "naukri.com"));
        assert!(is_on_site("https://naukri.com/", "naukri.com"));
        assert!(is_on_site("https://apply.NAUKRI.com/form", "naukri.com"));
    }

    #[test]
    fn lookalike_hosts_are_external() {
        assert!(!is_on_site("https://notnaukri.com/", "naukri.com"));
        assert!(!is_on_site("https://naukri.com.evil.io/", "naukri.com"));
        assert!(!is_on_site("https://careers.acme.com/apply", "naukri.com"));
    }

    #[test]
    fn initial_popup_documents_are_blank() {
        assert!(is_blank(""));
        assert!(is_blank("about:blank"));
        assert!(is_blank("about:blank#blocked"));
        assert!(!is_blank("https://www.naukri.com/apply/1"));
    }

    #[test]
    fn blank_or_garbage_urls_are_external() {
        assert!(!is_on_site("about:blank", "naukri.com"));
        assert!(!is_on_site("", "naukri.com"));
        assert!(!is_on_site("not a url", "naukri.com"));
    }
}
