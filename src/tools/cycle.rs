//! One complete login → scan → apply → report run.
//!
//! A cycle owns its browser for its whole lifetime and releases it on every
//! exit path. Only one cycle may be active per process: the scheduled trigger
//! and `/runnow` both go through [`CycleOrchestrator::run`], and whichever
//! arrives second is turned away with [`CycleError::AlreadyRunning`].

use crate::bot::notifier::Notifier;
use crate::core::config::AppConfig;
use crate::core::types::{CycleReport, RunSummary};
use crate::features::ledger::PersistentLedger;
use crate::features::otp_channel::OtpChannel;
use crate::features::session_store::SessionStore;
use crate::scraping::browser::{BrowserLauncher, BrowserSession};
use crate::tools::apply::ApplyExecutor;
use crate::tools::scanner::{ListingScanner, ScanParams};
use crate::tools::session::SessionEstablisher;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CycleError {
    #[error("a cycle is already running")]
    AlreadyRunning,
}

/// Serializes cycles: at most one holder at a time, never queued.
#[derive(Debug, Default)]
pub struct CycleGuard {
    lock: Mutex<()>,
}

impl CycleGuard {
    pub fn try_begin(&self) -> Result<MutexGuard<'_, ()>, CycleError> {
        self.lock.try_lock().map_err(|_| CycleError::AlreadyRunning)
    }

    pub fn is_active(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

/// How far a cycle got before reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Completed,
    NoJobs,
    Aborted,
}

pub struct CycleOrchestrator {
    config: Arc<AppConfig>,
    otp: Arc<OtpChannel>,
    notifier: Arc<dyn Notifier>,
    launcher: Arc<dyn BrowserLauncher>,
    store: SessionStore,
    guard: CycleGuard,
}

impl CycleOrchestrator {
    pub fn new(
        config: Arc<AppConfig>,
        otp: Arc<OtpChannel>,
        notifier: Arc<dyn Notifier>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let store = SessionStore::new(config.cookies_path());
        Self {
            config,
            otp,
            notifier,
            launcher,
            store,
            guard: CycleGuard::default(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_active()
    }

    /// Run one cycle and notify the operator exactly once about its result.
    ///
    /// Login, search and per-listing failures are reported in the returned
    /// notes, not as errors.
    pub async fn run(&self) -> Result<CycleReport, CycleError> {
        let _active = self.guard.try_begin()?;
        let config = &self.config;
        info!(
            "cycle: starting for {:?} in {:?}",
            config.search.keywords, config.search.location
        );

        let mut ledger = PersistentLedger::load(config.ledger_path());
        let mut summary = RunSummary::new();

        let flow = match self.launcher.launch().await {
            Ok(session) => {
                let flow = self.drive(session.as_ref(), &mut ledger, &mut summary).await;
                session.close().await;
                flow
            }
            Err(e) => {
                error!("cycle: browser launch failed: {}", e);
                summary.note(format!("⛔ Browser unavailable: {e}"));
                Flow::Aborted
            }
        };

        if flow == Flow::NoJobs {
            let text = format!(
                "⚠️ No jobs found for *{}* in *{}*.",
                config.search.keywords, config.search.location
            );
            self.notifier.send(&text, true).await;
            info!("cycle: finished, no jobs found");
            return Ok(CycleReport {
                applied: 0,
                notes: summary.notes().to_vec(),
                summary: text,
            });
        }

        if flow == Flow::Completed {
            match ledger.flush() {
                Ok(()) => debug!("cycle: ledger saved ({} entries)", ledger.len()),
                Err(e) => warn!("cycle: ledger not saved: {}", e),
            }
        }

        let now = Utc::now().with_timezone(&config.schedule.offset);
        let text = summary.render(now, &config.search.keywords, &config.search.location);
        self.notifier.send(&text, true).await;

        info!("cycle: finished, applied {}", summary.applied());
        Ok(CycleReport {
            applied: summary.applied(),
            notes: summary.notes().to_vec(),
            summary: text,
        })
    }

    async fn drive(
        &self,
        session: &dyn BrowserSession,
        ledger: &mut PersistentLedger,
        summary: &mut RunSummary,
    ) -> Flow {
        let config = &self.config;

        let establisher = SessionEstablisher {
            site: &config.site,
            probes: &config.probes,
            timings: &config.timings,
            otp_timeout: config.otp_timeout,
            store: &self.store,
            otp: self.otp.as_ref(),
            notifier: self.notifier.as_ref(),
        };
        match establisher.establish(session).await {
            Ok(note) => summary.note(format!("🔑 {note}")),
            Err(e) => {
                error!("cycle: login failed: {}", e);
                summary.note(format!("⛔ Login failed: {e}"));
                return Flow::Aborted;
            }
        }

        let scanner = ListingScanner {
            base_url: &config.site.base_url,
            probes: &config.probes,
            timings: &config.timings,
        };
        let params = ScanParams {
            keywords: &config.search.keywords,
            location: &config.search.location,
            exclude: &config.search.exclude,
            max_candidates: config.search.max_candidates,
        };
        let candidates = match scanner.scan(session, params).await {
            Ok(c) if c.is_empty() => return Flow::NoJobs,
            Ok(c) => c,
            Err(e) => {
                error!("cycle: {}", e);
                summary.note(format!("⛔ Search failed: {e}"));
                return Flow::Aborted;
            }
        };

        let domain = config.site.domain();
        let executor = ApplyExecutor {
            site_domain: &domain,
            probes: &config.probes,
            timings: &config.timings,
        };
        let cap = config.max_applications_per_run;

        for candidate in &candidates {
            if summary.applied() >= cap {
                info!("cycle: per-run cap of {} reached", cap);
                break;
            }
            let key = candidate.ledger_key();
            if ledger.contains(key) {
                debug!("cycle: already applied to {:?}", key);
                continue;
            }
            let outcome = executor.apply(session, candidate).await;
            if outcome.is_applied() {
                ledger.add(key);
            }
            summary.record(candidate, &outcome);
        }
        Flow::Completed
    }
}
