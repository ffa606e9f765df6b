use crate::bot::notifier::Notifier;
use crate::core::config::AppConfig;
use crate::features::ledger::PersistentLedger;
use crate::features::otp_channel::OtpChannel;
use crate::scraping::browser::BrowserLauncher;
use crate::tools::cycle::CycleOrchestrator;
use std::sync::Arc;

/// Process-wide handles shared by the scheduler and the chat dispatcher.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Single-slot handoff between a waiting login and `/otp`.
    pub otp: Arc<OtpChannel>,
    pub notifier: Arc<dyn Notifier>,
    pub orchestrator: Arc<CycleOrchestrator>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("otp_pending", &self.otp.is_pending())
            .field("cycle_running", &self.orchestrator.is_running())
            .finish()
    }
}

impl AppState {
    pub fn new(
        config: AppConfig,
        notifier: Arc<dyn Notifier>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let config = Arc::new(config);
        let otp = Arc::new(OtpChannel::new());
        let orchestrator = Arc::new(CycleOrchestrator::new(
            config.clone(),
            otp.clone(),
            notifier.clone(),
            launcher,
        ));
        Self {
            config,
            otp,
            notifier,
            orchestrator,
        }
    }

    /// Entries currently on disk; the ledger is only held in memory during a cycle.
    pub fn ledger_size(&self) -> usize {
        PersistentLedger::load(self.config.ledger_path()).len()
    }

    pub fn has_saved_session(&self) -> bool {
        self.orchestrator.session_store().exists()
    }
}
