//! Recurring wall-clock trigger.
//!
//! Each configured `HH:MM` slot becomes a daily cron schedule evaluated in the
//! configured UTC offset. The trigger loop sleeps until the nearest slot and
//! asks the orchestrator for a run; a slot that lands while a cycle is still
//! active (e.g. a `/runnow` waiting on an OTP) is skipped, not queued.

use crate::core::config::ScheduleConfig;
use crate::tools::cycle::{CycleError, CycleOrchestrator};
use chrono::{DateTime, FixedOffset, NaiveTime, Timelike, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DailySchedule {
    slots: Vec<(NaiveTime, Schedule)>,
    offset: FixedOffset,
}

impl DailySchedule {
    pub fn new(config: &ScheduleConfig) -> Result<Self, cron::error::Error> {
        let slots = config
            .times
            .iter()
            .map(|t| {
                // sec min hour day-of-month month day-of-week
                let expr = format!("0 {} {} * * *", t.minute(), t.hour());
                Schedule::from_str(&expr).map(|s| (*t, s))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            slots,
            offset: config.offset,
        })
    }

    /// Earliest slot strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = now.with_timezone(&self.offset);
        self.slots
            .iter()
            .filter_map(|(_, s)| s.after(&local).next())
            .min()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Human-readable slot list, e.g. `08:00, 20:00 (UTC+05:30)`.
    pub fn describe(&self) -> String {
        let times: Vec<String> = self
            .slots
            .iter()
            .map(|(t, _)| t.format("%H:%M").to_string())
            .collect();
        format!("{} (UTC{})", times.join(", "), self.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Run the trigger loop on the current runtime until no slot remains.
pub fn spawn(
    schedule: DailySchedule,
    orchestrator: Arc<CycleOrchestrator>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = schedule.next_after(now) else {
                warn!("scheduler: no upcoming slot — scheduled runs disabled");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!(
                "scheduler: next run at {} (in {}m)",
                next.with_timezone(&schedule.offset).format("%Y-%m-%d %H:%M"),
                wait.as_secs() / 60
            );
            tokio::time::sleep(wait).await;

            match orchestrator.run().await {
                Ok(report) => info!("scheduler: slot run finished — applied {}", report.applied),
                Err(CycleError::AlreadyRunning) => {
                    warn!("scheduler: a cycle is already running — skipping this slot")
                }
            }
        }
    })
}
