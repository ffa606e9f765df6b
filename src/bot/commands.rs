//! Chat command surface.
//!
//! Parsing and handling are transport-agnostic: the Telegram dispatcher
//! hands each text message to [`Command::parse`] and replies through a
//! [`Replier`], so the same handler is driven directly from tests.

use crate::core::app_state::AppState;
use crate::features::otp_channel::SubmitOutcome;
use crate::tools::cycle::CycleError;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

pub const HELP_TEXT: &str = "👋 Auto-Apply Bot ready.\n\n\
Commands:\n\
/status – last run & config\n\
/otp 123456 – send OTP if login asks\n\
/runnow – run an apply cycle immediately";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Status,
    RunNow,
    /// `/otp` with its first argument, if any.
    Otp(Option<String>),
    Unknown(String),
}

impl Command {
    /// Parse a `/command[@botname] args…` message. Plain text yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let head = parts.next()?;
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();

        Some(match name.as_str() {
            "start" => Self::Start,
            "status" => Self::Status,
            "runnow" => Self::RunNow,
            "otp" => Self::Otp(parts.next().map(str::to_string)),
            _ => Self::Unknown(name),
        })
    }

    /// Command name without arguments, safe to log.
    pub fn name(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Status => "status",
            Self::RunNow => "runnow",
            Self::Otp(_) => "otp",
            Self::Unknown(name) => name,
        }
    }
}

/// Where command replies go: the chat the command came from.
#[async_trait]
pub trait Replier: Send + Sync {
    async fn reply(&self, text: &str, emphasis: bool);
}

#[derive(Clone)]
pub struct CommandHandler {
    state: Arc<AppState>,
}

impl CommandHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn handle(&self, command: Command, chat_id: i64, replier: &dyn Replier) {
        match command {
            Command::Start => self.start(chat_id, replier).await,
            Command::Status => replier.reply(&self.status_text(), true).await,
            Command::RunNow => self.run_now(replier).await,
            Command::Otp(code) => self.otp(code, replier).await,
            Command::Unknown(name) => {
                info!("bot: ignoring unknown command /{}", name);
            }
        }
    }

    async fn start(&self, chat_id: i64, replier: &dyn Replier) {
        if self.state.notifier.register_target(chat_id) {
            info!("bot: registered chat {} for notifications", chat_id);
            replier
                .reply(
                    &format!("✅ Registered this chat for notifications.\nChat ID: `{chat_id}`"),
                    true,
                )
                .await;
        }
        replier.reply(HELP_TEXT, false).await;
    }

    pub fn status_text(&self) -> String {
        let config = &self.state.config;
        let now = Utc::now().with_timezone(&config.schedule.offset);
        let exclude = if config.search.exclude.is_empty() {
            "—".to_string()
        } else {
            config.search.exclude.join(",")
        };
        let yes_no = |b: bool| if b { "Yes" } else { "No" };

        let mut text = format!(
            "🕒 Now: {} (UTC{})\n\
             🔎 Keywords: *{}* | Location: *{}*\n\
             🚫 Exclude: *{}*\n\
             🎯 Max per run: *{}*\n\
             📦 Cookies saved: *{}*\n\
             🗂 Applied log size: *{}*",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.offset(),
            config.search.keywords,
            config.search.location,
            exclude,
            config.max_applications_per_run,
            yes_no(self.state.has_saved_session()),
            self.state.ledger_size(),
        );
        if self.state.orchestrator.is_running() {
            text.push_str("\n⏳ A cycle is running right now.");
        }
        text
    }

    async fn run_now(&self, replier: &dyn Replier) {
        replier.reply("⏳ Running now…", false).await;
        match self.state.orchestrator.run().await {
            Ok(report) => {
                replier
                    .reply(
                        &format!(
                            "✅ Done. Applied: *{}*.\n{}",
                            report.applied,
                            report.notes_text()
                        ),
                        true,
                    )
                    .await
            }
            Err(CycleError::AlreadyRunning) => {
                replier
                    .reply(
                        "ℹ️ A cycle is already running. Wait for its summary, or send /otp if it asked for one.",
                        false,
                    )
                    .await
            }
        }
    }

    async fn otp(&self, code: Option<String>, replier: &dyn Replier) {
        let Some(code) = code.filter(|c| !c.trim().is_empty()) else {
            replier.reply("Send OTP like: `/otp 123456`", true).await;
            return;
        };
        match self.state.otp.submit_code(code.trim()) {
            SubmitOutcome::Delivered => replier.reply("✅ OTP received. Proceeding…", false).await,
            SubmitOutcome::Unsolicited => {
                replier
                    .reply(
                        "ℹ️ No OTP was requested right now. I’ll ask again if needed.",
                        false,
                    )
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("  /status  "), Some(Command::Status));
        assert_eq!(Command::parse("/RunNow"), Some(Command::RunNow));
    }

    #[test]
    fn otp_takes_its_first_argument() {
        assert_eq!(
            Command::parse("/otp 123456"),
            Some(Command::Otp(Some("123456".into())))
        );
        assert_eq!(
            Command::parse("/otp@autoapply_bot 654321 extra"),
            Some(Command::Otp(Some("654321".into())))
        );
        assert_eq!(Command::parse("/otp"), Some(Command::Otp(None)));
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("123456"), None);
        assert_eq!(Command::parse("/"), None);
    }

    #[test]
    fn unknown_commands_keep_their_name() {
        assert_eq!(
            Command::parse("/help@bot"),
            Some(Command::Unknown("help".into()))
        );
    }
}
