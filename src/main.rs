use anyhow::Context;
use std::sync::Arc;
use teloxide::Bot;
use tracing::{info, warn};

use autoapply::bot::commands::CommandHandler;
use autoapply::bot::telegram::{run_dispatcher, TelegramNotifier};
use autoapply::bot::Notifier;
use autoapply::core::config::AppConfig;
use autoapply::features::scheduler::{self, DailySchedule};
use autoapply::scraping::browser_manager::ChromeLauncher;
use autoapply::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chromiumoxide=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = AppConfig::from_env().context("startup configuration")?;
    info!("config: {:?}", config);

    let schedule = DailySchedule::new(&config.schedule).context("schedule slots")?;
    let launcher = Arc::new(ChromeLauncher::new(
        config.chrome_executable.clone(),
        config.headless,
    ));

    let bot = Bot::new(config.telegram_bot_token.clone());
    let notifier = Arc::new(TelegramNotifier::new(bot.clone(), config.telegram_chat_id));
    let state = Arc::new(AppState::new(config, notifier.clone(), launcher));

    if schedule.is_empty() {
        warn!("scheduler: no slots configured; only /runnow will start a cycle");
    } else {
        scheduler::spawn(schedule.clone(), state.orchestrator.clone());
    }

    notifier
        .send(
            &format!(
                "🤖 Bot started. I will auto-apply at {}.",
                schedule.describe()
            ),
            false,
        )
        .await;
    info!("🚀 autoapply running; schedule {}", schedule.describe());

    run_dispatcher(bot, notifier, CommandHandler::new(state)).await;
    info!("shutting down");
    Ok(())
}
