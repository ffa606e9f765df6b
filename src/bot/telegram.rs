//! Telegram transport: outbound notifications and the command dispatcher.

use crate::bot::commands::{Command, CommandHandler, Replier};
use crate::bot::notifier::Notifier;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{debug, info, warn};

/// Send `text` to `chat`, Markdown first when `emphasis` is set, plain text
/// as the fallback. Never fails.
async fn deliver(bot: &Bot, chat: ChatId, text: &str, emphasis: bool) {
    if emphasis {
        // Legacy Markdown: the messages use `*bold*` and backticks unescaped.
        #[allow(deprecated)]
        let rich = bot.send_message(chat, text).parse_mode(ParseMode::Markdown);
        match rich.await {
            Ok(_) => return,
            Err(e) => debug!("bot: markdown send to {} rejected ({}); retrying plain", chat, e),
        }
    }
    if let Err(e) = bot.send_message(chat, text).await {
        warn!("bot: message to {} not delivered: {}", chat, e);
    }
}

pub struct TelegramNotifier {
    bot: Bot,
    target: RwLock<Option<ChatId>>,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, target: Option<i64>) -> Self {
        Self {
            bot,
            target: RwLock::new(target.map(ChatId)),
        }
    }

    pub fn target(&self) -> Option<ChatId> {
        *self.target.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str, emphasis: bool) {
        let Some(chat) = self.target() else {
            debug!("bot: no notification target yet; dropping message");
            return;
        };
        deliver(&self.bot, chat, text, emphasis).await;
    }

    fn register_target(&self, chat_id: i64) -> bool {
        let mut target = self.target.write().unwrap_or_else(|e| e.into_inner());
        if target.is_some() {
            return false;
        }
        *target = Some(ChatId(chat_id));
        true
    }
}

/// Replies to the chat a command came from.
struct ChatReplier {
    bot: Bot,
    chat: ChatId,
}

#[async_trait]
impl Replier for ChatReplier {
    async fn reply(&self, text: &str, emphasis: bool) {
        deliver(&self.bot, self.chat, text, emphasis).await;
    }
}

/// Long-poll Telegram until Ctrl-C.
pub async fn run_dispatcher(bot: Bot, notifier: Arc<TelegramNotifier>, handler: CommandHandler) {
    let schema = Update::filter_message().endpoint(on_message);

    Dispatcher::builder(bot, schema)
        .dependencies(dptree::deps![notifier, handler])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn on_message(
    bot: Bot,
    msg: Message,
    notifier: Arc<TelegramNotifier>,
    handler: CommandHandler,
) -> ResponseResult<()> {
    let Some(command) = msg.text().and_then(Command::parse) else {
        return Ok(());
    };
    let chat = msg.chat.id;

    if let Some(target) = notifier.target() {
        if target != chat && command != Command::Start {
            warn!("bot: ignoring /{} from foreign chat {}", command.name(), chat);
            return Ok(());
        }
    }
    info!("bot: /{} from chat {}", command.name(), chat);

    // Updates from one chat are handled in order; a /runnow parked on an OTP
    // must not hold back the /otp that unblocks it.
    tokio::spawn(async move {
        let replier = ChatReplier { bot, chat };
        handler.handle(command, chat.0, &replier).await;
    });
    Ok(())
}
