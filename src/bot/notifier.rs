use async_trait::async_trait;

/// Outbound operator notifications.
///
/// Delivery is best-effort: implementations swallow (and log) every failure,
/// so callers never branch on whether a message arrived.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `text`; with `emphasis` the text is tried as Markdown first and
    /// re-sent plain if the rich send is rejected.
    async fn send(&self, text: &str, emphasis: bool);

    /// Adopt `chat_id` as the default target when none is configured.
    /// Returns `true` when the target was registered by this call.
    fn register_target(&self, chat_id: i64) -> bool {
        let _ = chat_id;
        false
    }
}
