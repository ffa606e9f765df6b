pub mod commands;
pub mod notifier;
pub mod telegram;

pub use notifier::Notifier;
