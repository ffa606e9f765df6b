pub mod bot;
pub mod core;
pub mod features;
pub mod scraping;
pub mod tools;

// --- Primary core exports ---
pub use self::core::types;
pub use self::core::types::*;
pub use self::core::AppState;

pub use features::{ledger, otp_channel, scheduler, session_store};
pub use tools::{CycleError, CycleOrchestrator};
