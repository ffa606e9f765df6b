pub mod apply;
pub mod cycle;
pub mod scanner;
pub mod session;

pub use cycle::{CycleError, CycleOrchestrator};
