pub mod browser;
pub mod browser_manager;

pub use browser::{BrowserError, BrowserLauncher, BrowserSession, BrowserTab, Locator, PageSurface};
