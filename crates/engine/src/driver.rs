//! Browser driver capability surface
//!
//! The engine never talks to a browser automation protocol directly. It
//! launches one [`BrowserSession`] per scenario, opens one [`Page`] on it and
//! hands that page to step actions as an opaque handle.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::PixlResult;

/// Launches isolated browser sessions
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(&self, headless: bool) -> PixlResult<Box<dyn BrowserSession>>;
}

/// One running browser owned by a single scenario worker
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn new_page(&self) -> PixlResult<Box<dyn Page>>;

    /// Shut the browser down. Called exactly once, even after failures.
    async fn close(&self) -> PixlResult<()>;
}

/// A live page inside a browser session
#[async_trait]
pub trait Page: Send + Sync {
    /// Default timeout for navigation and element lookups
    async fn set_default_timeout(&self, timeout: Duration) -> PixlResult<()>;

    async fn goto(&self, url: &str) -> PixlResult<()>;

    /// Evaluate a JavaScript expression and return its JSON-serialized value
    async fn evaluate(&self, script: &str) -> PixlResult<serde_json::Value>;

    async fn click(&self, selector: &str) -> PixlResult<()>;

    /// Replace the value of an input
    async fn fill(&self, selector: &str, value: &str) -> PixlResult<()>;

    /// Type text key by key into an element
    async fn type_text(&self, selector: &str, text: &str) -> PixlResult<()>;

    async fn press_key(&self, key: &str) -> PixlResult<()>;

    async fn hover(&self, selector: &str) -> PixlResult<()>;

    async fn focus(&self, selector: &str) -> PixlResult<()>;

    async fn select_option(&self, selector: &str, value: &str) -> PixlResult<()>;

    async fn wait_for_selector(&self, selector: &str, timeout: Option<Duration>) -> PixlResult<()>;

    async fn mouse_move(&self, x: f64, y: f64) -> PixlResult<()>;

    /// Resize to `width` and capture the full page height as PNG bytes
    async fn screenshot(&self, width: u32) -> PixlResult<Vec<u8>>;
}
