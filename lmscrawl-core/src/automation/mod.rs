//! Narrow browser-driver interface consumed by the login and extraction stages.
//!
//! Selectors are XPath expressions. Element and window handles are opaque to
//! callers; drivers decide what they carry.

mod chromium;
mod error;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

pub use chromium::{ChromiumAutomation, ChromiumLauncher};
pub use error::{AutomationError, AutomationResult};

/// State an element must reach before `locate` returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    /// Attached to the document.
    Present,
    /// Attached and rendered with a non-empty box.
    Visible,
    /// Visible and not disabled.
    Clickable,
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WaitCondition::Present => "presence",
            WaitCondition::Visible => "visibility",
            WaitCondition::Clickable => "clickability",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    selector: String,
}

impl ElementHandle {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowHandle(String);

impl WindowHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait Automation: Send {
    async fn navigate(&mut self, url: &str) -> AutomationResult<()>;

    /// Waits up to `timeout` for `selector` to satisfy `condition`. A zero
    /// timeout probes exactly once. Expiry is reported as
    /// [`AutomationError::Timeout`].
    async fn locate(
        &mut self,
        selector: &str,
        condition: WaitCondition,
        timeout: Duration,
    ) -> AutomationResult<ElementHandle>;

    async fn click(&mut self, element: &ElementHandle) -> AutomationResult<()>;

    /// Clears the field, then types `text` into it.
    async fn type_text(&mut self, element: &ElementHandle, text: &str) -> AutomationResult<()>;

    async fn select_index(&mut self, element: &ElementHandle, index: usize)
        -> AutomationResult<()>;

    /// Rendered text of the element, `None` when it has none.
    async fn read_text(&mut self, element: &ElementHandle) -> AutomationResult<Option<String>>;

    async fn current_url(&mut self) -> AutomationResult<String>;

    /// Opens a blank tab without switching to it.
    async fn open_window(&mut self) -> AutomationResult<WindowHandle>;

    async fn list_windows(&mut self) -> AutomationResult<Vec<WindowHandle>>;

    async fn switch_window(&mut self, window: &WindowHandle) -> AutomationResult<()>;

    /// Closes the active tab. Another window must be switched to afterwards.
    async fn close_current_window(&mut self) -> AutomationResult<()>;

    /// Shuts the browser down. Calling it twice is harmless.
    async fn teardown(&mut self) -> AutomationResult<()>;
}

#[async_trait]
pub trait AutomationLauncher: Send + Sync {
    async fn launch(&self) -> AutomationResult<Box<dyn Automation>>;
}
