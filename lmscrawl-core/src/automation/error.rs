use thiserror::Error;

pub type AutomationResult<T> = Result<T, AutomationError>;

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("no active browser window")]
    NoActiveWindow,
    #[error("unknown browser window: {0}")]
    UnknownWindow(String),
    #[error("browser session closed")]
    SessionClosed,
}

impl AutomationError {
    /// Wait-budget expiry, the one fault the crawler treats as benign for
    /// optional elements.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AutomationError::Timeout(_))
    }

    /// The browser can no longer be driven at all.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            AutomationError::SessionClosed | AutomationError::NoActiveWindow
        )
    }
}

