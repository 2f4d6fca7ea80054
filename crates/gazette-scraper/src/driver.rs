//! The browser seam.
//!
//! Everything the engine does in a browser goes through [`BrowserDriver`].
//! Elements and windows are opaque handles issued by the driver; they stay
//! valid until the page they belong to is navigated away from.
//!
//! Selectors are CSS unless prefixed with `xpath:`.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("element not interactable: {0}")]
    NotInteractable(String),
    #[error("stale element reference: {0}")]
    Stale(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("script failed: {0}")]
    Script(String),
    #[error("browser session lost: {0}")]
    SessionLost(String),
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("webdriver error: {0}")]
    Other(String),
}

impl DriverError {
    /// The browser process or its WebDriver session is gone; nothing but a
    /// relaunch will help.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, DriverError::SessionLost(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowId(pub String);

/// Argument passed to an injected script as `arguments[i]`.
#[derive(Debug, Clone)]
pub enum ScriptArg {
    Element(ElementId),
    Value(serde_json::Value),
}

pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DriverError>> + Send + 'a>>;

/// One interactive browser session.
///
/// Methods take `&mut self`: a session has a single current window and
/// navigation is strictly sequential.
pub trait BrowserDriver: Send {
    fn goto<'a>(&'a mut self, url: &'a str) -> DriverFuture<'a, ()>;

    fn current_url(&mut self) -> DriverFuture<'_, String>;

    fn page_source(&mut self) -> DriverFuture<'_, String>;

    /// First element matching `selector`, or `None` when there is none.
    /// Absence is an expected outcome, not an error.
    fn find_optional<'a>(&'a mut self, selector: &'a str) -> DriverFuture<'a, Option<ElementId>>;

    /// Displayed and enabled.
    fn is_ready<'a>(&'a mut self, element: &'a ElementId) -> DriverFuture<'a, bool>;

    fn click<'a>(&'a mut self, element: &'a ElementId) -> DriverFuture<'a, ()>;

    /// Clear the element's value, then type `text` into it.
    fn clear_and_type<'a>(&'a mut self, element: &'a ElementId, text: &'a str)
    -> DriverFuture<'a, ()>;

    fn select_by_value<'a>(
        &'a mut self,
        element: &'a ElementId,
        value: &'a str,
    ) -> DriverFuture<'a, ()>;

    fn execute<'a>(
        &'a mut self,
        script: &'a str,
        args: Vec<ScriptArg>,
    ) -> DriverFuture<'a, serde_json::Value>;

    fn current_window(&mut self) -> DriverFuture<'_, WindowId>;

    fn windows(&mut self) -> DriverFuture<'_, Vec<WindowId>>;

    /// Open a new tab without switching to it.
    fn open_window(&mut self) -> DriverFuture<'_, WindowId>;

    fn switch_to_window<'a>(&'a mut self, window: &'a WindowId) -> DriverFuture<'a, ()>;

    /// Close the current window. A switch is required before further use.
    fn close_window(&mut self) -> DriverFuture<'_, ()>;

    /// Browser cookies for the current page, formatted for a `Cookie` header.
    fn cookie_header(&mut self) -> DriverFuture<'_, Option<String>>;

    /// Liveness probe. `Ok(false)` or an error both mean the session is unusable.
    fn is_alive(&mut self) -> DriverFuture<'_, bool>;

    /// End the session and the browser process behind it.
    fn quit(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send>>;
}

pub type LaunchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Box<dyn BrowserDriver>, DriverError>> + Send + 'a>>;

/// Starts fresh browser sessions for the session manager.
pub trait DriverLauncher: Send + Sync {
    fn launch(&self) -> LaunchFuture<'_>;
}
