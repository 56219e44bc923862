//! Backend trait for remote device automation.
//!
//! [`AutomationBackend`] is the protocol-client contract: one method per wire
//! command, each a single round-trip with no retries. The production
//! implementation is [`WebDriverClient`](crate::client::WebDriverClient);
//! tests substitute scripted in-memory backends.
//!
//! Retry policy lives exclusively in [`crate::wait`]. Implementations must
//! surface transport failures as [`BackendError::Transport`] or
//! [`BackendError::Timeout`], never as a "not found" answer.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::CapabilitySet;
use crate::element::{AppState, ElementId, Locator, Rect, ScreenSize};
use crate::gesture::PointerSequence;

/// Errors a single backend round-trip can fail with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Connection refused, reset, or otherwise unreachable endpoint.
    #[error("transport error: {0}")]
    Transport(String),

    /// The round-trip exceeded the client's command timeout.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("no such element: {0}")]
    NoSuchElement(String),

    #[error("stale element reference: {0}")]
    StaleElement(String),

    #[error("invalid session id: {0}")]
    InvalidSession(String),

    /// Any other protocol-level error answer.
    #[error("command failed (HTTP {status}, {error}): {message}")]
    Command {
        status: u16,
        error: String,
        message: String,
    },

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl BackendError {
    /// True for connection-level failures, as opposed to protocol answers.
    pub fn is_transport(&self) -> bool {
        matches!(self, BackendError::Transport(_) | BackendError::Timeout(_))
    }
}

/// Opaque session identifier issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session-level timeouts, in milliseconds.
///
/// `implicit` stays at 0 for automation sessions: element waits are polled
/// client-side by [`crate::wait::Waiter`], and a server-side implicit wait
/// would stall every lookup miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    pub implicit: u64,
    pub page_load: u64,
    pub script: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            implicit: 0,
            page_load: 30_000,
            script: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Orientation {
    Portrait,
    Landscape,
}

/// Network radios that can be toggled on a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConnection {
    pub airplane_mode: bool,
    pub wifi: bool,
    pub data: bool,
}

impl NetworkConnection {
    const AIRPLANE: u8 = 1;
    const WIFI: u8 = 2;
    const DATA: u8 = 4;

    pub fn from_bitmask(mask: u8) -> Self {
        Self {
            airplane_mode: mask & Self::AIRPLANE != 0,
            wifi: mask & Self::WIFI != 0,
            data: mask & Self::DATA != 0,
        }
    }

    pub fn bitmask(self) -> u8 {
        let mut mask = 0;
        if self.airplane_mode {
            mask |= Self::AIRPLANE;
        }
        if self.wifi {
            mask |= Self::WIFI;
        }
        if self.data {
            mask |= Self::DATA;
        }
        mask
    }
}

/// A client of a remote device-automation endpoint.
///
/// Every call is one request/response round-trip. Callers must not issue two
/// concurrent commands against the same session.
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    // -- sessions ----------------------------------------------------------

    /// Starts a session for `caps` and returns the id the server assigned.
    async fn create_session(&self, caps: &CapabilitySet) -> Result<SessionId, BackendError>;

    /// Destroys a session. Destroying an unknown or closed session succeeds.
    async fn destroy_session(&self, session: &SessionId) -> Result<(), BackendError>;

    /// Applies session timeouts; see [`Timeouts`] for why `implicit` stays 0.
    async fn set_timeouts(&self, session: &SessionId, timeouts: Timeouts)
        -> Result<(), BackendError>;

    // -- elements ----------------------------------------------------------

    /// Looks up one element; a miss is [`BackendError::NoSuchElement`].
    async fn find_element(
        &self,
        session: &SessionId,
        locator: &Locator,
    ) -> Result<ElementId, BackendError>;

    /// On-screen bounds of an element, in pixels.
    async fn element_rect(&self, session: &SessionId, element: &ElementId)
        -> Result<Rect, BackendError>;

    /// Whether the element is currently visible.
    async fn is_element_displayed(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<bool, BackendError>;

    /// Whether the element accepts input.
    async fn is_element_enabled(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<bool, BackendError>;

    /// Clicks the element at its centre.
    async fn click_element(&self, session: &SessionId, element: &ElementId)
        -> Result<(), BackendError>;

    /// Clears a text field.
    async fn clear_element(&self, session: &SessionId, element: &ElementId)
        -> Result<(), BackendError>;

    /// Types `text` into the element.
    async fn send_keys(
        &self,
        session: &SessionId,
        element: &ElementId,
        text: &str,
    ) -> Result<(), BackendError>;

    /// Visible text of the element.
    async fn element_text(&self, session: &SessionId, element: &ElementId)
        -> Result<String, BackendError>;

    // -- input -------------------------------------------------------------

    /// Dispatches one pointer sequence and waits for it to complete.
    async fn perform_pointer_sequence(
        &self,
        session: &SessionId,
        sequence: &PointerSequence,
    ) -> Result<(), BackendError>;

    /// Size of the device screen in pixels.
    async fn window_size(&self, session: &SessionId) -> Result<ScreenSize, BackendError>;

    /// Presses the platform's system back control.
    async fn back(&self, session: &SessionId) -> Result<(), BackendError>;

    /// Dismisses the soft keyboard.
    async fn hide_keyboard(&self, session: &SessionId) -> Result<(), BackendError>;

    // -- contexts ----------------------------------------------------------

    /// Ids of the native and webview contexts the session can switch to.
    async fn contexts(&self, session: &SessionId) -> Result<Vec<String>, BackendError>;

    /// The context commands are currently routed to.
    async fn current_context(&self, session: &SessionId) -> Result<String, BackendError>;

    /// Routes subsequent commands to `context`.
    async fn switch_context(&self, session: &SessionId, context: &str)
        -> Result<(), BackendError>;

    // -- device ------------------------------------------------------------

    /// Install and run state of the app identified by `app_id`.
    async fn query_app_state(&self, session: &SessionId, app_id: &str)
        -> Result<AppState, BackendError>;

    /// Runs a `mobile: <command>` extension command.
    async fn execute_mobile(
        &self,
        session: &SessionId,
        command: &str,
        args: Value,
    ) -> Result<Value, BackendError>;

    /// Current screen orientation.
    async fn orientation(&self, session: &SessionId) -> Result<Orientation, BackendError>;

    /// Rotates the screen.
    async fn set_orientation(
        &self,
        session: &SessionId,
        orientation: Orientation,
    ) -> Result<(), BackendError>;

    /// Which network radios are enabled.
    async fn network_connection(&self, session: &SessionId)
        -> Result<NetworkConnection, BackendError>;

    /// Enables and disables network radios.
    async fn set_network_connection(
        &self,
        session: &SessionId,
        connection: NetworkConnection,
    ) -> Result<(), BackendError>;

    // -- diagnostics -------------------------------------------------------

    /// PNG bytes of the current screen.
    async fn screenshot(&self, session: &SessionId) -> Result<Vec<u8>, BackendError>;

    /// XML dump of the current UI hierarchy.
    async fn page_source(&self, session: &SessionId) -> Result<String, BackendError>;

    /// Starts a screen recording; stop it with `stop_recording`.
    async fn start_recording(&self, session: &SessionId) -> Result<(), BackendError>;

    /// Stops recording and returns the encoded video bytes.
    async fn stop_recording(&self, session: &SessionId) -> Result<Vec<u8>, BackendError>;
}
