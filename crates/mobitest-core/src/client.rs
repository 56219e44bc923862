//! HTTP client for a remote WebDriver/Appium endpoint.
//!
//! [`WebDriverClient`] implements [`AutomationBackend`] over the JSON wire
//! format in [`crate::wire`]. Each method is exactly one HTTP round-trip,
//! bounded by the command timeout given at construction. The client never
//! retries.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use mobitest_core::backend::AutomationBackend;
//! use mobitest_core::client::WebDriverClient;
//! use mobitest_core::config::{CapabilitySet, Endpoint, Platform};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = WebDriverClient::new(&Endpoint::default(), Duration::from_secs(120))?;
//! let caps = CapabilitySet::new(Platform::Android, "Pixel_6_API_31");
//!
//! let session = client.create_session(&caps).await?;
//! let size = client.window_size(&session).await?;
//! println!("{}x{}", size.width, size.height);
//! client.destroy_session(&session).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, debug_span, trace, Instrument};

use crate::backend::{
    AutomationBackend, BackendError, NetworkConnection, Orientation, SessionId, Timeouts,
};
use crate::config::{CapabilitySet, Endpoint};
use crate::element::{AppState, ElementId, Locator, Rect, ScreenSize};
use crate::gesture::PointerSequence;
use crate::wire;

/// Timeout for establishing the TCP connection to the endpoint.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Typed client for the W3C WebDriver protocol with Appium extensions.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: reqwest::Client,
    base_url: String,
    command_timeout: Duration,
}

#[derive(Deserialize)]
struct WindowRect {
    width: f64,
    height: f64,
}

impl WebDriverClient {
    pub fn new(endpoint: &Endpoint, command_timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: endpoint.base_url(),
            command_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    fn map_transport_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.command_timeout.as_millis() as u64)
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }

    /// Sends one request and returns the whole response body.
    async fn send_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BackendError> {
        let span = debug_span!("webdriver", method = %method, path);
        async {
            let url = format!("{}{}", self.base_url, path);
            let mut request = self
                .http
                .request(method.clone(), &url)
                .timeout(self.command_timeout);
            if let Some(body) = body {
                trace!(%body, "request body");
                request = request.json(&body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| self.map_transport_error(e))?;
            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| self.map_transport_error(e))?;

            let body: Value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).map_err(|e| {
                    BackendError::Decode(format!("HTTP {status}: {e}"))
                })?
            };
            debug!(status = status.as_u16(), "response");

            if status.is_success() {
                Ok(body)
            } else {
                Err(wire::classify_error(status.as_u16(), &body))
            }
        }
        .instrument(span)
        .await
    }

    /// Sends one request and returns the `value` payload.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BackendError> {
        let body = self.send_raw(method, path, body).await?;
        if body.is_null() {
            return Ok(Value::Null);
        }
        wire::take_value(body)
    }

    async fn get(&self, path: &str) -> Result<Value, BackendError> {
        self.send(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, BackendError> {
        self.send(Method::POST, path, Some(body)).await
    }

    fn session_path(session: &SessionId, rest: &str) -> String {
        format!("/session/{}{}", session.as_str(), rest)
    }

    fn element_path(session: &SessionId, element: &ElementId, rest: &str) -> String {
        format!(
            "/session/{}/element/{}{}",
            session.as_str(),
            element.as_str(),
            rest
        )
    }

    fn decode_base64(value: Value) -> Result<Vec<u8>, BackendError> {
        let encoded: String = wire::decode(value)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| BackendError::Decode(format!("invalid base64 payload: {e}")))
    }
}

#[async_trait]
impl AutomationBackend for WebDriverClient {
    async fn create_session(&self, caps: &CapabilitySet) -> Result<SessionId, BackendError> {
        let body = self
            .send_raw(
                Method::POST,
                "/session",
                Some(wire::encode_capabilities(caps)),
            )
            .await?;
        let id = wire::decode_session_id(&body)?;
        debug!(session_id = %id, device = %caps.device_name, "session created");
        Ok(id)
    }

    async fn destroy_session(&self, session: &SessionId) -> Result<(), BackendError> {
        match self
            .send(Method::DELETE, &Self::session_path(session, ""), None)
            .await
        {
            Ok(_) => Ok(()),
            Err(BackendError::InvalidSession(_)) => {
                debug!(session_id = %session, "session already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn set_timeouts(
        &self,
        session: &SessionId,
        timeouts: Timeouts,
    ) -> Result<(), BackendError> {
        let body = serde_json::to_value(timeouts).map_err(|e| BackendError::Decode(e.to_string()))?;
        self.post(&Self::session_path(session, "/timeouts"), body)
            .await?;
        Ok(())
    }

    async fn find_element(
        &self,
        session: &SessionId,
        locator: &Locator,
    ) -> Result<ElementId, BackendError> {
        let value = self
            .post(
                &Self::session_path(session, "/element"),
                wire::encode_locator(locator),
            )
            .await?;
        wire::decode_element_id(&value)
    }

    async fn element_rect(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<Rect, BackendError> {
        wire::decode(self.get(&Self::element_path(session, element, "/rect")).await?)
    }

    async fn is_element_displayed(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<bool, BackendError> {
        wire::decode(
            self.get(&Self::element_path(session, element, "/displayed"))
                .await?,
        )
    }

    async fn is_element_enabled(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<bool, BackendError> {
        wire::decode(
            self.get(&Self::element_path(session, element, "/enabled"))
                .await?,
        )
    }

    async fn click_element(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<(), BackendError> {
        self.post(&Self::element_path(session, element, "/click"), json!({}))
            .await?;
        Ok(())
    }

    async fn clear_element(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<(), BackendError> {
        self.post(&Self::element_path(session, element, "/clear"), json!({}))
            .await?;
        Ok(())
    }

    async fn send_keys(
        &self,
        session: &SessionId,
        element: &ElementId,
        text: &str,
    ) -> Result<(), BackendError> {
        let chars: Vec<String> = text.chars().map(String::from).collect();
        self.post(
            &Self::element_path(session, element, "/value"),
            json!({ "text": text, "value": chars }),
        )
        .await?;
        Ok(())
    }

    async fn element_text(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<String, BackendError> {
        wire::decode(self.get(&Self::element_path(session, element, "/text")).await?)
    }

    async fn perform_pointer_sequence(
        &self,
        session: &SessionId,
        sequence: &PointerSequence,
    ) -> Result<(), BackendError> {
        self.post(
            &Self::session_path(session, "/actions"),
            wire::encode_pointer_sequence(sequence),
        )
        .await?;
        Ok(())
    }

    async fn window_size(&self, session: &SessionId) -> Result<ScreenSize, BackendError> {
        let rect: WindowRect = wire::decode(self.get(&Self::session_path(session, "/window/rect")).await?)?;
        Ok(ScreenSize::new(
            rect.width.round() as u32,
            rect.height.round() as u32,
        ))
    }

    async fn back(&self, session: &SessionId) -> Result<(), BackendError> {
        self.post(&Self::session_path(session, "/back"), json!({}))
            .await?;
        Ok(())
    }

    async fn hide_keyboard(&self, session: &SessionId) -> Result<(), BackendError> {
        self.execute_mobile(session, "hideKeyboard", Value::Null)
            .await?;
        Ok(())
    }

    async fn contexts(&self, session: &SessionId) -> Result<Vec<String>, BackendError> {
        wire::decode(self.get(&Self::session_path(session, "/contexts")).await?)
    }

    async fn current_context(&self, session: &SessionId) -> Result<String, BackendError> {
        wire::decode(self.get(&Self::session_path(session, "/context")).await?)
    }

    async fn switch_context(&self, session: &SessionId, context: &str) -> Result<(), BackendError> {
        self.post(
            &Self::session_path(session, "/context"),
            json!({ "name": context }),
        )
        .await?;
        Ok(())
    }

    async fn query_app_state(
        &self,
        session: &SessionId,
        app_id: &str,
    ) -> Result<AppState, BackendError> {
        let value = self
            .execute_mobile(
                session,
                "queryAppState",
                json!({ "appId": app_id, "bundleId": app_id }),
            )
            .await?;
        let code = value
            .as_i64()
            .ok_or_else(|| BackendError::Decode(format!("app state is not an integer: {value}")))?;
        AppState::from_code(code)
            .ok_or_else(|| BackendError::Decode(format!("unknown app state code {code}")))
    }

    async fn execute_mobile(
        &self,
        session: &SessionId,
        command: &str,
        args: Value,
    ) -> Result<Value, BackendError> {
        self.post(
            &Self::session_path(session, "/execute/sync"),
            wire::encode_mobile_command(command, args),
        )
        .await
    }

    async fn orientation(&self, session: &SessionId) -> Result<Orientation, BackendError> {
        wire::decode(self.get(&Self::session_path(session, "/orientation")).await?)
    }

    async fn set_orientation(
        &self,
        session: &SessionId,
        orientation: Orientation,
    ) -> Result<(), BackendError> {
        self.post(
            &Self::session_path(session, "/orientation"),
            json!({ "orientation": orientation }),
        )
        .await?;
        Ok(())
    }

    async fn network_connection(
        &self,
        session: &SessionId,
    ) -> Result<NetworkConnection, BackendError> {
        let mask: u8 = wire::decode(
            self.get(&Self::session_path(session, "/network_connection"))
                .await?,
        )?;
        Ok(NetworkConnection::from_bitmask(mask))
    }

    async fn set_network_connection(
        &self,
        session: &SessionId,
        connection: NetworkConnection,
    ) -> Result<(), BackendError> {
        self.post(
            &Self::session_path(session, "/network_connection"),
            json!({ "parameters": { "type": connection.bitmask() } }),
        )
        .await?;
        Ok(())
    }

    async fn screenshot(&self, session: &SessionId) -> Result<Vec<u8>, BackendError> {
        let value = self.get(&Self::session_path(session, "/screenshot")).await?;
        Self::decode_base64(value)
    }

    async fn page_source(&self, session: &SessionId) -> Result<String, BackendError> {
        wire::decode(self.get(&Self::session_path(session, "/source")).await?)
    }

    async fn start_recording(&self, session: &SessionId) -> Result<(), BackendError> {
        self.post(
            &Self::session_path(session, "/appium/start_recording_screen"),
            json!({}),
        )
        .await?;
        Ok(())
    }

    async fn stop_recording(&self, session: &SessionId) -> Result<Vec<u8>, BackendError> {
        let value = self
            .post(
                &Self::session_path(session, "/appium/stop_recording_screen"),
                json!({}),
            )
            .await?;
        Self::decode_base64(value)
    }
}
