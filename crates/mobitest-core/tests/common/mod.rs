//! Shared test helpers for mobitest-core integration tests.
//!
//! Two kinds of mock endpoint:
//!
//! - [`FakeDevice`]: a scripted in-memory [`AutomationBackend`] for tests
//!   that exercise waits, the platform layer, device utilities, lifecycles
//!   and the coordinator.
//! - [`MockWebDriver`]: a programmable HTTP endpoint on a local TCP listener
//!   for tests that exercise the real [`WebDriverClient`] wire behaviour.
//!
//! [`WebDriverClient`]: mobitest_core::client::WebDriverClient

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mobitest_core::backend::{
    AutomationBackend, BackendError, NetworkConnection, Orientation, SessionId, Timeouts,
};
use mobitest_core::config::{CapabilitySet, Endpoint};
use mobitest_core::element::{AppState, ElementId, Locator, Rect, ScreenSize};
use mobitest_core::gesture::PointerSequence;

// ---------------------------------------------------------------------------
// FakeElement
// ---------------------------------------------------------------------------

/// One element on the fake screen, matched by exact locator.
#[derive(Debug, Clone)]
pub struct FakeElement {
    pub locator: Locator,
    pub rect: Rect,
    pub text: String,
    pub displayed: bool,
    pub enabled: bool,
    /// Lookups that miss before the element shows up.
    pub appears_after: u32,
    /// Last lookup that still finds the element.
    pub vanishes_after: Option<u32>,
    /// Pointer sequences that must be performed before the element is found.
    pub revealed_after_scrolls: usize,
}

impl FakeElement {
    pub fn new(locator: Locator, text: &str) -> Self {
        Self {
            locator,
            rect: Rect::new(100.0, 200.0, 300.0, 100.0),
            text: text.to_string(),
            displayed: true,
            enabled: true,
            appears_after: 0,
            vanishes_after: None,
            revealed_after_scrolls: 0,
        }
    }

    pub fn appearing_after(mut self, lookups: u32) -> Self {
        self.appears_after = lookups;
        self
    }

    pub fn vanishing_after(mut self, lookups: u32) -> Self {
        self.vanishes_after = Some(lookups);
        self
    }

    pub fn revealed_after_scrolls(mut self, scrolls: usize) -> Self {
        self.revealed_after_scrolls = scrolls;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }
}

// ---------------------------------------------------------------------------
// FakeDevice
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    elements: Vec<FakeElement>,
    lookups: HashMap<usize, u32>,
    next_session: u32,
    live: HashSet<String>,
    created: Vec<String>,
    destroyed: Vec<String>,
    destroy_calls: u32,
    sequences: Vec<PointerSequence>,
    clicks: Vec<String>,
    cleared: Vec<String>,
    typed: Vec<(String, String)>,
    mobile_calls: Vec<(String, Value)>,
    app_states: HashMap<String, AppState>,
    contexts: Vec<String>,
    current_context: String,
    orientation: Option<Orientation>,
    network: NetworkConnection,
    timeouts: Vec<Timeouts>,
    back_presses: u32,
    keyboard_hides: u32,
    screenshots: u32,
    recording: bool,
    in_flight: HashMap<String, u32>,
    total_in_flight: u32,
    max_in_flight: u32,
    overlap: bool,
}

/// Scripted in-memory device shared by every session of a test.
///
/// Sessions are numbered `session-1`, `session-2`, ... in creation order.
/// Element ids are `el-<index>` into the element list.
pub struct FakeDevice {
    state: Mutex<FakeState>,
    screen: ScreenSize,
    command_delay: Duration,
    fail_create_for: HashSet<String>,
    fail_screenshots: bool,
    fail_lookups: bool,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDevice {
    pub fn new() -> Self {
        let state = FakeState {
            contexts: vec!["NATIVE_APP".to_string()],
            current_context: "NATIVE_APP".to_string(),
            network: NetworkConnection {
                wifi: true,
                data: true,
                ..Default::default()
            },
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            screen: ScreenSize::new(1000, 2000),
            command_delay: Duration::ZERO,
            fail_create_for: HashSet::new(),
            fail_screenshots: false,
            fail_lookups: false,
        }
    }

    pub fn with_element(self, element: FakeElement) -> Self {
        self.state.lock().unwrap().elements.push(element);
        self
    }

    /// Every command sleeps this long before answering.
    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    /// Session creation for `device_name` fails with a transport error.
    pub fn failing_create_for(mut self, device_name: &str) -> Self {
        self.fail_create_for.insert(device_name.to_string());
        self
    }

    pub fn failing_screenshots(mut self) -> Self {
        self.fail_screenshots = true;
        self
    }

    /// Element lookups fail with a transport error.
    pub fn failing_lookups(mut self) -> Self {
        self.fail_lookups = true;
        self
    }

    pub fn with_contexts(self, contexts: &[&str]) -> Self {
        self.state.lock().unwrap().contexts = contexts.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_app_state(self, app_id: &str, state: AppState) -> Self {
        self.state
            .lock()
            .unwrap()
            .app_states
            .insert(app_id.to_string(), state);
        self
    }

    // -- inspection --------------------------------------------------------

    pub fn created_sessions(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn destroyed_sessions(&self) -> Vec<String> {
        self.state.lock().unwrap().destroyed.clone()
    }

    pub fn destroy_calls(&self) -> u32 {
        self.state.lock().unwrap().destroy_calls
    }

    pub fn live_sessions(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn sequences(&self) -> Vec<PointerSequence> {
        self.state.lock().unwrap().sequences.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn cleared(&self) -> Vec<String> {
        self.state.lock().unwrap().cleared.clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().typed.clone()
    }

    pub fn mobile_calls(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().mobile_calls.clone()
    }

    pub fn mobile_commands(&self) -> Vec<String> {
        self.mobile_calls().into_iter().map(|(c, _)| c).collect()
    }

    pub fn lookups(&self, element: usize) -> u32 {
        self.state
            .lock()
            .unwrap()
            .lookups
            .get(&element)
            .copied()
            .unwrap_or(0)
    }

    pub fn timeouts_set(&self) -> Vec<Timeouts> {
        self.state.lock().unwrap().timeouts.clone()
    }

    pub fn orientation_set(&self) -> Option<Orientation> {
        self.state.lock().unwrap().orientation
    }

    pub fn network(&self) -> NetworkConnection {
        self.state.lock().unwrap().network
    }

    pub fn current_context(&self) -> String {
        self.state.lock().unwrap().current_context.clone()
    }

    pub fn back_presses(&self) -> u32 {
        self.state.lock().unwrap().back_presses
    }

    pub fn keyboard_hides(&self) -> u32 {
        self.state.lock().unwrap().keyboard_hides
    }

    pub fn screenshots(&self) -> u32 {
        self.state.lock().unwrap().screenshots
    }

    /// Highest number of commands in flight at once, across all sessions.
    pub fn max_in_flight(&self) -> u32 {
        self.state.lock().unwrap().max_in_flight
    }

    /// Whether any session ever had two commands in flight at once.
    pub fn saw_overlapping_commands(&self) -> bool {
        self.state.lock().unwrap().overlap
    }

    // -- internals ---------------------------------------------------------

    async fn tick(&self, session: &SessionId) {
        {
            let mut state = self.state.lock().unwrap();
            let count = state.in_flight.entry(session.0.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                state.overlap = true;
            }
            state.total_in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.total_in_flight);
        }
        if !self.command_delay.is_zero() {
            tokio::time::sleep(self.command_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(count) = state.in_flight.get_mut(&session.0) {
            *count -= 1;
        }
        state.total_in_flight -= 1;
    }

    fn check_live(&self, session: &SessionId) -> Result<(), BackendError> {
        if self.state.lock().unwrap().live.contains(&session.0) {
            Ok(())
        } else {
            Err(BackendError::InvalidSession(session.0.clone()))
        }
    }

    fn element_index(element: &ElementId) -> Result<usize, BackendError> {
        element
            .0
            .strip_prefix("el-")
            .and_then(|i| i.parse().ok())
            .ok_or_else(|| BackendError::StaleElement(element.0.clone()))
    }

    fn with_element_at<T>(
        &self,
        element: &ElementId,
        f: impl FnOnce(&FakeElement) -> T,
    ) -> Result<T, BackendError> {
        let index = Self::element_index(element)?;
        let state = self.state.lock().unwrap();
        state
            .elements
            .get(index)
            .map(f)
            .ok_or_else(|| BackendError::StaleElement(element.0.clone()))
    }
}

#[async_trait]
impl AutomationBackend for FakeDevice {
    async fn create_session(&self, caps: &CapabilitySet) -> Result<SessionId, BackendError> {
        self.tick(&SessionId(format!("create:{}", caps.device_name)))
            .await;
        if self.fail_create_for.contains(&caps.device_name) {
            return Err(BackendError::Transport(format!(
                "connection refused creating session on {}",
                caps.device_name
            )));
        }
        let mut state = self.state.lock().unwrap();
        state.next_session += 1;
        let id = format!("session-{}", state.next_session);
        state.live.insert(id.clone());
        state.created.push(caps.device_name.clone());
        Ok(SessionId(id))
    }

    async fn destroy_session(&self, session: &SessionId) -> Result<(), BackendError> {
        self.tick(session).await;
        let mut state = self.state.lock().unwrap();
        state.destroy_calls += 1;
        if state.live.remove(&session.0) {
            state.destroyed.push(session.0.clone());
        }
        Ok(())
    }

    async fn set_timeouts(
        &self,
        session: &SessionId,
        timeouts: Timeouts,
    ) -> Result<(), BackendError> {
        self.tick(session).await;
        self.check_live(session)?;
        self.state.lock().unwrap().timeouts.push(timeouts);
        Ok(())
    }

    async fn find_element(
        &self,
        session: &SessionId,
        locator: &Locator,
    ) -> Result<ElementId, BackendError> {
        self.tick(session).await;
        self.check_live(session)?;
        if self.fail_lookups {
            return Err(BackendError::Transport("connection reset".into()));
        }
        let mut state = self.state.lock().unwrap();
        let scrolls = state.sequences.len();
        let Some(index) = state.elements.iter().position(|e| e.locator == *locator) else {
            return Err(BackendError::NoSuchElement(locator.to_string()));
        };
        let lookups = {
            let count = state.lookups.entry(index).or_insert(0);
            *count += 1;
            *count
        };
        let element = &state.elements[index];
        let present = lookups > element.appears_after
            && element.vanishes_after.map_or(true, |last| lookups <= last)
            && scrolls >= element.revealed_after_scrolls;
        if present {
            Ok(ElementId(format!("el-{index}")))
        } else {
            Err(BackendError::NoSuchElement(locator.to_string()))
        }
    }

    async fn element_rect(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<Rect, BackendError> {
        self.tick(session).await;
        self.with_element_at(element, |e| e.rect)
    }

    async fn is_element_displayed(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<bool, BackendError> {
        self.tick(session).await;
        self.with_element_at(element, |e| e.displayed)
    }

    async fn is_element_enabled(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<bool, BackendError> {
        self.tick(session).await;
        self.with_element_at(element, |e| e.enabled)
    }

    async fn click_element(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<(), BackendError> {
        self.tick(session).await;
        self.with_element_at(element, |_| ())?;
        self.state.lock().unwrap().clicks.push(element.0.clone());
        Ok(())
    }

    async fn clear_element(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<(), BackendError> {
        self.tick(session).await;
        self.with_element_at(element, |_| ())?;
        self.state.lock().unwrap().cleared.push(element.0.clone());
        Ok(())
    }

    async fn send_keys(
        &self,
        session: &SessionId,
        element: &ElementId,
        text: &str,
    ) -> Result<(), BackendError> {
        self.tick(session).await;
        let index = Self::element_index(element)?;
        let mut state = self.state.lock().unwrap();
        let Some(target) = state.elements.get_mut(index) else {
            return Err(BackendError::StaleElement(element.0.clone()));
        };
        target.text = text.to_string();
        state.typed.push((element.0.clone(), text.to_string()));
        Ok(())
    }

    async fn element_text(
        &self,
        session: &SessionId,
        element: &ElementId,
    ) -> Result<String, BackendError> {
        self.tick(session).await;
        self.with_element_at(element, |e| e.text.clone())
    }

    async fn perform_pointer_sequence(
        &self,
        session: &SessionId,
        sequence: &PointerSequence,
    ) -> Result<(), BackendError> {
        self.tick(session).await;
        self.check_live(session)?;
        self.state.lock().unwrap().sequences.push(sequence.clone());
        Ok(())
    }

    async fn window_size(&self, session: &SessionId) -> Result<ScreenSize, BackendError> {
        self.tick(session).await;
        self.check_live(session)?;
        Ok(self.screen)
    }

    async fn back(&self, session: &SessionId) -> Result<(), BackendError> {
        self.tick(session).await;
        self.state.lock().unwrap().back_presses += 1;
        Ok(())
    }

    async fn hide_keyboard(&self, session: &SessionId) -> Result<(), BackendError> {
        self.tick(session).await;
        self.state.lock().unwrap().keyboard_hides += 1;
        Ok(())
    }

    async fn contexts(&self, session: &SessionId) -> Result<Vec<String>, BackendError> {
        self.tick(session).await;
        Ok(self.state.lock().unwrap().contexts.clone())
    }

    async fn current_context(&self, session: &SessionId) -> Result<String, BackendError> {
        self.tick(session).await;
        Ok(self.state.lock().unwrap().current_context.clone())
    }

    async fn switch_context(&self, session: &SessionId, context: &str) -> Result<(), BackendError> {
        self.tick(session).await;
        let mut state = self.state.lock().unwrap();
        if !state.contexts.iter().any(|c| c == context) {
            return Err(BackendError::Command {
                status: 404,
                error: "no such context".into(),
                message: context.to_string(),
            });
        }
        state.current_context = context.to_string();
        Ok(())
    }

    async fn query_app_state(
        &self,
        session: &SessionId,
        app_id: &str,
    ) -> Result<AppState, BackendError> {
        self.tick(session).await;
        Ok(self
            .state
            .lock()
            .unwrap()
            .app_states
            .get(app_id)
            .copied()
            .unwrap_or(AppState::NotInstalled))
    }

    async fn execute_mobile(
        &self,
        session: &SessionId,
        command: &str,
        args: Value,
    ) -> Result<Value, BackendError> {
        self.tick(session).await;
        self.check_live(session)?;
        let mut state = self.state.lock().unwrap();
        state.mobile_calls.push((command.to_string(), args.clone()));
        let app_id = args
            .get("appId")
            .or_else(|| args.get("bundleId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let reply = match (command, app_id) {
            ("activateApp", Some(id)) => {
                state.app_states.insert(id, AppState::RunningInForeground);
                Value::Null
            }
            ("terminateApp", Some(id)) => {
                state.app_states.insert(id, AppState::NotRunning);
                json!(true)
            }
            ("removeApp", Some(id)) => {
                state.app_states.insert(id, AppState::NotInstalled);
                json!(true)
            }
            ("batteryInfo", _) => json!({ "level": 0.85, "state": 2 }),
            ("getBundleInfo", Some(_)) => json!({
                "CFBundleIdentifier": "com.example.app",
                "CFBundleShortVersionString": "2.4.1"
            }),
            ("shell", _) => json!(
                "Packages:\n  Package [io.appium.android.apis] (3f2a1c):\n    versionCode=22 minSdk=16 targetSdk=30\n    versionName=4.1.1\n"
            ),
            ("getPerformanceData", _) => json!([
                ["totalPrivateDirty", "totalPss"],
                ["18360", "29000"]
            ]),
            _ => Value::Null,
        };
        Ok(reply)
    }

    async fn orientation(&self, session: &SessionId) -> Result<Orientation, BackendError> {
        self.tick(session).await;
        Ok(self
            .state
            .lock()
            .unwrap()
            .orientation
            .unwrap_or(Orientation::Portrait))
    }

    async fn set_orientation(
        &self,
        session: &SessionId,
        orientation: Orientation,
    ) -> Result<(), BackendError> {
        self.tick(session).await;
        self.check_live(session)?;
        self.state.lock().unwrap().orientation = Some(orientation);
        Ok(())
    }

    async fn network_connection(
        &self,
        session: &SessionId,
    ) -> Result<NetworkConnection, BackendError> {
        self.tick(session).await;
        Ok(self.state.lock().unwrap().network)
    }

    async fn set_network_connection(
        &self,
        session: &SessionId,
        connection: NetworkConnection,
    ) -> Result<(), BackendError> {
        self.tick(session).await;
        self.state.lock().unwrap().network = connection;
        Ok(())
    }

    async fn screenshot(&self, session: &SessionId) -> Result<Vec<u8>, BackendError> {
        self.tick(session).await;
        if self.fail_screenshots {
            return Err(BackendError::Command {
                status: 500,
                error: "unable to capture screen".into(),
                message: "screenshot failed".into(),
            });
        }
        self.state.lock().unwrap().screenshots += 1;
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn page_source(&self, session: &SessionId) -> Result<String, BackendError> {
        self.tick(session).await;
        Ok("<hierarchy><node text=\"fake\"/></hierarchy>".to_string())
    }

    async fn start_recording(&self, session: &SessionId) -> Result<(), BackendError> {
        self.tick(session).await;
        self.state.lock().unwrap().recording = true;
        Ok(())
    }

    async fn stop_recording(&self, session: &SessionId) -> Result<Vec<u8>, BackendError> {
        self.tick(session).await;
        let mut state = self.state.lock().unwrap();
        if !state.recording {
            return Err(BackendError::Command {
                status: 500,
                error: "unknown error".into(),
                message: "no active recording".into(),
            });
        }
        state.recording = false;
        Ok(b"fake mp4".to_vec())
    }
}

// ---------------------------------------------------------------------------
// MockWebDriver: programmable HTTP endpoint
// ---------------------------------------------------------------------------

/// What the mock endpoint does for a matched request.
#[derive(Clone)]
pub enum Reply {
    /// Answer with the given status and JSON body.
    Json(u16, Value),
    /// Sleep, then answer.
    Delay(Duration, u16, Value),
    /// Close the connection without answering.
    Drop,
    /// Never answer.
    Hang,
}

impl Reply {
    /// `200 {"value": value}`.
    pub fn value(value: Value) -> Self {
        Reply::Json(200, json!({ "value": value }))
    }

    /// A W3C error answer.
    pub fn error(status: u16, error: &str, message: &str) -> Self {
        Reply::Json(
            status,
            json!({ "value": { "error": error, "message": message, "stacktrace": "" } }),
        )
    }
}

#[derive(Clone)]
pub struct Route {
    pub method: &'static str,
    pub path: String,
    pub reply: Reply,
}

pub fn route(method: &'static str, path: &str, reply: Reply) -> Route {
    Route {
        method,
        path: path.to_string(),
        reply,
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Value,
}

/// A WebDriver endpoint answering from a fixed route table.
///
/// Every connection serves one request and is then closed. Unmatched
/// requests get a W3C `unknown command` 404.
pub struct MockWebDriver {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockWebDriver {
    pub async fn start(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);

        let recorded = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    serve_one(stream, &routes, &recorded).await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.addr.ip().to_string(), self.addr.port())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The recorded request with this method and path, if any.
    pub fn request(&self, method: &str, path: &str) -> Option<RecordedRequest> {
        self.requests()
            .into_iter()
            .find(|r| r.method == method && r.path == path)
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };

    Some(RecordedRequest { method, path, body })
}

async fn write_json(stream: &mut TcpStream, status: u16, body: &Value) {
    let payload = body.to_string();
    let response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        if status < 400 { "OK" } else { "Error" },
        payload.len(),
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}

async fn serve_one(
    mut stream: TcpStream,
    routes: &[Route],
    recorded: &Mutex<Vec<RecordedRequest>>,
) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    recorded.lock().unwrap().push(request.clone());

    let reply = routes
        .iter()
        .find(|r| r.method == request.method && r.path == request.path)
        .map(|r| r.reply.clone())
        .unwrap_or_else(|| {
            Reply::error(
                404,
                "unknown command",
                &format!("no route for {} {}", request.method, request.path),
            )
        });

    match reply {
        Reply::Json(status, body) => write_json(&mut stream, status, &body).await,
        Reply::Delay(delay, status, body) => {
            tokio::time::sleep(delay).await;
            write_json(&mut stream, status, &body).await;
        }
        Reply::Drop => {}
        Reply::Hang => std::future::pending::<()>().await,
    }
}
