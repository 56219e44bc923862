//! Device-level operations bound to a live session.
//!
//! App lifecycle, context switching, network control, battery and memory
//! introspection, screen recording and screenshots. Platform differences go
//! through the session's [`PlatformStrategy`]: operations a platform can't
//! perform fail with [`AutomationError::UnsupportedOperation`] instead of
//! silently doing nothing.
//!
//! Where the underlying operation is idempotent, so is the method: terminating
//! an app that isn't running, or removing one that isn't installed, succeeds
//! without touching the device.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

use crate::artifacts::{artifact_name, ArtifactStore};
use crate::backend::{AutomationBackend, NetworkConnection, Orientation, SessionId, Timeouts};
use crate::config::{CapabilitySet, Platform};
use crate::element::{AppState, ElementQuery, ScreenSize};
use crate::error::AutomationError;
use crate::strategy::{strategy_for, PlatformStrategy};
use crate::wait::{WaitConfig, Waiter};

const NATIVE_CONTEXT: &str = "NATIVE_APP";
const WEBVIEW_MARKERS: [&str; 2] = ["WEBVIEW", "CHROMIUM"];

/// Snapshot of the device a session runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: Platform,
    pub device_name: String,
    pub platform_version: Option<String>,
    pub automation_name: String,
    pub orientation: Orientation,
    pub screen_size: ScreenSize,
}

/// `mobile: batteryInfo` answer. `state` is the platform's raw code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryInfo {
    /// Charge level from 0.0 to 1.0; negative when unknown.
    pub level: f64,
    pub state: i64,
}

/// Memory counters reported for one app package, keyed by counter name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryInfo(pub BTreeMap<String, Value>);

impl MemoryInfo {
    /// Parses the two-row table (names, then values) the backend returns.
    fn from_table(table: Value) -> Result<Self, AutomationError> {
        let rows: Vec<Vec<Value>> = serde_json::from_value(table)
            .map_err(|e| AutomationError::Decode(format!("memory table: {e}")))?;
        let [names, values] = rows.as_slice() else {
            return Err(AutomationError::Decode(format!(
                "memory table has {} rows, expected 2",
                rows.len()
            )));
        };
        let counters = names
            .iter()
            .zip(values)
            .filter_map(|(name, value)| Some((name.as_str()?.to_string(), value.clone())))
            .collect();
        Ok(Self(counters))
    }

    pub fn get(&self, counter: &str) -> Option<i64> {
        match self.0.get(counter)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// First `versionName=` entry of a `dumpsys package` listing.
fn parse_version_name(dumpsys: &str) -> Option<String> {
    dumpsys.lines().find_map(|line| {
        let version = line.trim().strip_prefix("versionName=")?;
        (!version.is_empty()).then(|| version.to_string())
    })
}

/// Device utilities for one session.
pub struct DeviceUtils {
    backend: Arc<dyn AutomationBackend>,
    session: SessionId,
    caps: Arc<CapabilitySet>,
    strategy: Arc<dyn PlatformStrategy>,
    waiter: Waiter,
    artifacts: ArtifactStore,
}

impl DeviceUtils {
    pub fn new(
        backend: Arc<dyn AutomationBackend>,
        session: SessionId,
        caps: Arc<CapabilitySet>,
        artifacts: ArtifactStore,
        wait: WaitConfig,
    ) -> Self {
        Self {
            waiter: Waiter::new(backend.clone(), session.clone(), wait),
            strategy: strategy_for(caps.platform),
            backend,
            session,
            caps,
            artifacts,
        }
    }

    pub fn platform(&self) -> Platform {
        self.caps.platform
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    fn unsupported(&self, operation: &'static str) -> AutomationError {
        AutomationError::UnsupportedOperation {
            operation,
            platform: self.platform(),
        }
    }

    fn app_args(&self, app_id: &str) -> Value {
        let mut args = Map::new();
        args.insert(self.strategy.app_id_key().to_string(), json!(app_id));
        Value::Object(args)
    }

    async fn mobile(&self, command: &str, args: Value) -> Result<Value, AutomationError> {
        Ok(self
            .backend
            .execute_mobile(&self.session, command, args)
            .await?)
    }

    // -----------------------------------------------------------------------
    // Device info
    // -----------------------------------------------------------------------

    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn device_info(&self) -> Result<DeviceInfo, AutomationError> {
        let orientation = self.backend.orientation(&self.session).await?;
        let screen_size = self.backend.window_size(&self.session).await?;
        Ok(DeviceInfo {
            platform: self.caps.platform,
            device_name: self.caps.device_name.clone(),
            platform_version: self.caps.platform_version.clone(),
            automation_name: self.caps.automation_name().to_string(),
            orientation,
            screen_size,
        })
    }

    // -----------------------------------------------------------------------
    // App lifecycle
    // -----------------------------------------------------------------------

    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn install_app(&self, path: &str) -> Result<(), AutomationError> {
        self.mobile("installApp", json!({ "appPath": path })).await?;
        info!(path, "app installed");
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn activate_app(&self, app_id: &str) -> Result<(), AutomationError> {
        self.mobile("activateApp", self.app_args(app_id)).await?;
        Ok(())
    }

    /// Terminates the app; a no-op if it isn't running.
    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn terminate_app(&self, app_id: &str) -> Result<(), AutomationError> {
        let state = self.query_app_state(app_id).await?;
        if !state.is_running() {
            debug!(?state, "app not running, nothing to terminate");
            return Ok(());
        }
        self.mobile("terminateApp", self.app_args(app_id)).await?;
        Ok(())
    }

    /// Uninstalls the app; a no-op if it isn't installed.
    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn remove_app(&self, app_id: &str) -> Result<(), AutomationError> {
        let state = self.query_app_state(app_id).await?;
        if state == AppState::NotInstalled {
            debug!("app not installed, nothing to remove");
            return Ok(());
        }
        self.mobile("removeApp", self.app_args(app_id)).await?;
        info!(app_id, "app removed");
        Ok(())
    }

    pub async fn query_app_state(&self, app_id: &str) -> Result<AppState, AutomationError> {
        Ok(self.backend.query_app_state(&self.session, app_id).await?)
    }

    /// Marketing version of an installed app, `None` when the device doesn't
    /// report one.
    ///
    /// iOS reads `CFBundleShortVersionString` from `mobile: getBundleInfo`.
    /// Android reads `versionName` from `dumpsys package` through
    /// `mobile: shell`, which needs the server's adb shell feature enabled.
    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn app_version(&self, app_id: &str) -> Result<Option<String>, AutomationError> {
        let version = match self.platform() {
            Platform::Ios => {
                let info = self.mobile("getBundleInfo", self.app_args(app_id)).await?;
                info.get("CFBundleShortVersionString")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }
            Platform::Android => {
                let out = self
                    .mobile(
                        "shell",
                        json!({ "command": "dumpsys", "args": ["package", app_id] }),
                    )
                    .await?;
                out.as_str().and_then(parse_version_name)
            }
        };
        debug!(app_id, ?version, "app version");
        Ok(version)
    }

    // -----------------------------------------------------------------------
    // Contexts
    // -----------------------------------------------------------------------

    pub async fn contexts(&self) -> Result<Vec<String>, AutomationError> {
        Ok(self.backend.contexts(&self.session).await?)
    }

    pub async fn current_context(&self) -> Result<String, AutomationError> {
        Ok(self.backend.current_context(&self.session).await?)
    }

    /// Switches to the first context whose id contains any of `markers`.
    async fn switch_matching(&self, wanted: &str, markers: &[&str]) -> Result<String, AutomationError> {
        let available = self.contexts().await?;
        let Some(found) = available
            .iter()
            .find(|ctx| markers.iter().any(|m| ctx.contains(m)))
            .cloned()
        else {
            return Err(AutomationError::ContextNotFound {
                wanted: wanted.to_string(),
                available,
            });
        };
        self.backend.switch_context(&self.session, &found).await?;
        debug!(context = %found, "switched context");
        Ok(found)
    }

    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn switch_to_native_context(&self) -> Result<String, AutomationError> {
        self.switch_matching(NATIVE_CONTEXT, &[NATIVE_CONTEXT]).await
    }

    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn switch_to_webview_context(&self) -> Result<String, AutomationError> {
        self.switch_matching("WEBVIEW", &WEBVIEW_MARKERS).await
    }

    // -----------------------------------------------------------------------
    // Network, battery, memory
    // -----------------------------------------------------------------------

    pub async fn get_network_connection(&self) -> Result<NetworkConnection, AutomationError> {
        if !self.strategy.supports_network_control() {
            return Err(self.unsupported("get_network_connection"));
        }
        Ok(self.backend.network_connection(&self.session).await?)
    }

    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn set_network_connection(
        &self,
        connection: NetworkConnection,
    ) -> Result<(), AutomationError> {
        if !self.strategy.supports_network_control() {
            return Err(self.unsupported("set_network_connection"));
        }
        self.backend
            .set_network_connection(&self.session, connection)
            .await?;
        Ok(())
    }

    pub async fn get_battery_info(&self) -> Result<BatteryInfo, AutomationError> {
        let value = self.mobile("batteryInfo", Value::Null).await?;
        serde_json::from_value(value)
            .map_err(|e| AutomationError::Decode(format!("battery info: {e}")))
    }

    /// Memory counters for an Android package.
    pub async fn get_memory_info(&self, package: &str) -> Result<MemoryInfo, AutomationError> {
        if self.platform() != Platform::Android {
            return Err(self.unsupported("get_memory_info"));
        }
        let table = self
            .mobile(
                "getPerformanceData",
                json!({ "packageName": package, "dataType": "memoryinfo" }),
            )
            .await?;
        MemoryInfo::from_table(table)
    }

    // -----------------------------------------------------------------------
    // Hardware
    // -----------------------------------------------------------------------

    pub async fn shake(&self) -> Result<(), AutomationError> {
        if self.platform() != Platform::Ios {
            return Err(self.unsupported("shake"));
        }
        self.mobile("shake", Value::Null).await?;
        Ok(())
    }

    /// Locks the screen, optionally unlocking again after `seconds`.
    pub async fn lock(&self, seconds: Option<u64>) -> Result<(), AutomationError> {
        let args = match seconds {
            Some(s) => json!({ "seconds": s }),
            None => Value::Null,
        };
        self.mobile("lock", args).await?;
        Ok(())
    }

    pub async fn unlock(&self) -> Result<(), AutomationError> {
        self.mobile("unlock", Value::Null).await?;
        Ok(())
    }

    pub async fn orientation(&self) -> Result<Orientation, AutomationError> {
        Ok(self.backend.orientation(&self.session).await?)
    }

    pub async fn set_orientation(&self, orientation: Orientation) -> Result<(), AutomationError> {
        self.backend
            .set_orientation(&self.session, orientation)
            .await?;
        Ok(())
    }

    /// Applies session timeouts as given, `implicit` included.
    pub async fn set_timeouts(&self, timeouts: Timeouts) -> Result<(), AutomationError> {
        self.backend.set_timeouts(&self.session, timeouts).await?;
        debug!(?timeouts, "session timeouts set");
        Ok(())
    }

    /// Accepts any system permission dialog on screen. Returns how many
    /// buttons were tapped.
    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn handle_permission_dialogs(&self) -> Result<u32, AutomationError> {
        let mut clicked = 0;
        for locator in self.strategy.permission_buttons() {
            let query = ElementQuery::new(locator.value.clone(), locator, self.platform());
            if let Some(handle) = self.waiter.displayed_now(&query).await? {
                self.backend.click_element(&self.session, &handle.id).await?;
                debug!(button = %handle.selector, "permission dialog accepted");
                clicked += 1;
            }
        }
        Ok(clicked)
    }

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    /// Writes a screenshot named after the test, platform, device and time.
    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn take_screenshot(&self, test_name: &str) -> Result<PathBuf, AutomationError> {
        let png = self.backend.screenshot(&self.session).await?;
        let name = artifact_name(
            test_name,
            self.caps.platform,
            &self.caps.device_name,
            Utc::now(),
            "png",
        );
        let path = self.artifacts.write(self.session.as_str(), &name, &png)?;
        info!(path = %path.display(), "screenshot saved");
        Ok(path)
    }

    pub async fn page_source(&self) -> Result<String, AutomationError> {
        Ok(self.backend.page_source(&self.session).await?)
    }

    pub async fn start_recording(&self) -> Result<(), AutomationError> {
        self.backend.start_recording(&self.session).await?;
        debug!("screen recording started");
        Ok(())
    }

    /// Stops recording and stores the video under `file_name`.
    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn stop_recording(&self, file_name: &str) -> Result<PathBuf, AutomationError> {
        let video = self.backend.stop_recording(&self.session).await?;
        let path = self.artifacts.write(self.session.as_str(), file_name, &video)?;
        info!(path = %path.display(), bytes = video.len(), "screen recording saved");
        Ok(path)
    }
}
