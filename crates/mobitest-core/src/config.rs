//! Capability sets, capability matrices and persistent runner configuration.
//!
//! A [`CapabilitySet`] describes one device/platform/app combination and feeds
//! exactly one session. A [`CapabilityMatrix`] is the list the coordinator fans
//! out over. [`RunnerConfig`] stores endpoint and timing defaults in
//! `~/.mobitest/config.json`.
//!
//! # Example
//!
//! ```
//! use mobitest_core::config::{CapabilitySet, Platform};
//!
//! let caps = CapabilitySet::new(Platform::Android, "Pixel_6_API_31")
//!     .with_platform_version("12.0")
//!     .with_app_id("io.appium.android.apis")
//!     .with_session_port(8200);
//!
//! let w3c = caps.to_w3c();
//! assert_eq!(w3c["platformName"], "Android");
//! assert_eq!(w3c["appium:systemPort"], 8200);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::backend::{Orientation, Timeouts};

const CONFIG_FILENAME: &str = "config.json";

/// Default `appium:newCommandTimeout`, in seconds.
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;

/// Returns the mobitest state directory (`~/.mobitest/`).
///
/// Creates the directory if it doesn't exist.
pub fn mobitest_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".mobitest");
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Default log directory, `~/.mobitest/logs`.
pub fn logs_dir() -> PathBuf {
    let dir = mobitest_dir().join("logs");
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Errors raised while loading configuration files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub(crate) fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// The mobile platform a capability set targets.
///
/// Always declared by the caller; never detected from backend metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "android", alias = "Android", alias = "ANDROID")]
    Android,
    #[serde(rename = "ios", alias = "iOS", alias = "IOS", alias = "Ios")]
    Ios,
}

impl Platform {
    /// The W3C `platformName` value.
    pub fn platform_name(self) -> &'static str {
        match self {
            Platform::Android => "Android",
            Platform::Ios => "iOS",
        }
    }

    /// Automation backend used when a capability set does not name one.
    pub fn default_automation_name(self) -> &'static str {
        match self {
            Platform::Android => "UiAutomator2",
            Platform::Ios => "XCUITest",
        }
    }

    /// Capability key carrying the per-session port.
    pub fn session_port_capability(self) -> &'static str {
        match self {
            Platform::Android => "appium:systemPort",
            Platform::Ios => "appium:wdaLocalPort",
        }
    }

    /// First port handed out when the coordinator allocates session ports.
    pub fn base_session_port(self) -> u16 {
        match self {
            Platform::Android => 8200,
            Platform::Ios => 8100,
        }
    }

    /// Lower-case identifier used in artifact names.
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.platform_name())
    }
}

// ---------------------------------------------------------------------------
// CapabilitySet
// ---------------------------------------------------------------------------

/// The application under test: an installable artifact, an installed
/// package/bundle id, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppReference {
    /// Path or URL of the `.apk` / `.app` / `.ipa` to install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Android package or iOS bundle identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    /// Android launch activity (ignored on iOS).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
}

/// Declarative description of one target device, platform and app.
///
/// Shared as `Arc<CapabilitySet>` once a run starts; one instance feeds
/// exactly one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySet {
    pub platform: Platform,

    pub device_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,

    /// Backend identifier (`UiAutomator2`, `XCUITest`, ...). Defaults per platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_name: Option<String>,

    #[serde(default)]
    pub app: AppReference,

    /// Device-side port owned by this session (`systemPort` / `wdaLocalPort`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_port: Option<u16>,

    /// Idle timeout after which the backend drops the session, in seconds.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Additional `appium:` capabilities passed through verbatim.
    ///
    /// Keys without a vendor prefix get `appium:` prepended.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

fn default_session_timeout_secs() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

impl CapabilitySet {
    /// Creates a capability set with platform defaults for everything else.
    pub fn new(platform: Platform, device_name: impl Into<String>) -> Self {
        Self {
            platform,
            device_name: device_name.into(),
            platform_version: None,
            automation_name: None,
            app: AppReference::default(),
            session_port: None,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_platform_version(mut self, version: impl Into<String>) -> Self {
        self.platform_version = Some(version.into());
        self
    }

    pub fn with_automation_name(mut self, name: impl Into<String>) -> Self {
        self.automation_name = Some(name.into());
        self
    }

    pub fn with_app_path(mut self, path: impl Into<String>) -> Self {
        self.app.path = Some(path.into());
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app.app_id = Some(app_id.into());
        self
    }

    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.app.activity = Some(activity.into());
        self
    }

    pub fn with_session_port(mut self, port: u16) -> Self {
        self.session_port = Some(port);
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// The automation backend identifier, falling back to the platform default.
    pub fn automation_name(&self) -> &str {
        self.automation_name
            .as_deref()
            .unwrap_or_else(|| self.platform.default_automation_name())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Short human-readable label, e.g. `iPhone 14 (iOS 16.0)`.
    pub fn label(&self) -> String {
        match &self.platform_version {
            Some(version) => format!("{} ({} {})", self.device_name, self.platform, version),
            None => format!("{} ({})", self.device_name, self.platform),
        }
    }

    /// Serializes to the W3C `alwaysMatch` capability object with `appium:` keys.
    pub fn to_w3c(&self) -> Value {
        let mut caps = Map::new();
        caps.insert("platformName".into(), json!(self.platform.platform_name()));
        caps.insert("appium:deviceName".into(), json!(self.device_name));
        caps.insert("appium:automationName".into(), json!(self.automation_name()));
        if let Some(version) = &self.platform_version {
            caps.insert("appium:platformVersion".into(), json!(version));
        }
        if let Some(path) = &self.app.path {
            caps.insert("appium:app".into(), json!(path));
        }
        if let Some(app_id) = &self.app.app_id {
            let key = match self.platform {
                Platform::Android => "appium:appPackage",
                Platform::Ios => "appium:bundleId",
            };
            caps.insert(key.into(), json!(app_id));
        }
        if let (Platform::Android, Some(activity)) = (self.platform, &self.app.activity) {
            caps.insert("appium:appActivity".into(), json!(activity));
        }
        if let Some(port) = self.session_port {
            caps.insert(self.platform.session_port_capability().into(), json!(port));
        }
        caps.insert(
            "appium:newCommandTimeout".into(),
            json!(self.session_timeout_secs),
        );
        for (key, value) in &self.extra {
            let key = if key.contains(':') {
                key.clone()
            } else {
                format!("appium:{key}")
            };
            caps.insert(key, value.clone());
        }
        Value::Object(caps)
    }
}

// ---------------------------------------------------------------------------
// CapabilityMatrix
// ---------------------------------------------------------------------------

/// The ordered list of capability sets a run fans out over.
///
/// Accepts either a bare JSON array or `{"capabilities": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CapabilityMatrix {
    pub capabilities: Vec<CapabilitySet>,
}

impl<'de> Deserialize<'de> for CapabilityMatrix {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            List(Vec<CapabilitySet>),
            Wrapped { capabilities: Vec<CapabilitySet> },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::List(capabilities) | Repr::Wrapped { capabilities } => Self { capabilities },
        })
    }
}

impl CapabilityMatrix {
    pub fn new(capabilities: Vec<CapabilitySet>) -> Self {
        Self { capabilities }
    }

    /// Loads a matrix from a JSON file. An empty matrix is rejected.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let matrix: Self = read_json(path)?;
        if matrix.capabilities.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{} contains no capability sets",
                path.display()
            )));
        }
        Ok(matrix)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RunnerConfig
// ---------------------------------------------------------------------------

/// Location of the remote device-automation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Path prefix of the WebDriver API (`/` for Appium 2, `/wd/hub` for Appium 1).
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

fn default_base_path() -> String {
    "/".to_string()
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4723,
            base_path: default_base_path(),
        }
    }
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            base_path: default_base_path(),
        }
    }

    /// Base URL without a trailing slash, e.g. `http://localhost:4723/wd/hub`.
    pub fn base_url(&self) -> String {
        let path = self.base_path.trim_matches('/');
        if path.is_empty() {
            format!("http://{}:{}", self.host, self.port)
        } else {
            format!("http://{}:{}/{}", self.host, self.port, path)
        }
    }

    /// Parses `host:port[/base/path]`, with an optional `http://` scheme.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let rest = text.trim().trim_start_matches("http://");
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::Invalid(format!("endpoint '{text}' has no port")))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::Invalid(format!("endpoint '{text}' has an invalid port")))?;
        if host.is_empty() {
            return Err(ConfigError::Invalid(format!("endpoint '{text}' has no host")));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            base_path: path.to_string(),
        })
    }
}

/// Per-session setup applied right after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionDefaults {
    pub timeouts: Timeouts,
    /// `None` leaves the device as it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            orientation: Some(Orientation::Portrait),
        }
    }
}

/// Persistent runner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerConfig {
    pub endpoint: Endpoint,
    /// Upper bound on concurrently running sessions.
    pub max_instances: usize,
    /// Default timeout for element waits.
    pub wait_timeout_ms: u64,
    /// Interval between wait polls.
    pub poll_interval_ms: u64,
    /// Timeout applied to every single protocol round-trip.
    pub command_timeout_ms: u64,
    /// Where screenshots, page sources and recordings are written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<PathBuf>,
    /// Applied to every session before its first step.
    pub session_defaults: SessionDefaults,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            max_instances: 5,
            wait_timeout_ms: 30_000,
            poll_interval_ms: 500,
            command_timeout_ms: 120_000,
            artifacts_dir: None,
            session_defaults: SessionDefaults::default(),
        }
    }
}

impl RunnerConfig {
    /// Load config from `~/.mobitest/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::load_from(&mobitest_dir().join(CONFIG_FILENAME)).unwrap_or_default()
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.artifacts_dir
            .clone()
            .unwrap_or_else(|| mobitest_dir().join("artifacts"))
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}
