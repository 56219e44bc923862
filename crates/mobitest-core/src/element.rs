//! Element references, locators and geometry shared by every layer.
//!
//! Types here are backend-agnostic: a [`Locator`] is what the protocol client
//! sends, an [`ElementId`] is what it gets back, and an [`ElementHandle`] ties
//! that reference to the logical selector and platform it was resolved for.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Platform;

/// Element lookup strategy understood by the remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorStrategy {
    AccessibilityId,
    XPath,
    Id,
    ClassName,
    /// Android `UiSelector` expression.
    UiAutomator,
    /// iOS `NSPredicate` string.
    PredicateString,
    /// iOS class chain query.
    ClassChain,
}

impl LocatorStrategy {
    /// The `using` value sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            LocatorStrategy::AccessibilityId => "accessibility id",
            LocatorStrategy::XPath => "xpath",
            LocatorStrategy::Id => "id",
            LocatorStrategy::ClassName => "class name",
            LocatorStrategy::UiAutomator => "-android uiautomator",
            LocatorStrategy::PredicateString => "-ios predicate string",
            LocatorStrategy::ClassChain => "-ios class chain",
        }
    }
}

/// A platform-native selector: strategy plus query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    pub strategy: LocatorStrategy,
    pub value: String,
}

impl Locator {
    pub fn new(strategy: LocatorStrategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
        }
    }

    pub fn accessibility_id(value: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::AccessibilityId, value)
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::XPath, value)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy.as_str(), self.value)
    }
}

/// Opaque element reference returned by the backend.
///
/// Only valid until the next view-tree change; never cache across screens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved element: backend reference plus where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: ElementId,
    /// The logical selector that produced this handle.
    pub selector: String,
    /// The platform-native locator the selector resolved to.
    pub locator: Locator,
    pub platform: Platform,
}

/// What to look up: the logical selector (for error reporting) and the
/// native locator (for the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementQuery {
    pub selector: String,
    pub locator: Locator,
    pub platform: Platform,
}

impl ElementQuery {
    pub fn new(selector: impl Into<String>, locator: Locator, platform: Platform) -> Self {
        Self {
            selector: selector.into(),
            locator,
            platform,
        }
    }

    pub fn handle(&self, id: ElementId) -> ElementHandle {
        ElementHandle {
            id,
            selector: self.selector.clone(),
            locator: self.locator.clone(),
            platform: self.platform,
        }
    }
}

/// Element bounds in device pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Window size in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Application state as reported by the backend (integer codes 0..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    NotInstalled,
    NotRunning,
    RunningInBackgroundSuspended,
    RunningInBackground,
    RunningInForeground,
}

impl AppState {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => AppState::NotInstalled,
            1 => AppState::NotRunning,
            2 => AppState::RunningInBackgroundSuspended,
            3 => AppState::RunningInBackground,
            4 => AppState::RunningInForeground,
            _ => return None,
        })
    }

    pub fn code(self) -> i64 {
        match self {
            AppState::NotInstalled => 0,
            AppState::NotRunning => 1,
            AppState::RunningInBackgroundSuspended => 2,
            AppState::RunningInBackground => 3,
            AppState::RunningInForeground => 4,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(
            self,
            AppState::RunningInBackgroundSuspended
                | AppState::RunningInBackground
                | AppState::RunningInForeground
        )
    }
}
