//! Per-platform selector resolution and gesture dispatch.
//!
//! A [`PlatformStrategy`] is picked once, when a session binds, from the
//! platform declared in its capability set. All platform differences the
//! action layer cares about go through it, so no action has to branch on
//! the platform itself.
//!
//! # Logical selectors
//!
//! | Form                      | Resolves to                                  |
//! |---------------------------|----------------------------------------------|
//! | bare name                 | entry in the platform's [`SelectorMap`]      |
//! | `~Login`, `id:Login`      | accessibility id                             |
//! | `xpath:...`, `//...`      | XPath                                        |
//! | `text:Views`              | element whose visible text/name matches      |
//! | `button:OK`               | button with that title                       |
//! | `class:...`               | class name                                   |
//! | `uiautomator:...`         | Android `UiSelector` (Android only)          |
//! | `predicate:...`           | iOS predicate string (iOS only)              |
//! | `chain:...`               | iOS class chain (iOS only)                   |
//!
//! Values in a [`SelectorMap`] use the same prefixed forms; an unprefixed
//! value is taken as an accessibility id.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Platform;
use crate::element::{Locator, LocatorStrategy, ScreenSize};
use crate::error::AutomationError;
use crate::gesture::{self, GestureIntent, PointerSequence};

/// Mapping tables from logical names to native selectors, one per platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorMap {
    #[serde(default)]
    pub android: BTreeMap<String, String>,
    #[serde(default)]
    pub ios: BTreeMap<String, String>,
}

impl SelectorMap {
    pub fn for_platform(&self, platform: Platform) -> &BTreeMap<String, String> {
        match platform {
            Platform::Android => &self.android,
            Platform::Ios => &self.ios,
        }
    }

    /// Adds one logical name with its native selector on both platforms.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        android: impl Into<String>,
        ios: impl Into<String>,
    ) {
        let name = name.into();
        self.android.insert(name.clone(), android.into());
        self.ios.insert(name, ios.into());
    }
}

/// Quotes a string as an XPath 1.0 literal.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('"') {
        format!("\"{value}\"")
    } else if !value.contains('\'') {
        format!("'{value}'")
    } else {
        let parts: Vec<String> = value.split('"').map(|p| format!("\"{p}\"")).collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}

/// Platform-specific behaviour behind the unified action API.
pub trait PlatformStrategy: Send + Sync {
    fn platform(&self) -> Platform;

    /// Locator for an element whose visible text is `text`.
    fn text_locator(&self, text: &str) -> Locator;

    /// Locator for a button titled `label`.
    fn button_locator(&self, label: &str) -> Locator;

    /// Resolves a platform-only prefix (`uiautomator:`, `predicate:`, `chain:`).
    ///
    /// Returns `None` when this platform doesn't understand the prefix.
    fn native_prefix(&self, prefix: &str, value: &str) -> Option<Locator>;

    /// `mobile:` argument key naming an application.
    fn app_id_key(&self) -> &'static str;

    /// Whether airplane/wifi/data can be toggled from a session.
    fn supports_network_control(&self) -> bool;

    /// On-screen navigation button used instead of a system back action.
    fn back_button(&self) -> Option<Locator>;

    /// Keyboard button that dismisses the keyboard, tried before the backend call.
    fn keyboard_done_button(&self) -> Option<Locator>;

    /// Buttons that accept a system permission dialog, in the order to try.
    fn permission_buttons(&self) -> Vec<Locator>;

    /// Resolves a prefixed selector without consulting any mapping table.
    fn resolve_native(&self, selector: &str) -> Option<Locator> {
        if let Some(rest) = selector.strip_prefix('~') {
            return Some(Locator::accessibility_id(rest));
        }
        if selector.starts_with("//") || selector.starts_with("(/") {
            return Some(Locator::xpath(selector));
        }
        let (prefix, value) = selector.split_once(':')?;
        match prefix {
            "id" => Some(Locator::accessibility_id(value)),
            "xpath" => Some(Locator::xpath(value)),
            "text" => Some(self.text_locator(value)),
            "button" => Some(self.button_locator(value)),
            "class" => Some(Locator::new(LocatorStrategy::ClassName, value)),
            other => self.native_prefix(other, value),
        }
    }

    /// Resolves a logical selector to a platform-native locator.
    fn resolve_selector(
        &self,
        selector: &str,
        table: &SelectorMap,
    ) -> Result<Locator, AutomationError> {
        if let Some(mapped) = table.for_platform(self.platform()).get(selector) {
            return Ok(self
                .resolve_native(mapped)
                .unwrap_or_else(|| Locator::accessibility_id(mapped.as_str())));
        }
        self.resolve_native(selector)
            .ok_or_else(|| AutomationError::UnknownSelector {
                selector: selector.to_string(),
                platform: self.platform(),
            })
    }

    fn synthesize_gesture(
        &self,
        intent: &GestureIntent,
        screen: ScreenSize,
    ) -> Result<Vec<PointerSequence>, AutomationError> {
        gesture::synthesize(intent, screen)
    }
}

// ---------------------------------------------------------------------------
// Android
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct AndroidStrategy;

impl PlatformStrategy for AndroidStrategy {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    fn text_locator(&self, text: &str) -> Locator {
        Locator::xpath(format!("//*[@text={}]", xpath_literal(text)))
    }

    fn button_locator(&self, label: &str) -> Locator {
        Locator::xpath(format!(
            "//android.widget.Button[@text={}]",
            xpath_literal(label)
        ))
    }

    fn native_prefix(&self, prefix: &str, value: &str) -> Option<Locator> {
        match prefix {
            "uiautomator" => Some(Locator::new(LocatorStrategy::UiAutomator, value)),
            "resource-id" => Some(Locator::new(LocatorStrategy::Id, value)),
            _ => None,
        }
    }

    fn app_id_key(&self) -> &'static str {
        "appId"
    }

    fn supports_network_control(&self) -> bool {
        true
    }

    fn back_button(&self) -> Option<Locator> {
        None
    }

    fn keyboard_done_button(&self) -> Option<Locator> {
        None
    }

    fn permission_buttons(&self) -> Vec<Locator> {
        vec![self.button_locator("Allow"), self.button_locator("OK")]
    }
}

// ---------------------------------------------------------------------------
// iOS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct IosStrategy;

impl PlatformStrategy for IosStrategy {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    fn text_locator(&self, text: &str) -> Locator {
        let lit = xpath_literal(text);
        Locator::xpath(format!("//*[@name={lit} or @label={lit}]"))
    }

    fn button_locator(&self, label: &str) -> Locator {
        Locator::xpath(format!(
            "//XCUIElementTypeButton[@name={}]",
            xpath_literal(label)
        ))
    }

    fn native_prefix(&self, prefix: &str, value: &str) -> Option<Locator> {
        match prefix {
            "predicate" => Some(Locator::new(LocatorStrategy::PredicateString, value)),
            "chain" => Some(Locator::new(LocatorStrategy::ClassChain, value)),
            _ => None,
        }
    }

    fn app_id_key(&self) -> &'static str {
        "bundleId"
    }

    fn supports_network_control(&self) -> bool {
        false
    }

    fn back_button(&self) -> Option<Locator> {
        Some(self.button_locator("Back"))
    }

    fn keyboard_done_button(&self) -> Option<Locator> {
        Some(self.button_locator("Done"))
    }

    fn permission_buttons(&self) -> Vec<Locator> {
        Vec::new()
    }
}

/// The strategy for a declared platform.
pub fn strategy_for(platform: Platform) -> Arc<dyn PlatformStrategy> {
    match platform {
        Platform::Android => Arc::new(AndroidStrategy),
        Platform::Ios => Arc::new(IosStrategy),
    }
}
