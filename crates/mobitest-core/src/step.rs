//! Test steps and test plans.
//!
//! A step is anything implementing [`TestStep`]. Plans loaded from JSON use
//! the declarative [`StepAction`] enum; Rust callers can also wrap closures
//! with [`FnStep`]. Steps run strictly in order against a [`StepContext`]
//! that exposes the unified action API and the device utilities of one
//! session.
//!
//! # Plan file
//!
//! ```json
//! {
//!   "name": "home",
//!   "selectors": {
//!     "android": { "views": "//android.widget.TextView[@text=\"Views\"]" },
//!     "ios": { "views": "//XCUIElementTypeCell[@name=\"Buttons\"]" }
//!   },
//!   "steps": [
//!     { "action": "wait_for", "selector": "views" },
//!     { "name": "open views", "action": "click", "selector": "views" },
//!     { "action": "back" }
//!   ]
//! }
//! ```

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::Orientation;
use crate::config::{read_json, CapabilitySet, ConfigError, Platform};
use crate::device::DeviceUtils;
use crate::element::AppState;
use crate::error::AutomationError;
use crate::gesture::{Direction, GestureIntent};
use crate::platform::PlatformLayer;
use crate::strategy::{strategy_for, PlatformStrategy, SelectorMap};

/// Everything a step can drive within one session.
pub struct StepContext {
    pub ui: PlatformLayer,
    pub device: DeviceUtils,
    pub caps: Arc<CapabilitySet>,
}

impl StepContext {
    /// `explicit`, or the app id from the capability set.
    pub fn app_id(&self, explicit: Option<&str>) -> Result<String, AutomationError> {
        explicit
            .map(str::to_string)
            .or_else(|| self.caps.app.app_id.clone())
            .ok_or_else(|| {
                AutomationError::InvalidState(format!(
                    "no app id given and none configured for {}",
                    self.caps.label()
                ))
            })
    }
}

/// One step of a test.
#[async_trait]
pub trait TestStep: Send + Sync {
    fn name(&self) -> String;

    async fn run(&self, ctx: &mut StepContext) -> Result<(), AutomationError>;
}

// ---------------------------------------------------------------------------
// Declarative steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Native,
    Webview,
}

fn default_swipe_distance() -> f64 {
    0.5
}

/// A step as written in a plan file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Click {
        selector: String,
    },
    /// Pointer tap at the element centre.
    Tap {
        selector: String,
    },
    SetValue {
        selector: String,
        text: String,
    },
    AssertText {
        selector: String,
        expected: String,
        /// Substring match instead of equality.
        #[serde(default)]
        contains: bool,
    },
    AssertDisplayed {
        selector: String,
    },
    WaitFor {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    WaitForGone {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    ScrollTo {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_attempts: Option<u32>,
    },
    Swipe {
        direction: Direction,
        #[serde(default = "default_swipe_distance")]
        distance: f64,
    },
    Scroll {
        direction: Direction,
    },
    Gesture {
        gesture: GestureIntent,
    },
    Back,
    HideKeyboard,
    Pause {
        ms: u64,
    },
    ActivateApp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
    },
    TerminateApp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
    },
    AssertAppState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
        state: AppState,
    },
    SwitchContext {
        context: ContextKind,
    },
    SetOrientation {
        orientation: Orientation,
    },
    HandlePermissions,
    Screenshot {
        name: String,
    },
}

impl StepAction {
    pub fn name(&self) -> &'static str {
        match self {
            StepAction::Click { .. } => "click",
            StepAction::Tap { .. } => "tap",
            StepAction::SetValue { .. } => "set_value",
            StepAction::AssertText { .. } => "assert_text",
            StepAction::AssertDisplayed { .. } => "assert_displayed",
            StepAction::WaitFor { .. } => "wait_for",
            StepAction::WaitForGone { .. } => "wait_for_gone",
            StepAction::ScrollTo { .. } => "scroll_to",
            StepAction::Swipe { .. } => "swipe",
            StepAction::Scroll { .. } => "scroll",
            StepAction::Gesture { .. } => "gesture",
            StepAction::Back => "back",
            StepAction::HideKeyboard => "hide_keyboard",
            StepAction::Pause { .. } => "pause",
            StepAction::ActivateApp { .. } => "activate_app",
            StepAction::TerminateApp { .. } => "terminate_app",
            StepAction::AssertAppState { .. } => "assert_app_state",
            StepAction::SwitchContext { .. } => "switch_context",
            StepAction::SetOrientation { .. } => "set_orientation",
            StepAction::HandlePermissions => "handle_permissions",
            StepAction::Screenshot { .. } => "screenshot",
        }
    }

    /// Short label, e.g. `click views`.
    pub fn describe(&self) -> String {
        match self {
            StepAction::Click { selector }
            | StepAction::Tap { selector }
            | StepAction::SetValue { selector, .. }
            | StepAction::AssertText { selector, .. }
            | StepAction::AssertDisplayed { selector }
            | StepAction::WaitFor { selector, .. }
            | StepAction::WaitForGone { selector, .. }
            | StepAction::ScrollTo { selector, .. } => format!("{} {selector}", self.name()),
            StepAction::Gesture { gesture } => format!("gesture {}", gesture.name()),
            StepAction::Screenshot { name } => format!("screenshot {name}"),
            other => other.name().to_string(),
        }
    }

    /// The selector this action targets, if any.
    pub fn selector(&self) -> Option<&str> {
        match self {
            StepAction::Click { selector }
            | StepAction::Tap { selector }
            | StepAction::SetValue { selector, .. }
            | StepAction::AssertText { selector, .. }
            | StepAction::AssertDisplayed { selector }
            | StepAction::WaitFor { selector, .. }
            | StepAction::WaitForGone { selector, .. }
            | StepAction::ScrollTo { selector, .. } => Some(selector),
            _ => None,
        }
    }

    pub async fn run(&self, ctx: &mut StepContext) -> Result<(), AutomationError> {
        match self {
            StepAction::Click { selector } => ctx.ui.click(selector).await,
            StepAction::Tap { selector } => ctx.ui.tap(selector).await,
            StepAction::SetValue { selector, text } => ctx.ui.set_value(selector, text).await,
            StepAction::AssertText {
                selector,
                expected,
                contains,
            } => {
                let actual = ctx.ui.get_text(selector).await?;
                let ok = if *contains {
                    actual.contains(expected.as_str())
                } else {
                    actual == *expected
                };
                if ok {
                    Ok(())
                } else {
                    Err(AutomationError::Assertion(format!(
                        "text of '{selector}' was '{actual}', expected '{expected}'"
                    )))
                }
            }
            StepAction::AssertDisplayed { selector } => {
                if ctx.ui.is_displayed(selector).await? {
                    Ok(())
                } else {
                    Err(AutomationError::Assertion(format!(
                        "'{selector}' is not displayed"
                    )))
                }
            }
            StepAction::WaitFor {
                selector,
                timeout_ms,
            } => {
                ctx.ui
                    .wait_for(selector, timeout_ms.map(Duration::from_millis))
                    .await?;
                Ok(())
            }
            StepAction::WaitForGone {
                selector,
                timeout_ms,
            } => {
                ctx.ui
                    .wait_for_gone(selector, timeout_ms.map(Duration::from_millis))
                    .await
            }
            StepAction::ScrollTo {
                selector,
                max_attempts,
            } => {
                ctx.ui.scroll_until_visible(selector, *max_attempts).await?;
                Ok(())
            }
            StepAction::Swipe {
                direction,
                distance,
            } => ctx.ui.swipe(*direction, *distance).await,
            StepAction::Scroll { direction } => ctx.ui.scroll(*direction).await,
            StepAction::Gesture { gesture } => ctx.ui.perform_gesture(gesture).await,
            StepAction::Back => ctx.ui.go_back().await,
            StepAction::HideKeyboard => ctx.ui.hide_keyboard().await,
            StepAction::Pause { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
            StepAction::ActivateApp { app_id } => {
                let id = ctx.app_id(app_id.as_deref())?;
                ctx.device.activate_app(&id).await
            }
            StepAction::TerminateApp { app_id } => {
                let id = ctx.app_id(app_id.as_deref())?;
                ctx.device.terminate_app(&id).await
            }
            StepAction::AssertAppState { app_id, state } => {
                let id = ctx.app_id(app_id.as_deref())?;
                let actual = ctx.device.query_app_state(&id).await?;
                if actual == *state {
                    Ok(())
                } else {
                    Err(AutomationError::Assertion(format!(
                        "{id} is {actual:?}, expected {state:?}"
                    )))
                }
            }
            StepAction::SwitchContext { context } => {
                match context {
                    ContextKind::Native => ctx.device.switch_to_native_context().await?,
                    ContextKind::Webview => ctx.device.switch_to_webview_context().await?,
                };
                Ok(())
            }
            StepAction::SetOrientation { orientation } => {
                ctx.device.set_orientation(*orientation).await
            }
            StepAction::HandlePermissions => {
                let clicked = ctx.device.handle_permission_dialogs().await?;
                debug!(clicked, "permission dialogs handled");
                Ok(())
            }
            StepAction::Screenshot { name } => {
                ctx.device.take_screenshot(name).await?;
                Ok(())
            }
        }
    }
}

/// A plan entry: an action with an optional display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub action: StepAction,
}

impl From<StepAction> for PlanStep {
    fn from(action: StepAction) -> Self {
        Self { name: None, action }
    }
}

#[async_trait]
impl TestStep for PlanStep {
    fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.action.describe())
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<(), AutomationError> {
        self.action.run(ctx).await
    }
}

// ---------------------------------------------------------------------------
// Closure steps
// ---------------------------------------------------------------------------

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AutomationError>> + Send + 'a>>;

/// A step backed by a closure.
///
/// ```
/// use mobitest_core::step::{FnStep, TestStep};
///
/// let step = FnStep::new("open views", |ctx| Box::pin(async move {
///     ctx.ui.click("text:Views").await
/// }));
/// assert_eq!(step.name(), "open views");
/// ```
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> FnStep<F>
where
    F: for<'a> Fn(&'a mut StepContext) -> StepFuture<'a> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> TestStep for FnStep<F>
where
    F: for<'a> Fn(&'a mut StepContext) -> StepFuture<'a> + Send + Sync,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<(), AutomationError> {
        (self.f)(ctx).await
    }
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// A test plan as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    pub name: String,
    #[serde(default)]
    pub selectors: SelectorMap,
    pub steps: Vec<PlanStep>,
}

impl TestPlan {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    /// Selectors used by the plan that don't resolve on `platform`, in step
    /// order.
    pub fn unresolved_selectors(&self, platform: Platform) -> Vec<AutomationError> {
        let strategy = strategy_for(platform);
        self.steps
            .iter()
            .filter_map(|step| step.action.selector())
            .filter_map(|selector| strategy.resolve_selector(selector, &self.selectors).err())
            .collect()
    }
}

/// The steps every session of a run executes, shared read-only.
#[derive(Clone, Default)]
pub struct Scenario {
    pub name: String,
    pub selectors: SelectorMap,
    pub steps: Vec<Arc<dyn TestStep>>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_selectors(mut self, selectors: SelectorMap) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn step(mut self, step: impl TestStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl From<TestPlan> for Scenario {
    fn from(plan: TestPlan) -> Self {
        Self {
            name: plan.name,
            selectors: plan.selectors,
            steps: plan
                .steps
                .into_iter()
                .map(|s| Arc::new(s) as Arc<dyn TestStep>)
                .collect(),
        }
    }
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}
