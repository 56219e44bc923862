//! The unified action API over a scripted device.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeDevice, FakeElement};
use mobitest_core::backend::{AutomationBackend, BackendError};
use mobitest_core::config::{CapabilitySet, Platform};
use mobitest_core::element::{Locator, LocatorStrategy, Rect};
use mobitest_core::error::AutomationError;
use mobitest_core::gesture::{GestureIntent, PinchDirection, PointerStep};
use mobitest_core::platform::{LayerState, PlatformLayer};
use mobitest_core::strategy::{strategy_for, PlatformStrategy, SelectorMap};
use mobitest_core::wait::WaitConfig;

fn wait() -> WaitConfig {
    WaitConfig {
        poll_interval: Duration::from_millis(250),
        default_timeout: Duration::from_secs(2),
    }
}

fn selectors() -> SelectorMap {
    let mut map = SelectorMap::default();
    map.insert(
        "views",
        "//android.widget.TextView[@text=\"Views\"]",
        "//XCUIElementTypeCell[@name=\"Buttons\"]",
    );
    map.insert("login", "login_button", "loginButton");
    map
}

async fn layer(device: FakeDevice, platform: Platform) -> (Arc<FakeDevice>, PlatformLayer) {
    let device = Arc::new(device);
    let caps = CapabilitySet::new(platform, "device");
    let session = device.create_session(&caps).await.unwrap();
    let mut ui = PlatformLayer::new(device.clone(), session, wait());
    ui.bind(&caps, selectors()).unwrap();
    (device, ui)
}

fn views_android() -> Locator {
    Locator::xpath("//android.widget.TextView[@text=\"Views\"]")
}

#[tokio::test]
async fn actions_require_a_bound_layer() {
    let device = Arc::new(FakeDevice::new());
    let caps = CapabilitySet::new(Platform::Android, "device");
    let session = device.create_session(&caps).await.unwrap();
    let mut ui = PlatformLayer::new(device.clone(), session, wait());

    assert_eq!(ui.state(), LayerState::Uninitialized);
    assert!(matches!(
        ui.click("~login").await,
        Err(AutomationError::InvalidState(_))
    ));

    ui.bind(&caps, SelectorMap::default()).unwrap();
    assert_eq!(ui.state(), LayerState::Ready);
    assert!(ui.bind(&caps, SelectorMap::default()).is_err());
}

#[tokio::test]
async fn mapped_selectors_resolve_per_platform() {
    let (_, android) = layer(FakeDevice::new(), Platform::Android).await;
    let (_, ios) = layer(FakeDevice::new(), Platform::Ios).await;

    assert_eq!(android.resolve("views").unwrap(), views_android());
    assert_eq!(
        ios.resolve("views").unwrap(),
        Locator::xpath("//XCUIElementTypeCell[@name=\"Buttons\"]")
    );
    assert_eq!(
        android.resolve("login").unwrap(),
        Locator::accessibility_id("login_button")
    );
    assert_eq!(
        ios.resolve("login").unwrap(),
        Locator::accessibility_id("loginButton")
    );
}

#[tokio::test]
async fn prefixed_selectors_respect_platform() {
    let (_, android) = layer(FakeDevice::new(), Platform::Android).await;
    let (_, ios) = layer(FakeDevice::new(), Platform::Ios).await;

    let uiautomator = android
        .resolve("uiautomator:new UiSelector().text(\"Views\")")
        .unwrap();
    assert_eq!(uiautomator.strategy, LocatorStrategy::UiAutomator);

    assert!(matches!(
        ios.resolve("uiautomator:new UiSelector()"),
        Err(AutomationError::UnknownSelector { .. })
    ));
    assert!(matches!(
        android.resolve("not-a-selector"),
        Err(AutomationError::UnknownSelector { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn click_waits_for_element_then_clicks() {
    let element = FakeElement::new(views_android(), "Views").appearing_after(2);
    let (device, mut ui) = layer(FakeDevice::new().with_element(element), Platform::Android).await;

    ui.click("views").await.unwrap();
    assert_eq!(device.clicks(), ["el-0"]);
    assert_eq!(ui.state(), LayerState::Ready);
}

#[tokio::test(start_paused = true)]
async fn set_value_clears_then_types() {
    let field = FakeElement::new(Locator::accessibility_id("username"), "old");
    let (device, mut ui) = layer(FakeDevice::new().with_element(field), Platform::Ios).await;

    ui.set_value("~username", "alice").await.unwrap();
    assert_eq!(device.cleared(), ["el-0"]);
    assert_eq!(device.typed(), [("el-0".to_string(), "alice".to_string())]);
    assert_eq!(ui.get_text("~username").await.unwrap(), "alice");
}

#[tokio::test(start_paused = true)]
async fn failed_action_returns_layer_to_ready() {
    let (_, mut ui) = layer(FakeDevice::new(), Platform::Android).await;

    let err = ui.click("~missing").await.unwrap_err();
    assert!(matches!(err, AutomationError::ElementTimeout { .. }));
    assert_eq!(ui.state(), LayerState::Ready);
}

#[tokio::test(start_paused = true)]
async fn element_exists_checks_presence_once() {
    let hidden = FakeElement::new(Locator::accessibility_id("spinner"), "").hidden();
    let (device, mut ui) = layer(FakeDevice::new().with_element(hidden), Platform::Ios).await;

    assert!(ui.element_exists("~spinner").await.unwrap());
    assert!(!ui.element_exists("~missing").await.unwrap());
    assert_eq!(device.lookups(0), 1);
    assert_eq!(ui.state(), LayerState::Ready);
}

#[tokio::test]
async fn element_exists_propagates_transport_errors() {
    let (_, mut ui) = layer(FakeDevice::new().failing_lookups(), Platform::Android).await;

    let err = ui.element_exists("~login").await.unwrap_err();
    assert!(matches!(
        err,
        AutomationError::Backend(BackendError::Transport(_))
    ));
    assert!(err.is_fatal_to_session());
    assert_eq!(ui.state(), LayerState::Ready);
}

#[tokio::test(start_paused = true)]
async fn scroll_until_visible_scrolls_until_found() {
    let target = FakeElement::new(Locator::accessibility_id("footer"), "").revealed_after_scrolls(3);
    let (device, mut ui) = layer(FakeDevice::new().with_element(target), Platform::Android).await;

    let handle = ui.scroll_until_visible("~footer", None).await.unwrap();
    assert_eq!(handle.selector, "~footer");

    let sequences = device.sequences();
    assert_eq!(sequences.len(), 3);
    for sequence in &sequences {
        // Scrolling content down drags the finger up.
        let (_, press_y) = sequence.press_point().unwrap();
        let (_, end_y) = sequence.end_point().unwrap();
        assert!(press_y > end_y);
    }
}

#[tokio::test(start_paused = true)]
async fn scroll_until_visible_stops_at_cap() {
    let (device, mut ui) = layer(FakeDevice::new(), Platform::Android).await;

    let err = ui.scroll_until_visible("~never", Some(4)).await.unwrap_err();
    match err {
        AutomationError::ElementNotFoundAfterScroll { selector, attempts } => {
            assert_eq!(selector, "~never");
            assert_eq!(attempts, 4);
        }
        other => panic!("expected scroll exhaustion, got {other:?}"),
    }
    assert_eq!(device.sequences().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn scroll_until_visible_default_cap_is_ten() {
    let (device, mut ui) = layer(FakeDevice::new(), Platform::Ios).await;

    assert!(ui.scroll_until_visible("~never", None).await.is_err());
    assert_eq!(device.sequences().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn tap_presses_element_centre() {
    let button = FakeElement::new(Locator::accessibility_id("ok"), "OK")
        .with_rect(Rect::new(100.0, 200.0, 300.0, 100.0));
    let (device, mut ui) = layer(FakeDevice::new().with_element(button), Platform::Android).await;

    ui.tap("~ok").await.unwrap();
    let sequences = device.sequences();
    assert_eq!(sequences.len(), 1);
    assert_eq!(sequences[0].press_point(), Some((250, 250)));
    assert!(matches!(sequences[0].steps().last(), Some(PointerStep::Release)));
    assert!(device.clicks().is_empty());
}

#[tokio::test]
async fn pinch_dispatches_two_sequences() {
    let (device, mut ui) = layer(FakeDevice::new(), Platform::Ios).await;

    ui.perform_gesture(&GestureIntent::pinch(PinchDirection::In))
        .await
        .unwrap();
    let sequences = device.sequences();
    assert_eq!(sequences.len(), 2);
    assert_ne!(sequences[0].pointer_id(), sequences[1].pointer_id());
}

#[tokio::test]
async fn back_uses_system_back_on_android() {
    let (device, mut ui) = layer(FakeDevice::new(), Platform::Android).await;

    ui.go_back().await.unwrap();
    assert_eq!(device.back_presses(), 1);
}

#[tokio::test]
async fn back_taps_navigation_button_on_ios() {
    let back = strategy_for(Platform::Ios).back_button().unwrap();
    let (device, mut ui) = layer(
        FakeDevice::new().with_element(FakeElement::new(back, "Back")),
        Platform::Ios,
    )
    .await;

    ui.go_back().await.unwrap();
    assert_eq!(device.clicks(), ["el-0"]);
    assert_eq!(device.back_presses(), 0);
}

#[tokio::test]
async fn back_without_navigation_button_is_noop_on_ios() {
    let (device, mut ui) = layer(FakeDevice::new(), Platform::Ios).await;

    ui.go_back().await.unwrap();
    assert!(device.clicks().is_empty());
    assert_eq!(device.back_presses(), 0);
}

#[tokio::test]
async fn hide_keyboard_prefers_done_button_on_ios() {
    let done = strategy_for(Platform::Ios).keyboard_done_button().unwrap();
    let (device, mut ui) = layer(
        FakeDevice::new().with_element(FakeElement::new(done, "Done")),
        Platform::Ios,
    )
    .await;

    ui.hide_keyboard().await.unwrap();
    assert_eq!(device.clicks(), ["el-0"]);
    assert_eq!(device.keyboard_hides(), 0);

    let (device, mut ui) = layer(FakeDevice::new(), Platform::Android).await;
    ui.hide_keyboard().await.unwrap();
    assert_eq!(device.keyboard_hides(), 1);
}

#[tokio::test]
async fn disposed_layer_rejects_actions() {
    let (_, mut ui) = layer(FakeDevice::new(), Platform::Android).await;
    ui.dispose();

    assert_eq!(ui.state(), LayerState::Disposed);
    assert!(matches!(
        ui.go_back().await,
        Err(AutomationError::InvalidState(_))
    ));
}
