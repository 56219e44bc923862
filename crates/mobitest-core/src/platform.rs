//! The unified action API over both platforms.
//!
//! A [`PlatformLayer`] is created per session and moves through
//! `Uninitialized -> Resolving(platform) -> Ready -> (Dispatching -> Ready)* -> Disposed`.
//! Binding reads the platform from the capability set and picks a
//! [`PlatformStrategy`]; from then on every action resolves logical selectors
//! through that strategy and waits through the session's [`Waiter`].
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use mobitest_core::backend::{AutomationBackend, SessionId};
//! # use mobitest_core::config::CapabilitySet;
//! # use mobitest_core::platform::PlatformLayer;
//! # use mobitest_core::strategy::SelectorMap;
//! # use mobitest_core::wait::WaitConfig;
//! # async fn example(backend: Arc<dyn AutomationBackend>, session: SessionId, caps: CapabilitySet)
//! #     -> Result<(), mobitest_core::error::AutomationError> {
//! let mut ui = PlatformLayer::new(backend, session, WaitConfig::default());
//! ui.bind(&caps, SelectorMap::default())?;
//!
//! ui.click("text:Views").await?;
//! ui.scroll_until_visible("text:WebView", None).await?;
//! assert_eq!(ui.get_text("~title").await?, "WebView");
//! ui.dispose();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::backend::{AutomationBackend, BackendError, SessionId};
use crate::config::{CapabilitySet, Platform};
use crate::element::{ElementHandle, ElementQuery, Locator, ScreenSize};
use crate::error::AutomationError;
use crate::gesture::{Direction, GestureIntent, GestureTarget};
use crate::strategy::{strategy_for, PlatformStrategy, SelectorMap};
use crate::wait::{WaitConfig, Waiter};

/// Default cap on `scroll_until_visible` iterations.
pub const DEFAULT_MAX_SCROLLS: u32 = 10;

/// Lifecycle of a [`PlatformLayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    Uninitialized,
    Resolving(Platform),
    Ready,
    Dispatching,
    Disposed,
}

impl fmt::Display for LayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerState::Uninitialized => f.write_str("uninitialized"),
            LayerState::Resolving(p) => write!(f, "resolving({p})"),
            LayerState::Ready => f.write_str("ready"),
            LayerState::Dispatching => f.write_str("dispatching"),
            LayerState::Disposed => f.write_str("disposed"),
        }
    }
}

/// Platform-independent UI actions bound to one live session.
pub struct PlatformLayer {
    state: LayerState,
    waiter: Waiter,
    strategy: Option<Arc<dyn PlatformStrategy>>,
    selectors: SelectorMap,
    max_scrolls: u32,
}

impl PlatformLayer {
    pub fn new(backend: Arc<dyn AutomationBackend>, session: SessionId, wait: WaitConfig) -> Self {
        Self {
            state: LayerState::Uninitialized,
            waiter: Waiter::new(backend, session, wait),
            strategy: None,
            selectors: SelectorMap::default(),
            max_scrolls: DEFAULT_MAX_SCROLLS,
        }
    }

    /// Overrides the default `scroll_until_visible` cap.
    pub fn with_max_scrolls(mut self, max_scrolls: u32) -> Self {
        self.max_scrolls = max_scrolls;
        self
    }

    /// Binds the layer to the caller-declared platform of `caps`.
    pub fn bind(&mut self, caps: &CapabilitySet, selectors: SelectorMap) -> Result<(), AutomationError> {
        if self.state != LayerState::Uninitialized {
            return Err(AutomationError::InvalidState(format!(
                "cannot bind a platform layer in state {}",
                self.state
            )));
        }
        self.state = LayerState::Resolving(caps.platform);
        self.strategy = Some(strategy_for(caps.platform));
        self.selectors = selectors;
        self.state = LayerState::Ready;
        info!(platform = %caps.platform, selectors = self.selectors.for_platform(caps.platform).len(), "platform layer ready");
        Ok(())
    }

    pub fn state(&self) -> LayerState {
        self.state
    }

    pub fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    pub fn session(&self) -> &SessionId {
        self.waiter.session()
    }

    fn backend(&self) -> &Arc<dyn AutomationBackend> {
        self.waiter.backend()
    }

    pub fn strategy(&self) -> Result<&Arc<dyn PlatformStrategy>, AutomationError> {
        match (&self.state, &self.strategy) {
            (LayerState::Disposed, _) | (_, None) => Err(AutomationError::InvalidState(format!(
                "platform layer is {}",
                self.state
            ))),
            (_, Some(strategy)) => Ok(strategy),
        }
    }

    pub fn platform(&self) -> Result<Platform, AutomationError> {
        Ok(self.strategy()?.platform())
    }

    /// Platform-native locator for a logical selector.
    pub fn resolve(&self, selector: &str) -> Result<Locator, AutomationError> {
        self.strategy()?.resolve_selector(selector, &self.selectors)
    }

    fn query(&self, selector: &str) -> Result<ElementQuery, AutomationError> {
        let strategy = self.strategy()?;
        let locator = strategy.resolve_selector(selector, &self.selectors)?;
        Ok(ElementQuery::new(selector, locator, strategy.platform()))
    }

    /// Ends the layer; any further action fails with `InvalidState`.
    pub fn dispose(&mut self) {
        if self.state != LayerState::Disposed {
            debug!(from = %self.state, "platform layer disposed");
        }
        self.state = LayerState::Disposed;
    }

    /// Returns a layer whose action was interrupted mid-dispatch to `Ready`.
    pub fn reset(&mut self) {
        if self.state == LayerState::Dispatching {
            debug!("interrupted action discarded");
            self.state = LayerState::Ready;
        }
    }

    fn begin(&mut self) -> Result<(), AutomationError> {
        match self.state {
            LayerState::Ready => {
                self.state = LayerState::Dispatching;
                Ok(())
            }
            other => Err(AutomationError::InvalidState(format!(
                "cannot dispatch an action in state {other}"
            ))),
        }
    }

    fn end(&mut self) {
        if self.state == LayerState::Dispatching {
            self.state = LayerState::Ready;
        }
    }

    // -----------------------------------------------------------------------
    // Element actions
    // -----------------------------------------------------------------------

    /// One-shot check, no waiting.
    #[instrument(skip(self), level = "debug")]
    pub async fn is_displayed(&mut self, selector: &str) -> Result<bool, AutomationError> {
        self.begin()?;
        let result = self.is_displayed_inner(selector).await;
        self.end();
        result
    }

    async fn is_displayed_inner(&self, selector: &str) -> Result<bool, AutomationError> {
        let query = self.query(selector)?;
        Ok(self.waiter.displayed_now(&query).await?.is_some())
    }

    /// One-shot presence check (displayed or not), no waiting.
    #[instrument(skip(self), level = "debug")]
    pub async fn element_exists(&mut self, selector: &str) -> Result<bool, AutomationError> {
        self.begin()?;
        let result: Result<bool, AutomationError> = async {
            let query = self.query(selector)?;
            match self.backend().find_element(self.session(), &query.locator).await {
                Ok(_) => Ok(true),
                Err(BackendError::NoSuchElement(_)) | Err(BackendError::StaleElement(_)) => Ok(false),
                Err(e) => Err(e.into()),
            }
        }
        .await;
        self.end();
        result
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn wait_for(
        &mut self,
        selector: &str,
        timeout: Option<Duration>,
    ) -> Result<ElementHandle, AutomationError> {
        self.begin()?;
        let result: Result<ElementHandle, AutomationError> = async {
            let query = self.query(selector)?;
            self.waiter.wait_until_displayed(&query, timeout).await
        }
        .await;
        self.end();
        result
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn wait_for_clickable(
        &mut self,
        selector: &str,
        timeout: Option<Duration>,
    ) -> Result<ElementHandle, AutomationError> {
        self.begin()?;
        let result: Result<ElementHandle, AutomationError> = async {
            let query = self.query(selector)?;
            self.waiter.wait_until_clickable(&query, timeout).await
        }
        .await;
        self.end();
        result
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn wait_for_gone(
        &mut self,
        selector: &str,
        timeout: Option<Duration>,
    ) -> Result<(), AutomationError> {
        self.begin()?;
        let result: Result<(), AutomationError> = async {
            let query = self.query(selector)?;
            self.waiter.wait_until_gone(&query, timeout).await
        }
        .await;
        self.end();
        result
    }

    /// Waits for the element to be clickable, then clicks it.
    #[instrument(skip(self), level = "debug")]
    pub async fn click(&mut self, selector: &str) -> Result<(), AutomationError> {
        self.begin()?;
        let result = self.click_inner(selector).await;
        self.end();
        result
    }

    async fn click_inner(&self, selector: &str) -> Result<(), AutomationError> {
        let query = self.query(selector)?;
        let handle = self.waiter.wait_until_clickable(&query, None).await?;
        self.backend().click_element(self.session(), &handle.id).await?;
        Ok(())
    }

    /// Waits for the element, clears it, then types `text`.
    #[instrument(skip(self, text), level = "debug")]
    pub async fn set_value(&mut self, selector: &str, text: &str) -> Result<(), AutomationError> {
        self.begin()?;
        let result: Result<(), AutomationError> = async {
            let query = self.query(selector)?;
            let handle = self.waiter.wait_until_displayed(&query, None).await?;
            self.backend().clear_element(self.session(), &handle.id).await?;
            self.backend()
                .send_keys(self.session(), &handle.id, text)
                .await?;
            Ok(())
        }
        .await;
        self.end();
        result
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get_text(&mut self, selector: &str) -> Result<String, AutomationError> {
        self.begin()?;
        let result: Result<String, AutomationError> = async {
            let query = self.query(selector)?;
            let handle = self.waiter.wait_until_displayed(&query, None).await?;
            Ok(self.backend().element_text(self.session(), &handle.id).await?)
        }
        .await;
        self.end();
        result
    }

    /// Taps the centre of the element with a pointer gesture instead of a click.
    #[instrument(skip(self), level = "debug")]
    pub async fn tap(&mut self, selector: &str) -> Result<(), AutomationError> {
        self.begin()?;
        let result: Result<(), AutomationError> = async {
            let query = self.query(selector)?;
            let handle = self.waiter.wait_until_displayed(&query, None).await?;
            let rect = self.backend().element_rect(self.session(), &handle.id).await?;
            self.gesture_inner(&GestureIntent::tap(GestureTarget::Element(rect)))
                .await
        }
        .await;
        self.end();
        result
    }

    /// Scrolls towards `Down` until the element is displayed.
    ///
    /// Checks once, then scrolls and re-checks up to `max_attempts` times
    /// (default [`DEFAULT_MAX_SCROLLS`]). Never loops past the cap.
    #[instrument(skip(self), level = "debug")]
    pub async fn scroll_until_visible(
        &mut self,
        selector: &str,
        max_attempts: Option<u32>,
    ) -> Result<ElementHandle, AutomationError> {
        self.begin()?;
        let result = self
            .scroll_until_visible_inner(selector, Direction::Down, max_attempts)
            .await;
        self.end();
        result
    }

    async fn scroll_until_visible_inner(
        &self,
        selector: &str,
        direction: Direction,
        max_attempts: Option<u32>,
    ) -> Result<ElementHandle, AutomationError> {
        let cap = max_attempts.unwrap_or(self.max_scrolls);
        let query = self.query(selector)?;
        if let Some(handle) = self.waiter.displayed_now(&query).await? {
            return Ok(handle);
        }
        for attempt in 1..=cap {
            self.gesture_inner(&GestureIntent::scroll(direction)).await?;
            if let Some(handle) = self.waiter.displayed_now(&query).await? {
                debug!(selector, attempt, "element scrolled into view");
                return Ok(handle);
            }
        }
        Err(AutomationError::ElementNotFoundAfterScroll {
            selector: selector.to_string(),
            attempts: cap,
        })
    }

    // -----------------------------------------------------------------------
    // Gestures
    // -----------------------------------------------------------------------

    pub async fn screen_size(&self) -> Result<ScreenSize, AutomationError> {
        Ok(self.backend().window_size(self.session()).await?)
    }

    /// Synthesizes `intent` against the live screen size and dispatches the
    /// resulting pointer sequences one after another.
    #[instrument(skip(self), level = "debug", fields(gesture = intent.name()))]
    pub async fn perform_gesture(&mut self, intent: &GestureIntent) -> Result<(), AutomationError> {
        self.begin()?;
        let result = self.gesture_inner(intent).await;
        self.end();
        result
    }

    async fn gesture_inner(&self, intent: &GestureIntent) -> Result<(), AutomationError> {
        let screen = self.screen_size().await?;
        let sequences = self.strategy()?.synthesize_gesture(intent, screen)?;
        for sequence in &sequences {
            self.backend()
                .perform_pointer_sequence(self.session(), sequence)
                .await?;
        }
        Ok(())
    }

    pub async fn swipe(&mut self, direction: Direction, distance: f64) -> Result<(), AutomationError> {
        self.perform_gesture(&GestureIntent::swipe(direction, distance))
            .await
    }

    /// Scrolls content towards `direction`.
    pub async fn scroll(&mut self, direction: Direction) -> Result<(), AutomationError> {
        self.perform_gesture(&GestureIntent::scroll(direction)).await
    }

    pub async fn pull_to_refresh(&mut self) -> Result<(), AutomationError> {
        self.perform_gesture(&GestureIntent::pull_to_refresh()).await
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    /// System back on Android; the navigation bar's Back button on iOS when shown.
    #[instrument(skip(self), level = "debug")]
    pub async fn go_back(&mut self) -> Result<(), AutomationError> {
        self.begin()?;
        let result: Result<(), AutomationError> = async {
            match self.strategy()?.back_button() {
                None => Ok(self.backend().back(self.session()).await?),
                Some(locator) => self.click_if_displayed(locator).await.map(|_| ()),
            }
        }
        .await;
        self.end();
        result
    }

    /// Dismisses the keyboard. A keyboard that isn't shown is not an error.
    #[instrument(skip(self), level = "debug")]
    pub async fn hide_keyboard(&mut self) -> Result<(), AutomationError> {
        self.begin()?;
        let result: Result<(), AutomationError> = async {
            if let Some(done) = self.strategy()?.keyboard_done_button() {
                if self.click_if_displayed(done).await? {
                    return Ok(());
                }
            }
            match self.backend().hide_keyboard(self.session()).await {
                Ok(()) => Ok(()),
                Err(BackendError::Command { message, .. }) => {
                    debug!(%message, "keyboard hide not needed");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
        .await;
        self.end();
        result
    }

    /// Clicks a native locator if it is displayed right now. Returns whether it clicked.
    pub(crate) async fn click_if_displayed(&self, locator: Locator) -> Result<bool, AutomationError> {
        let query = ElementQuery::new(locator.value.clone(), locator, self.platform()?);
        match self.waiter.displayed_now(&query).await? {
            Some(handle) => {
                self.backend().click_element(self.session(), &handle.id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl fmt::Debug for PlatformLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformLayer")
            .field("state", &self.state)
            .field("session", self.session())
            .field("max_scrolls", &self.max_scrolls)
            .finish()
    }
}
