//! Polling waits with typed timeout failures.
//!
//! [`Waiter`] is the only place in the crate that retries. Every poll
//! re-resolves the element from its locator; handles from earlier polls are
//! never reused. A "not found" or "stale element" answer counts as "not yet",
//! while any other backend error (including transport failures) propagates
//! immediately.
//!
//! On timeout the caller gets [`AutomationError::ElementTimeout`] carrying the
//! last [`ObservedState`], which distinguishes an element that never appeared
//! from one that appeared and then vanished.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::backend::{AutomationBackend, BackendError, SessionId};
use crate::config::RunnerConfig;
use crate::element::{ElementHandle, ElementQuery};
use crate::error::AutomationError;

/// Poll cadence and default timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub poll_interval: Duration,
    pub default_timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&RunnerConfig> for WaitConfig {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            default_timeout: config.wait_timeout(),
        }
    }
}

/// The last state a wait observed before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedState {
    /// No poll ever found the element.
    NeverAppeared,
    /// The element was found on an earlier poll but is gone now.
    Vanished,
    /// Present but not displayed.
    Hidden,
    /// Displayed but not enabled.
    NotEnabled,
    /// Still displayed while waiting for it to disappear.
    StillPresent,
}

impl fmt::Display for ObservedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObservedState::NeverAppeared => "never appeared",
            ObservedState::Vanished => "vanished",
            ObservedState::Hidden => "hidden",
            ObservedState::NotEnabled => "not enabled",
            ObservedState::StillPresent => "still present",
        })
    }
}

/// Result of one poll.
enum Sighting {
    Missing,
    Hidden,
    Disabled,
    Ready(ElementHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Want {
    Displayed,
    Clickable,
    Gone,
}

/// Upper bound for deadlines built from caller-supplied durations.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating at [`FAR_FUTURE`] instead of overflowing.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE))
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Treats "not there (yet)" answers as `None`, propagates everything else.
fn absent_as_none<T>(result: Result<T, BackendError>) -> Result<Option<T>, BackendError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(BackendError::NoSuchElement(_)) | Err(BackendError::StaleElement(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Polling wait engine bound to one session.
#[derive(Clone)]
pub struct Waiter {
    backend: Arc<dyn AutomationBackend>,
    session: SessionId,
    config: WaitConfig,
}

impl Waiter {
    pub fn new(backend: Arc<dyn AutomationBackend>, session: SessionId, config: WaitConfig) -> Self {
        Self {
            backend,
            session,
            config,
        }
    }

    pub fn config(&self) -> WaitConfig {
        self.config
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.config.poll_interval = interval;
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn backend(&self) -> &Arc<dyn AutomationBackend> {
        &self.backend
    }

    async fn sight(&self, query: &ElementQuery, check_enabled: bool) -> Result<Sighting, AutomationError> {
        let Some(id) = absent_as_none(self.backend.find_element(&self.session, &query.locator).await)?
        else {
            return Ok(Sighting::Missing);
        };
        match absent_as_none(self.backend.is_element_displayed(&self.session, &id).await)? {
            None => return Ok(Sighting::Missing),
            Some(false) => return Ok(Sighting::Hidden),
            Some(true) => {}
        }
        if check_enabled {
            match absent_as_none(self.backend.is_element_enabled(&self.session, &id).await)? {
                None => return Ok(Sighting::Missing),
                Some(false) => return Ok(Sighting::Disabled),
                Some(true) => {}
            }
        }
        Ok(Sighting::Ready(query.handle(id)))
    }

    /// One non-retrying check: the element if it is displayed right now.
    pub async fn displayed_now(
        &self,
        query: &ElementQuery,
    ) -> Result<Option<ElementHandle>, AutomationError> {
        match self.sight(query, false).await? {
            Sighting::Ready(handle) => Ok(Some(handle)),
            _ => Ok(None),
        }
    }

    /// Waits until the element is present and displayed.
    pub async fn wait_until_displayed(
        &self,
        query: &ElementQuery,
        timeout: Option<Duration>,
    ) -> Result<ElementHandle, AutomationError> {
        self.poll(query, timeout, Want::Displayed)
            .await?
            .ok_or_else(|| AutomationError::InvalidState("wait returned no element".into()))
    }

    /// Waits until the element is displayed and enabled.
    pub async fn wait_until_clickable(
        &self,
        query: &ElementQuery,
        timeout: Option<Duration>,
    ) -> Result<ElementHandle, AutomationError> {
        self.poll(query, timeout, Want::Clickable)
            .await?
            .ok_or_else(|| AutomationError::InvalidState("wait returned no element".into()))
    }

    /// Waits until the element is absent or no longer displayed.
    pub async fn wait_until_gone(
        &self,
        query: &ElementQuery,
        timeout: Option<Duration>,
    ) -> Result<(), AutomationError> {
        self.poll(query, timeout, Want::Gone).await?;
        Ok(())
    }

    async fn poll(
        &self,
        query: &ElementQuery,
        timeout: Option<Duration>,
        want: Want,
    ) -> Result<Option<ElementHandle>, AutomationError> {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let deadline = deadline_after(timeout);
        let mut seen = false;
        let mut last = match want {
            Want::Gone => ObservedState::StillPresent,
            _ => ObservedState::NeverAppeared,
        };
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let sighting = self.sight(query, want == Want::Clickable).await?;

            match (want, sighting) {
                (Want::Gone, Sighting::Missing | Sighting::Hidden) => {
                    debug!(selector = %query.selector, attempt, "element gone");
                    return Ok(None);
                }
                (Want::Gone, _) => last = ObservedState::StillPresent,
                (_, Sighting::Ready(handle)) => {
                    debug!(selector = %query.selector, attempt, "element ready");
                    return Ok(Some(handle));
                }
                (_, Sighting::Missing) => {
                    last = if seen {
                        ObservedState::Vanished
                    } else {
                        ObservedState::NeverAppeared
                    };
                }
                (_, Sighting::Hidden) => {
                    seen = true;
                    last = ObservedState::Hidden;
                }
                (_, Sighting::Disabled) => {
                    seen = true;
                    last = ObservedState::NotEnabled;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(selector = %query.selector, attempt, state = %last, "wait timed out");
                return Err(AutomationError::ElementTimeout {
                    selector: query.selector.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                    last_state: last,
                });
            }
            trace!(selector = %query.selector, attempt, state = %last, "polling");
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}
