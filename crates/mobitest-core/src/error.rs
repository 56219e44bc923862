//! Error types for everything above the protocol client.
//!
//! [`BackendError`](crate::backend::BackendError) is what a single wire
//! round-trip can fail with. [`AutomationError`] wraps it and adds the typed
//! failures raised by waits, selector resolution, gestures, device utilities
//! and session management.

use std::fmt;

use thiserror::Error;

use crate::backend::BackendError;
use crate::config::Platform;
use crate::result::StepOutcome;
use crate::wait::ObservedState;

/// What stopped a session before its steps ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The cancellation token fired while a step was running.
    Requested,
    /// The per-session deadline elapsed.
    Deadline,
    /// The run was cancelled before the session was requested.
    BeforeStart,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CancelReason::Requested => "cancelled",
            CancelReason::Deadline => "cancelled: session deadline exceeded",
            CancelReason::BeforeStart => "cancelled before start",
        })
    }
}

/// Errors raised by the automation layers.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A wait exhausted its timeout.
    #[error("timed out after {timeout_ms}ms waiting for '{selector}' (last state: {last_state})")]
    ElementTimeout {
        selector: String,
        timeout_ms: u64,
        last_state: ObservedState,
    },

    /// `scroll_until_visible` hit its attempt cap.
    #[error("'{selector}' not found after {attempts} scroll attempts")]
    ElementNotFoundAfterScroll { selector: String, attempts: u32 },

    #[error("no context matching '{wanted}' (available: {available:?})")]
    ContextNotFound {
        wanted: String,
        available: Vec<String>,
    },

    #[error("{operation} is not supported on {platform}")]
    UnsupportedOperation {
        operation: &'static str,
        platform: Platform,
    },

    /// Session creation or destruction failed.
    #[error("session error: {0}")]
    Session(String),

    #[error("unknown selector '{selector}' for {platform}")]
    UnknownSelector { selector: String, platform: Platform },

    #[error("invalid gesture: {0}")]
    InvalidGesture(String),

    /// An operation was attempted in the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("assertion failed: {0}")]
    Assertion(String),

    /// A step or session was stopped from outside.
    #[error("{0}")]
    Cancelled(CancelReason),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(String),
}

impl AutomationError {
    /// How a step that failed with this error is recorded.
    ///
    /// Element-level misses and assertion failures are test failures; anything
    /// else means the step could not be carried out.
    pub fn step_outcome(&self) -> StepOutcome {
        match self {
            AutomationError::ElementTimeout { .. }
            | AutomationError::ElementNotFoundAfterScroll { .. }
            | AutomationError::ContextNotFound { .. }
            | AutomationError::Assertion(_)
            | AutomationError::Backend(BackendError::NoSuchElement(_)) => StepOutcome::Fail,
            _ => StepOutcome::Error,
        }
    }

    /// Whether the session can't be driven any further after this error.
    pub fn is_fatal_to_session(&self) -> bool {
        match self {
            AutomationError::Backend(err) => {
                err.is_transport() || matches!(err, BackendError::InvalidSession(_))
            }
            AutomationError::Session(_) => true,
            _ => false,
        }
    }

    /// The last observed element state, when the error carries one.
    pub fn last_state(&self) -> Option<ObservedState> {
        match self {
            AutomationError::ElementTimeout { last_state, .. } => Some(*last_state),
            AutomationError::ElementNotFoundAfterScroll { .. } => {
                Some(ObservedState::NeverAppeared)
            }
            _ => None,
        }
    }
}
