//! One live backend session, scoped to one capability set.
//!
//! A [`Session`] is owned exclusively by its lifecycle manager. It moves
//! `Pending -> Active -> Closing -> Closed`, or to `Failed` when creation or
//! destruction fails. [`Session::close`] is idempotent, and dropping a session
//! that is still active (a panic, or a future dropped mid-run) schedules a
//! best-effort destroy on the current runtime so the device is released.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{AutomationBackend, SessionId};
use crate::config::CapabilitySet;
use crate::error::AutomationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Pending,
    Active,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    /// Whether the backend may still hold resources for this session.
    pub fn holds_backend_session(&self) -> bool {
        matches!(self, Self::Active | Self::Closing)
    }
}

pub struct Session {
    id: Option<SessionId>,
    caps: Arc<CapabilitySet>,
    state: SessionState,
    created_at: DateTime<Utc>,
    backend: Arc<dyn AutomationBackend>,
}

impl Session {
    pub fn new(backend: Arc<dyn AutomationBackend>, caps: Arc<CapabilitySet>) -> Self {
        Self {
            id: None,
            caps,
            state: SessionState::Pending,
            created_at: Utc::now(),
            backend,
        }
    }

    pub fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    pub fn caps(&self) -> &Arc<CapabilitySet> {
        &self.caps
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn backend(&self) -> &Arc<dyn AutomationBackend> {
        &self.backend
    }

    /// Creates the backend session.
    pub async fn open(&mut self) -> Result<SessionId, AutomationError> {
        if self.state != SessionState::Pending {
            return Err(AutomationError::InvalidState(format!(
                "cannot open a session in state {:?}",
                self.state
            )));
        }
        match self.backend.create_session(&self.caps).await {
            Ok(id) => {
                self.created_at = Utc::now();
                self.state = SessionState::Active;
                self.id = Some(id.clone());
                info!(session_id = %id, device = %self.caps.device_name, "session active");
                Ok(id)
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(AutomationError::Session(format!(
                    "could not create session on {}: {e}",
                    self.caps.label()
                )))
            }
        }
    }

    /// Destroys the backend session. A no-op unless the session is active.
    pub async fn close(&mut self) -> Result<(), AutomationError> {
        if !self.state.holds_backend_session() {
            debug!(state = ?self.state, "close: nothing to destroy");
            return Ok(());
        }
        let Some(id) = self.id.clone() else {
            self.state = SessionState::Closed;
            return Ok(());
        };

        self.state = SessionState::Closing;
        match self.backend.destroy_session(&id).await {
            Ok(()) => {
                self.state = SessionState::Closed;
                info!(session_id = %id, "session closed");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(AutomationError::Session(format!(
                    "could not destroy session {id}: {e}"
                )))
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.state.holds_backend_session() {
            return;
        }
        let Some(id) = self.id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(session_id = %id, "session dropped while active, destroying in background");
                let backend = self.backend.clone();
                handle.spawn(async move {
                    if let Err(e) = backend.destroy_session(&id).await {
                        warn!(session_id = %id, error = %e, "background destroy failed");
                    }
                });
            }
            Err(_) => {
                warn!(session_id = %id, "session dropped outside a runtime, backend session leaked");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("device", &self.caps.device_name)
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .finish()
    }
}
