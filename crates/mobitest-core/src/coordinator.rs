//! Parallel execution coordinator.
//!
//! Fans a [`CapabilityMatrix`] out into one [`SessionLifecycle`] per
//! capability set, runs at most `max_concurrency` of them at once, and
//! returns one [`SessionResult`] per capability set in input order. Sessions
//! share nothing mutable; a failing or panicking session only affects its own
//! result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::artifacts::ArtifactStore;
use crate::backend::AutomationBackend;
use crate::config::{CapabilityMatrix, CapabilitySet};
use crate::lifecycle::{DefaultHooks, LifecycleOptions, SessionHooks, SessionLifecycle};
use crate::result::{RunSummary, SessionResult};
use crate::step::Scenario;

/// Gives every capability set a session port no other set in the run uses.
///
/// Explicit ports are kept when they're unique. Missing and duplicate ports
/// are replaced with the next free port above the platform base.
pub fn allocate_session_ports(caps: &mut [CapabilitySet]) {
    let mut used = HashSet::new();
    let mut pending = Vec::new();
    for (index, set) in caps.iter().enumerate() {
        match set.session_port {
            Some(port) if used.insert(port) => {}
            _ => pending.push(index),
        }
    }

    for index in pending {
        let mut port = caps[index].platform.base_session_port();
        while used.contains(&port) {
            port += 1;
        }
        used.insert(port);
        caps[index].session_port = Some(port);
    }
}

pub struct Coordinator {
    backend: Arc<dyn AutomationBackend>,
    scenario: Arc<Scenario>,
    hooks: Arc<dyn SessionHooks>,
    artifacts: ArtifactStore,
    options: LifecycleOptions,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(
        backend: Arc<dyn AutomationBackend>,
        scenario: Scenario,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            backend,
            scenario: Arc::new(scenario),
            hooks: Arc::new(DefaultHooks::default()),
            artifacts,
            options: LifecycleOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_options(mut self, options: LifecycleOptions) -> Self {
        self.options = options;
        self
    }

    /// Token that cancels the whole run. Each session gets a child token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every capability set in `matrix` and returns their results in
    /// matrix order.
    pub async fn run(&self, matrix: &CapabilityMatrix, max_concurrency: usize) -> Vec<SessionResult> {
        let run_id = Uuid::new_v4();
        let limit = max_concurrency.max(1);
        let span = info_span!("run", %run_id, sessions = matrix.len(), max_concurrency = limit);
        self.run_inner(matrix, limit).instrument(span).await
    }

    async fn run_inner(&self, matrix: &CapabilityMatrix, limit: usize) -> Vec<SessionResult> {
        let clock = Instant::now();
        let mut sets = matrix.capabilities.clone();
        allocate_session_ports(&mut sets);

        info!("starting run");
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut handles = Vec::with_capacity(sets.len());

        for set in sets {
            let caps = Arc::new(set);
            let lifecycle = SessionLifecycle::new(
                self.backend.clone(),
                caps.clone(),
                self.scenario.clone(),
                self.artifacts.clone(),
            )
            .with_hooks(self.hooks.clone())
            .with_options(self.options.clone())
            .with_cancellation(self.cancel.child_token());
            let semaphore = semaphore.clone();
            let task_caps = caps.clone();

            let handle = tokio::spawn(
                async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return SessionResult::errored(
                                &task_caps,
                                "coordinator shut down",
                                Duration::ZERO,
                            )
                        }
                    };
                    lifecycle.run().await
                }
                .in_current_span(),
            );
            handles.push((caps, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (caps, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(device = %caps.device_name, error = %e, "session task failed");
                    results.push(SessionResult::errored(
                        &caps,
                        format!("session task failed: {e}"),
                        Duration::ZERO,
                    ));
                }
            }
        }

        let summary = RunSummary::from_results(&results, clock.elapsed());
        info!(
            wall_ms = summary.wall_time.as_millis() as u64,
            passed = summary.passed,
            failed = summary.failed,
            errored = summary.errored,
            "run finished"
        );
        results
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("scenario", &self.scenario.name)
            .field("options", &self.options)
            .finish()
    }
}
