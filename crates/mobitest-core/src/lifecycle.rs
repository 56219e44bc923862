//! Session lifecycle manager.
//!
//! [`SessionLifecycle::run`] owns one device session from start to finish:
//!
//! ```text
//! Created -> SessionStarting -> HooksRunning -> StepsRunning -> Finalizing -> Closed
//! ```
//!
//! It runs the `before_session` hook, creates the session, runs the `before`
//! hook, executes the steps in order, captures diagnostics for failed steps,
//! runs the `after` hook and destroys the session. Destruction happens on
//! every path out of `run`: step failures and cancellation fall through to
//! teardown, and the [`Session`] drop guard covers panics and dropped futures.
//!
//! `run` never returns an error. Every failure ends up in the
//! [`SessionResult`], so one broken session can't take its siblings down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::artifacts::{artifact_name, ArtifactStore};
use crate::backend::{AutomationBackend, Timeouts};
use crate::config::{CapabilitySet, SessionDefaults};
use crate::device::DeviceUtils;
use crate::error::{AutomationError, CancelReason};
use crate::platform::{PlatformLayer, DEFAULT_MAX_SCROLLS};
use crate::result::{DiagnosticBundle, SessionResult, StepOutcome, TestStepResult};
use crate::session::Session;
use crate::step::{Scenario, StepContext};
use crate::wait::{deadline_after, WaitConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    SessionStarting,
    HooksRunning,
    StepsRunning,
    Finalizing,
    Closed,
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Callbacks around a session. Every method defaults to doing nothing.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// Runs before the backend session is requested. An error here means the
    /// session is never created.
    async fn before_session(&self, _caps: &CapabilitySet) -> Result<(), AutomationError> {
        Ok(())
    }

    /// Runs once the session exists, before the first step. An error here
    /// skips every step.
    async fn before(&self, _ctx: &mut StepContext) -> Result<(), AutomationError> {
        Ok(())
    }

    /// Runs after the last step, before the session is destroyed.
    async fn after(
        &self,
        _ctx: &mut StepContext,
        _steps: &[TestStepResult],
    ) -> Result<(), AutomationError> {
        Ok(())
    }
}

/// Applies [`SessionDefaults`] in `before`.
#[derive(Debug, Clone, Default)]
pub struct DefaultHooks {
    pub defaults: SessionDefaults,
}

impl DefaultHooks {
    pub fn new(defaults: SessionDefaults) -> Self {
        Self { defaults }
    }
}

#[async_trait]
impl SessionHooks for DefaultHooks {
    async fn before(&self, ctx: &mut StepContext) -> Result<(), AutomationError> {
        // Element waits poll client-side; an implicit wait would block each miss.
        let timeouts = Timeouts {
            implicit: 0,
            ..self.defaults.timeouts
        };
        ctx.device.set_timeouts(timeouts).await?;
        if let Some(orientation) = self.defaults.orientation {
            ctx.device.set_orientation(orientation).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub wait: WaitConfig,
    /// Wall-clock budget for the steps of one session.
    pub deadline: Option<Duration>,
    /// Stop after the first failed step.
    pub bail: bool,
    /// Save a screenshot and page source when a step fails.
    pub capture_on_failure: bool,
    pub max_scrolls: u32,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            wait: WaitConfig::default(),
            deadline: None,
            bail: false,
            capture_on_failure: true,
            max_scrolls: DEFAULT_MAX_SCROLLS,
        }
    }
}

enum StepRun {
    Finished(Result<(), AutomationError>),
    Interrupted(CancelReason),
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// SessionLifecycle
// ---------------------------------------------------------------------------

pub struct SessionLifecycle {
    backend: Arc<dyn AutomationBackend>,
    caps: Arc<CapabilitySet>,
    scenario: Arc<Scenario>,
    hooks: Arc<dyn SessionHooks>,
    artifacts: ArtifactStore,
    options: LifecycleOptions,
    cancel: CancellationToken,
    state: LifecycleState,
}

impl SessionLifecycle {
    pub fn new(
        backend: Arc<dyn AutomationBackend>,
        caps: Arc<CapabilitySet>,
        scenario: Arc<Scenario>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            backend,
            caps,
            scenario,
            hooks: Arc::new(DefaultHooks::default()),
            artifacts,
            options: LifecycleOptions::default(),
            cancel: CancellationToken::new(),
            state: LifecycleState::Created,
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

    /// Cancelling `token` aborts the remaining steps; teardown still runs.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Runs the session to completion.
    pub async fn run(mut self) -> SessionResult {
        let span = info_span!(
            "session",
            device = %self.caps.device_name,
            platform = %self.caps.platform,
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> SessionResult {
        let clock = Instant::now();
        let caps = self.caps.clone();

        if self.cancel.is_cancelled() {
            self.state = LifecycleState::Closed;
            let err = AutomationError::Cancelled(CancelReason::BeforeStart);
            return SessionResult::errored(&caps, err.to_string(), clock.elapsed());
        }

        if let Err(e) = self.hooks.before_session(&caps).await {
            warn!(error = %e, "before_session hook failed");
            self.state = LifecycleState::Closed;
            return SessionResult::errored(
                &caps,
                format!("before_session hook failed: {e}"),
                clock.elapsed(),
            );
        }

        self.state = LifecycleState::SessionStarting;
        let mut session = Session::new(self.backend.clone(), caps.clone());
        let session_id = match session.open().await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "session did not start");
                self.state = LifecycleState::Closed;
                return SessionResult::errored(&caps, e.to_string(), clock.elapsed());
            }
        };
        let started_at = session.created_at();
        let deadline = self.options.deadline.map(deadline_after);

        let mut ui = PlatformLayer::new(
            self.backend.clone(),
            session_id.clone(),
            self.options.wait,
        )
        .with_max_scrolls(self.options.max_scrolls);
        let bound = ui.bind(&caps, self.scenario.selectors.clone());
        let device = DeviceUtils::new(
            self.backend.clone(),
            session_id.clone(),
            caps.clone(),
            self.artifacts.clone(),
            self.options.wait,
        );
        let mut ctx = StepContext {
            ui,
            device,
            caps: caps.clone(),
        };

        self.state = LifecycleState::HooksRunning;
        let mut session_error = match bound {
            Ok(()) => None,
            Err(e) => Some(e.to_string()),
        };
        if session_error.is_none() {
            if let Err(e) = self.hooks.before(&mut ctx).await {
                warn!(error = %e, "before hook failed");
                session_error = Some(format!("before hook failed: {e}"));
            }
        }

        let steps = match &session_error {
            None => {
                self.state = LifecycleState::StepsRunning;
                self.run_steps(&mut ctx, deadline).await
            }
            Some(reason) => self.skip_all(&format!("skipped: {reason}")),
        };

        self.state = LifecycleState::Finalizing;
        if let Err(e) = self.hooks.after(&mut ctx, &steps).await {
            warn!(error = %e, "after hook failed");
            session_error.get_or_insert(format!("after hook failed: {e}"));
        }
        ctx.ui.dispose();
        if let Err(e) = session.close().await {
            warn!(error = %e, "teardown failed");
            session_error.get_or_insert(e.to_string());
        }
        self.state = LifecycleState::Closed;

        let result = SessionResult::new(
            &caps,
            Some(session_id),
            started_at,
            steps,
            clock.elapsed(),
            session_error,
        );
        info!(
            outcome = result.outcome.as_str(),
            elapsed_ms = result.duration.as_millis() as u64,
            "session finished"
        );
        result
    }

    fn skip_all(&self, reason: &str) -> Vec<TestStepResult> {
        self.scenario
            .steps
            .iter()
            .map(|step| TestStepResult::not_run(step.name(), reason))
            .collect()
    }

    async fn run_steps(
        &self,
        ctx: &mut StepContext,
        deadline: Option<Instant>,
    ) -> Vec<TestStepResult> {
        let mut results = Vec::with_capacity(self.scenario.steps.len());
        let mut stop: Option<String> = None;

        for (index, step) in self.scenario.steps.iter().enumerate() {
            let name = step.name();
            if let Some(reason) = &stop {
                results.push(TestStepResult::not_run(name, reason.as_str()));
                continue;
            }

            let span = info_span!("step", name = %name, index);
            let started = Instant::now();
            let run = async {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => StepRun::Interrupted(CancelReason::Requested),
                    _ = deadline_elapsed(deadline) => StepRun::Interrupted(CancelReason::Deadline),
                    r = step.run(ctx) => StepRun::Finished(r),
                }
            }
            .instrument(span.clone())
            .await;
            let elapsed = started.elapsed();
            let elapsed_ms = elapsed.as_millis() as u64;

            match run {
                StepRun::Finished(Ok(())) => {
                    info!(step = %name, elapsed_ms, "step passed");
                    results.push(TestStepResult::pass(name, elapsed));
                }
                StepRun::Finished(Err(e)) => {
                    let outcome = e.step_outcome();
                    warn!(
                        step = %name,
                        error = %e,
                        outcome = outcome.as_str(),
                        elapsed_ms,
                        "step failed"
                    );
                    let fatal = e.is_fatal_to_session();
                    let mut result =
                        TestStepResult::failure(name.clone(), outcome, elapsed, e.to_string());
                    if self.options.capture_on_failure && !fatal {
                        let bundle = self
                            .capture(ctx, &name, &e)
                            .instrument(span.clone())
                            .await;
                        result = result.with_diagnostics(bundle);
                    }
                    results.push(result);

                    if fatal {
                        stop = Some(format!("skipped: session lost ({e})"));
                    } else if self.options.bail {
                        stop = Some("skipped: bail after failed step".to_string());
                    }
                }
                StepRun::Interrupted(reason) => {
                    let e = AutomationError::Cancelled(reason);
                    warn!(step = %name, error = %e, elapsed_ms, "step interrupted");
                    ctx.ui.reset();
                    let message = e.to_string();
                    results.push(TestStepResult::failure(
                        name,
                        e.step_outcome(),
                        elapsed,
                        message.clone(),
                    ));
                    stop = Some(message);
                }
            }
        }
        results
    }

    /// Best-effort screenshot and page source for a failed step.
    async fn capture(
        &self,
        ctx: &StepContext,
        step_name: &str,
        error: &AutomationError,
    ) -> DiagnosticBundle {
        let mut bundle = DiagnosticBundle {
            last_element_state: error.last_state(),
            ..Default::default()
        };

        match ctx.device.take_screenshot(step_name).await {
            Ok(path) => bundle.screenshot = Some(path),
            Err(e) => warn!(error = %e, "could not capture screenshot"),
        }

        match ctx.device.page_source().await {
            Ok(source) => {
                let file_name = artifact_name(
                    step_name,
                    self.caps.platform,
                    &self.caps.device_name,
                    Utc::now(),
                    "xml",
                );
                let session_key = ctx.device.session().as_str();
                match self.artifacts.write(session_key, &file_name, source.as_bytes()) {
                    Ok(path) => bundle.page_source = Some(path),
                    Err(e) => warn!(error = %e, "could not save page source"),
                }
            }
            Err(e) => debug!(error = %e, "page source unavailable"),
        }
        bundle
    }
}

impl std::fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("device", &self.caps.device_name)
            .field("scenario", &self.scenario.name)
            .field("state", &self.state)
            .finish()
    }
}
