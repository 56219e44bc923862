//! Per-step and per-session results.
//!
//! A [`SessionResult`] is built once by the lifecycle manager, is immutable
//! after the session closes, and is what the coordinator aggregates and the
//! CLI prints.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::SessionId;
use crate::config::{CapabilitySet, Platform};
use crate::wait::ObservedState;

/// Outcome of a step or a whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepOutcome {
    Pass,
    /// A check didn't hold (element never showed up, wrong text, ...).
    Fail,
    /// The step couldn't be carried out (backend failure, cancellation, ...).
    Error,
}

impl StepOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            StepOutcome::Pass => "pass",
            StepOutcome::Fail => "fail",
            StepOutcome::Error => "error",
        }
    }

    /// Error beats Fail beats Pass.
    pub fn worst(self, other: StepOutcome) -> StepOutcome {
        use StepOutcome::*;
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Fail, _) | (_, Fail) => Fail,
            _ => Pass,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// What was captured when a step failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticBundle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_source: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_element_state: Option<ObservedState>,
}

impl DiagnosticBundle {
    pub fn is_empty(&self) -> bool {
        self.screenshot.is_none() && self.page_source.is_none() && self.last_element_state.is_none()
    }
}

/// Result of one test step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStepResult {
    pub name: String,
    pub outcome: StepOutcome,
    #[serde(rename = "durationMs", with = "duration_ms")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticBundle>,
}

impl TestStepResult {
    pub fn pass(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            outcome: StepOutcome::Pass,
            duration,
            message: None,
            diagnostics: None,
        }
    }

    pub fn failure(
        name: impl Into<String>,
        outcome: StepOutcome,
        duration: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            outcome,
            duration,
            message: Some(message.into()),
            diagnostics: None,
        }
    }

    /// A step that never ran.
    pub fn not_run(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::failure(name, StepOutcome::Error, Duration::ZERO, reason)
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticBundle) -> Self {
        if !diagnostics.is_empty() {
            self.diagnostics = Some(diagnostics);
        }
        self
    }
}

/// Result of one session, one per capability set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    /// `None` if the session never started.
    pub session_id: Option<SessionId>,
    pub device: String,
    pub platform: Platform,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<TestStepResult>,
    pub outcome: StepOutcome,
    #[serde(rename = "durationMs", with = "duration_ms")]
    pub duration: Duration,
    /// Session-level error (creation, hooks or teardown), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionResult {
    /// Builds a result and derives its overall outcome.
    ///
    /// Any session-level error or errored step makes the session `Error`;
    /// otherwise any failed step makes it `Fail`.
    pub fn new(
        caps: &CapabilitySet,
        session_id: Option<SessionId>,
        started_at: DateTime<Utc>,
        steps: Vec<TestStepResult>,
        duration: Duration,
        error: Option<String>,
    ) -> Self {
        let mut outcome = if error.is_some() {
            StepOutcome::Error
        } else {
            StepOutcome::Pass
        };
        for step in &steps {
            outcome = outcome.worst(step.outcome);
        }
        Self {
            session_id,
            device: caps.label(),
            platform: caps.platform,
            started_at,
            steps,
            outcome,
            duration,
            error,
        }
    }

    /// A session that produced no steps because of `error`.
    pub fn errored(caps: &CapabilitySet, error: impl Into<String>, duration: Duration) -> Self {
        Self::new(caps, None, Utc::now(), Vec::new(), duration, Some(error.into()))
    }

    pub fn passed(&self) -> bool {
        self.outcome == StepOutcome::Pass
    }
}

/// Aggregate counts over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    #[serde(rename = "wallTimeMs", with = "duration_ms")]
    pub wall_time: Duration,
}

impl RunSummary {
    pub fn from_results(results: &[SessionResult], wall_time: Duration) -> Self {
        let count = |o: StepOutcome| results.iter().filter(|r| r.outcome == o).count();
        Self {
            total: results.len(),
            passed: count(StepOutcome::Pass),
            failed: count(StepOutcome::Fail),
            errored: count(StepOutcome::Error),
            wall_time,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> CapabilitySet {
        CapabilitySet::new(Platform::Android, "Pixel 6").with_platform_version("13")
    }

    #[test]
    fn outcome_ordering() {
        assert_eq!(StepOutcome::Pass.worst(StepOutcome::Fail), StepOutcome::Fail);
        assert_eq!(StepOutcome::Error.worst(StepOutcome::Fail), StepOutcome::Error);
        assert_eq!(StepOutcome::Pass.worst(StepOutcome::Pass), StepOutcome::Pass);
    }

    #[test]
    fn session_outcome_is_worst_step() {
        let steps = vec![
            TestStepResult::pass("navigate", Duration::from_millis(10)),
            TestStepResult::failure("assert", StepOutcome::Fail, Duration::ZERO, "wrong text"),
        ];
        let result = SessionResult::new(&caps(), None, Utc::now(), steps, Duration::ZERO, None);
        assert_eq!(result.outcome, StepOutcome::Fail);
        assert_eq!(result.device, "Pixel 6 (Android 13)");
    }

    #[test]
    fn session_error_dominates() {
        let steps = vec![TestStepResult::pass("navigate", Duration::ZERO)];
        let result = SessionResult::new(
            &caps(),
            Some(SessionId("s".into())),
            Utc::now(),
            steps,
            Duration::ZERO,
            Some("teardown failed".into()),
        );
        assert_eq!(result.outcome, StepOutcome::Error);
    }

    #[test]
    fn errored_session_has_no_steps() {
        let result = SessionResult::errored(&caps(), "backend unavailable", Duration::ZERO);
        assert!(result.steps.is_empty());
        assert!(result.session_id.is_none());
        assert_eq!(result.outcome, StepOutcome::Error);
    }

    #[test]
    fn durations_serialize_as_millis() {
        let step = TestStepResult::pass("tap", Duration::from_millis(1234));
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["durationMs"], 1234);
        assert_eq!(json["outcome"], "Pass");
        assert!(json.get("diagnostics").is_none());
    }

    #[test]
    fn empty_diagnostics_are_dropped() {
        let step = TestStepResult::pass("tap", Duration::ZERO)
            .with_diagnostics(DiagnosticBundle::default());
        assert!(step.diagnostics.is_none());
    }

    #[test]
    fn summary_counts() {
        let ok = SessionResult::new(&caps(), None, Utc::now(), vec![], Duration::ZERO, None);
        let bad = SessionResult::errored(&caps(), "x", Duration::ZERO);
        let summary = RunSummary::from_results(&[ok, bad], Duration::from_secs(2));
        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.errored, 1);
        assert!(!summary.all_passed());
    }
}
