//! Pipeline phases and the single process-wide state record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// The current named state of the pipeline run.
///
/// Within one run phases only move forward:
/// `Starting` -> `Stage(..)` in pipeline order -> `Done` | `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    /// A pipeline stage, named by its stage id (e.g. `training`).
    Stage(String),
    Done,
    Failed,
}

impl Phase {
    /// Phase names a stage id may not take.
    pub const RESERVED: [&'static str; 4] = ["idle", "starting", "done", "failed"];

    /// `true` while a run is in flight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Stage(_))
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Stage(id) => id,
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The pipeline state record. Exactly one exists per process, owned by the
/// [`JobSupervisor`](crate::JobSupervisor).
///
/// `error` is set if and only if `phase` is `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineState {
    pub phase: Phase,
    /// Human-readable current activity.
    pub message: String,
    #[serde(rename = "error")]
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            message: String::new(),
            last_error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

impl PipelineState {
    /// Reset for a newly admitted run.
    pub(crate) fn begin(&mut self, message: &str) {
        self.phase = Phase::Starting;
        self.message = message.to_string();
        self.last_error = None;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
    }

    pub(crate) fn enter(&mut self, phase: Phase, message: &str) {
        self.phase = phase;
        self.message = message.to_string();
    }

    /// `message` keeps its last value for diagnostics.
    pub(crate) fn fail(&mut self, error: String) {
        self.phase = Phase::Failed;
        self.last_error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn succeed(&mut self, message: &str) {
        self.phase = Phase::Done;
        self.message = message.to_string();
        self.last_error = None;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_and_terminal_phases() {
        assert!(!Phase::Idle.is_active());
        assert!(Phase::Starting.is_active());
        assert!(Phase::Stage("training".into()).is_active());
        assert!(!Phase::Done.is_active());
        assert!(!Phase::Failed.is_active());
        assert!(Phase::Done.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Idle.is_terminal());
    }

    #[test]
    fn test_phase_serializes_as_name() {
        assert_eq!(serde_json::to_string(&Phase::Stage("exporting".into())).unwrap(), "\"exporting\"");
        assert_eq!(serde_json::to_string(&Phase::Idle).unwrap(), "\"idle\"");
    }

    #[test]
    fn test_state_lifecycle_keeps_error_invariant() {
        let mut state = PipelineState::default();
        assert_eq!(state.phase, Phase::Idle);

        state.begin("Starting pipeline...");
        state.enter(Phase::Stage("training".into()), "Training...");
        state.fail("boom".to_string());
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.last_error.as_deref(), Some("boom"));
        assert_eq!(state.message, "Training...");
        assert!(state.finished_at.is_some());

        state.begin("Starting pipeline...");
        assert_eq!(state.phase, Phase::Starting);
        assert_eq!(state.last_error, None);
        assert_eq!(state.finished_at, None);

        state.succeed("All done");
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(state.last_error, None);
        assert_eq!(state.message, "All done");
    }

    #[test]
    fn test_state_json_shape() {
        let mut state = PipelineState::default();
        state.begin("go");
        state.fail("disk full".to_string());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["phase"], "failed");
        assert_eq!(json["message"], "go");
        assert_eq!(json["error"], "disk full");
        assert!(json["started_at"].is_string());
    }
}
