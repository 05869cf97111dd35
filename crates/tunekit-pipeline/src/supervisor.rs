//! Process-wide job supervisor: single-flight admission and background runs.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{PipelineExecutor, TransitionSink};
use crate::state::{Phase, PipelineState};

/// Message shown between admission and the first stage.
pub const STARTING_MESSAGE: &str = "Starting pipeline...";

/// Returned to the caller of an admitted [`JobSupervisor::start`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartAccepted {
    pub message: String,
}

/// Shared handle to the one state record. Every read and write goes
/// through the same mutex; a poisoned lock is recovered since each
/// update leaves the record whole.
#[derive(Debug, Clone, Default)]
struct StateHandle(Arc<Mutex<PipelineState>>);

impl StateHandle {
    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail(&self, err: &PipelineError) {
        error!(error = %err, "Pipeline failed");
        self.lock().fail(err.to_string());
    }
}

impl TransitionSink for StateHandle {
    fn on_transition(&self, phase: Phase, message: &str) {
        info!(phase = %phase, "{message}");
        self.lock().enter(phase, message);
    }

    fn on_success(&self, message: &str) {
        info!("{message}");
        self.lock().succeed(message);
    }
}

/// Owns the pipeline state and launches at most one run at a time.
///
/// Clones share the same state and executor, so the supervisor can be held
/// in server state and handed to every request.
#[derive(Debug, Clone)]
pub struct JobSupervisor {
    state: StateHandle,
    executor: Arc<PipelineExecutor>,
}

impl JobSupervisor {
    #[must_use]
    pub fn new(executor: PipelineExecutor) -> Self {
        Self { state: StateHandle::default(), executor: Arc::new(executor) }
    }

    /// Builds the executor (stages, process runner, blob store importer)
    /// described by `config`.
    pub fn from_config(config: &PipelineConfig) -> PipelineResult<Self> {
        Ok(Self::new(config.build_executor()?))
    }

    /// Admits a new run unless one is in flight.
    ///
    /// The active-phase check and the move to `Starting` happen under one
    /// lock, so concurrent callers can never both launch a run. The run
    /// itself is spawned onto the tokio runtime and this call returns
    /// without waiting for it; it must be called from within a runtime.
    pub fn start(&self) -> PipelineResult<StartAccepted> {
        {
            let mut state = self.state.lock();
            if state.phase.is_active() {
                warn!(phase = %state.phase, "Start rejected, pipeline already running");
                return Err(PipelineError::AdmissionConflict { phase: state.phase.clone() });
            }
            state.begin(STARTING_MESSAGE);
        }
        info!(stages = self.executor.stages().len(), "Pipeline admitted");

        let state = self.state.clone();
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            let sink = state.clone();
            // The inner task is the error boundary: a panic anywhere in the
            // run surfaces here as a JoinError instead of a stuck phase.
            let run = tokio::spawn(async move { executor.run(&sink).await });
            match run.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => state.fail(&err),
                Err(join_err) => {
                    let reason = if join_err.is_panic() {
                        panic_message(join_err.into_panic().as_ref())
                    } else {
                        "cancelled".to_string()
                    };
                    state.fail(&PipelineError::Panicked(reason));
                }
            }
        });

        Ok(StartAccepted { message: "Training started".to_string() })
    }

    /// Consistent snapshot of the state record. Never waits on the run.
    #[must_use]
    pub fn status(&self) -> PipelineState {
        self.state.lock().clone()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
