//! Tunekit Pipeline
//!
//! Orchestration core for the fine-tuning pipeline:
//! - Process-wide pipeline state and phases (`PipelineState`, `Phase`)
//! - External stage execution (`StageRunner`, `ProcessStageRunner`)
//! - Fail-fast sequential execution (`PipelineExecutor`)
//! - Single-flight admission and background runs (`JobSupervisor`)
//! - Pipeline and training configuration (`PipelineConfig`, `TrainingConfig`)

pub mod config;
pub mod error;
pub mod executor;
pub mod import;
pub mod stage;
pub mod state;
pub mod supervisor;
pub mod training;

pub use config::{BlobStoreSettings, PipelineConfig, ServerSettings, StageConfig, StageKind};
pub use error::{PipelineError, PipelineResult};
pub use executor::{PipelineExecutor, TransitionSink};
pub use import::{ArtifactImporter, BlobStoreStage};
pub use stage::{
    CommandTarget, ProcessStageRunner, StageOutcome, StageRunner, StageSpec, StageTarget,
    validate_stage_ids,
};
pub use state::{Phase, PipelineState};
pub use supervisor::{JobSupervisor, StartAccepted};
pub use training::TrainingConfig;
