use thiserror::Error;
use tunekit_blobstore::BlobStoreError;

use crate::state::Phase;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A start was requested while a run is active. Non-fatal.
    #[error("pipeline is already running (phase: {phase})")]
    AdmissionConflict { phase: Phase },

    /// An external stage exited unsuccessfully.
    #[error("{description} failed (stage {stage}, {}):\n{stderr}", exit_label(*exit_code))]
    StageFailure { stage: String, description: String, exit_code: Option<i32>, stderr: String },

    /// Any other error raised while a stage ran, attributed to that stage.
    #[error("stage {stage}: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<PipelineError>,
    },

    /// The stage executable could not be started at all.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Artifact import failed (missing artifact, upload or registration).
    #[error(transparent)]
    Import(#[from] BlobStoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid training config: {0}")]
    InvalidTrainingConfig(String),

    /// The background run panicked.
    #[error("pipeline task aborted: {0}")]
    Panicked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl PipelineError {
    /// Attributes an error raised while running `stage` to that stage.
    /// Errors that already name their stage are returned unchanged.
    #[must_use]
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            Self::StageFailure { .. } | Self::Stage { .. } => self,
            other => Self::Stage { stage: stage.to_string(), source: Box::new(other) },
        }
    }
}

fn exit_label(code: Option<i32>) -> String {
    code.map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_stage_failure_display_carries_stderr() {
        let err = PipelineError::StageFailure {
            stage: "exporting".to_string(),
            description: "GGUF export".to_string(),
            exit_code: Some(1),
            stderr: "disk full".to_string(),
        };
        assert_eq!(err.to_string(), "GGUF export failed (stage exporting, exit code 1):\ndisk full");
    }

    #[test]
    fn test_stage_failure_without_exit_code() {
        let err = PipelineError::StageFailure {
            stage: "training".to_string(),
            description: "QLoRA training".to_string(),
            exit_code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_import_errors_pass_through() {
        let err: PipelineError = BlobStoreError::ArtifactMissing {
            path: PathBuf::from("/models/a.gguf"),
            size: None,
        }
        .into();
        assert!(err.to_string().starts_with("artifact not found at /models/a.gguf"));
    }

    #[test]
    fn test_in_stage_names_the_stage() {
        let err = PipelineError::from(BlobStoreError::ArtifactMissing {
            path: PathBuf::from("/no/such/model.gguf"),
            size: None,
        })
        .in_stage("importing");
        assert!(err.to_string().starts_with("stage importing: artifact not found at /no/such/model.gguf"));
        assert!(matches!(&err, PipelineError::Stage { source, .. } if matches!(**source, PipelineError::Import(_))));
    }

    #[test]
    fn test_in_stage_keeps_stage_failures() {
        let err = PipelineError::StageFailure {
            stage: "exporting".to_string(),
            description: "GGUF export".to_string(),
            exit_code: Some(1),
            stderr: "disk full".to_string(),
        };
        let wrapped = err.in_stage("exporting");
        assert!(matches!(wrapped, PipelineError::StageFailure { .. }));
        assert_eq!(wrapped.to_string().matches("exporting").count(), 1);
    }

    #[test]
    fn test_conflict_display() {
        let err = PipelineError::AdmissionConflict { phase: Phase::Stage("training".to_string()) };
        assert_eq!(err.to_string(), "pipeline is already running (phase: training)");
    }
}
