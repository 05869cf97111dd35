//! Sequential, fail-fast pipeline execution.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::import::ArtifactImporter;
use crate::stage::{StageOutcome, StageRunner, StageSpec, StageTarget, validate_stage_ids};
use crate::state::Phase;

/// Receives the executor's state transitions.
pub trait TransitionSink: Send + Sync {
    /// Called before each stage starts.
    fn on_transition(&self, phase: Phase, message: &str);

    /// Called once after every stage succeeded.
    fn on_success(&self, message: &str);
}

/// Runs an ordered stage list, stopping at the first fatal failure.
///
/// The executor knows nothing about the tools it runs; only exit status and
/// error text cross the stage boundary. There are no retries and no rollback
/// of earlier stages.
pub struct PipelineExecutor {
    stages: Vec<StageSpec>,
    runner: Arc<dyn StageRunner>,
    importer: Option<Arc<dyn ArtifactImporter>>,
    completion_message: String,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("stages", &self.stages.iter().map(|s| s.id.as_str()).collect::<Vec<_>>())
            .field("has_importer", &self.importer.is_some())
            .finish_non_exhaustive()
    }
}

impl PipelineExecutor {
    #[must_use]
    pub fn new(stages: Vec<StageSpec>, runner: Arc<dyn StageRunner>) -> Self {
        Self {
            stages,
            runner,
            importer: None,
            completion_message: "Pipeline finished.".to_string(),
        }
    }

    #[must_use]
    pub fn with_importer(mut self, importer: Arc<dyn ArtifactImporter>) -> Self {
        self.importer = Some(importer);
        self
    }

    #[must_use]
    pub fn with_completion_message(mut self, message: impl Into<String>) -> Self {
        self.completion_message = message.into();
        self
    }

    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Runs every stage in order, reporting to `sink`.
    ///
    /// On failure the error names the stage that failed; `sink.on_success`
    /// is only called when all stages completed. Stage ids that are empty,
    /// padded, duplicated or reserved phase names fail the run before any
    /// transition is reported.
    pub async fn run(&self, sink: &dyn TransitionSink) -> PipelineResult<()> {
        validate_stage_ids(self.stages.iter().map(|s| s.id.as_str()))?;

        for stage in &self.stages {
            sink.on_transition(Phase::Stage(stage.id.clone()), &stage.message);

            match self.run_stage(stage).await.map_err(|e| e.in_stage(&stage.id)) {
                Ok(()) => {}
                Err(err) if !stage.fatal => {
                    warn!(stage = %stage.id, error = %err, "Non-fatal stage failed, continuing");
                }
                Err(err) => return Err(err),
            }
        }

        info!(stages = self.stages.len(), "Pipeline completed");
        sink.on_success(&self.completion_message);
        Ok(())
    }

    async fn run_stage(&self, stage: &StageSpec) -> PipelineResult<()> {
        match &stage.target {
            StageTarget::Command(target) => match self.runner.run(target, &stage.description).await? {
                StageOutcome::Succeeded => Ok(()),
                StageOutcome::Failed { exit_code, stderr } => Err(PipelineError::StageFailure {
                    stage: stage.id.clone(),
                    description: stage.description.clone(),
                    exit_code,
                    stderr,
                }),
            },
            StageTarget::Import => {
                let importer = self.importer.as_ref().ok_or_else(|| {
                    PipelineError::Config(format!("stage '{}' imports an artifact but no importer is configured", stage.id))
                })?;
                let report = importer.import_artifact().await?;
                info!(
                    stage = %stage.id,
                    digest = %report.digest,
                    uploaded = report.uploaded,
                    "Artifact imported"
                );
                Ok(())
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingRunner, RecordingSink, stage};
    use super::*;
    use async_trait::async_trait;
    use tunekit_blobstore::{BlobStoreError, Digest, ImportReport};

    struct FixedImporter(Result<(), String>);

    #[async_trait]
    impl ArtifactImporter for FixedImporter {
        async fn import_artifact(&self) -> Result<ImportReport, BlobStoreError> {
            match &self.0 {
                Ok(()) => Ok(ImportReport {
                    digest: Digest::of_bytes(b"model"),
                    size: 5,
                    uploaded: true,
                    statuses: vec!["success".to_string()],
                }),
                Err(msg) => Err(BlobStoreError::Registration(msg.clone())),
            }
        }
    }

    #[tokio::test]
    async fn test_all_stages_run_in_order() {
        let runner = Arc::new(RecordingRunner::default());
        let executor = PipelineExecutor::new(vec![stage("a"), stage("b"), stage("c")], runner.clone())
            .with_completion_message("finished");
        let sink = RecordingSink::default();

        executor.run(&sink).await.unwrap();

        assert_eq!(*runner.calls.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(*sink.events.lock().unwrap(), vec!["a", "b", "c", "success: finished"]);
    }

    #[tokio::test]
    async fn test_failure_stops_later_stages() {
        let runner = Arc::new(RecordingRunner {
            failures: vec![("b".to_string(), "boom".to_string())],
            ..Default::default()
        });
        let executor = PipelineExecutor::new(vec![stage("a"), stage("b"), stage("c")], runner.clone());
        let sink = RecordingSink::default();

        let err = executor.run(&sink).await.unwrap_err();

        assert!(matches!(&err, PipelineError::StageFailure { stage, stderr, .. } if stage == "b" && stderr == "boom"));
        assert_eq!(*runner.calls.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(*sink.events.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_non_fatal_stage_failure_continues() {
        let runner = Arc::new(RecordingRunner {
            failures: vec![("b".to_string(), "meh".to_string())],
            ..Default::default()
        });
        let mut optional = stage("b");
        optional.fatal = false;
        let executor = PipelineExecutor::new(vec![stage("a"), optional, stage("c")], runner.clone());

        executor.run(&RecordingSink::default()).await.unwrap();
        assert_eq!(*runner.calls.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_import_stage_uses_importer() {
        let runner = Arc::new(RecordingRunner::default());
        let executor = PipelineExecutor::new(
            vec![stage("export"), StageSpec::import("importing", "Model import")],
            runner,
        )
        .with_importer(Arc::new(FixedImporter(Ok(()))));
        let sink = RecordingSink::default();

        executor.run(&sink).await.unwrap();
        assert_eq!(sink.events.lock().unwrap()[1], "importing");
    }

    #[tokio::test]
    async fn test_import_failure_is_pipeline_failure() {
        let executor = PipelineExecutor::new(
            vec![StageSpec::import("importing", "Model import")],
            Arc::new(RecordingRunner::default()),
        )
        .with_importer(Arc::new(FixedImporter(Err("bad digest".to_string()))));

        let err = executor.run(&RecordingSink::default()).await.unwrap_err();
        match &err {
            PipelineError::Stage { stage, source } => {
                assert_eq!(stage, "importing");
                assert!(matches!(**source, PipelineError::Import(BlobStoreError::Registration(_))));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.to_string(), "stage importing: model registration failed: bad digest");
    }

    #[tokio::test]
    async fn test_import_stage_without_importer_is_config_error() {
        let executor = PipelineExecutor::new(
            vec![StageSpec::import("importing", "Model import")],
            Arc::new(RecordingRunner::default()),
        );
        let err = executor.run(&RecordingSink::default()).await.unwrap_err();
        assert!(matches!(&err, PipelineError::Stage { source, .. } if matches!(**source, PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn test_reserved_stage_id_fails_before_any_transition() {
        let runner = Arc::new(RecordingRunner::default());
        let executor = PipelineExecutor::new(vec![stage("a"), stage("failed")], runner.clone());
        let sink = RecordingSink::default();

        let err = executor.run(&sink).await.unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("reserved"));
        assert!(sink.events.lock().unwrap().is_empty());
        assert!(runner.calls.lock().unwrap().is_empty());
    }
}
