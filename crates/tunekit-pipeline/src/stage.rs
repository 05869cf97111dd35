//! Stage descriptors and the external-process stage runner.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::state::Phase;

/// Maximum bytes of stderr kept in a failure report (the tail is kept).
pub const STDERR_TAIL_BYTES: usize = 4096;

/// An executable invocation: program, arguments, extra environment.
///
/// The environment is inherited; `env` entries are added on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTarget {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandTarget {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), env: BTreeMap::new(), working_dir: None }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// What a stage invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageTarget {
    /// An external unit of work run to completion.
    Command(CommandTarget),
    /// The artifact import into the blob store.
    Import,
}

/// Immutable stage descriptor, defined at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    /// Stage identifier; also the phase name while the stage runs.
    pub id: String,
    /// Short description used in logs and failure reports.
    pub description: String,
    /// User-facing activity text shown while the stage runs.
    pub message: String,
    pub target: StageTarget,
    /// Whether a failure ends the pipeline.
    pub fatal: bool,
}

impl StageSpec {
    #[must_use]
    pub fn command(id: impl Into<String>, description: impl Into<String>, target: CommandTarget) -> Self {
        let description = description.into();
        Self {
            id: id.into(),
            message: format!("{description}..."),
            description,
            target: StageTarget::Command(target),
            fatal: true,
        }
    }

    #[must_use]
    pub fn import(id: impl Into<String>, description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            id: id.into(),
            message: format!("{description}..."),
            description,
            target: StageTarget::Import,
            fatal: true,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Stage ids become phase names: they must be non-empty, unpadded,
/// unique, and distinct from the reserved phases.
pub fn validate_stage_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> PipelineResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(PipelineError::Config("stage id must not be empty".to_string()));
        }
        if id.trim() != id {
            return Err(PipelineError::Config(format!("stage id '{id}' has surrounding whitespace")));
        }
        if Phase::RESERVED.contains(&id) {
            return Err(PipelineError::Config(format!("stage id '{id}' is a reserved phase name")));
        }
        if !seen.insert(id) {
            return Err(PipelineError::Config(format!("duplicate stage id '{id}'")));
        }
    }
    Ok(())
}

/// Result of one stage invocation that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    /// Non-zero exit (or signal). `stderr` is the captured error stream only.
    Failed { exit_code: Option<i32>, stderr: String },
}

/// Runs one external unit of work to completion. One attempt per call.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Returns `Err` only when the work could not be started at all.
    async fn run(&self, target: &CommandTarget, description: &str) -> PipelineResult<StageOutcome>;
}

/// Runs stages as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessStageRunner;

impl ProcessStageRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageRunner for ProcessStageRunner {
    async fn run(&self, target: &CommandTarget, description: &str) -> PipelineResult<StageOutcome> {
        info!(program = %target.program, args = ?target.args, "Running: {description}");
        let started = Instant::now();

        let mut cmd = Command::new(&target.program);
        cmd.args(&target.args)
            .envs(&target.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &target.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|source| PipelineError::Spawn { program: target.program.clone(), source })?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        debug!(program = %target.program, stderr_bytes = output.stderr.len(), "Stage finished");

        if output.status.success() {
            info!(elapsed_ms, "Done: {description}");
            return Ok(StageOutcome::Succeeded);
        }

        let stderr = tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_BYTES);
        warn!(exit_code = ?output.status.code(), elapsed_ms, "Failed: {description}");
        Ok(StageOutcome::Failed { exit_code: output.status.code(), stderr })
    }
}

/// Last `max` bytes of `text`, cut on a char boundary.
pub(crate) fn tail(text: &str, max: usize) -> String {
    let text = text.trim_end();
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[...truncated] {}", &text[start..])
}
