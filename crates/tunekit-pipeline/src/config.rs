//! Pipeline configuration: server address, stage list, blob store import.
//!
//! Every field has a default, so an empty or missing file describes the
//! standard prepare/train/export/import pipeline.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};
use tunekit_blobstore::{BlobImporter, BlobStoreClient, GenerationParameters, ImportSettings, Timeouts};

use crate::error::{PipelineError, PipelineResult};
use crate::executor::PipelineExecutor;
use crate::import::BlobStoreStage;
use crate::stage::{CommandTarget, ProcessStageRunner, StageSpec, validate_stage_ids};

/// Environment variable that carries the training config path to command stages.
pub const TRAINING_CONFIG_ENV: &str = "TUNEKIT_TRAINING_CONFIG";

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_address")]
    pub address: SocketAddr,
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8090))
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { address: default_address() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    #[default]
    Command,
    Import,
}

/// One `[[stages]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StageConfig {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Activity text while the stage runs; defaults to "{description}...".
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub kind: StageKind,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub fatal: bool,
}

fn default_true() -> bool {
    true
}

impl StageConfig {
    fn script(id: &str, description: &str, message: &str, script: &str) -> Self {
        Self {
            id: id.to_string(),
            description: Some(description.to_string()),
            message: Some(message.to_string()),
            kind: StageKind::Command,
            program: Some("python3".to_string()),
            args: vec![script.to_string()],
            env: BTreeMap::new(),
            working_dir: None,
            fatal: true,
        }
    }

    fn description(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.id)
    }
}

fn default_stages() -> Vec<StageConfig> {
    vec![
        StageConfig::script(
            "preparing_data",
            "Data preparation",
            "Generating training data from documents...",
            "/app/scripts/prepare_data.py",
        ),
        StageConfig::script(
            "training",
            "QLoRA training",
            "Training the model (QLoRA on Gemma 2 2B)...",
            "/app/scripts/train.py",
        ),
        StageConfig::script("exporting", "GGUF export", "Exporting to GGUF format...", "/app/scripts/export_gguf.py"),
        StageConfig {
            id: "importing".to_string(),
            description: Some("Ollama import".to_string()),
            message: Some("Importing into Ollama...".to_string()),
            kind: StageKind::Import,
            program: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            fatal: true,
        },
    ]
}

/// `[blob_store]`: where and how the exported artifact is registered.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BlobStoreSettings {
    pub base_url: String,
    pub model_name: String,
    pub artifact_path: PathBuf,
    /// File slot in the manifest; the artifact's file name when unset.
    pub file_slot: Option<String>,
    pub system: String,
    pub template: Option<String>,
    pub stream: bool,
    pub parameters: GenerationParameters,
    pub probe_timeout_secs: u64,
    pub upload_timeout_secs: u64,
    pub create_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

const DEFAULT_SYSTEM: &str = "Jsi český asistent. Vždy odpovídej výhradně v češtině. \
Používej správnou českou gramatiku a diakritiku.";

const DEFAULT_TEMPLATE: &str =
    "<start_of_turn>user\n{{ .Prompt }}<end_of_turn>\n<start_of_turn>model\n{{ .Response }}<end_of_turn>\n";

impl Default for BlobStoreSettings {
    fn default() -> Self {
        Self {
            base_url: "http://ollama:11434/api".to_string(),
            model_name: "gemma2-finetuned".to_string(),
            artifact_path: PathBuf::from("/models/gguf/unsloth.Q4_K_M.gguf"),
            file_slot: None,
            system: DEFAULT_SYSTEM.to_string(),
            template: Some(DEFAULT_TEMPLATE.to_string()),
            stream: true,
            parameters: GenerationParameters::default(),
            probe_timeout_secs: 10,
            upload_timeout_secs: 3600,
            create_timeout_secs: 1800,
            connect_timeout_secs: 10,
        }
    }
}

impl BlobStoreSettings {
    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            probe: Duration::from_secs(self.probe_timeout_secs),
            upload: Duration::from_secs(self.upload_timeout_secs),
            create: Duration::from_secs(self.create_timeout_secs),
        }
    }

    #[must_use]
    pub fn import_settings(&self) -> ImportSettings {
        ImportSettings {
            model_name: self.model_name.clone(),
            file_slot: self.file_slot.clone(),
            parameters: self.parameters.clone(),
            system: self.system.clone(),
            template: self.template.clone(),
            stream: self.stream,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default = "default_stages")]
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub blob_store: BlobStoreSettings,
    /// Training configuration file handed to command stages.
    #[serde(default)]
    pub training_config: Option<PathBuf>,
    /// Final message after a successful run.
    #[serde(default)]
    pub completion_message: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            stages: default_stages(),
            blob_store: BlobStoreSettings::default(),
            training_config: None,
            completion_message: None,
        }
    }
}

impl PipelineConfig {
    /// Loads a TOML config file. `None` or a path that does not exist
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        let Some(path) = path else {
            debug!("No config file given, using defaults");
            return Ok(Self::default());
        };
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_toml(&text)
            .map_err(|e| PipelineError::Config(format!("invalid config {}: {e}", path.display())))?;
        info!(path = %path.display(), stages = config.stages.len(), "Loaded pipeline config");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> PipelineResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Applies environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> PipelineResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("TUNEKIT_BIND") {
            self.server.address =
                bind.parse().map_err(|e| PipelineError::Config(format!("invalid TUNEKIT_BIND '{bind}': {e}")))?;
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            let url = url.trim_end_matches('/');
            self.blob_store.base_url =
                if url.ends_with("/api") { url.to_string() } else { format!("{url}/api") };
        }
        if let Some(name) = lookup("FINETUNED_MODEL_NAME") {
            self.blob_store.model_name = name;
        }
        if let Some(path) = lookup("TUNEKIT_ARTIFACT_PATH") {
            self.blob_store.artifact_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.stages.is_empty() {
            return Err(PipelineError::Config("at least one stage is required".to_string()));
        }

        validate_stage_ids(self.stages.iter().map(|s| s.id.as_str()))?;

        let mut imports = 0;
        for stage in &self.stages {
            match stage.kind {
                StageKind::Command if stage.program.as_deref().is_none_or(|p| p.trim().is_empty()) => {
                    return Err(PipelineError::Config(format!("command stage '{}' has no program", stage.id)));
                }
                StageKind::Command => {}
                StageKind::Import => imports += 1,
            }
        }
        if imports > 1 {
            return Err(PipelineError::Config("at most one import stage is allowed".to_string()));
        }

        let params = &self.blob_store.parameters;
        if !params.temperature.is_finite() || params.temperature < 0.0 {
            return Err(PipelineError::Config(format!(
                "temperature must be a finite value >= 0, got {}",
                params.temperature
            )));
        }
        if params.num_ctx == 0 {
            return Err(PipelineError::Config("num_ctx must be at least 1".to_string()));
        }
        if self.blob_store.model_name.trim().is_empty() {
            return Err(PipelineError::Config("blob_store.model_name must not be empty".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn completion_message(&self) -> String {
        self.completion_message
            .clone()
            .unwrap_or_else(|| format!("Fine-tuning complete! Model '{}' is ready.", self.blob_store.model_name))
    }

    /// Stage descriptors in pipeline order.
    #[must_use]
    pub fn stage_specs(&self) -> Vec<StageSpec> {
        self.stages
            .iter()
            .map(|stage| {
                let description = stage.description().to_string();
                let mut spec = match stage.kind {
                    StageKind::Command => {
                        let mut target = CommandTarget::new(stage.program.clone().unwrap_or_default());
                        target.args.clone_from(&stage.args);
                        target.env.clone_from(&stage.env);
                        target.working_dir.clone_from(&stage.working_dir);
                        if let Some(path) = &self.training_config {
                            target = target.env(TRAINING_CONFIG_ENV, path.display().to_string());
                        }
                        StageSpec::command(stage.id.clone(), description, target)
                    }
                    StageKind::Import => StageSpec::import(stage.id.clone(), description),
                };
                if let Some(message) = &stage.message {
                    spec = spec.with_message(message.clone());
                }
                spec.fatal = stage.fatal;
                spec
            })
            .collect()
    }

    pub fn build_importer(&self) -> PipelineResult<BlobStoreStage> {
        let client = BlobStoreClient::new(self.blob_store.base_url.clone(), self.blob_store.timeouts())?;
        let importer = BlobImporter::new(client, self.blob_store.import_settings());
        Ok(BlobStoreStage::new(importer, self.blob_store.artifact_path.clone()))
    }

    /// Executor running command stages as child processes and the import
    /// stage against the configured blob store.
    pub fn build_executor(&self) -> PipelineResult<PipelineExecutor> {
        let mut executor = PipelineExecutor::new(self.stage_specs(), Arc::new(ProcessStageRunner::new()))
            .with_completion_message(self.completion_message());
        if self.stages.iter().any(|s| s.kind == StageKind::Import) {
            executor = executor.with_importer(Arc::new(self.build_importer()?));
        }
        Ok(executor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageTarget;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_describe_four_stage_pipeline() {
        let config = PipelineConfig::default();
        assert_eq!(config.server.address, "0.0.0.0:8090".parse().unwrap());
        let ids: Vec<_> = config.stages.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["preparing_data", "training", "exporting", "importing"]);
        assert_eq!(config.blob_store.base_url, "http://ollama:11434/api");
        assert_eq!(config.blob_store.model_name, "gemma2-finetuned");
        assert_eq!(config.blob_store.parameters.num_ctx, 2048);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_toml_equals_defaults() {
        assert_eq!(PipelineConfig::from_toml("").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = PipelineConfig::load(Some(Path::new("/nonexistent/tunekit.toml"))).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(PipelineConfig::load(None).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
completion_message = "Ready."

[server]
address = "127.0.0.1:9000"

[[stages]]
id = "train"
description = "Training"
program = "python3"
args = ["train.py", "--fast"]
env = {{ CUDA_VISIBLE_DEVICES = "0" }}

[[stages]]
id = "publish"
kind = "import"

[blob_store]
model_name = "custom"
stream = false

[blob_store.parameters]
stop = ["</s>"]
temperature = 0.2
num_ctx = 4096
"#
        )
        .unwrap();

        let config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.address, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.stages[0].args, ["train.py", "--fast"]);
        assert_eq!(config.stages[0].env["CUDA_VISIBLE_DEVICES"], "0");
        assert_eq!(config.stages[1].kind, StageKind::Import);
        assert_eq!(config.blob_store.model_name, "custom");
        assert!(!config.blob_store.stream);
        assert_eq!(config.blob_store.base_url, "http://ollama:11434/api");
        assert_eq!(config.blob_store.parameters.stop, ["</s>"]);
        assert_eq!(config.completion_message(), "Ready.");
        config.validate().unwrap();
    }

    #[test]
    fn test_load_malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server\naddress = ").unwrap();
        let err = PipelineConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PipelineConfig::default();
        config
            .apply_env_overrides(env(&[
                ("TUNEKIT_BIND", "127.0.0.1:7000"),
                ("OLLAMA_URL", "http://localhost:11434/"),
                ("FINETUNED_MODEL_NAME", "my-model"),
                ("TUNEKIT_ARTIFACT_PATH", "/tmp/model.gguf"),
            ]))
            .unwrap();

        assert_eq!(config.server.address, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.blob_store.base_url, "http://localhost:11434/api");
        assert_eq!(config.blob_store.model_name, "my-model");
        assert_eq!(config.blob_store.artifact_path, PathBuf::from("/tmp/model.gguf"));
        assert_eq!(config.completion_message(), "Fine-tuning complete! Model 'my-model' is ready.");
    }

    #[test]
    fn test_env_override_keeps_existing_api_suffix() {
        let mut config = PipelineConfig::default();
        config.apply_env_overrides(env(&[("OLLAMA_URL", "http://store:1/api")])).unwrap();
        assert_eq!(config.blob_store.base_url, "http://store:1/api");
    }

    #[test]
    fn test_invalid_bind_override() {
        let mut config = PipelineConfig::default();
        let err = config.apply_env_overrides(env(&[("TUNEKIT_BIND", "not-an-address")])).unwrap_err();
        assert!(err.to_string().contains("TUNEKIT_BIND"));
    }

    fn rejects(mutate: impl FnOnce(&mut PipelineConfig), needle: &str) {
        let mut config = PipelineConfig::default();
        mutate(&mut config);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains(needle), "{err} should mention {needle}");
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        rejects(|c| c.stages.clear(), "at least one stage");
        rejects(|c| c.stages[1].id = "preparing_data".to_string(), "duplicate");
        rejects(|c| c.stages[0].id = " ".to_string(), "must not be empty");
        rejects(|c| c.stages[0].id = "done".to_string(), "reserved");
        rejects(|c| c.stages[1].id = "training ".to_string(), "surrounding whitespace");
        rejects(|c| c.stages[0].program = None, "has no program");
        rejects(|c| c.stages[0].kind = StageKind::Import, "at most one import");
        rejects(|c| c.blob_store.parameters.temperature = f32::NAN, "temperature");
        rejects(|c| c.blob_store.parameters.temperature = -0.1, "temperature");
        rejects(|c| c.blob_store.parameters.num_ctx = 0, "num_ctx");
    }

    #[test]
    fn test_stage_specs_inject_training_config() {
        let config = PipelineConfig {
            training_config: Some(PathBuf::from("/app/config/training_config.yaml")),
            ..PipelineConfig::default()
        };
        let specs = config.stage_specs();
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[1].message, "Training the model (QLoRA on Gemma 2 2B)...");

        match &specs[1].target {
            StageTarget::Command(target) => {
                assert_eq!(target.program, "python3");
                assert_eq!(target.args, ["/app/scripts/train.py"]);
                assert_eq!(target.env[TRAINING_CONFIG_ENV], "/app/config/training_config.yaml");
            }
            StageTarget::Import => panic!("training should be a command stage"),
        }
        assert_eq!(specs[3].target, StageTarget::Import);
    }

    #[test]
    fn test_stage_description_defaults_to_id() {
        let config = PipelineConfig::from_toml("[[stages]]\nid = \"only\"\nprogram = \"true\"\n").unwrap();
        let specs = config.stage_specs();
        assert_eq!(specs[0].description, "only");
        assert_eq!(specs[0].message, "only...");
        assert!(specs[0].fatal);
    }

    #[test]
    fn test_partial_parameters_table_keeps_defaults() {
        let config = PipelineConfig::from_toml("[blob_store.parameters]\ntemperature = 0.1\n").unwrap();
        assert_eq!(config.blob_store.parameters.num_ctx, 2048);
        assert_eq!(config.blob_store.parameters.stop, ["<end_of_turn>"]);
    }

    #[test]
    fn test_build_executor_wires_importer() {
        let executor = PipelineConfig::default().build_executor().unwrap();
        assert_eq!(executor.stages().len(), 4);
        assert!(format!("{executor:?}").contains("has_importer: true"));
    }
}
