//! Training configuration consumed by the external stages.
//!
//! The pipeline never interprets these values. It validates the file once at
//! startup and passes its path to command stages.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Base model identifier, e.g. `unsloth/gemma-2-2b-it-bnb-4bit`.
    pub base_model: String,
    pub max_seq_length: u32,
    pub lora_rank: u32,
    pub lora_alpha: u32,
    /// Export quantization method, e.g. `q4_k_m`.
    pub quantization: String,
    pub batch_size: u32,
    pub gradient_accumulation_steps: u32,
    pub epochs: u32,
    pub learning_rate: f64,
}

impl TrainingConfig {
    /// Reads a `.yaml`/`.yml` or `.toml` file.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("cannot read training config {}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Ok(serde_yaml::from_str(&text)?),
            Some("toml") => Ok(toml::from_str(&text)?),
            _ => Err(PipelineError::Config(format!(
                "unsupported training config format: {} (expected .yaml, .yml or .toml)",
                path.display()
            ))),
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let invalid = |msg: &str| -> PipelineResult<()> { Err(PipelineError::InvalidTrainingConfig(msg.to_string())) };

        if self.base_model.trim().is_empty() {
            return invalid("base_model is required");
        }
        if self.quantization.trim().is_empty() {
            return invalid("quantization is required");
        }
        if self.max_seq_length == 0 {
            return invalid("max_seq_length must be >= 1");
        }
        if self.lora_rank == 0 {
            return invalid("lora_rank must be >= 1");
        }
        if self.lora_alpha == 0 {
            return invalid("lora_alpha must be >= 1");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be >= 1");
        }
        if self.gradient_accumulation_steps == 0 {
            return invalid("gradient_accumulation_steps must be >= 1");
        }
        if self.epochs == 0 {
            return invalid("epochs must be >= 1");
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return invalid("learning_rate must be > 0");
        }
        Ok(())
    }

    /// Loads and validates in one step.
    pub fn check(path: &Path) -> PipelineResult<Self> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}
