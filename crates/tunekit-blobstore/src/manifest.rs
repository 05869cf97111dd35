//! Model registration manifest sent to the blob store's create endpoint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// Generation parameters attached to a registered model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParameters {
    /// Stop sequences.
    pub stop: Vec<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Context window length in tokens.
    pub num_ctx: u32,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self { stop: vec!["<end_of_turn>".to_string()], temperature: 0.7, num_ctx: 2048 }
    }
}

/// Body of `POST /create`: a logical model name bound to digest-addressed files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportManifest {
    pub model: String,
    /// Slot name (e.g. the weights file name) to blob digest.
    pub files: BTreeMap<String, Digest>,
    pub parameters: GenerationParameters,
    pub system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Ask the store for a line-delimited status stream instead of a single response.
    #[serde(default)]
    pub stream: bool,
}

impl ImportManifest {
    /// Manifest with a single file slot.
    #[must_use]
    pub fn single_file(
        model: impl Into<String>,
        slot: impl Into<String>,
        digest: Digest,
        parameters: GenerationParameters,
        system: impl Into<String>,
    ) -> Self {
        let mut files = BTreeMap::new();
        files.insert(slot.into(), digest);
        Self {
            model: model.into(),
            files,
            parameters,
            system: system.into(),
            template: None,
            stream: true,
        }
    }

    #[must_use]
    pub fn with_template(mut self, template: Option<String>) -> Self {
        self.template = template;
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_file_manifest_wire_shape() {
        let digest = Digest::of_bytes(b"weights");
        let manifest = ImportManifest::single_file(
            "gemma2-finetuned",
            "model.gguf",
            digest.clone(),
            GenerationParameters::default(),
            "Answer briefly.",
        );

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["model"], "gemma2-finetuned");
        assert_eq!(json["files"]["model.gguf"], digest.as_str());
        assert_eq!(json["parameters"]["stop"][0], "<end_of_turn>");
        assert_eq!(json["parameters"]["num_ctx"], 2048);
        assert_eq!(json["system"], "Answer briefly.");
        assert_eq!(json["stream"], true);
        assert!(json.get("template").is_none());
    }

    #[test]
    fn test_template_is_sent_when_present() {
        let manifest = ImportManifest::single_file(
            "m",
            "model.gguf",
            Digest::of_bytes(b"x"),
            GenerationParameters::default(),
            "",
        )
        .with_template(Some("{{ .Prompt }}".to_string()))
        .with_stream(false);

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["template"], "{{ .Prompt }}");
        assert_eq!(json["stream"], false);
    }
}
