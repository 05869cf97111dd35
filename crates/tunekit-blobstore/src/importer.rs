//! Verify-before-upload artifact import.
//!
//! Protocol, in order:
//! 1. the local artifact must exist and be non-empty
//! 2. stream the whole file through SHA-256
//! 3. probe the store for the digest; skip the upload when present
//! 4. otherwise stream the file to the store under the digest
//! 5. register the model, referencing the digest by file slot
//! 6. consume the create status stream, failing on the first error record
//!
//! Re-running with an unchanged artifact costs one hash pass and one probe.

use std::path::Path;

use tracing::info;

use crate::client::BlobStoreClient;
use crate::digest::Digest;
use crate::error::{BlobStoreError, Result};
use crate::manifest::{GenerationParameters, ImportManifest};

/// What to register the artifact as.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSettings {
    /// Logical model name in the store.
    pub model_name: String,
    /// File slot name; defaults to the artifact's file name.
    pub file_slot: Option<String>,
    pub parameters: GenerationParameters,
    /// System preamble attached to the model.
    pub system: String,
    pub template: Option<String>,
    /// Request a streamed status response from `create`.
    pub stream: bool,
}

/// Result of a completed import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub digest: Digest,
    pub size: u64,
    /// `false` when the store already held the blob.
    pub uploaded: bool,
    /// Status texts reported by the create call, in order.
    pub statuses: Vec<String>,
}

/// Owns the artifact-import protocol against one blob store.
#[derive(Debug, Clone)]
pub struct BlobImporter {
    client: BlobStoreClient,
    settings: ImportSettings,
}

impl BlobImporter {
    #[must_use]
    pub fn new(client: BlobStoreClient, settings: ImportSettings) -> Self {
        Self { client, settings }
    }

    /// Publishes `artifact` and registers it under the configured model name.
    pub async fn import(&self, artifact: &Path) -> Result<ImportReport> {
        let expected_size = check_artifact(artifact).await?;

        let (digest, size) = Digest::of_file(artifact).await?;
        if size == 0 {
            // Truncated between the size check and hashing.
            return Err(BlobStoreError::ArtifactMissing { path: artifact.to_path_buf(), size: Some(0) });
        }
        info!(
            artifact = %artifact.display(),
            bytes = size,
            expected_bytes = expected_size,
            digest = %digest,
            "Artifact digest computed"
        );

        let uploaded = if self.client.has_blob(&digest).await? {
            info!(digest = %digest, "Blob already present, skipping upload");
            false
        } else {
            self.client.push_blob(&digest, artifact, size).await?;
            true
        };

        let manifest = self.manifest_for(artifact, digest.clone());
        let statuses = self.client.create(&manifest).await?.collect_statuses().await?;

        info!(
            model = %self.settings.model_name,
            digest = %digest,
            uploaded,
            last_status = statuses.last().map_or("", String::as_str),
            "Model registered"
        );
        Ok(ImportReport { digest, size, uploaded, statuses })
    }

    fn manifest_for(&self, artifact: &Path, digest: Digest) -> ImportManifest {
        let slot = self.settings.file_slot.clone().unwrap_or_else(|| {
            artifact
                .file_name()
                .map_or_else(|| "model".to_string(), |name| name.to_string_lossy().into_owned())
        });

        ImportManifest::single_file(
            self.settings.model_name.clone(),
            slot,
            digest,
            self.settings.parameters.clone(),
            self.settings.system.clone(),
        )
        .with_template(self.settings.template.clone())
        .with_stream(self.settings.stream)
    }
}

/// Size of the artifact, or `ArtifactMissing` when it is absent or empty.
async fn check_artifact(path: &Path) -> Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
        Ok(meta) => Err(BlobStoreError::ArtifactMissing {
            path: path.to_path_buf(),
            size: Some(if meta.is_file() { meta.len() } else { 0 }),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(BlobStoreError::ArtifactMissing { path: path.to_path_buf(), size: None })
        }
        Err(e) => Err(e.into()),
    }
}
