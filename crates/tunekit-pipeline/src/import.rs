//! The pipeline's import stage: hands the exported artifact to the blob importer.

use std::path::PathBuf;

use async_trait::async_trait;
use tunekit_blobstore::{BlobImporter, BlobStoreError, ImportReport};

/// Publishes the pipeline's output artifact.
#[async_trait]
pub trait ArtifactImporter: Send + Sync {
    async fn import_artifact(&self) -> Result<ImportReport, BlobStoreError>;
}

/// Imports a fixed artifact path through a [`BlobImporter`].
#[derive(Debug, Clone)]
pub struct BlobStoreStage {
    importer: BlobImporter,
    artifact: PathBuf,
}

impl BlobStoreStage {
    #[must_use]
    pub fn new(importer: BlobImporter, artifact: PathBuf) -> Self {
        Self { importer, artifact }
    }
}

#[async_trait]
impl ArtifactImporter for BlobStoreStage {
    async fn import_artifact(&self) -> Result<ImportReport, BlobStoreError> {
        self.importer.import(&self.artifact).await
    }
}
