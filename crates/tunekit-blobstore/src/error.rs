//! Error types for blob store imports.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for blob store operations.
pub type Result<T> = std::result::Result<T, BlobStoreError>;

/// Errors raised while importing an artifact into the remote blob store.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// The local artifact is absent, not a regular file, or empty.
    #[error("{}", describe_missing(path, *size))]
    ArtifactMissing {
        /// Where the artifact was expected.
        path: PathBuf,
        /// Observed size, if the path exists at all.
        size: Option<u64>,
    },

    /// The blob upload was rejected or could not be completed.
    #[error("upload of {digest} failed{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upload {
        /// Digest of the blob being uploaded.
        digest: String,
        /// HTTP status, when the store answered at all.
        status: Option<u16>,
        /// Response body or transport error text.
        message: String,
    },

    /// Model registration failed or the create stream carried an error record.
    #[error("model registration failed: {0}")]
    Registration(String),

    /// A request to the blob store failed at the transport level.
    #[error("blob store request failed: {0}")]
    Request(String),

    /// A digest string did not have the `sha256:<64 hex>` shape.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// I/O errors while reading the artifact.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn describe_missing(path: &Path, size: Option<u64>) -> String {
    match size {
        None => format!(
            "artifact not found at {} (expected a non-empty file)",
            path.display()
        ),
        Some(size) => format!(
            "artifact at {} is not usable: {size} bytes (expected a non-empty file)",
            path.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_missing_display_without_size() {
        let err = BlobStoreError::ArtifactMissing {
            path: PathBuf::from("/models/model.gguf"),
            size: None,
        };
        assert_eq!(
            err.to_string(),
            "artifact not found at /models/model.gguf (expected a non-empty file)"
        );
    }

    #[test]
    fn test_artifact_missing_display_with_size() {
        let err = BlobStoreError::ArtifactMissing {
            path: PathBuf::from("/models/model.gguf"),
            size: Some(0),
        };
        assert!(err.to_string().contains("0 bytes"));
    }

    #[test]
    fn test_upload_display() {
        let err = BlobStoreError::Upload {
            digest: "sha256:abc".to_string(),
            status: Some(500),
            message: "disk quota".to_string(),
        };
        assert_eq!(err.to_string(), "upload of sha256:abc failed (500): disk quota");

        let err = BlobStoreError::Upload {
            digest: "sha256:abc".to_string(),
            status: None,
            message: "connection reset".to_string(),
        };
        assert_eq!(err.to_string(), "upload of sha256:abc failed: connection reset");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BlobStoreError>();
    }
}
