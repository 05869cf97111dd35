//! HTTP client for the remote content-addressed blob store.
//!
//! Endpoints, relative to the configured base URL:
//! - `HEAD /blobs/{digest}` - existence probe (`200` means present)
//! - `POST /blobs/{digest}` - raw binary upload (`200`/`201` mean stored)
//! - `POST /create` - model registration with a streamed status response

use std::path::Path;
use std::time::Duration;

use reqwest::{Body, Client, StatusCode, header};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::digest::Digest;
use crate::error::{BlobStoreError, Result};
use crate::manifest::ImportManifest;
use crate::status::CreateStatusStream;

/// Per-call timeouts, sized to the payload each call moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    /// Existence probes carry no payload.
    pub probe: Duration,
    /// Multi-gigabyte uploads.
    pub upload: Duration,
    /// Registration may copy and verify the whole blob server-side.
    pub create: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            probe: Duration::from_secs(10),
            upload: Duration::from_secs(3600),
            create: Duration::from_secs(1800),
        }
    }
}

#[derive(Deserialize)]
struct StoreError {
    error: String,
}

/// Client for a blob store such as Ollama's `/api` surface.
#[derive(Debug, Clone)]
pub struct BlobStoreClient {
    /// Base URL, e.g. `http://ollama:11434/api` (no trailing slash).
    base_url: String,
    timeouts: Timeouts,
    client: Client,
}

impl BlobStoreClient {
    /// Creates a client for the given base URL.
    ///
    /// # Errors
    /// Returns `BlobStoreError::Request` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeouts: Timeouts) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| BlobStoreError::Request(format!("Failed to create HTTP client: {e}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { base_url, timeouts, client })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn blob_url(&self, digest: &Digest) -> String {
        format!("{}/blobs/{}", self.base_url, digest)
    }

    /// Probes whether the store already holds `digest`.
    ///
    /// Only `200` counts as present; every other status is treated as absent.
    pub async fn has_blob(&self, digest: &Digest) -> Result<bool> {
        let url = self.blob_url(digest);
        let response = self
            .client
            .head(&url)
            .timeout(self.timeouts.probe)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, url = %url, "Blob existence probe failed");
                self.request_error(&e)
            })?;

        let present = response.status() == StatusCode::OK;
        debug!(digest = %digest, status = %response.status(), present, "Blob existence probe");
        Ok(present)
    }

    /// Streams the file at `path` to the store under `digest`.
    ///
    /// The body is read from disk as it is sent; nothing is buffered in full.
    pub async fn push_blob(&self, digest: &Digest, path: &Path, size: u64) -> Result<()> {
        let url = self.blob_url(digest);
        let file = tokio::fs::File::open(path).await?;

        info!(digest = %digest, bytes = size, "Uploading blob");
        let response = self
            .client
            .post(&url)
            .timeout(self.timeouts.upload)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, size)
            .body(Body::from(file))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, url = %url, "Blob upload failed");
                BlobStoreError::Upload { digest: digest.to_string(), status: None, message: e.to_string() }
            })?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %message, digest = %digest, "Blob store rejected upload");
            return Err(BlobStoreError::Upload {
                digest: digest.to_string(),
                status: Some(status.as_u16()),
                message,
            });
        }

        info!(digest = %digest, status = %status, "Blob uploaded");
        Ok(())
    }

    /// Registers a model and returns its status record stream.
    ///
    /// A non-success HTTP status fails immediately; error records inside a
    /// successful response surface while the stream is consumed.
    pub async fn create(&self, manifest: &ImportManifest) -> Result<CreateStatusStream> {
        let url = format!("{}/create", self.base_url);
        info!(model = %manifest.model, stream = manifest.stream, "Registering model");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeouts.create)
            .json(manifest)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, url = %url, "Model registration request failed");
                BlobStoreError::Registration(format!("Network error: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %body, "Blob store rejected model registration");
            let message = serde_json::from_str::<StoreError>(&body).map_or(body, |e| e.error);
            return Err(BlobStoreError::Registration(format!("API error ({status}): {message}")));
        }

        Ok(CreateStatusStream::from_response(response))
    }

    fn request_error(&self, e: &reqwest::Error) -> BlobStoreError {
        if e.is_connect() {
            BlobStoreError::Request(format!("blob store not reachable at {}", self.base_url))
        } else if e.is_timeout() {
            BlobStoreError::Request(format!("request timed out: {e}"))
        } else {
            BlobStoreError::Request(format!("Network error: {e}"))
        }
    }
}
