//! Tunekit Blob Store
//!
//! Publishes a local model artifact into a remote content-addressed store:
//! - Streaming SHA-256 digests over multi-gigabyte files (`Digest`)
//! - Existence probe, streamed upload and model registration (`BlobStoreClient`)
//! - Line-delimited create-status decoding (`CreateStatusStream`)
//! - The end-to-end verify-before-upload protocol (`BlobImporter`)

pub mod client;
pub mod digest;
pub mod error;
pub mod importer;
pub mod manifest;
pub mod status;

pub use client::{BlobStoreClient, Timeouts};
pub use digest::{DIGEST_BLOCK_SIZE, Digest};
pub use error::{BlobStoreError, Result};
pub use importer::{BlobImporter, ImportReport, ImportSettings};
pub use manifest::{GenerationParameters, ImportManifest};
pub use status::{CreateStatus, CreateStatusStream};
