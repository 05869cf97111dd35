//! Decoder for the line-delimited status records returned by `POST /create`.
//!
//! Registration can take minutes, so the response is consumed incrementally:
//! each newline-terminated JSON object is decoded as soon as it arrives. The
//! first record carrying an `error` field ends the stream with an error. A
//! non-streaming store answers with a single JSON object and no trailing
//! newline, which decodes as a one-record stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::error::{BlobStoreError, Result};

/// One status record from the create stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CreateStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Lazy, finite sequence of [`CreateStatus`] records.
///
/// Yields `Err` at most once; after an error or the end of input it yields `None`.
pub struct CreateStatusStream {
    inner: ByteStream,
    buffer: Vec<u8>,
    exhausted: bool,
    done: bool,
}

impl CreateStatusStream {
    pub(crate) fn from_response(response: reqwest::Response) -> Self {
        Self::from_byte_stream(response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| BlobStoreError::Registration(format!("status stream interrupted: {e}")))
        }))
    }

    /// Decode records from any byte-chunk stream.
    pub fn from_byte_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self { inner: Box::pin(stream), buffer: Vec::new(), exhausted: false, done: false }
    }

    /// Drain the stream, returning the `status` text of every record.
    ///
    /// Stops at the first error record and returns it.
    pub async fn collect_statuses(mut self) -> Result<Vec<String>> {
        let mut statuses = Vec::new();
        while let Some(record) = self.next().await {
            if let Some(status) = record?.status {
                statuses.push(status);
            }
        }
        Ok(statuses)
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        Some(line)
    }
}

/// `None` for blank lines.
fn decode_record(line: &[u8]) -> Option<Result<CreateStatus>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    let record = match serde_json::from_slice::<CreateStatus>(line) {
        Ok(record) => record,
        Err(e) => {
            return Some(Err(BlobStoreError::Registration(format!(
                "malformed status record ({e}): {}",
                String::from_utf8_lossy(line).trim()
            ))));
        }
    };

    if let Some(error) = &record.error {
        return Some(Err(BlobStoreError::Registration(error.clone())));
    }

    debug!(
        status = ?record.status,
        digest = ?record.digest,
        completed = ?record.completed,
        total = ?record.total,
        "Create status record"
    );
    Some(Ok(record))
}

impl Stream for CreateStatusStream {
    type Item = Result<CreateStatus>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.done {
                return Poll::Ready(None);
            }

            // Complete lines already buffered
            while let Some(line) = self.take_line() {
                if let Some(item) = decode_record(&line) {
                    if item.is_err() {
                        self.done = true;
                    }
                    return Poll::Ready(Some(item));
                }
            }

            // Input ended: whatever is left is the final, unterminated record
            if self.exhausted {
                self.done = true;
                let rest = std::mem::take(&mut self.buffer);
                return Poll::Ready(decode_record(&rest));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => self.buffer.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => self.exhausted = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
