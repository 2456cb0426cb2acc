//! Error taxonomy for the ingestion and QA core.
//!
//! Each pipeline stage has its own error enum so callers can tell a bad
//! upload ([`ValidationError`]) from a bad document ([`ExtractError`]) from a
//! broken store ([`StoreError`]). [`Error`] wraps them all for operations that
//! span several stages.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::models::ProcessedFile;

/// Rejections raised before any work is done on a file or batch.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{file_name}: unsupported file format '{extension}' (supported: .pdf, .docx, .txt)")]
    UnsupportedFormat {
        file_name: String,
        extension: String,
    },

    #[error("{file_name}: file is empty")]
    EmptyFile { file_name: String },

    #[error("{file_name}: file not found at {path}")]
    NotFound { file_name: String, path: String },

    #[error("{file_name}: {size_bytes} bytes exceeds the per-file limit of {limit_mb} MB")]
    FileTooLarge {
        file_name: String,
        size_bytes: u64,
        limit_mb: u64,
    },

    #[error(
        "upload of {files} rejected: {existing} stored + {incoming} new file(s) exceeds the limit of {limit} files"
    )]
    TooManyFiles {
        files: String,
        existing: usize,
        incoming: usize,
        limit: usize,
    },

    #[error(
        "upload of {files} rejected: {total_bytes} bytes after upload exceeds the storage limit of {limit_mb} MB"
    )]
    StorageQuotaExceeded {
        files: String,
        total_bytes: u64,
        limit_mb: u64,
    },
}

/// Text extraction failures. Never panics; the pipeline records the error
/// against the file and moves on.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file format '{0}'")]
    UnsupportedFormat(String),

    #[error("{format} could not be parsed: {reason}")]
    Corrupt {
        format: &'static str,
        reason: String,
    },

    #[error("no extractable text (the document may contain only images)")]
    EmptyContent,

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("nothing to chunk: text is empty")]
    EmptyInput,

    #[error("invalid chunking configuration: {0}")]
    InvalidConfig(String),
}

/// Vector store failures. Fatal for the operation that hit them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("vector store directory unusable: {0}")]
    Directory(#[from] std::io::Error),

    #[error("embedding dimension mismatch: store holds {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{chunks} chunks but {vectors} vectors supplied")]
    VectorCountMismatch { chunks: usize, vectors: usize },

    #[error("vector store is corrupt: {0}")]
    Corrupt(String),
}

/// HTTP failures shared by the remote embedding and generation providers.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{service} API error {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} connection error ({url}): {reason}")]
    Connection {
        service: &'static str,
        url: String,
        reason: String,
    },

    #[error("{service} response could not be decoded: {reason}")]
    Decode {
        service: &'static str,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider is disabled; set [embedding] provider in config")]
    Disabled,

    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("language model request failed: {0}")]
    Request(String),

    #[error("invalid language model response: {0}")]
    InvalidResponse(String),
}

impl From<RequestError> for EmbedError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Decode { .. } => EmbedError::InvalidResponse(e.to_string()),
            other => EmbedError::Request(other.to_string()),
        }
    }
}

impl From<RequestError> for GenerationError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Decode { .. } => GenerationError::InvalidResponse(e.to_string()),
            other => GenerationError::Request(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("chunking failed: {0}")]
    Chunking(#[from] ChunkError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// A batch stopped partway because a file could not be committed. The
    /// files in `committed` are already indexed and stored; retry only the
    /// rest.
    #[error(
        "ingestion stopped at {file_name} after {} file(s) were committed: {source}",
        .committed.len()
    )]
    BatchAborted {
        committed: Vec<ProcessedFile>,
        file_name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Run `fut` under a deadline of `secs` seconds, mapping expiry to
/// [`Error::Timeout`]. A zero deadline disables the limit.
pub async fn with_timeout<T, E, F>(operation: &'static str, secs: u64, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    Error: From<E>,
{
    if secs == 0 {
        return fut.await.map_err(Error::from);
    }
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout { operation, secs }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_message_names_file_and_extension() {
        let err = ValidationError::UnsupportedFormat {
            file_name: "data.csv".to_string(),
            extension: ".csv".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("data.csv"));
        assert!(msg.contains(".csv"));
    }

    #[tokio::test]
    async fn with_timeout_expires() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, EmbedError>(())
        };
        let err = with_timeout("embedding", 1, slow).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                operation: "embedding",
                secs: 1
            }
        ));
    }

    #[tokio::test]
    async fn with_timeout_passes_errors_through() {
        let failing = async { Err::<(), _>(EmbedError::Disabled) };
        let err = with_timeout("embedding", 5, failing).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(EmbedError::Disabled)));
    }
}
