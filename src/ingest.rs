//! Batch ingestion: validate → extract → chunk → embed → index.
//!
//! A batch is checked against the upload quota up front and rejected whole
//! if it would not fit. After that every file is handled independently: a
//! bad file is recorded in the [`IngestionResult`] and the rest of the batch
//! carries on. Extraction, chunking and embedding run concurrently (bounded
//! by `ingestion.max_parallel`); staging into the upload directory and the
//! index append happen one file at a time, in input order.
//!
//! A vector store failure is fatal for the call: the staged copy of the file
//! being written is discarded and [`Error::BatchAborted`] is returned, naming
//! the files committed before it. A quota check that cannot measure the
//! upload directory fails the call before anything is written.
//!
//! Re-ingesting a name already in the upload directory replaces that file,
//! so its bytes and slot do not count against the quota twice.

use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, StorageConfig};
use crate::error::{Error, Result, ValidationError};
use crate::extract::extract_text;
use crate::models::{
    display_extension, Chunk, Document, DocumentFormat, IngestionResult, ProcessedFile,
    UploadedFile,
};
use crate::storage::UploadStore;
use crate::store::VectorStore;

pub struct IngestionCoordinator {
    store: Arc<VectorStore>,
    uploads: Arc<UploadStore>,
    storage: StorageConfig,
    chunking: ChunkingConfig,
    max_parallel: usize,
    // One batch at a time, so the quota check sees a stable upload dir.
    batch_lock: Mutex<()>,
}

/// A file that passed validation.
struct Candidate {
    upload: UploadedFile,
    file_name: String,
    format: DocumentFormat,
    byte_size: u64,
}

/// A file ready to be appended.
struct Prepared {
    candidate: Candidate,
    content_hash: String,
    document_id: String,
    char_count: usize,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

enum Outcome {
    Failed { file_name: String, message: String },
    Ready(Box<Prepared>),
}

impl IngestionCoordinator {
    pub fn new(
        store: Arc<VectorStore>,
        uploads: Arc<UploadStore>,
        storage: StorageConfig,
        chunking: ChunkingConfig,
        max_parallel: usize,
    ) -> Self {
        Self {
            store,
            uploads,
            storage,
            chunking,
            max_parallel: max_parallel.max(1),
            batch_lock: Mutex::new(()),
        }
    }

    pub async fn ingest(&self, files: Vec<UploadedFile>) -> Result<IngestionResult> {
        let mut result = IngestionResult::default();
        if files.is_empty() {
            return Ok(result);
        }

        let _batch = self.batch_lock.lock().await;

        if let Some(rejection) = self.check_quota(&files)? {
            let names = files
                .iter()
                .map(|f| f.file_name())
                .collect::<Vec<_>>()
                .join(", ");
            warn!(files = %names, reason = %rejection, "batch rejected by quota");
            result.record_error(names, rejection.to_string());
            return Ok(result);
        }

        // Validate synchronously, then fan the valid files out.
        let mut outcomes: Vec<Option<Outcome>> = Vec::with_capacity(files.len());
        let mut tasks = JoinSet::new();
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        for (index, upload) in files.into_iter().enumerate() {
            match self.validate(upload) {
                Err(e) => outcomes.push(Some(Outcome::Failed {
                    file_name: e.0,
                    message: e.1.to_string(),
                })),
                Ok(candidate) => {
                    outcomes.push(None);
                    let store = Arc::clone(&self.store);
                    let semaphore = Arc::clone(&semaphore);
                    let chunking = self.chunking.clone();
                    tasks.spawn(async move {
                        let _permit = semaphore.acquire_owned().await;
                        (index, prepare(candidate, store, chunking).await)
                    });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined?;
            outcomes[index] = Some(outcome);
        }

        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Outcome::Failed { file_name, message } => {
                    warn!(file = %file_name, error = %message, "file not ingested");
                    result.record_error(file_name, message);
                }
                Outcome::Ready(prepared) => {
                    let file_name = prepared.candidate.file_name.clone();
                    let processed = match self.commit(*prepared).await {
                        Ok(processed) => processed,
                        Err(e) => {
                            error!(
                                file = %file_name,
                                committed = result.processed.len(),
                                error = %e,
                                "ingestion batch aborted"
                            );
                            return Err(Error::BatchAborted {
                                committed: result.processed,
                                file_name,
                                source: Box::new(e),
                            });
                        }
                    };
                    info!(
                        file = %processed.file_name,
                        chunks = processed.chunk_count,
                        "ingested"
                    );
                    result.record_success(processed);
                }
            }
        }

        info!(
            succeeded = result.success_count,
            failed = result.error_count,
            "ingestion batch finished"
        );
        Ok(result)
    }

    /// Check the batch against the upload directory's file count and byte
    /// quota. Returns the rejection, if any; failing to measure the upload
    /// directory is an error. Only file metadata is read.
    ///
    /// Stored files that an incoming file of the same name would replace are
    /// left out of the existing usage.
    fn check_quota(&self, files: &[UploadedFile]) -> Result<Option<ValidationError>> {
        let stored = self.uploads.list()?;
        let incoming_names: HashSet<String> = files.iter().map(|f| f.file_name()).collect();
        let (replaced, kept): (Vec<_>, Vec<_>) = stored
            .into_iter()
            .partition(|s| incoming_names.contains(&s.file_name));

        let existing_files = kept.len();
        let existing_bytes: u64 = kept.iter().map(|s| s.byte_size).sum();
        let incoming_bytes: u64 = files
            .iter()
            .map(|f| std::fs::metadata(&f.source_path).map(|m| m.len()).unwrap_or(0))
            .sum();
        let names = || {
            files
                .iter()
                .map(|f| f.file_name())
                .collect::<Vec<_>>()
                .join(", ")
        };

        if existing_files + files.len() > self.storage.max_files {
            return Ok(Some(ValidationError::TooManyFiles {
                files: names(),
                existing: existing_files,
                incoming: files.len(),
                limit: self.storage.max_files,
            }));
        }
        let total_bytes = existing_bytes.saturating_add(incoming_bytes);
        if total_bytes > self.storage.max_total_bytes() {
            return Ok(Some(ValidationError::StorageQuotaExceeded {
                files: names(),
                total_bytes,
                limit_mb: self.storage.max_total_size_mb(),
            }));
        }
        debug!(
            existing_files,
            existing_bytes,
            replaced = replaced.len(),
            incoming_bytes,
            "quota check passed"
        );
        Ok(None)
    }

    fn validate(
        &self,
        upload: UploadedFile,
    ) -> std::result::Result<Candidate, (String, ValidationError)> {
        let file_name = upload.file_name();
        let fail = |e: ValidationError| (file_name.clone(), e);

        let metadata = match std::fs::metadata(&upload.source_path) {
            Ok(m) if m.is_file() => m,
            _ => {
                return Err(fail(ValidationError::NotFound {
                    file_name: file_name.clone(),
                    path: upload.source_path.display().to_string(),
                }))
            }
        };

        let format = match DocumentFormat::from_path(std::path::Path::new(&file_name)) {
            Some(format) => format,
            None => {
                return Err(fail(ValidationError::UnsupportedFormat {
                    file_name: file_name.clone(),
                    extension: display_extension(&file_name),
                }))
            }
        };

        let byte_size = metadata.len();
        if byte_size == 0 {
            return Err(fail(ValidationError::EmptyFile {
                file_name: file_name.clone(),
            }));
        }
        if byte_size > self.storage.max_file_bytes() {
            return Err(fail(ValidationError::FileTooLarge {
                file_name: file_name.clone(),
                size_bytes: byte_size,
                limit_mb: self.storage.max_file_size_mb,
            }));
        }

        Ok(Candidate {
            upload,
            file_name,
            format,
            byte_size,
        })
    }

    /// Stage the upload, append it to the index, then move the upload into
    /// place. A store failure discards the staged copy.
    async fn commit(&self, prepared: Prepared) -> Result<ProcessedFile> {
        let Prepared {
            candidate,
            content_hash,
            document_id,
            char_count,
            chunks,
            vectors,
        } = prepared;

        let staged = self
            .uploads
            .stage(&candidate.upload.source_path, &candidate.file_name)?;

        let document = Document {
            id: document_id.clone(),
            file_name: candidate.file_name.clone(),
            stored_path: staged.destination().display().to_string(),
            byte_size: candidate.byte_size,
            format: candidate.format,
            content_hash,
            ingested_at: chrono::Utc::now().timestamp(),
        };

        if let Err(e) = self.store.append(&document, &chunks, &vectors).await {
            staged.discard();
            return Err(Error::Store(e));
        }
        staged.commit()?;

        Ok(ProcessedFile {
            file_name: candidate.file_name,
            document_id,
            chunk_count: chunks.len(),
            char_count,
        })
    }
}

/// Extract, chunk and embed one file. Runs concurrently with other files.
async fn prepare(candidate: Candidate, store: Arc<VectorStore>, chunking: ChunkingConfig) -> Outcome {
    let file_name = candidate.file_name.clone();
    match prepare_inner(candidate, store, chunking).await {
        Ok(prepared) => Outcome::Ready(Box::new(prepared)),
        Err(e) => Outcome::Failed {
            file_name,
            message: e.to_string(),
        },
    }
}

async fn prepare_inner(
    candidate: Candidate,
    store: Arc<VectorStore>,
    chunking: ChunkingConfig,
) -> Result<Prepared> {
    let path = candidate.upload.source_path.clone();
    let format = candidate.format;
    let (text, content_hash) = tokio::task::spawn_blocking(move || -> Result<(String, String)> {
        let bytes = std::fs::read(&path)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let hash = format!("{:x}", hasher.finalize());
        let text = extract_text(&bytes, format)?;
        Ok((text, hash))
    })
    .await??;

    let document_id = Uuid::new_v4().to_string();
    let chunks = chunk_text(
        &document_id,
        &text,
        chunking.chunk_size,
        chunking.chunk_overlap,
    )?;
    let vectors = store.embed_chunks(&chunks).await?;

    debug!(
        file = %candidate.file_name,
        chars = text.chars().count(),
        chunks = chunks.len(),
        "prepared file"
    );

    Ok(Prepared {
        char_count: text.chars().count(),
        candidate,
        content_hash,
        document_id,
        chunks,
        vectors,
    })
}
