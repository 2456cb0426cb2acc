//! Core data models used throughout docqa.
//!
//! These types represent the uploads, documents, chunks, and results that flow
//! through the ingestion and question-answering pipeline.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Document formats accepted by the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Txt,
}

impl DocumentFormat {
    /// Match a bare extension (no dot), case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Txt),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Txt => "txt",
        }
    }
}

/// Dotted, lowercased extension of a file name for user-facing messages
/// (`".csv"`), or `"(none)"`.
pub fn display_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_else(|| "(none)".to_string())
}

/// A file handed to the ingestion boundary by the upload layer.
///
/// `source_path` is wherever the upload currently lives (usually a temp
/// file); `original_file_name` is the name the user uploaded it under.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub source_path: PathBuf,
    pub original_file_name: String,
}

impl UploadedFile {
    pub fn new(source_path: impl Into<PathBuf>, original_file_name: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            original_file_name: original_file_name.into(),
        }
    }

    /// Use the path's own file name as the original name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let source_path = path.into();
        let original_file_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            source_path,
            original_file_name,
        }
    }

    /// The upload's name reduced to its final path component, so a name like
    /// `../../etc/passwd` cannot escape the upload directory.
    pub fn file_name(&self) -> String {
        Path::new(&self.original_file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.original_file_name.clone())
    }
}

/// A source document recorded in the vector store.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub file_name: String,
    pub stored_path: String,
    pub byte_size: u64,
    pub format: DocumentFormat,
    pub content_hash: String,
    pub ingested_at: i64,
}

/// A chunk of a document's extracted text.
///
/// `start_char..end_char` is the chunk's range in the extracted text,
/// counted in chars.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub hash: String,
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub file_name: String,
    pub score: f32,
}

/// Top-K search hits, highest similarity first.
pub type RetrievalResult = Vec<RetrievedChunk>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileError {
    pub file_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedFile {
    pub file_name: String,
    pub document_id: String,
    pub chunk_count: usize,
    pub char_count: usize,
}

/// Outcome of one ingestion batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestionResult {
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<FileError>,
    pub processed: Vec<ProcessedFile>,
}

impl IngestionResult {
    pub fn record_error(&mut self, file_name: impl Into<String>, message: impl Into<String>) {
        self.error_count += 1;
        self.errors.push(FileError {
            file_name: file_name.into(),
            message: message.into(),
        });
    }

    pub fn record_success(&mut self, processed: ProcessedFile) {
        self.success_count += 1;
        self.processed.push(processed);
    }
}

/// Where an answer came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub file_name: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub score: f32,
    pub excerpt: String,
}

impl Citation {
    const EXCERPT_CHARS: usize = 240;

    pub fn from_retrieved(hit: &RetrievedChunk) -> Self {
        Self {
            file_name: hit.file_name.clone(),
            document_id: hit.chunk.document_id.clone(),
            chunk_index: hit.chunk.chunk_index,
            score: hit.score,
            excerpt: hit.chunk.text.chars().take(Self::EXCERPT_CHARS).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<Citation>,
}

impl AnswerResult {
    pub fn without_sources(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            sources: Vec::new(),
        }
    }
}

/// A file currently held in the upload directory.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub file_name: String,
    pub path: PathBuf,
    pub byte_size: u64,
    pub extension: String,
}

/// Bytes and file count of the upload directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub total_bytes: u64,
    pub file_count: usize,
}

impl StorageUsage {
    pub fn megabytes(&self) -> f64 {
        self.total_bytes as f64 / crate::config::BYTES_PER_MB as f64
    }
}

/// Document summary with its chunk count, as listed from the store.
#[derive(Debug, Clone, Serialize)]
pub struct IndexedDocument {
    pub document: Document,
    pub chunk_count: i64,
}
