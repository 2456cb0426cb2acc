//! The knowledge base: one handle over uploads, index, ingestion and QA.
//!
//! ```rust,no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use docqa::config::Config;
//! use docqa::knowledge::KnowledgeBase;
//! use docqa::models::UploadedFile;
//!
//! let kb = KnowledgeBase::open(Config::default()).await?;
//! let report = kb.ingest_documents(vec![UploadedFile::from_path("notes.txt")]).await?;
//! println!("{} ingested, {} failed", report.success_count, report.error_count);
//!
//! let answer = kb.answer_question("What do the notes say about deadlines?").await;
//! println!("{}", answer.answer);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::Result;
use crate::generate;
use crate::ingest::IngestionCoordinator;
use crate::models::{
    AnswerResult, IndexedDocument, IngestionResult, RetrievalResult, StoredFile, UploadedFile,
};
use crate::qa::{Exchange, QaCoordinator};
use crate::retrieve::Retriever;
use crate::storage::UploadStore;
use crate::store::VectorStore;
use crate::synthesize::{PromptTemplate, Synthesizer};

pub struct KnowledgeBase {
    config: Config,
    store: Arc<VectorStore>,
    uploads: Arc<UploadStore>,
    ingestion: IngestionCoordinator,
    retriever: Retriever,
    qa: QaCoordinator,
}

/// What [`KnowledgeBase::remove_document`] deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    pub documents: u64,
    pub file_deleted: bool,
}

impl KnowledgeBase {
    /// Open the knowledge base described by `config`, creating the upload
    /// and vector store directories if needed.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        if !config.embedding.is_enabled() {
            warn!("embedding provider is disabled; ingestion and questions will fail");
        }
        let provider = embedding::create_provider(&config.embedding)?;
        Self::open_with_provider(config, provider).await
    }

    /// Like [`KnowledgeBase::open`] with an explicit embedding provider.
    pub async fn open_with_provider(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        let uploads = Arc::new(UploadStore::new(&config.storage.upload_dir));
        uploads.ensure_dir().with_context(|| {
            format!(
                "Failed to create upload directory: {}",
                config.storage.upload_dir.display()
            )
        })?;
        std::fs::create_dir_all(&config.storage.vectorstore_dir).with_context(|| {
            format!(
                "Failed to create vector store directory: {}",
                config.storage.vectorstore_dir.display()
            )
        })?;

        let store = Arc::new(
            VectorStore::open(&config.storage.index_path(), provider, &config.embedding)
                .await
                .context("Failed to open vector store")?,
        );

        let generator = generate::create_generator(&config.generation)?;
        let synthesizer = Synthesizer::new(
            generator,
            PromptTemplate::from_name(&config.generation.prompt_template),
            config.generation.timeout_secs,
        );
        let retriever = Retriever::new(
            Arc::clone(&store),
            config.retrieval.clone(),
            config.embedding.timeout_secs,
        );
        let qa = QaCoordinator::new(retriever.clone(), synthesizer, config.qa.history_limit);
        let ingestion = IngestionCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&uploads),
            config.storage.clone(),
            config.chunking.clone(),
            config.ingestion.max_parallel,
        );

        info!(
            uploads = %config.storage.upload_dir.display(),
            index = %config.storage.index_path().display(),
            "knowledge base opened"
        );

        Ok(Self {
            config,
            store,
            uploads,
            ingestion,
            retriever,
            qa,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn ingest_documents(&self, files: Vec<UploadedFile>) -> Result<IngestionResult> {
        self.ingestion.ingest(files).await
    }

    pub async fn answer_question(&self, question: &str) -> AnswerResult {
        self.qa.answer(question).await
    }

    /// Upload directory usage as (megabytes, file count).
    pub fn get_total_upload_usage(&self) -> Result<(f64, usize)> {
        let usage = self.uploads.usage()?;
        Ok((usage.megabytes(), usage.file_count))
    }

    /// Raw top-K retrieval, without answer synthesis.
    pub async fn search(&self, query: &str, k: Option<usize>) -> Result<RetrievalResult> {
        let k = k.unwrap_or(self.config.retrieval.top_k);
        self.retriever.retrieve(query, k).await
    }

    pub async fn list_documents(&self) -> Result<Vec<IndexedDocument>> {
        Ok(self.store.documents().await?)
    }

    pub fn list_uploads(&self) -> Result<Vec<StoredFile>> {
        Ok(self.uploads.list()?)
    }

    /// Drop every indexed document named `file_name` and its upload.
    pub async fn remove_document(&self, file_name: &str) -> Result<Removal> {
        let documents = self.store.remove_document(file_name).await?;
        let file_deleted = self.uploads.remove(file_name)?;
        info!(file = file_name, documents, file_deleted, "removed document");
        Ok(Removal {
            documents,
            file_deleted,
        })
    }

    /// Re-embed every stored chunk with the configured provider.
    pub async fn reindex(&self) -> Result<usize> {
        self.store.rebuild_embeddings(self.store.provider()).await
    }

    pub fn history(&self) -> Vec<Exchange> {
        self.qa.history()
    }

    pub fn clear_history(&self) {
        self.qa.clear_history()
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}
