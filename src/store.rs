//! Persistent vector store over SQLite.
//!
//! Documents, chunks and their embeddings live in one SQLite database
//! (`index.sqlite` under the vector store directory) opened in WAL mode, so
//! readers always see a committed snapshot while a write is in flight.
//!
//! Writes are serialized through an in-process lock and each [`VectorStore::append`]
//! runs in a single transaction: a batch's entries are either all persisted
//! or none are. Entries are never updated in place; they are appended, removed
//! by document, or fully rebuilt by [`VectorStore::rebuild_embeddings`].
//!
//! # Schema
//!
//! | Table | Contents |
//! |-------|----------|
//! | `documents` | one row per ingested file |
//! | `chunks` | chunk text and char range; `seq` is insertion order |
//! | `embeddings` | one little-endian f32 BLOB per chunk |
//! | `store_meta` | `format_version`, `embedding_model`, `embedding_dims` |
//!
//! Search is brute-force cosine similarity computed in Rust, ordered by
//! score with ties going to the earliest inserted chunk.

use std::path::Path;
use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::EmbeddingConfig;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{Result, StoreError};
use crate::migrate;
use crate::models::{
    Chunk, Document, DocumentFormat, IndexedDocument, RetrievalResult, RetrievedChunk,
};

pub struct VectorStore {
    pool: SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    timeout_secs: u64,
    write_lock: Mutex<()>,
}

impl VectorStore {
    /// Open (creating if needed) the store at `path`.
    pub async fn open(
        path: &Path,
        provider: Arc<dyn EmbeddingProvider>,
        embedding: &EmbeddingConfig,
    ) -> Result<Self, StoreError> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;

        let store = Self {
            pool,
            provider,
            batch_size: embedding.batch_size,
            timeout_secs: embedding.timeout_secs,
            write_lock: Mutex::new(()),
        };

        let version = store.meta("format_version").await?;
        if version.as_deref() != Some(&migrate::FORMAT_VERSION.to_string()) {
            return Err(StoreError::Corrupt(format!(
                "unsupported store format version {:?}",
                version
            )));
        }

        debug!(path = %path.display(), model = store.provider.model_name(), "vector store opened");
        Ok(store)
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    /// Embed chunk texts with the store's provider, batched and time-bounded.
    pub async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        embedding::embed_batched(
            self.provider.as_ref(),
            &texts,
            self.batch_size,
            self.timeout_secs,
        )
        .await
    }

    /// Embed then append in one call.
    pub async fn add(&self, document: &Document, chunks: &[Chunk]) -> Result<()> {
        let vectors = self.embed_chunks(chunks).await?;
        self.append(document, chunks, &vectors).await?;
        Ok(())
    }

    /// Persist a document with its chunks and vectors atomically.
    ///
    /// The first append fixes the store's dimension; later appends with a
    /// different dimension fail with [`StoreError::DimensionMismatch`].
    pub async fn append(
        &self,
        document: &Document,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<(), StoreError> {
        if chunks.len() != vectors.len() {
            return Err(StoreError::VectorCountMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let stored_dims: Option<String> =
            sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'embedding_dims'")
                .fetch_optional(&mut *tx)
                .await?;
        let expected = match stored_dims {
            Some(d) => Some(
                d.parse::<usize>()
                    .map_err(|_| StoreError::Corrupt(format!("bad embedding_dims '{}'", d)))?,
            ),
            None => None,
        };
        let expected = expected.or_else(|| vectors.first().map(|v| v.len()));
        if let Some(expected) = expected {
            if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
            sqlx::query(
                "INSERT OR IGNORE INTO store_meta (key, value) VALUES ('embedding_dims', ?)",
            )
            .bind(expected.to_string())
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT OR IGNORE INTO store_meta (key, value) VALUES ('embedding_model', ?)",
            )
            .bind(self.provider.model_name())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO documents (id, file_name, stored_path, byte_size, format, content_hash, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&document.id)
        .bind(&document.file_name)
        .bind(&document.stored_path)
        .bind(document.byte_size as i64)
        .bind(document.format.as_str())
        .bind(&document.content_hash)
        .bind(document.ingested_at)
        .execute(&mut *tx)
        .await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, text, start_char, end_char, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.start_char as i64)
            .bind(chunk.end_char as i64)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO embeddings (chunk_id, dims, vector) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(vector.len() as i64)
                .bind(embedding::vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(
            document = %document.file_name,
            chunks = chunks.len(),
            "appended to vector store"
        );
        Ok(())
    }

    /// The `k` chunks most similar to `query_vec`, best first.
    pub async fn search(&self, query_vec: &[f32], k: usize) -> Result<RetrievalResult, StoreError> {
        Ok(self
            .search_with_vectors(query_vec, k)
            .await?
            .into_iter()
            .map(|(hit, _)| hit)
            .collect())
    }

    /// Like [`VectorStore::search`], keeping each hit's stored vector for
    /// re-ranking.
    pub async fn search_with_vectors(
        &self,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<(RetrievedChunk, Vec<f32>)>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if let Some(dims) = self.dims().await? {
            if dims != query_vec.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: dims,
                    actual: query_vec.len(),
                });
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.text, c.start_char, c.end_char,
                   c.hash, d.file_name, e.vector
            FROM chunks c
            JOIN embeddings e ON e.chunk_id = c.id
            JOIN documents d ON d.id = c.document_id
            ORDER BY c.seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<(RetrievedChunk, Vec<f32>)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let vector = embedding::blob_to_vec(&blob);
                let hit = RetrievedChunk {
                    chunk: chunk_from_row(row),
                    file_name: row.get("file_name"),
                    score: embedding::cosine_similarity(query_vec, &vector),
                };
                (hit, vector)
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|(a, _), (b, _)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    pub async fn chunk_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Indexed documents in ingestion order, with their chunk counts.
    pub async fn documents(&self) -> Result<Vec<IndexedDocument>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.file_name, d.stored_path, d.byte_size, d.format, d.content_hash,
                   d.ingested_at, COUNT(c.seq) AS chunk_count
            FROM documents d
            LEFT JOIN chunks c ON c.document_id = d.id
            GROUP BY d.id
            ORDER BY d.rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let format: String = row.get("format");
                let format = DocumentFormat::from_extension(&format).ok_or_else(|| {
                    StoreError::Corrupt(format!("unknown document format '{}'", format))
                })?;
                let byte_size: i64 = row.get("byte_size");
                Ok(IndexedDocument {
                    document: Document {
                        id: row.get("id"),
                        file_name: row.get("file_name"),
                        stored_path: row.get("stored_path"),
                        byte_size: byte_size.max(0) as u64,
                        format,
                        content_hash: row.get("content_hash"),
                        ingested_at: row.get("ingested_at"),
                    },
                    chunk_count: row.get("chunk_count"),
                })
            })
            .collect()
    }

    /// Delete every document named `file_name` along with its chunks and
    /// embeddings. Returns how many documents were removed.
    pub async fn remove_document(&self, file_name: &str) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM embeddings WHERE chunk_id IN (
                SELECT c.id FROM chunks c JOIN documents d ON d.id = c.document_id
                WHERE d.file_name = ?
            )
            "#,
        )
        .bind(file_name)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM chunks WHERE document_id IN (SELECT id FROM documents WHERE file_name = ?)",
        )
        .bind(file_name)
        .execute(&mut *tx)
        .await?;
        let removed = sqlx::query("DELETE FROM documents WHERE file_name = ?")
            .bind(file_name)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed)
    }

    /// Re-embed every chunk with `provider` and swap the new vectors in,
    /// together with the model metadata, in one transaction.
    pub async fn rebuild_embeddings(&self, provider: &dyn EmbeddingProvider) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let rows = sqlx::query("SELECT id, text FROM chunks ORDER BY seq")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        let ids: Vec<String> = rows.iter().map(|r| r.get("id")).collect();
        let texts: Vec<String> = rows.iter().map(|r| r.get("text")).collect();

        let vectors =
            embedding::embed_batched(provider, &texts, self.batch_size, self.timeout_secs).await?;

        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        sqlx::query("DELETE FROM embeddings")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        for (id, vector) in ids.iter().zip(&vectors) {
            sqlx::query("INSERT INTO embeddings (chunk_id, dims, vector) VALUES (?, ?, ?)")
                .bind(id)
                .bind(vector.len() as i64)
                .bind(embedding::vec_to_blob(vector))
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
        }
        for (key, value) in [
            ("embedding_model", provider.model_name().to_string()),
            (
                "embedding_dims",
                vectors
                    .first()
                    .map_or(provider.dims(), |v| v.len())
                    .to_string(),
            ),
        ] {
            sqlx::query("INSERT OR REPLACE INTO store_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
        }
        tx.commit().await.map_err(StoreError::from)?;

        info!(
            chunks = ids.len(),
            model = provider.model_name(),
            "rebuilt embeddings"
        );
        Ok(ids.len())
    }

    /// Dimension fixed by the first append, if any.
    pub async fn dims(&self) -> Result<Option<usize>, StoreError> {
        match self.meta("embedding_dims").await? {
            Some(d) => d
                .parse()
                .map(Some)
                .map_err(|_| StoreError::Corrupt(format!("bad embedding_dims '{}'", d))),
            None => Ok(None),
        }
    }

    pub async fn embedding_model(&self) -> Result<Option<String>, StoreError> {
        self.meta("embedding_model").await
    }

    async fn meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar("SELECT value FROM store_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let start: i64 = row.get("start_char");
    let end: i64 = row.get("end_char");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        start_char: start.max(0) as usize,
        end_char: end.max(0) as usize,
        hash: row.get("hash"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use crate::embedding::HashingProvider;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> VectorStore {
        VectorStore::open(
            &dir.path().join("index.sqlite"),
            Arc::new(HashingProvider::new(64)),
            &EmbeddingConfig::default(),
        )
        .await
        .unwrap()
    }

    fn document(id: &str, file_name: &str) -> Document {
        Document {
            id: id.to_string(),
            file_name: file_name.to_string(),
            stored_path: format!("/uploads/{}", file_name),
            byte_size: 42,
            format: DocumentFormat::Txt,
            content_hash: "abc".to_string(),
            ingested_at: 0,
        }
    }

    fn unit(dims: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[hot] = 1.0;
        v
    }

    #[tokio::test]
    async fn add_then_search_finds_best_chunk() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let doc = document("d1", "facts.txt");
        let chunks = chunk_text(
            "d1",
            "The capital of France is Paris.\n\nBananas grow in tropical climates.",
            40,
            0,
        )
        .unwrap();
        assert_eq!(chunks.len(), 2);
        store.add(&doc, &chunks).await.unwrap();

        let q = HashingProvider::new(64).embed_one("capital of France");
        let hits = store.search(&q, 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.text.contains("Paris"));
        assert_eq!(hits[0].file_name, "facts.txt");
        assert_eq!(store.chunk_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn ties_go_to_earliest_insert() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        for (i, name) in ["a.txt", "b.txt", "c.txt"].iter().enumerate() {
            let id = format!("d{}", i);
            let doc = document(&id, name);
            let chunks = chunk_text(&id, "same text", 100, 0).unwrap();
            store.append(&doc, &chunks, &[unit(4, 0)]).await.unwrap();
        }
        let hits = store.search(&unit(4, 0), 3).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.file_name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn dimension_is_fixed_by_first_append() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let c1 = chunk_text("d1", "one", 100, 0).unwrap();
        store.append(&document("d1", "one.txt"), &c1, &[unit(4, 1)]).await.unwrap();
        assert_eq!(store.dims().await.unwrap(), Some(4));

        let c2 = chunk_text("d2", "two", 100, 0).unwrap();
        let err = store
            .append(&document("d2", "two.txt"), &c2, &[unit(8, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 4, actual: 8 }));
        // Nothing from the rejected append is visible.
        assert_eq!(store.documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_append_leaves_no_partial_state() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let c1 = chunk_text("d1", "first document", 100, 0).unwrap();
        store.append(&document("d1", "a.txt"), &c1, &[unit(4, 0)]).await.unwrap();

        // Reusing the document id violates the primary key after the dims check.
        let c2 = chunk_text("d1", "second document", 100, 0).unwrap();
        assert!(store
            .append(&document("d1", "b.txt"), &c2, &[unit(4, 2)])
            .await
            .is_err());
        assert_eq!(store.chunk_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn vector_count_must_match() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let chunks = chunk_text("d1", "text", 100, 0).unwrap();
        let err = store
            .append(&document("d1", "a.txt"), &chunks, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VectorCountMismatch { chunks: 1, vectors: 0 }));
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            let chunks = chunk_text("d1", "durable text", 100, 0).unwrap();
            store.add(&document("d1", "a.txt"), &chunks).await.unwrap();
            store.close().await;
        }
        let store = open_store(&dir).await;
        assert_eq!(store.chunk_count().await.unwrap(), 1);
        assert_eq!(
            store.embedding_model().await.unwrap().as_deref(),
            Some(crate::embedding::hashing::MODEL_NAME)
        );
    }

    #[tokio::test]
    async fn remove_document_deletes_all_with_name() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        for id in ["d1", "d2"] {
            let chunks = chunk_text(id, "repeated upload", 100, 0).unwrap();
            store.add(&document(id, "dup.txt"), &chunks).await.unwrap();
        }
        let chunks = chunk_text("d3", "other", 100, 0).unwrap();
        store.add(&document("d3", "other.txt"), &chunks).await.unwrap();

        assert_eq!(store.remove_document("dup.txt").await.unwrap(), 2);
        let docs = store.documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].document.file_name, "other.txt");
        assert_eq!(docs[0].chunk_count, 1);
        assert_eq!(store.chunk_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rebuild_swaps_dimension_and_model() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let chunks = chunk_text("d1", "The capital of France is Paris.", 100, 0).unwrap();
        store.add(&document("d1", "a.txt"), &chunks).await.unwrap();
        assert_eq!(store.dims().await.unwrap(), Some(64));

        let wider = HashingProvider::new(128);
        assert_eq!(store.rebuild_embeddings(&wider).await.unwrap(), 1);
        assert_eq!(store.dims().await.unwrap(), Some(128));

        let hits = store.search(&wider.embed_one("Paris"), 1).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
