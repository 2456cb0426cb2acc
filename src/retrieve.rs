//! Query → top-K chunks.
//!
//! Two strategies, chosen by `retrieval.search_type`:
//!
//! - `similarity`: the K chunks closest to the query.
//! - `mmr`: fetch the `fetch_k` closest, then pick K of them by maximal
//!   marginal relevance, so near-duplicate chunks do not crowd out the rest.
//!
//! `min_score` applies to both, before any re-ranking.

use std::sync::Arc;

use tracing::debug;

use crate::config::{RetrievalConfig, SearchType};
use crate::embedding::{cosine_similarity, embed_query};
use crate::error::Result;
use crate::models::RetrievalResult;
use crate::store::VectorStore;

#[derive(Clone)]
pub struct Retriever {
    store: Arc<VectorStore>,
    config: RetrievalConfig,
    timeout_secs: u64,
}

impl Retriever {
    pub fn new(store: Arc<VectorStore>, config: RetrievalConfig, timeout_secs: u64) -> Self {
        Self {
            store,
            config,
            timeout_secs,
        }
    }

    pub fn top_k(&self) -> usize {
        self.config.top_k
    }

    /// Embed `query` with the ingestion provider and return `k` chunks. An
    /// empty store short-circuits without touching the provider.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        if self.store.chunk_count().await? == 0 {
            debug!("store is empty; nothing to retrieve");
            return Ok(Vec::new());
        }

        let query_vec = embed_query(self.store.provider(), query, self.timeout_secs).await?;
        let hits = match self.config.search_type {
            SearchType::Similarity => {
                let mut hits = self.store.search(&query_vec, k).await?;
                if let Some(min) = self.config.min_score {
                    hits.retain(|h| h.score >= min);
                }
                hits
            }
            SearchType::Mmr => {
                let fetch_k = self.config.fetch_k.map_or(k.saturating_mul(2), |f| f.max(k));
                let mut candidates = self.store.search_with_vectors(&query_vec, fetch_k).await?;
                if let Some(min) = self.config.min_score {
                    candidates.retain(|(h, _)| h.score >= min);
                }
                let scores: Vec<f32> = candidates.iter().map(|(h, _)| h.score).collect();
                let vectors: Vec<&[f32]> = candidates.iter().map(|(_, v)| v.as_slice()).collect();
                let order = mmr_order(&scores, &vectors, k, self.config.mmr_lambda);

                let mut slots: Vec<_> = candidates.into_iter().map(|(h, _)| Some(h)).collect();
                order.into_iter().filter_map(|i| slots[i].take()).collect()
            }
        };

        debug!(k, hits = hits.len(), search_type = ?self.config.search_type, "retrieved");
        Ok(hits)
    }
}

/// Pick up to `k` candidate indices by maximal marginal relevance.
///
/// Each step takes the candidate maximising
/// `lambda * query_score - (1 - lambda) * max_similarity_to_picked`.
/// Ties go to the earlier candidate, so with `lambda = 1.0` this is the
/// input order.
pub fn mmr_order(query_scores: &[f32], vectors: &[&[f32]], k: usize, lambda: f32) -> Vec<usize> {
    let n = query_scores.len().min(vectors.len());
    let mut picked: Vec<usize> = Vec::with_capacity(k.min(n));
    // Highest similarity of each candidate to anything picked so far.
    let mut redundancy = vec![f32::NEG_INFINITY; n];
    let mut available = vec![true; n];

    while picked.len() < k.min(n) {
        let mut best: Option<(usize, f32)> = None;
        for i in (0..n).filter(|&i| available[i]) {
            let penalty = if picked.is_empty() { 0.0 } else { redundancy[i] };
            let value = lambda * query_scores[i] - (1.0 - lambda) * penalty;
            if best.map_or(true, |(_, v)| value > v) {
                best = Some((i, value));
            }
        }
        let Some((chosen, _)) = best else { break };
        available[chosen] = false;
        picked.push(chosen);
        for i in (0..n).filter(|&i| available[i]) {
            redundancy[i] = redundancy[i].max(cosine_similarity(vectors[i], vectors[chosen]));
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding::{DisabledProvider, EmbeddingProvider, HashingProvider};
    use crate::error::EmbedError;
    use crate::models::{Document, DocumentFormat};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Looks texts up in a fixed table of vectors.
    struct TableProvider(HashMap<&'static str, Vec<f32>>);

    #[async_trait]
    impl EmbeddingProvider for TableProvider {
        fn model_name(&self) -> &str {
            "table"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            texts
                .iter()
                .map(|t| {
                    self.0
                        .get(t.as_str())
                        .cloned()
                        .ok_or_else(|| EmbedError::Request(format!("no vector for '{}'", t)))
                })
                .collect()
        }
    }

    fn document(id: &str, file_name: &str) -> Document {
        Document {
            id: id.to_string(),
            file_name: file_name.to_string(),
            stored_path: file_name.to_string(),
            byte_size: 10,
            format: DocumentFormat::Txt,
            content_hash: String::new(),
            ingested_at: 0,
        }
    }

    // Two identical chunks close to the query, and a third that is a little
    // less close but points elsewhere.
    async fn duplicate_heavy_store(dir: &TempDir) -> Arc<VectorStore> {
        let table: HashMap<&'static str, Vec<f32>> = [
            ("query", vec![1.0, 0.0, 0.0]),
            ("paris one", vec![0.96, 0.28, 0.0]),
            ("paris two", vec![0.96, 0.28, 0.0]),
            ("lyon", vec![0.8, -0.6, 0.0]),
        ]
        .into_iter()
        .collect();
        let store = VectorStore::open(
            &dir.path().join("index.sqlite"),
            Arc::new(TableProvider(table)),
            &EmbeddingConfig::default(),
        )
        .await
        .unwrap();
        for (id, name, text) in [
            ("d1", "a.txt", "paris one"),
            ("d2", "b.txt", "paris two"),
            ("d3", "c.txt", "lyon"),
        ] {
            let chunks = crate::chunk::chunk_text(id, text, 100, 0).unwrap();
            store.add(&document(id, name), &chunks).await.unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn mmr_skips_near_duplicates() {
        let a = [0.96, 0.28, 0.0];
        let b = [0.8, -0.6, 0.0];
        let scores = [0.96, 0.96, 0.8];
        let vectors: Vec<&[f32]> = vec![&a, &a, &b];

        assert_eq!(mmr_order(&scores, &vectors, 2, 0.5), [0, 2]);
        // Pure relevance keeps the input order.
        assert_eq!(mmr_order(&scores, &vectors, 2, 1.0), [0, 1]);
        assert_eq!(mmr_order(&scores, &vectors, 10, 0.5).len(), 3);
        assert!(mmr_order(&[], &[], 4, 0.5).is_empty());
    }

    #[tokio::test]
    async fn mmr_search_type_diversifies_hits() {
        let tmp = TempDir::new().unwrap();
        let store = duplicate_heavy_store(&tmp).await;

        let similarity = Retriever::new(Arc::clone(&store), RetrievalConfig::default(), 5);
        let names: Vec<String> = similarity
            .retrieve("query", 2)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.file_name)
            .collect();
        assert_eq!(names, ["a.txt", "b.txt"]);

        let config = RetrievalConfig {
            search_type: SearchType::Mmr,
            mmr_lambda: 0.5,
            ..RetrievalConfig::default()
        };
        let mmr = Retriever::new(store, config, 5);
        let hits = mmr.retrieve("query", 2).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.file_name.as_str()).collect();
        assert_eq!(names, ["a.txt", "c.txt"]);
        // Scores stay the query similarity.
        assert!((hits[1].score - 0.8).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_store_skips_embedding() {
        let tmp = TempDir::new().unwrap();
        // A disabled provider would fail if it were called.
        let store = VectorStore::open(
            &tmp.path().join("index.sqlite"),
            Arc::new(DisabledProvider),
            &EmbeddingConfig::default(),
        )
        .await
        .unwrap();
        let retriever = Retriever::new(Arc::new(store), RetrievalConfig::default(), 5);
        assert!(retriever.retrieve("anything", 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn min_score_filters_weak_hits() {
        let tmp = TempDir::new().unwrap();
        let store = VectorStore::open(
            &tmp.path().join("index.sqlite"),
            Arc::new(HashingProvider::default()),
            &EmbeddingConfig::default(),
        )
        .await
        .unwrap();
        let doc = Document {
            id: "d1".to_string(),
            file_name: "facts.txt".to_string(),
            stored_path: "facts.txt".to_string(),
            byte_size: 10,
            format: DocumentFormat::Txt,
            content_hash: String::new(),
            ingested_at: 0,
        };
        let chunks = crate::chunk::chunk_text(
            "d1",
            "The capital of France is Paris.\n\nBananas grow in tropical climates.",
            40,
            0,
        )
        .unwrap();
        store.add(&doc, &chunks).await.unwrap();

        let config = RetrievalConfig {
            min_score: Some(0.3),
            ..RetrievalConfig::default()
        };
        let retriever = Retriever::new(Arc::new(store), config, 5);
        let hits = retriever.retrieve("capital of France", 4).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.text.contains("Paris"));
    }
}
