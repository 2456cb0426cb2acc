//! Embedding providers and vector helpers.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are switched off.
//! - **[`HashingProvider`]**: deterministic offline feature hashing; the default
//!   unless fastembed is compiled in.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: runs models locally via fastembed (feature
//!   `local-embeddings-fastembed`); the default when that feature is enabled.
//!
//! Also provides vector utilities used by the store:
//! - [`cosine_similarity`] compares two vectors
//! - [`normalize`] scales a vector to unit length
//! - [`vec_to_blob`] / [`blob_to_vec`] encode vectors as little-endian f32 BLOBs
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the provider named in configuration:
//!
//! ```rust
//! # fn main() -> anyhow::Result<()> {
//! use docqa::config::EmbeddingConfig;
//! use docqa::embedding::create_provider;
//!
//! let config = EmbeddingConfig {
//!     provider: "hashing".to_string(),
//!     ..EmbeddingConfig::default()
//! };
//! let provider = create_provider(&config)?;
//! assert_eq!(provider.model_name(), "hashing-fnv1a");
//! # Ok(())
//! # }
//! ```
//!
//! The OpenAI and Ollama providers retry transient failures with exponential
//! backoff (see [`crate::http`]).

pub mod hashing;

pub use hashing::HashingProvider;

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{with_timeout, EmbedError, Result};
use crate::http;

/// Turns texts into vectors. `embed` returns one vector per input text,
/// in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Embed `texts` in batches of `batch_size`, each batch bounded by
/// `timeout_secs`. Vectors come back unit-normalised.
pub async fn embed_batched(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    timeout_secs: u64,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = with_timeout("embedding", timeout_secs, provider.embed(batch)).await?;
        if vectors.len() != batch.len() {
            return Err(EmbedError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            ))
            .into());
        }
        debug!(batch = batch.len(), model = provider.model_name(), "embedded batch");
        out.extend(vectors.into_iter().map(|mut v| {
            normalize(&mut v);
            v
        }));
    }
    Ok(out)
}

/// Embed a single query text.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout_secs: u64,
) -> Result<Vec<f32>> {
    let results = embed_batched(provider, &[text.to_string()], 1, timeout_secs).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| EmbedError::InvalidResponse("empty embedding response".to_string()).into())
}

// ============ Disabled Provider ============

/// Fails every request. Selected by `provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

fn json_to_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json_with_retry(
            &self.client,
            "OpenAI",
            "https://api.openai.com/v1/embeddings",
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::InvalidResponse("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::InvalidResponse("missing embedding".to_string()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, json_to_vec(embedding)));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json =
            http::post_json_with_retry(&self.client, "Ollama", &url, None, &body, self.max_retries)
                .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbedError::InvalidResponse("missing embeddings array".to_string()))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding.as_array().map(|a| json_to_vec(a)).ok_or_else(|| {
                EmbedError::InvalidResponse("embedding is not an array".to_string())
            })
        })
        .collect()
}

// ============ Local Provider (fastembed) ============

/// Supported fastembed models: config name, model, output dimension.
#[cfg(feature = "local-embeddings-fastembed")]
const LOCAL_MODELS: &[(&str, fastembed::EmbeddingModel, usize)] = &[
    ("all-minilm-l6-v2", fastembed::EmbeddingModel::AllMiniLML6V2, 384),
    ("bge-small-en-v1.5", fastembed::EmbeddingModel::BGESmallENV15, 384),
    ("bge-base-en-v1.5", fastembed::EmbeddingModel::BGEBaseENV15, 768),
    ("multilingual-e5-small", fastembed::EmbeddingModel::MultilingualE5Small, 384),
    ("multilingual-e5-base", fastembed::EmbeddingModel::MultilingualE5Base, 768),
];

/// Local inference through fastembed. The model is fetched once from
/// Hugging Face and cached; embedding itself is offline. Inference is
/// CPU-bound, so it runs on the blocking pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let name = config.model.as_deref().unwrap_or("multilingual-e5-small");
        let Some((_, model, native_dims)) = LOCAL_MODELS.iter().find(|(n, _, _)| *n == name)
        else {
            let known: Vec<&str> = LOCAL_MODELS.iter().map(|(n, _, _)| *n).collect();
            bail!(
                "Unknown local embedding model '{}'; expected one of: {}",
                name,
                known.join(", ")
            );
        };
        let engine = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(model.clone()).with_show_download_progress(false),
        )
        .map_err(|e| anyhow::anyhow!("Could not load local model '{}': {}", name, e))?;

        Ok(Self {
            name: name.to_string(),
            dims: config.dims.unwrap_or(*native_dims),
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(engine)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let model = Arc::clone(&self.model);
        let owned: Vec<String> = texts.to_vec();
        let batch_size = self.batch_size;
        let joined = tokio::task::spawn_blocking(move || {
            let mut engine = model
                .lock()
                .map_err(|_| EmbedError::Request("local model lock poisoned".to_string()))?;
            engine
                .embed(owned, Some(batch_size))
                .map_err(|e| EmbedError::Request(format!("local inference failed: {}", e)))
        })
        .await;
        joined.map_err(|e| EmbedError::Request(e.to_string()))?
    }
}

/// Build the provider named by `embedding.provider`.
///
/// | `provider` | Implementation |
/// |------------|----------------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"hashing"` | [`HashingProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "hashing" => Ok(Arc::new(HashingProvider::new(
            config.dims.unwrap_or(hashing::DEFAULT_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Scale `v` to unit length in place. Zero vectors are left alone.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Little-endian f32 bytes, the on-disk form of a vector.
///
/// ```rust
/// use docqa::embedding::{blob_to_vec, vec_to_blob};
///
/// let blob = vec_to_blob(&[0.5, -1.0]);
/// assert_eq!(blob.len(), 8);
/// assert_eq!(blob_to_vec(&blob), [0.5, -1.0]);
/// ```
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine of the angle between `a` and `b`, in `[-1, 1]`. Mismatched
/// lengths and zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let denom = (aa * bb).sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
