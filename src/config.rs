use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Largest megabyte limit whose byte count still fits in a `u64`.
pub const MAX_LIMIT_MB: u64 = u64::MAX / BYTES_PER_MB;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub qa: QaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_vectorstore_dir")]
    pub vectorstore_dir: PathBuf,
    /// Ceiling for a single uploaded file.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// Ceiling for everything in the upload directory. Falls back to
    /// `max_file_size_mb` when unset.
    #[serde(default)]
    pub max_total_size_mb: Option<u64>,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            vectorstore_dir: default_vectorstore_dir(),
            max_file_size_mb: default_max_file_size_mb(),
            max_total_size_mb: None,
            max_files: default_max_files(),
        }
    }
}

impl StorageConfig {
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn max_total_size_mb(&self) -> u64 {
        self.max_total_size_mb.unwrap_or(self.max_file_size_mb)
    }

    pub fn max_total_bytes(&self) -> u64 {
        self.max_total_size_mb().saturating_mul(BYTES_PER_MB)
    }

    pub fn index_path(&self) -> PathBuf {
        self.vectorstore_dir.join("index.sqlite")
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploaded_docs")
}
fn default_vectorstore_dir() -> PathBuf {
    PathBuf::from("./data/vectorstore")
}
fn default_max_file_size_mb() -> u64 {
    20
}
fn default_max_files() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// `local` when the fastembed feature is compiled in, otherwise `hashing`.
fn default_embedding_provider() -> String {
    if cfg!(feature = "local-embeddings-fastembed") {
        "local".to_string()
    } else {
        "hashing".to_string()
    }
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// How the top-K chunks are picked from the scored candidates.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    /// Highest cosine similarity first.
    #[default]
    Similarity,
    /// Maximal marginal relevance: trade similarity against redundancy
    /// with the chunks already picked.
    Mmr,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Drop hits below this cosine similarity.
    #[serde(default)]
    pub min_score: Option<f32>,
    #[serde(default)]
    pub search_type: SearchType,
    /// MMR only: 1.0 is pure similarity, 0.0 is pure diversity.
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    /// MMR only: candidates scored before re-ranking down to K. Defaults
    /// to twice K.
    #[serde(default)]
    pub fetch_k: Option<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: None,
            search_type: SearchType::default(),
            mmr_lambda: default_mmr_lambda(),
            fetch_k: None,
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_mmr_lambda() -> f32 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL for the Ollama provider, or an OpenAI-compatible endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_retries(),
            prompt_template: default_prompt_template(),
        }
    }
}

fn default_generation_provider() -> String {
    "extractive".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    512
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    3
}
fn default_prompt_template() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Files extracted, chunked and embedded concurrently.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

fn default_max_parallel() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct QaConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

fn default_history_limit() -> usize {
    50
}

/// Load configuration: TOML file (if present), then environment overrides,
/// then validation. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        Config::default()
    };

    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

impl Config {
    /// Apply the recognized environment options through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("VECTORSTORE_DIR") {
            self.storage.vectorstore_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("MAX_FILE_SIZE_MB") {
            self.storage.max_file_size_mb = parse_env("MAX_FILE_SIZE_MB", &v)?;
        }
        if let Some(v) = lookup("MAX_TOTAL_SIZE_MB") {
            self.storage.max_total_size_mb = Some(parse_env("MAX_TOTAL_SIZE_MB", &v)?);
        }
        if let Some(v) = lookup("MAX_FILES") {
            self.storage.max_files = parse_env("MAX_FILES", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.max_file_size_mb == 0 {
            bail!("storage.max_file_size_mb must be > 0");
        }
        if self.storage.max_file_size_mb > MAX_LIMIT_MB {
            bail!("storage.max_file_size_mb must be <= {}", MAX_LIMIT_MB);
        }
        if self.storage.max_total_size_mb() == 0 {
            bail!("storage.max_total_size_mb must be > 0");
        }
        if self.storage.max_total_size_mb() > MAX_LIMIT_MB {
            bail!("storage.max_total_size_mb must be <= {}", MAX_LIMIT_MB);
        }
        if self.storage.max_files == 0 {
            bail!("storage.max_files must be > 0");
        }

        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
        }

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }
        if let Some(min) = self.retrieval.min_score {
            if !(-1.0..=1.0).contains(&min) {
                bail!("retrieval.min_score must be in [-1.0, 1.0]");
            }
        }
        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
        }
        if self.retrieval.search_type == SearchType::Mmr
            && self.retrieval.fetch_k.is_some_and(|f| f < self.retrieval.top_k)
        {
            bail!("retrieval.fetch_k must be >= retrieval.top_k when search_type is 'mmr'");
        }

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "disabled" | "hashing" | "local" => {}
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hashing, openai, ollama, or local.",
                other
            ),
        }

        match self.generation.provider.as_str() {
            "extractive" => {}
            "openai" | "ollama" => {
                if self.generation.model.is_none() {
                    bail!(
                        "generation.model must be specified when provider is '{}'",
                        self.generation.provider
                    );
                }
            }
            other => bail!(
                "Unknown generation provider: '{}'. Must be extractive, openai, or ollama.",
                other
            ),
        }

        match self.generation.prompt_template.as_str() {
            "default" | "concise" => {}
            other => bail!(
                "Unknown prompt template: '{}'. Must be default or concise.",
                other
            ),
        }

        if self.ingestion.max_parallel == 0 {
            bail!("ingestion.max_parallel must be > 0");
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer, got '{}'", key, value))
}
