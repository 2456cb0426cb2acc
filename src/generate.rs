//! Answer generators.
//!
//! An [`AnswerGenerator`] turns a grounded prompt (plus the raw context
//! passages) into answer text. Three backends:
//!
//! | Config Value | Generator |
//! |-------------|-----------|
//! | `"extractive"` | [`ExtractiveGenerator`]: offline, quotes the best-matching sentences |
//! | `"openai"` | [`OpenAIGenerator`]: OpenAI-compatible `/chat/completions` |
//! | `"ollama"` | [`OllamaGenerator`]: Ollama `/api/chat` |

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::json;

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::http;

const SYSTEM_PROMPT: &str =
    "You answer questions using only the supplied document excerpts and cite the files you used.";

/// Input to a generator.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub question: String,
    /// Retrieved passages, best match first.
    pub contexts: Vec<String>,
    /// Fully rendered prompt for model-backed generators.
    pub prompt: String,
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

// ============ Extractive ============

/// Answers with the context sentence(s) sharing the most terms with the
/// question. Deterministic and offline.
pub struct ExtractiveGenerator;

const MAX_SENTENCES: usize = 2;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from", "how",
    "in", "is", "it", "of", "on", "or", "the", "that", "this", "to", "was", "were", "what",
    "when", "where", "which", "who", "why", "with", "o", "os", "da", "de", "e", "em", "é",
    "qual", "que", "quem", "um", "uma",
];

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let question_terms = terms(&request.question);
        let sentences: Vec<&str> = request
            .contexts
            .iter()
            .flat_map(|c| split_sentences(c))
            .collect();

        let scored: Vec<(usize, &str)> = sentences
            .iter()
            .map(|s| (question_terms.intersection(&terms(s)).count(), *s))
            .collect();
        let best = scored.iter().map(|(score, _)| *score).max().unwrap_or(0);

        if best == 0 {
            return Ok(match sentences.first() {
                Some(first) => format!(
                    "The documents do not answer this directly. The closest passage says: {}",
                    first
                ),
                None => "The documents do not contain enough information to answer.".to_string(),
            });
        }

        let picked: Vec<&str> = scored
            .iter()
            .filter(|(score, _)| *score == best)
            .map(|(_, s)| *s)
            .take(MAX_SENTENCES)
            .collect();
        Ok(picked.join(" "))
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Split on `.`, `!`, `?` followed by whitespace, and on line breaks.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let next_is_space = chars.peek().map(|(_, n)| n.is_whitespace()).unwrap_or(true);
        if (matches!(c, '.' | '!' | '?') && next_is_space) || c == '\n' {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

// ============ OpenAI-compatible ============

/// Chat-completions generator for OpenAI or any compatible endpoint
/// (`generation.url`, default `https://api.openai.com/v1`). Reads
/// `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAIGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let url = format!("{}/chat/completions", self.base_url);
        let json = http::post_json_with_retry(
            &self.client,
            "OpenAI",
            &url,
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;
        parse_chat_completion(&json)
    }
}

fn parse_chat_completion(json: &serde_json::Value) -> Result<String, GenerationError> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| GenerationError::InvalidResponse("no choices in response".to_string()))?;
    choice["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| GenerationError::InvalidResponse("choice has no content".to_string()))
}

// ============ Ollama ============

/// Chat generator backed by a local Ollama instance.
pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": request.prompt},
            ],
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        let url = format!("{}/api/chat", self.url);
        let json =
            http::post_json_with_retry(&self.client, "Ollama", &url, None, &body, self.max_retries)
                .await?;
        json["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| GenerationError::InvalidResponse("missing message.content".to_string()))
    }
}
