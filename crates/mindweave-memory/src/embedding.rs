//! Embedding drivers for the semantic index.
//!
//! Provides an `EmbeddingDriver` trait, a deterministic local hashing driver
//! and an OpenAI-compatible driver that works with any provider offering a
//! `/v1/embeddings` endpoint (OpenAI, Groq, Together, Fireworks, Ollama, etc.).

use async_trait::async_trait;
use mindweave_types::config::EmbeddingSettings;
use mindweave_types::error::MindweaveError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";
const FIREWORKS_BASE_URL: &str = "https://api.fireworks.ai/inference/v1";
const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const VLLM_BASE_URL: &str = "http://localhost:8000/v1";
const LMSTUDIO_BASE_URL: &str = "http://localhost:1234/v1";

/// Error type for embedding operations.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing API key: {0}")]
    MissingApiKey(String),
}

impl From<EmbeddingError> for MindweaveError {
    fn from(e: EmbeddingError) -> Self {
        MindweaveError::Embedding(e.to_string())
    }
}

/// Trait for computing text embeddings.
#[async_trait]
pub trait EmbeddingDriver: Send + Sync {
    /// Compute embedding vectors for a batch of texts.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Compute embedding for a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let results = self.embed(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Parse("Empty embedding response".to_string()))
    }

    /// Return the dimensionality of embeddings produced by this driver.
    fn dimensions(&self) -> usize;
}

/// Local driver using feature hashing over lowercase word tokens.
///
/// Deterministic across runs and platforms. Vectors are L2-normalised; text
/// without any word maps to the zero vector.
#[derive(Debug, Clone)]
pub struct HashEmbeddingDriver {
    dims: usize,
}

impl HashEmbeddingDriver {
    /// Create a driver producing vectors of `dims` components (at least 1).
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    /// Embed one text synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = fnv1a(word.to_lowercase().as_bytes());
            let slot = (hash % self.dims as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbeddingDriver {
    fn default() -> Self {
        Self::new(EmbeddingSettings::default().dimensions)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingDriver for HashEmbeddingDriver {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Configuration for creating an OpenAI-compatible driver.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Provider name (openai, groq, together, ollama, etc.).
    pub provider: String,
    /// Model name (e.g., "text-embedding-3-small", "all-MiniLM-L6-v2").
    pub model: String,
    /// API key (resolved from env var).
    pub api_key: String,
    /// Base URL for the API.
    pub base_url: String,
}

/// OpenAI-compatible embedding driver.
pub struct OpenAIEmbeddingDriver {
    provider: String,
    api_key: Zeroizing<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
    dims: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

impl OpenAIEmbeddingDriver {
    /// Create a new OpenAI-compatible embedding driver.
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        if config.model.trim().is_empty() {
            return Err(EmbeddingError::Parse(format!(
                "provider '{}' has no embedding model configured",
                config.provider
            )));
        }
        let dims = infer_dimensions(&config.model);
        Ok(Self {
            provider: config.provider,
            api_key: Zeroizing::new(config.api_key),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model,
            client: reqwest::Client::new(),
            dims,
        })
    }

    /// Endpoint requests are sent to.
    pub fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }
}

/// Infer embedding dimensions from model name.
pub fn infer_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-small" => 1536,
        "text-embedding-3-large" => 3072,
        "text-embedding-ada-002" => 1536,
        "all-MiniLM-L6-v2" => 384,
        "all-MiniLM-L12-v2" => 384,
        "all-mpnet-base-v2" => 768,
        "nomic-embed-text" => 768,
        "mxbai-embed-large" => 1024,
        _ => 1536,
    }
}

#[async_trait]
impl EmbeddingDriver for OpenAIEmbeddingDriver {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let url = self.endpoint();
        let body = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let mut req = self.client.post(&url).json(&body);
        if !self.api_key.as_str().is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key.as_str()));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| EmbeddingError::Http(format!("{}: {e}", self.provider)))?;
        let status = resp.status().as_u16();

        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api {
                status,
                message: body_text,
            });
        }

        let data: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;
        let embeddings: Vec<Vec<f32>> = data.data.into_iter().map(|d| d.embedding).collect();
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::Parse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        debug!(
            provider = %self.provider,
            count = embeddings.len(),
            dims = embeddings.first().map(|e| e.len()).unwrap_or(0),
            "Embedded texts"
        );
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Create an embedding driver from settings.
///
/// `"local"` selects the hashing driver; anything else is treated as an
/// OpenAI-compatible provider.
pub fn create_embedding_driver(
    settings: &EmbeddingSettings,
) -> Result<Arc<dyn EmbeddingDriver>, EmbeddingError> {
    if settings.provider.is_empty() || settings.provider == "local" {
        return Ok(Arc::new(HashEmbeddingDriver::new(settings.dimensions)));
    }

    let provider = settings.provider.as_str();
    let api_key = if settings.api_key_env.is_empty() {
        String::new()
    } else {
        std::env::var(&settings.api_key_env).unwrap_or_default()
    };

    let base_url = match provider {
        "openai" => OPENAI_BASE_URL.to_string(),
        "groq" => GROQ_BASE_URL.to_string(),
        "together" => TOGETHER_BASE_URL.to_string(),
        "fireworks" => FIREWORKS_BASE_URL.to_string(),
        "mistral" => MISTRAL_BASE_URL.to_string(),
        "ollama" => OLLAMA_BASE_URL.to_string(),
        "vllm" => VLLM_BASE_URL.to_string(),
        "lmstudio" => LMSTUDIO_BASE_URL.to_string(),
        other => {
            warn!("Unknown embedding provider '{other}', using OpenAI-compatible format");
            format!("https://{other}/v1")
        }
    };

    let is_local = base_url.contains("localhost")
        || base_url.contains("127.0.0.1")
        || base_url.contains("[::1]");
    if !is_local {
        if api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey(format!(
                "provider '{provider}' needs an API key (set api_key_env)"
            )));
        }
        warn!(
            provider = %provider,
            base_url = %base_url,
            "Embedding driver configured to send data to external API, text content will leave this machine"
        );
    }

    let driver = OpenAIEmbeddingDriver::new(EmbeddingConfig {
        provider: provider.to_string(),
        model: settings.model.clone(),
        api_key,
        base_url,
    })?;
    Ok(Arc::new(driver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;

    #[test]
    fn test_hash_driver_deterministic_and_normalised() {
        let driver = HashEmbeddingDriver::new(64);
        let a = driver.embed_text("The quick brown fox");
        let b = driver.embed_text("the QUICK brown fox!");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_driver_similarity_tracks_overlap() {
        let driver = HashEmbeddingDriver::new(256);
        let base = driver.embed_text("rust ownership and borrowing rules");
        let close = driver.embed_text("ownership and borrowing rules in rust");
        let far = driver.embed_text("banana bread recipe");
        assert!(cosine_similarity(&base, &close) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_hash_driver_empty_text_is_zero() {
        let driver = HashEmbeddingDriver::new(8);
        assert!(driver.embed_text("  ...  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_hash_driver_async() {
        let driver = HashEmbeddingDriver::new(16);
        let out = tokio_test::block_on(driver.embed(&["a b", "c"])).unwrap();
        assert_eq!(out.len(), 2);
        let one = tokio_test::block_on(driver.embed_one("a b")).unwrap();
        assert_eq!(one, out[0]);
    }

    #[test]
    fn test_infer_dimensions() {
        assert_eq!(infer_dimensions("text-embedding-3-small"), 1536);
        assert_eq!(infer_dimensions("all-MiniLM-L6-v2"), 384);
        assert_eq!(infer_dimensions("nomic-embed-text"), 768);
        assert_eq!(infer_dimensions("unknown-model"), 1536);
    }

    #[test]
    fn test_create_local_driver() {
        let settings = EmbeddingSettings {
            dimensions: 32,
            ..Default::default()
        };
        let driver = create_embedding_driver(&settings).unwrap();
        assert_eq!(driver.dimensions(), 32);
    }

    #[test]
    fn test_create_embedding_driver_ollama() {
        let settings = EmbeddingSettings {
            provider: "ollama".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            ..Default::default()
        };
        let driver = create_embedding_driver(&settings).unwrap();
        assert_eq!(driver.dimensions(), 384);
    }

    #[test]
    fn test_remote_provider_requires_key() {
        let settings = EmbeddingSettings {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "MINDWEAVE_TEST_KEY_THAT_IS_NOT_SET".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_embedding_driver(&settings),
            Err(EmbeddingError::MissingApiKey(_))
        ));
    }

    #[test]
    fn test_remote_driver_construction() {
        let driver = OpenAIEmbeddingDriver::new(EmbeddingConfig {
            provider: "openai".to_string(),
            model: "text-embedding-3-large".to_string(),
            api_key: "sk-test".to_string(),
            base_url: "https://api.openai.com/v1/".to_string(),
        })
        .unwrap();
        assert_eq!(driver.dimensions(), 3072);
        assert_eq!(driver.endpoint(), "https://api.openai.com/v1/embeddings");
        // An empty batch never touches the network.
        assert!(tokio_test::block_on(driver.embed(&[])).unwrap().is_empty());

        let blank = OpenAIEmbeddingDriver::new(EmbeddingConfig {
            provider: "openai".to_string(),
            model: " ".to_string(),
            api_key: "sk-test".to_string(),
            base_url: OPENAI_BASE_URL.to_string(),
        });
        assert!(matches!(blank, Err(EmbeddingError::Parse(_))));
    }

    #[test]
    fn test_remote_provider_with_key() {
        std::env::set_var("MINDWEAVE_TEST_EMBEDDING_KEY", "sk-test");
        let settings = EmbeddingSettings {
            provider: "groq".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key_env: "MINDWEAVE_TEST_EMBEDDING_KEY".to_string(),
            ..Default::default()
        };
        let driver = create_embedding_driver(&settings).unwrap();
        assert_eq!(driver.dimensions(), 768);
    }

    #[test]
    fn test_unknown_remote_provider_requires_key() {
        let settings = EmbeddingSettings {
            provider: "embeddings.example.com".to_string(),
            model: "custom-model".to_string(),
            api_key_env: String::new(),
            ..Default::default()
        };
        let err = create_embedding_driver(&settings).err().unwrap();
        assert!(matches!(err, EmbeddingError::MissingApiKey(ref m) if m.contains("embeddings.example.com")));
    }

    #[test]
    fn test_error_converts() {
        let err: MindweaveError = EmbeddingError::Http("boom".into()).into();
        assert!(matches!(err, MindweaveError::Embedding(_)));
    }
}
