//! Embeddings over an OpenAI-compatible HTTP API (feature `openai`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const PROVIDER: &str = "OpenAI";
const API_KEY_VAR: &str = "OPENAI_API_KEY";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-ada-002";

/// Output size of the `text-embedding-ada-002` and `text-embedding-3-small` models.
const DEFAULT_DIMENSIONS: usize = 1536;

/// Calls `POST {base_url}/embeddings` with one request per batch.
///
/// Nothing is retried. Transport errors, non-2xx statuses, and malformed
/// bodies all become [`RagError::Embedding`].
///
/// ```rust,ignore
/// let embedder = OpenAIEmbeddingProvider::from_env()?.with_model("text-embedding-3-small");
/// let store = IndexStore::from_config(config, Arc::new(embedder))?;
/// ```
pub struct OpenAIEmbeddingProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    /// Sent as `dimensions` in the request body when set.
    truncate_to: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(failure("API key is empty"));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            truncate_to: None,
        })
    }

    /// Read the key from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        match std::env::var(API_KEY_VAR) {
            Ok(key) => Self::new(key),
            Err(_) => Err(failure(format!("{API_KEY_VAR} is not set"))),
        }
    }

    /// Read the key from the environment and take the model from `config`.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Ok(Self::from_env()?.with_model(config.embedding_model.clone()))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Ask the API to shorten vectors to `dims` (`text-embedding-3-*` only).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.truncate_to = Some(dims);
        self
    }

    /// Point at a compatible server, e.g. `http://localhost:8080/v1`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }
}

fn failure(message: impl Into<String>) -> RagError {
    RagError::Embedding { provider: PROVIDER.to_string(), message: message.into() }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// The `error.message` of an API error body, or the raw body if it has none.
fn error_detail(body: String) -> String {
    match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body,
    }
}

/// Items may arrive in any order; `index` refers to the input position.
fn into_ordered_vectors(mut items: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if items.len() != expected {
        return Err(failure(format!("{} embeddings returned for {expected} inputs", items.len())));
    }
    items.sort_by_key(|item| item.index);
    if items.iter().enumerate().any(|(i, item)| item.index != i) {
        return Err(failure("response indices do not match the inputs"));
    }
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors.pop().ok_or_else(|| failure("no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = PROVIDER, model = %self.model, inputs = texts.len(), "requesting embeddings");

        let body = EmbeddingsRequest { model: &self.model, input: texts, dimensions: self.truncate_to };
        let response =
            self.http.post(self.endpoint()).bearer_auth(&self.api_key).json(&body).send().await.map_err(
                |e| {
                    error!(provider = PROVIDER, error = %e, "embedding request failed");
                    failure(format!("request failed: {e}"))
                },
            )?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response.text().await.unwrap_or_default());
            error!(provider = PROVIDER, %status, %detail, "embedding API error");
            return Err(failure(format!("{status}: {detail}")));
        }

        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "unreadable embedding response");
            failure(format!("invalid response body: {e}"))
        })?;
        into_ordered_vectors(parsed.data, texts.len())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
