//! OpenAI-compatible inference backend implementation.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use sift_core::{EmbeddingBackend, Error, GenerationBackend, InferenceBackend, Result, Vector};

use super::streaming::{parse_sse_stream, StreamingGeneration, TokenStream};
use super::types::*;

/// Default endpoint for a locally hosted inference server.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

/// Default embedding model.
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

/// Default generation model.
pub const DEFAULT_GEN_MODEL: &str = "qwen3:8b";

/// Default embedding dimension for nomic-embed-text.
pub const DEFAULT_DIMENSION: usize = 768;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for the OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Server root (the `/v1` prefix is added per endpoint).
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    /// Model to use for embeddings.
    pub embed_model: String,
    /// Model to use for generation.
    pub gen_model: String,
    /// Expected embedding dimension.
    pub embed_dimension: usize,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Skip TLS verification (for self-signed certs in local environments).
    pub skip_tls_verify: bool,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            gen_model: DEFAULT_GEN_MODEL.to_string(),
            embed_dimension: DEFAULT_DIMENSION,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            skip_tls_verify: false,
        }
    }
}

/// OpenAI-compatible inference backend.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    /// Create a new backend with the given configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let mut client_builder =
            Client::builder().timeout(Duration::from_secs(config.timeout_seconds));

        if config.skip_tls_verify {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder
            .build()
            .map_err(|e| Error::Inference(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "Initializing inference backend: url={}, embed={}, gen={}",
            config.base_url, config.embed_model, config.gen_model
        );

        Ok(Self { client, config })
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(OpenAIConfig::default())
    }

    /// Create from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SIFT_INFERENCE_URL` | `http://127.0.0.1:8080` |
    /// | `SIFT_INFERENCE_API_KEY` | (none) |
    /// | `SIFT_EMBED_MODEL` | `nomic-embed-text` |
    /// | `SIFT_GEN_MODEL` | `qwen3:8b` |
    /// | `SIFT_EMBED_DIM` | `768` |
    /// | `SIFT_INFERENCE_TIMEOUT` | `120` |
    /// | `SIFT_SKIP_TLS_VERIFY` | `false` |
    pub fn from_env() -> Result<Self> {
        let config = OpenAIConfig {
            base_url: std::env::var("SIFT_INFERENCE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: std::env::var("SIFT_INFERENCE_API_KEY").ok(),
            embed_model: std::env::var("SIFT_EMBED_MODEL")
                .unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string()),
            gen_model: std::env::var("SIFT_GEN_MODEL")
                .unwrap_or_else(|_| DEFAULT_GEN_MODEL.to_string()),
            embed_dimension: std::env::var("SIFT_EMBED_DIM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DIMENSION),
            timeout_seconds: std::env::var("SIFT_INFERENCE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            skip_tls_verify: std::env::var("SIFT_SKIP_TLS_VERIFY")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        };

        Self::new(config)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    /// Build a POST request with authentication if configured.
    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req.header("Content-Type", "application/json")
    }

    /// Build a GET request with authentication.
    fn build_get_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.get(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req
    }

    /// List the model ids the endpoint advertises.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .build_get_request("/v1/models")
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Inference(format!(
                "Models endpoint returned {}",
                response.status()
            )));
        }

        let result: ModelsResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        Ok(result.data.into_iter().map(|m| m.id).collect())
    }

    fn build_messages(system: &str, prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });
        messages
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(
            "Embedding {} texts with model {}",
            texts.len(),
            self.config.embed_model
        );

        let request = EmbeddingRequest {
            model: self.config.embed_model.clone(),
            input: texts.to_vec(),
            encoding_format: Some("float".to_string()),
        };

        let response = self
            .build_request("/v1/embeddings")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: ApiErrorResponse = response.json().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "Endpoint returned {}: {}",
                status, body.error.message
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        // Sort by index to ensure correct ordering
        let mut data = result.data;
        data.sort_by_key(|d| d.index);

        let vectors: Vec<Vector> = data.into_iter().map(|d| d.embedding).collect();

        debug!("Generated {} embeddings", vectors.len());
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.embed_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.embed_model
    }
}

#[async_trait]
impl GenerationBackend for OpenAIBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        debug!(
            "Generating with model {}, prompt length: {}",
            self.config.gen_model,
            prompt.len()
        );

        let request = ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages: Self::build_messages(system, prompt),
            temperature: None,
            max_tokens: None,
            stream: false,
        };

        let response = self
            .build_request("/v1/chat/completions")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: ApiErrorResponse = response.json().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Endpoint returned {}: {}",
                status, body.error.message
            )));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let content = result
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        debug!("Generation complete, response length: {}", content.len());
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.config.gen_model
    }
}

#[async_trait]
impl InferenceBackend for OpenAIBackend {
    async fn health_check(&self) -> Result<bool> {
        let response = self
            .build_get_request("/health")
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) => {
                if resp.status().is_success() {
                    debug!("Inference health check passed");
                    Ok(true)
                } else {
                    warn!("Inference health check failed: {}", resp.status());
                    Ok(false)
                }
            }
            Err(e) => {
                warn!("Inference health check error: {}", e);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl StreamingGeneration for OpenAIBackend {
    async fn generate_stream(&self, prompt: &str) -> Result<TokenStream> {
        self.generate_with_system_stream("", prompt).await
    }

    async fn generate_with_system_stream(&self, system: &str, prompt: &str) -> Result<TokenStream> {
        debug!(
            "Streaming generation with model {}, prompt length: {}",
            self.config.gen_model,
            prompt.len()
        );

        let request = ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages: Self::build_messages(system, prompt),
            temperature: None,
            max_tokens: None,
            stream: true,
        };

        let response = self
            .build_request("/v1/chat/completions")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: ApiErrorResponse = response.json().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Endpoint returned {}: {}",
                status, body.error.message
            )));
        }

        Ok(parse_sse_stream(response.bytes_stream()))
    }
}
