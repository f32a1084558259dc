//! OpenAI-compatible inference endpoint client.
//!
//! Works with any endpoint speaking the OpenAI wire protocol, including
//! local servers (Ollama in compatibility mode, vLLM, LM Studio, LocalAI)
//! and the cloud API. The dispatch subsystem only assumes the four surfaces
//! it uses: `/health`, `/v1/chat/completions` (blocking and SSE streaming),
//! `/v1/embeddings`, and `/v1/models`.
//!
//! # Example
//!
//! ```rust,no_run
//! use sift_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use sift_core::EmbeddingBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = OpenAIConfig {
//!         base_url: "http://127.0.0.1:11434".to_string(), // Ollama
//!         api_key: None, // Not needed for local
//!         ..OpenAIConfig::default()
//!     };
//!     let backend = OpenAIBackend::new(config).unwrap();
//!
//!     let texts = vec!["Hello, world!".to_string()];
//!     let vectors = backend.embed_texts(&texts).await.unwrap();
//!     assert_eq!(vectors.len(), 1);
//! }
//! ```

mod backend;
mod streaming;
mod types;

pub use backend::{
    OpenAIBackend, OpenAIConfig, DEFAULT_BASE_URL, DEFAULT_DIMENSION, DEFAULT_EMBED_MODEL,
    DEFAULT_GEN_MODEL, DEFAULT_TIMEOUT_SECS,
};
pub use streaming::{parse_sse_stream, StreamingGeneration, TokenStream};
pub use types::*;
