//! SSE stream parsing for OpenAI-compatible streaming responses.

use futures::{Stream, StreamExt};
use std::pin::Pin;

use sift_core::{Error, Result};

use super::types::ChatCompletionChunk;

/// Stream of generation tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Parse an SSE byte stream from the endpoint into a token stream.
pub fn parse_sse_stream(
    stream: impl Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> TokenStream {
    let token_stream = stream
        .map(|chunk_result| {
            chunk_result.map_err(|e| Error::Inference(format!("Stream error: {}", e)))
        })
        .filter_map(|result| async move {
            match result {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    parse_sse_chunk(&text)
                }
                Err(e) => Some(Err(e)),
            }
        });

    Box::pin(token_stream)
}

/// Parse a single SSE chunk and extract content.
fn parse_sse_chunk(chunk: &str) -> Option<Result<String>> {
    let mut content = String::new();

    for line in chunk.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        // End of stream marker; keep whatever content preceded it in this
        // chunk.
        if line == "data: [DONE]" {
            break;
        }

        // Parse data lines
        if let Some(data) = line.strip_prefix("data: ") {
            match serde_json::from_str::<ChatCompletionChunk>(data) {
                Ok(chunk) => {
                    for choice in chunk.choices {
                        if let Some(c) = choice.delta.content {
                            content.push_str(&c);
                        }
                    }
                }
                Err(e) => {
                    return Some(Err(Error::Inference(format!(
                        "Failed to parse SSE chunk: {}",
                        e
                    ))));
                }
            }
        }
    }

    if content.is_empty() {
        None
    } else {
        Some(Ok(content))
    }
}

/// Streaming generation trait extension.
#[async_trait::async_trait]
pub trait StreamingGeneration: Send + Sync {
    /// Generate text with streaming response.
    async fn generate_stream(&self, prompt: &str) -> Result<TokenStream>;

    /// Generate text with system context and streaming response.
    async fn generate_with_system_stream(&self, system: &str, prompt: &str) -> Result<TokenStream>;
}
