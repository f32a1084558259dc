//! Content extraction for file analysis.
//!
//! The default extractor reads text content with a byte budget and refuses
//! recognizably binary formats. Richer extraction strategies (PDF, audio,
//! imagery) plug in behind [`ContentExtractor`].

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::debug;

use sift_core::{defaults, Error, Result};

/// Extracted content handed to the analysis pipeline.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub text: String,
    /// Whether the byte budget cut the read short.
    pub truncated: bool,
    pub bytes_read: usize,
}

/// Strategy for turning file bytes into analyzable text.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, path: &str) -> Result<ExtractedContent>;
}

/// Plain-text extractor with binary sniffing and a byte budget.
pub struct TextExtractor {
    max_bytes: usize,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self {
            max_bytes: defaults::EXTRACTION_MAX_BYTES,
        }
    }
}

impl TextExtractor {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes: max_bytes.max(1),
        }
    }
}

#[async_trait]
impl ContentExtractor for TextExtractor {
    async fn extract(&self, path: &str) -> Result<ExtractedContent> {
        let mut file = tokio::fs::File::open(path).await?;

        let mut buf = Vec::with_capacity(8192);
        let mut chunk = vec![0u8; 64 * 1024];
        let mut truncated = false;

        loop {
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            let remaining = self.max_bytes - buf.len();
            if n >= remaining {
                buf.extend_from_slice(&chunk[..remaining]);
                truncated = true;
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        // Magic-byte sniff: recognizably binary content is not analyzable as
        // text and should fail as unsupported rather than produce garbage.
        if let Some(kind) = infer::get(&buf) {
            if !kind.mime_type().starts_with("text/") {
                return Err(Error::Extraction(format!(
                    "unsupported format: {}",
                    kind.mime_type()
                )));
            }
        }

        let bytes_read = buf.len();
        let text = String::from_utf8_lossy(&buf).into_owned();

        debug!(
            subsystem = "dispatch",
            component = "extract",
            path,
            bytes_read,
            truncated,
            "Extracted text content"
        );

        Ok(ExtractedContent {
            text,
            truncated,
            bytes_read,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_extract_plain_text() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"meeting notes from tuesday").unwrap();
        f.flush().unwrap();

        let extractor = TextExtractor::default();
        let content = extractor
            .extract(f.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(content.text, "meeting notes from tuesday");
        assert!(!content.truncated);
        assert_eq!(content.bytes_read, 26);
    }

    #[tokio::test]
    async fn test_extract_respects_byte_budget() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![b'a'; 1000]).unwrap();
        f.flush().unwrap();

        let extractor = TextExtractor::new(100);
        let content = extractor
            .extract(f.path().to_str().unwrap())
            .await
            .unwrap();
        assert!(content.truncated);
        assert_eq!(content.bytes_read, 100);
    }

    #[tokio::test]
    async fn test_extract_rejects_binary() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        // PNG magic bytes
        f.write_all(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0])
            .unwrap();
        f.flush().unwrap();

        let extractor = TextExtractor::default();
        let err = extractor.extract(f.path().to_str().unwrap()).await;
        match err {
            Err(Error::Extraction(msg)) => assert!(msg.contains("unsupported format")),
            other => panic!("expected extraction error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_extract_missing_file_is_io_error() {
        let extractor = TextExtractor::default();
        let err = extractor.extract("/definitely/not/here.txt").await;
        assert!(matches!(err, Err(Error::Io(_))));
    }
}
