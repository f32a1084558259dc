//! Content hashing for cache addressing.
//!
//! A file's identity for analysis-reuse purposes is the SHA-256 of its bytes,
//! independent of path or name. Empty and unreadable files hash to the
//! canonical empty-input digest as a sentinel rather than erroring, so a
//! transient read failure degrades to a cache miss instead of failing the
//! item outright.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::warn;

/// SHA-256 of the empty byte string; sentinel for empty or unreadable files.
pub const EMPTY_CONTENT_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Read chunk size for streaming file hashing (64 KiB).
const HASH_READ_CHUNK: usize = 64 * 1024;

/// Hash a byte slice to its hex-encoded SHA-256 digest.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash a file's contents by streaming reads.
///
/// Returns [`EMPTY_CONTENT_HASH`] for empty files and for files that cannot
/// be opened or read.
pub async fn hash_file(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();

    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot open file for hashing, using sentinel");
            return EMPTY_CONTENT_HASH.to_string();
        }
    };

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_READ_CHUNK];
    let mut total: u64 = 0;

    loop {
        match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buf[..n]);
                total += n as u64;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Read failed mid-hash, using sentinel");
                return EMPTY_CONTENT_HASH.to_string();
            }
        }
    }

    if total == 0 {
        return EMPTY_CONTENT_HASH.to_string();
    }

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_hash_bytes_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_bytes_empty_matches_sentinel() {
        assert_eq!(hash_bytes(b""), EMPTY_CONTENT_HASH);
    }

    #[tokio::test]
    async fn test_hash_file_matches_hash_bytes() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello content hash").unwrap();
        f.flush().unwrap();

        let from_file = hash_file(f.path()).await;
        assert_eq!(from_file, hash_bytes(b"hello content hash"));
    }

    #[tokio::test]
    async fn test_hash_file_empty_uses_sentinel() {
        let f = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(hash_file(f.path()).await, EMPTY_CONTENT_HASH);
    }

    #[tokio::test]
    async fn test_hash_file_missing_uses_sentinel() {
        assert_eq!(
            hash_file("/nonexistent/definitely/missing.bin").await,
            EMPTY_CONTENT_HASH
        );
    }

    #[tokio::test]
    async fn test_identical_content_different_paths_same_hash() {
        let mut a = tempfile::NamedTempFile::new().unwrap();
        let mut b = tempfile::NamedTempFile::new().unwrap();
        a.write_all(b"same bytes").unwrap();
        b.write_all(b"same bytes").unwrap();
        a.flush().unwrap();
        b.flush().unwrap();

        assert_eq!(hash_file(a.path()).await, hash_file(b.path()).await);
    }
}
