//! Object storage for uploaded inputs and worker outputs.
//!
//! The reconciler only ever asks one question of this layer: does the
//! output object exist yet. `put` serves the upload endpoint and
//! `public_url` builds the links handed back to clients.

mod fs;
mod http;

pub use fs::FsObjectStore;
pub use http::HttpObjectStore;

use async_trait::async_trait;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    /// The key is empty, absolute or escapes its prefix.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote store answered with an unexpected status.
    #[error("object store returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
}

/// A key/value blob store addressed by slash-separated keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`, replacing any previous object.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str)
        -> Result<(), ObjectStoreError>;

    /// Whether an object exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;

    /// Public URL of the object under `key`.
    fn public_url(&self, key: &str) -> String;
}

/// Reject keys that are empty, absolute, or contain `.`/`..` segments.
pub fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_keys() {
        assert!(validate_key("uploads/u1/abc/clip.mp4").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("uploads/../secrets").is_err());
        assert!(validate_key("uploads//clip.mp4").is_err());
        assert!(validate_key("uploads\\clip.mp4").is_err());
    }

    #[test]
    fn joins_urls() {
        assert_eq!(join_url("https://cdn.test/", "a/b.mp4"), "https://cdn.test/a/b.mp4");
        assert_eq!(join_url("https://cdn.test", "a/b.mp4"), "https://cdn.test/a/b.mp4");
    }
}
