//! Content-addressed store for verifier tags
//!
//! Tags are written once when a chunk is encoded and read back each time that
//! chunk is handed to a farmer. Chunk and contract rows hold only the hash.

use crate::error::NodeError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

pub struct TagStore {
    root_dir: PathBuf,
}

impl TagStore {
    /// Create a tag store rooted at the given directory
    pub async fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self, NodeError> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir).await?;

        info!(path = %root_dir.display(), "Initialized tag store");

        Ok(Self { root_dir })
    }

    /// Compute the `sha256-<hex>` name of a tag
    pub fn compute_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("sha256-{}", hex::encode(hasher.finalize()))
    }

    fn tag_path(&self, hash: &str) -> Result<PathBuf, NodeError> {
        let hex_part = hash
            .strip_prefix("sha256-")
            .filter(|h| h.len() >= 4 && h.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| NodeError::InvalidParameter(format!("Malformed tag hash: {}", hash)))?;
        Ok(self.root_dir.join(&hex_part[..2]).join(&hex_part[2..4]).join(hash))
    }

    /// Store a tag, returning its hash. Storing identical bytes twice is a no-op.
    pub async fn put(&self, data: &[u8]) -> Result<String, NodeError> {
        let hash = Self::compute_hash(data);
        let path = self.tag_path(&hash)?;

        if fs::metadata(&path).await.is_ok() {
            debug!(hash = %hash, "Tag already stored");
            return Ok(hash);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a temp name first so a crash never leaves a partial tag under its hash
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;

        debug!(hash = %hash, size = data.len(), "Stored tag");
        Ok(hash)
    }

    pub async fn get(&self, hash: &str) -> Result<Vec<u8>, NodeError> {
        let path = self.tag_path(hash)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(NodeError::NotFound(format!("Tag not found: {}", hash)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, hash: &str) -> bool {
        match self.tag_path(hash) {
            Ok(path) => fs::metadata(path).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Delete a tag. Returns false if it was not present.
    pub async fn delete(&self, hash: &str) -> Result<bool, NodeError> {
        let path = self.tag_path(hash)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = TagStore::new(dir.path()).await.unwrap();

        let hash = store.put(b"tag bytes").await.unwrap();
        assert!(hash.starts_with("sha256-"));
        assert!(store.exists(&hash).await);
        assert_eq!(store.get(&hash).await.unwrap(), b"tag bytes");

        assert!(store.delete(&hash).await.unwrap());
        assert!(!store.exists(&hash).await);
        assert!(!store.delete(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_put_returns_same_hash() {
        let dir = TempDir::new().unwrap();
        let store = TagStore::new(dir.path()).await.unwrap();

        let a = store.put(b"same").await.unwrap();
        let b = store.put(b"same").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_missing_and_malformed_hashes() {
        let dir = TempDir::new().unwrap();
        let store = TagStore::new(dir.path()).await.unwrap();

        let missing = TagStore::compute_hash(b"never stored");
        assert!(matches!(store.get(&missing).await, Err(NodeError::NotFound(_))));
        assert!(matches!(
            store.get("../../etc/passwd").await,
            Err(NodeError::InvalidParameter(_))
        ));
    }
}
