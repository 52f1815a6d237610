//! Blob storage for uploaded images. The identity layer only ever sees the
//! returned URL.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::BlobConfig;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Invalid blob name: {0}")]
    InvalidName(String),
    #[error("Invalid public base url: {0}")]
    InvalidBaseUrl(String),
    #[error("Blob storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `bytes` under `name` and return its public URL
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<String, BlobError>;

    /// Remove a stored blob; deleting a missing blob is not an error
    async fn delete(&self, name: &str) -> Result<(), BlobError>;
}

/// Single path segment of safe characters
pub fn validate_name(name: &str) -> Result<(), BlobError> {
    let ok = !name.is_empty()
        && name.len() <= 200
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if ok {
        Ok(())
    } else {
        Err(BlobError::InvalidName(name.to_string()))
    }
}

const MAX_CLIENT_NAME: usize = 64;
const MAX_SCOPE_SEGMENT: usize = 40;

/// Server-side name for an upload: `{tenant}-{resource}-{token}-{name}`.
/// Every call yields a fresh name, so a blob belongs to exactly one upload.
pub fn scoped_name(tenant: &str, resource: &str, name: &str) -> Result<String, BlobError> {
    validate_name(name)?;
    let client: String = name.chars().take(MAX_CLIENT_NAME).collect();
    let stored = format!(
        "{}-{}-{}-{}",
        scope_segment(tenant),
        scope_segment(resource),
        Uuid::new_v4().simple(),
        client
    );
    validate_name(&stored)?;
    Ok(stored)
}

fn scope_segment(raw: &str) -> String {
    let segment: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') { c } else { '_' })
        .take(MAX_SCOPE_SEGMENT)
        .collect();
    if segment.is_empty() {
        "_".to_string()
    } else {
        segment
    }
}

/// Blobs as files in one directory, served from `public_base_url`
pub struct LocalBlobStorage {
    root: PathBuf,
    base_url: url::Url,
}

impl LocalBlobStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Result<Self, BlobError> {
        let mut base = public_base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = url::Url::parse(&base).map_err(|e| BlobError::InvalidBaseUrl(format!("{}: {}", base, e)))?;
        Ok(Self { root: root.into(), base_url })
    }

    pub fn from_config(config: &BlobConfig) -> Result<Self, BlobError> {
        Self::new(&config.upload_dir, &config.public_base_url)
    }

    fn url_for(&self, name: &str) -> Result<String, BlobError> {
        self.base_url
            .join(name)
            .map(|u| u.to_string())
            .map_err(|e| BlobError::InvalidName(format!("{}: {}", name, e)))
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<String, BlobError> {
        validate_name(name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(name), bytes).await?;
        info!("Stored blob {} ({} bytes)", name, bytes.len());
        self.url_for(name)
    }

    async fn delete(&self, name: &str) -> Result<(), BlobError> {
        validate_name(name)?;
        match tokio::fs::remove_file(self.root.join(name)).await {
            Ok(()) => {
                debug!("Deleted blob {}", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("photo-1.png").is_ok());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("a/b.png").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn test_scoped_names_are_unique_per_upload() {
        let first = scoped_name("t1", "r1", "photo.png").unwrap();
        let second = scoped_name("t1", "r1", "photo.png").unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("t1-r1-"));
        assert!(first.ends_with("-photo.png"));

        let odd = scoped_name("loja/1", "r 2", "a.png").unwrap();
        assert!(validate_name(&odd).is_ok());
        assert!(odd.starts_with("loja_1-r2-"));

        assert!(scoped_name("t1", "r1", "../x.png").is_err());
        let long = scoped_name("t1", "r1", &"a".repeat(190)).unwrap();
        assert!(validate_name(&long).is_ok());
    }

    #[tokio::test]
    async fn test_put_and_delete() {
        let dir = std::env::temp_dir().join(format!("encarte-blob-{}", uuid::Uuid::new_v4()));
        let blobs = LocalBlobStorage::new(&dir, "http://cdn.test/uploads").unwrap();

        let url = blobs.put("a.png", b"png").await.unwrap();
        assert_eq!(url, "http://cdn.test/uploads/a.png");
        assert_eq!(tokio::fs::read(dir.join("a.png")).await.unwrap(), b"png");

        blobs.delete("a.png").await.unwrap();
        blobs.delete("a.png").await.unwrap();
        assert!(!dir.join("a.png").exists());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
