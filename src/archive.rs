//! Blob storage for raw corp-code snapshots.
//!
//! Buckets are directories under a root; objects are files inside them.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

/// Minimal blob-store contract used for best-effort archival
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Create the bucket if it does not exist yet; returns true when created
    async fn ensure_bucket(&self, bucket: &str) -> Result<bool>;

    async fn upload(&self, bucket: &str, name: &str, content: &[u8], upsert: bool) -> Result<()>;

    /// Object names in the bucket, sorted, at most `limit`
    async fn list(&self, bucket: &str, limit: usize) -> Result<Vec<String>>;
}

/// Date-stamped object name for a corpus snapshot
pub fn snapshot_name(date: NaiveDate) -> String {
    format!("corpCode_{}.xml", date.format("%Y-%m-%d"))
}

/// Filesystem-backed archive store
#[derive(Debug, Clone)]
pub struct LocalArchiveStore {
    root: PathBuf,
}

impl LocalArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }
}

#[async_trait]
impl ArchiveStore for LocalArchiveStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<bool> {
        let path = self.bucket_path(bucket);
        if tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(false);
        }
        tokio::fs::create_dir_all(&path).await?;
        debug!("Created archive bucket {}", path.display());
        Ok(true)
    }

    async fn upload(&self, bucket: &str, name: &str, content: &[u8], upsert: bool) -> Result<()> {
        let path = self.bucket_path(bucket).join(name);
        if !upsert && tokio::fs::metadata(&path).await.is_ok() {
            return Err(std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("object {}/{} already exists", bucket, name),
            )
            .into());
        }
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    async fn list(&self, bucket: &str, limit: usize) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(self.bucket_path(bucket)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        names.truncate(limit);
        Ok(names)
    }
}
