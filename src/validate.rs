//! Artifact validation against the filesystem
//!
//! After a fetch reports success, the engine re-checks the files it claims
//! to have written: the file must exist, have a measurable size, and hash
//! cleanly. [`ArtifactValidator`] is the capability; [`FsArtifactValidator`]
//! is the production implementation over the local filesystem.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{FetchError, Result};
use crate::period::Period;
use crate::types::Artifact;

/// Validates downloaded files on disk
#[async_trait]
pub trait ArtifactValidator: Send + Sync {
    /// Build a verified descriptor for a file the portal claims to have
    /// written.
    ///
    /// The returned artifact carries the measured size and content hash;
    /// its validation state is left pending for the caller to judge.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::MissingArtifact`] when the path does not point
    /// at a regular file.
    async fn validate(&self, period: &Period, path: &Path) -> Result<Artifact>;

    /// Whether a regular file exists at the path
    async fn file_exists(&self, path: &Path) -> bool;

    /// Size of the file in bytes
    async fn file_size(&self, path: &Path) -> Result<u64>;

    /// Hex-encoded SHA-256 hash of the file's content
    async fn content_hash(&self, path: &Path) -> Result<String>;

    /// Remove a file, for purging bad downloads before a retry
    async fn delete_file(&self, path: &Path) -> Result<()>;
}

/// [`ArtifactValidator`] over the local filesystem
#[derive(Clone, Copy, Debug, Default)]
pub struct FsArtifactValidator;

#[async_trait]
impl ArtifactValidator for FsArtifactValidator {
    async fn validate(&self, period: &Period, path: &Path) -> Result<Artifact> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => {
                return Err(FetchError::MissingArtifact {
                    path: path.to_path_buf(),
                }
                .into())
            }
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut artifact = Artifact::new(period.clone(), name, path, metadata.len())?;
        artifact.hash = Some(self.content_hash(path).await?);
        Ok(artifact)
    }

    async fn file_exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    async fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn content_hash(&self, path: &Path) -> Result<String> {
        use sha2::{Digest, Sha256};

        let content = tokio::fs::read(path).await?;
        let mut hasher = Sha256::new();
        hasher.update(&content);
        Ok(format!("{:x}", hasher.finalize()))
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }
}
