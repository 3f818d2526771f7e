//! Static fallback image served when a thumbnail cannot be produced

use crate::decode::sniff_format;
use crate::error::{Result, ThumbnailError};
use bytes::Bytes;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct Placeholder {
    pub bytes: Bytes,
    pub mime: &'static str,
}

/// Loads the placeholder asset on first use and serves it from memory after
/// that. A failed load is not remembered, so a later request retries.
#[derive(Debug)]
pub struct PlaceholderProvider {
    path: PathBuf,
    asset: OnceCell<Placeholder>,
}

impl PlaceholderProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            asset: OnceCell::new(),
        }
    }

    /// Provider that never touches the disk
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let mime = mime_for(Path::new(""), &bytes);
        Self {
            path: PathBuf::new(),
            asset: OnceCell::new_with(Some(Placeholder { bytes, mime })),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self) -> Result<Placeholder> {
        let asset = self
            .asset
            .get_or_try_init(|| async {
                let bytes = tokio::fs::read(&self.path).await.map_err(|source| {
                    error!(path = %self.path.display(), error = %source, "placeholder asset unavailable");
                    ThumbnailError::PlaceholderUnavailable {
                        path: self.path.clone(),
                        source,
                    }
                })?;
                let mime = mime_for(&self.path, &bytes);
                debug!(path = %self.path.display(), bytes = bytes.len(), mime, "loaded placeholder asset");
                Ok::<_, ThumbnailError>(Placeholder {
                    bytes: Bytes::from(bytes),
                    mime,
                })
            })
            .await?;
        Ok(asset.clone())
    }
}

fn mime_for(path: &Path, bytes: &[u8]) -> &'static str {
    sniff_format(bytes)
        .or_else(|| ImageFormat::from_path(path).ok())
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::render_placeholder;
    use crate::ThumbnailPolicy;
    use anyhow::Result;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_loads_once_and_serves_from_memory() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("placeholder.webp");
        let data = render_placeholder(&ThumbnailPolicy::default())?;
        std::fs::write(&path, &data)?;

        let provider = PlaceholderProvider::new(&path);
        let first = provider.get().await?;
        assert_eq!(first.bytes.as_ref(), data.as_slice());
        assert_eq!(first.mime, "image/webp");

        // Removing the file does not matter once loaded
        std::fs::remove_file(&path)?;
        let second = provider.get().await?;
        assert_eq!(second.bytes, first.bytes);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_asset_is_a_hard_failure() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("missing.webp");
        let provider = PlaceholderProvider::new(&path);

        let err = provider.get().await.unwrap_err();
        assert!(matches!(err, ThumbnailError::PlaceholderUnavailable { .. }));
        assert!(err.is_hard_failure());

        // Not memoized: the asset appearing later is picked up
        std::fs::write(&path, render_placeholder(&ThumbnailPolicy::default())?)?;
        assert!(provider.get().await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_first_loads_agree() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("placeholder.webp");
        std::fs::write(&path, render_placeholder(&ThumbnailPolicy::default())?)?;
        let provider = std::sync::Arc::new(PlaceholderProvider::new(&path));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.get().await.map(|p| p.bytes) })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await??);
        }
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
        Ok(())
    }

    #[test]
    fn test_mime_falls_back_to_extension() {
        assert_eq!(mime_for(Path::new("x.png"), b"??"), "image/png");
        assert_eq!(mime_for(Path::new("x"), b"??"), "application/octet-stream");
    }
}
