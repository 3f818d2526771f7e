//! Error taxonomy for the thumbnail pipeline

use crate::fetch::MediaKind;
use std::path::PathBuf;

/// Errors raised anywhere between the cache and the placeholder.
///
/// Only [`ThumbnailError::InvalidIdentifier`] and
/// [`ThumbnailError::PlaceholderUnavailable`] ever leave
/// [`ThumbnailCache::get`](crate::ThumbnailCache::get); everything else is
/// recovered by serving the placeholder.
#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("invalid content identifier {id:?}: {reason}")]
    InvalidIdentifier { id: String, reason: &'static str },

    #[error("media backend returned nothing for {0}")]
    Absent(String),

    #[error("{kind} media cannot be thumbnailed")]
    Unsupported { kind: MediaKind },

    #[error("failed to decode {kind} content: {message}")]
    Decode { kind: &'static str, message: String },

    #[error("cache I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("degenerate image dimensions {width}x{height}")]
    InvalidImage { width: u32, height: u32 },

    #[error("failed to encode thumbnail: {0}")]
    Encode(#[from] image::ImageError),

    #[error("placeholder asset {} could not be loaded: {source}", path.display())]
    PlaceholderUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ThumbnailError {
    pub(crate) fn invalid_id(id: &str, reason: &'static str) -> Self {
        Self::InvalidIdentifier {
            id: id.to_string(),
            reason,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error must be surfaced to the caller instead of being
    /// answered with the placeholder.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier { .. } | Self::PlaceholderUnavailable { .. }
        )
    }
}

pub type Result<T, E = ThumbnailError> = std::result::Result<T, E>;
