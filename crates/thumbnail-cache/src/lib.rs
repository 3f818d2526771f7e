//! Thumbnail generation and write-once disk caching for a media backend
//!
//! Given a content id, [`ThumbnailCache`] serves a fixed-size WebP preview:
//! from disk when one was generated before, otherwise by fetching the media
//! from the backend, decoding it, fitting it into the configured box and
//! publishing the result to the cache. When no preview can be produced a
//! static placeholder is returned instead.
//!
//! # Features
//!
//! - **Path-safe cache keys**: ids are validated before they touch the disk
//! - **Write-once store**: atomic temp-file publish, first writer wins
//! - **Still and video sources**: in-process decode, first frame via ffmpeg
//! - **Tag-driven blur**: Gaussian blur for ids tagged with a blur tag
//! - **Single-flight generation**: concurrent cold requests share one job

pub mod cache;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod flight;
pub mod generate;
pub mod path;
pub mod placeholder;
pub mod store;

pub use cache::{Thumbnail, ThumbnailCache, ThumbnailSource};
pub use decode::{DecodeStrategy, MediaDecoder};
pub use error::ThumbnailError;
pub use fetch::{ContentDescriptor, HttpMediaFetcher, MediaFetcher, MediaKind};
pub use generate::{generate_thumbnail, render_placeholder, THUMBNAIL_MIME};
pub use path::{CachePathResolver, ContentId, THUMBNAIL_EXTENSION};
pub use placeholder::{Placeholder, PlaceholderProvider};
pub use store::{DiskCacheStore, WriteOutcome};

use serde::{Deserialize, Serialize};

/// How the area around a fitted image is filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadMode {
    #[default]
    Transparent,
    Opaque,
}

/// Shape and post-processing of generated thumbnails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailPolicy {
    pub target_width: u32,
    pub target_height: u32,
    pub pad_mode: PadMode,
    /// RGB fill for [`PadMode::Opaque`]
    pub pad_color: [u8; 3],
    /// Tags (case-insensitive) that cause the thumbnail to be blurred
    pub blur_tags: Vec<String>,
    /// Gaussian sigma; zero disables blurring
    pub blur_strength: f32,
}

impl Default for ThumbnailPolicy {
    fn default() -> Self {
        Self {
            target_width: 480,
            target_height: 270,
            pad_mode: PadMode::Transparent,
            pad_color: [0, 0, 0],
            blur_tags: vec!["nsfw".to_string()],
            blur_strength: 12.0,
        }
    }
}

impl ThumbnailPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.target_width == 0 || self.target_height == 0 {
            return Err(format!(
                "thumbnail box must be non-empty, got {}x{}",
                self.target_width, self.target_height
            ));
        }
        if !self.blur_strength.is_finite() || self.blur_strength < 0.0 {
            return Err(format!(
                "blur strength must be a non-negative number, got {}",
                self.blur_strength
            ));
        }
        Ok(())
    }

    /// True when any of `tags` is one of the configured blur tags
    pub fn should_blur<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().any(|tag| {
            let tag = tag.as_ref().trim().to_lowercase();
            self.blur_tags
                .iter()
                .any(|blur| blur.trim().to_lowercase() == tag)
        })
    }
}
