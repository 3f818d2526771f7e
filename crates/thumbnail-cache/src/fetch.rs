//! Media backend boundary
//!
//! The orchestrator only sees [`MediaFetcher`]; every backend failure is
//! collapsed into `None` at this seam.

use crate::path::ContentId;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Deserializer};
use std::fmt;
use tracing::{debug, warn};

/// Declared type of a media item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Image,
    Other,
}

impl MediaKind {
    /// Backend numeric encoding: 0 = video, 1 = image, 2 = other
    fn from_code(code: i64) -> Self {
        match code {
            0 => MediaKind::Video,
            1 => MediaKind::Image,
            _ => MediaKind::Other,
        }
    }

    fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "video" => MediaKind::Video,
            "image" => MediaKind::Image,
            _ => MediaKind::Other,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Image => write!(f, "image"),
            MediaKind::Other => write!(f, "other"),
        }
    }
}

impl<'de> Deserialize<'de> for MediaKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(i64),
            Name(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Code(code) => MediaKind::from_code(code),
            Raw::Name(name) => MediaKind::from_name(&name),
        })
    }
}

/// Per-request view of a media item, as reported by `/media/info`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContentDescriptor {
    pub content_type: MediaKind,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ContentDescriptor {
    pub fn new(content_type: MediaKind, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            content_type,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

/// Source of descriptors and raw bytes for media items
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_descriptor(&self, id: &ContentId) -> Option<ContentDescriptor>;

    async fn fetch_raw(&self, id: &ContentId) -> Option<Bytes>;
}

/// [`MediaFetcher`] speaking to the backend's HTTP API
#[derive(Debug, Clone)]
pub struct HttpMediaFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMediaFetcher {
    /// `base_url` is the backend API root, e.g. `http://127.0.0.1:8000/api`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}/media/{}", self.base_url, route)
    }

    async fn get(&self, route: &str, id: &ContentId) -> Option<reqwest::Response> {
        let url = self.endpoint(route);
        debug!(%url, id = %id, "requesting media backend");

        let response = match self
            .client
            .get(&url)
            .query(&[("id", id.as_str())])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(%url, id = %id, error = %e, "media backend request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!(%url, id = %id, %status, "media backend returned non-success status");
            return None;
        }
        Some(response)
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch_descriptor(&self, id: &ContentId) -> Option<ContentDescriptor> {
        let response = self.get("info", id).await?;
        match response.json::<ContentDescriptor>().await {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                warn!(id = %id, error = %e, "media info response was not a valid descriptor");
                None
            }
        }
    }

    async fn fetch_raw(&self, id: &ContentId) -> Option<Bytes> {
        let response = self.get("download", id).await?;
        match response.bytes().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(id = %id, error = %e, "media download body could not be read");
                None
            }
        }
    }
}
