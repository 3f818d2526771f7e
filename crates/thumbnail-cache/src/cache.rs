//! Request-level thumbnail pipeline
//!
//! [`ThumbnailCache::get`] walks the fallback chain for one id: serve the
//! cached file, else fetch and generate (publishing the result), else serve
//! the placeholder. Only an invalid id or a missing placeholder asset is
//! reported as an error.

use crate::decode::MediaDecoder;
use crate::error::{Result, ThumbnailError};
use crate::fetch::MediaFetcher;
use crate::flight::InFlight;
use crate::generate::{generate_thumbnail, THUMBNAIL_MIME};
use crate::path::ContentId;
use crate::placeholder::PlaceholderProvider;
use crate::store::{DiskCacheStore, WriteOutcome};
use crate::ThumbnailPolicy;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Terminal state a request was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailSource {
    Cached,
    Generated,
    Placeholder,
}

impl fmt::Display for ThumbnailSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThumbnailSource::Cached => write!(f, "cached"),
            ThumbnailSource::Generated => write!(f, "generated"),
            ThumbnailSource::Placeholder => write!(f, "placeholder"),
        }
    }
}

/// Bytes ready to hand to the HTTP layer
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub bytes: Bytes,
    pub mime: &'static str,
    /// Download name, `{id}.webp`
    pub file_name: String,
    pub source: ThumbnailSource,
}

pub struct ThumbnailCache {
    store: DiskCacheStore,
    fetcher: Arc<dyn MediaFetcher>,
    decoder: MediaDecoder,
    placeholder: PlaceholderProvider,
    policy: Arc<ThumbnailPolicy>,
    in_flight: InFlight,
}

impl ThumbnailCache {
    pub fn new(
        store: DiskCacheStore,
        fetcher: Arc<dyn MediaFetcher>,
        decoder: MediaDecoder,
        placeholder: PlaceholderProvider,
        policy: ThumbnailPolicy,
    ) -> Self {
        Self {
            store,
            fetcher,
            decoder,
            placeholder,
            policy: Arc::new(policy),
            in_flight: InFlight::new(),
        }
    }

    pub fn policy(&self) -> &ThumbnailPolicy {
        &self.policy
    }

    pub fn store(&self) -> &DiskCacheStore {
        &self.store
    }

    /// Thumbnail for a raw, untrusted id
    pub async fn get(&self, raw_id: &str) -> Result<Thumbnail> {
        let id = ContentId::parse(raw_id).inspect_err(|e| {
            warn!(id = raw_id, error = %e, "rejected thumbnail request");
        })?;
        self.store.resolver().resolve(&id).inspect_err(|e| {
            warn!(id = raw_id, error = %e, "rejected thumbnail request");
        })?;

        if let Some(bytes) = self.read_cached(&id).await {
            return Ok(self.cached(&id, bytes));
        }

        let generated = {
            let _flight = self.in_flight.acquire(id.as_str()).await;
            // A concurrent request may have published while we waited.
            if let Some(bytes) = self.read_cached(&id).await {
                return Ok(self.cached(&id, bytes));
            }
            self.generate(&id).await
        };

        match generated {
            Ok(bytes) => {
                info!(id = %id, bytes = bytes.len(), "generated thumbnail");
                Ok(Thumbnail {
                    bytes: Bytes::from(bytes),
                    mime: THUMBNAIL_MIME,
                    file_name: id.file_name(),
                    source: ThumbnailSource::Generated,
                })
            }
            Err(e) => {
                debug!(id = %id, reason = %e, "falling back to placeholder");
                self.serve_placeholder(&id).await
            }
        }
    }

    fn cached(&self, id: &ContentId, bytes: Vec<u8>) -> Thumbnail {
        debug!(id = %id, bytes = bytes.len(), "thumbnail cache hit");
        Thumbnail {
            bytes: Bytes::from(bytes),
            mime: THUMBNAIL_MIME,
            file_name: id.file_name(),
            source: ThumbnailSource::Cached,
        }
    }

    /// Disk faults are logged and treated as a miss
    async fn read_cached(&self, id: &ContentId) -> Option<Vec<u8>> {
        let store = self.store.clone();
        let key = id.clone();
        match tokio::task::spawn_blocking(move || store.read(&key)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!(id = %id, error = %e, "thumbnail cache read failed");
                None
            }
            Err(e) => {
                warn!(id = %id, error = %e, "thumbnail cache read task failed");
                None
            }
        }
    }

    async fn generate(&self, id: &ContentId) -> Result<Vec<u8>> {
        let descriptor = self
            .fetcher
            .fetch_descriptor(id)
            .await
            .ok_or_else(|| ThumbnailError::Absent(id.to_string()))?;

        let kind = descriptor.content_type;
        if kind.decode_strategy().is_none() {
            return Err(ThumbnailError::Unsupported { kind });
        }

        let raw = self
            .fetcher
            .fetch_raw(id)
            .await
            .ok_or_else(|| ThumbnailError::Absent(id.to_string()))?;

        let blur = self.policy.should_blur(&descriptor.tags);
        debug!(id = %id, %kind, bytes = raw.len(), blur, "generating thumbnail");

        let decoder = self.decoder.clone();
        let policy = Arc::clone(&self.policy);
        let store = self.store.clone();
        let key = id.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let pixels = decoder.decode(&raw, kind)?;
            let bytes = generate_thumbnail(&pixels, &policy, blur)?;

            match store.write(&key, &bytes) {
                Ok(WriteOutcome::Written) | Ok(WriteOutcome::AlreadyExists) => {}
                Err(e) => warn!(id = %key, error = %e, "failed to cache generated thumbnail"),
            }
            Ok(bytes)
        })
        .await
        .map_err(|e| ThumbnailError::Decode {
            kind: "worker",
            message: e.to_string(),
        })?
    }

    async fn serve_placeholder(&self, id: &ContentId) -> Result<Thumbnail> {
        match self.placeholder.get().await {
            Ok(placeholder) => Ok(Thumbnail {
                bytes: placeholder.bytes,
                mime: placeholder.mime,
                file_name: id.file_name(),
                source: ThumbnailSource::Placeholder,
            }),
            Err(e) => {
                error!(id = %id, error = %e, "no thumbnail and no placeholder available");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for ThumbnailCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailCache")
            .field("store", &self.store)
            .field("decoder", &self.decoder)
            .field("placeholder", &self.placeholder.path())
            .field("policy", &self.policy)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
