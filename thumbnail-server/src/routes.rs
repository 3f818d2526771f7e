use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thumbnail_cache::{Thumbnail, ThumbnailCache, ThumbnailError, ThumbnailSource};
use tower_http::trace::TraceLayer;
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ThumbnailCache>,
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailQuery {
    id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/thumbnail", get(thumbnail_handler))
        .route("/thumbnail/", get(thumbnail_handler))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /thumbnail?id={id}`
async fn thumbnail_handler(
    State(state): State<AppState>,
    Query(query): Query<ThumbnailQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(id) = query.id else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match state.cache.get(&id).await {
        Ok(thumbnail) => thumbnail_response(thumbnail, &headers),
        Err(ThumbnailError::InvalidIdentifier { .. }) => StatusCode::BAD_REQUEST.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn thumbnail_response(thumbnail: Thumbnail, request_headers: &HeaderMap) -> Response {
    let etag = entity_tag(&thumbnail.bytes);
    let cache_control = match thumbnail.source {
        ThumbnailSource::Cached | ThumbnailSource::Generated => "public, max-age=86400",
        // Placeholders must not stick once a real thumbnail exists
        ThumbnailSource::Placeholder => "no-cache",
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }

    if etag_matches(request_headers, &etag) {
        debug!(file = %thumbnail.file_name, "thumbnail not modified");
        return (StatusCode::NOT_MODIFIED, headers).into_response();
    }

    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(thumbnail.mime));
    let disposition = format!("inline; filename=\"{}\"", thumbnail.file_name);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    (StatusCode::OK, headers, thumbnail.bytes).into_response()
}

/// Quoted hex of the first 16 bytes of the body's SHA-256
fn entity_tag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

fn etag_matches(request_headers: &HeaderMap, etag: &str) -> bool {
    request_headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|candidate| candidate.trim().trim_start_matches("W/"))
        .any(|candidate| candidate == "*" || candidate == etag)
}
