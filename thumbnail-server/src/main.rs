use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thumbnail_cache::store::write_new_file;
use thumbnail_cache::{
    render_placeholder, CachePathResolver, DiskCacheStore, HttpMediaFetcher, MediaDecoder,
    PlaceholderProvider, ThumbnailCache, WriteOutcome,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod routes;

use config::ServerConfig;
use routes::{router, AppState};

#[derive(Parser)]
#[command(name = "thumbnail-server")]
#[command(about = "Serves fixed-size media thumbnails backed by a write-once disk cache")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "THUMBNAIL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "THUMBNAIL_LISTEN", global = true)]
    listen: Option<SocketAddr>,

    /// Backend API root, e.g. http://127.0.0.1:8000/api
    #[arg(long, env = "THUMBNAIL_BACKEND_URI", global = true)]
    backend_uri: Option<String>,

    /// Directory holding cached thumbnails
    #[arg(long, env = "THUMBNAIL_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Image served when no thumbnail can be produced
    #[arg(long, env = "THUMBNAIL_PLACEHOLDER", global = true)]
    placeholder: Option<PathBuf>,

    /// ffmpeg binary used for video frames
    #[arg(long, env = "THUMBNAIL_FFMPEG", global = true)]
    ffmpeg: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,

    /// Write a flat placeholder of the configured size
    RenderPlaceholder {
        /// Output path; defaults to the configured placeholder path
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(uri) = &self.backend_uri {
            config.backend_api_uri = uri.clone();
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(path) = &self.placeholder {
            config.placeholder_path = path.clone();
        }
        if let Some(path) = &self.ffmpeg {
            config.ffmpeg_path = path.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    match cli.command {
        Some(Commands::RenderPlaceholder { out }) => {
            let out = out.unwrap_or_else(|| config.placeholder_path.clone());
            write_placeholder(&config, out)
        }
        Some(Commands::Serve) | None => serve(config).await,
    }
}

/// Composition root: every collaborator is built here and handed down
fn build_cache(config: &ServerConfig) -> Result<ThumbnailCache> {
    let resolver = CachePathResolver::new(&config.cache_dir)
        .with_context(|| format!("Invalid cache directory: {}", config.cache_dir.display()))?;

    Ok(ThumbnailCache::new(
        DiskCacheStore::new(resolver),
        Arc::new(HttpMediaFetcher::new(config.backend_api_uri.clone())),
        MediaDecoder::new(config.ffmpeg_path.clone()),
        PlaceholderProvider::new(config.placeholder_path.clone()),
        config.thumbnail.clone(),
    ))
}

async fn serve(config: ServerConfig) -> Result<()> {
    config.validate()?;
    ensure_placeholder(&config)?;
    let cache = build_cache(&config)?;
    info!(
        listen = %config.listen,
        backend = %config.backend_api_uri,
        cache_dir = %cache.store().resolver().root().display(),
        width = config.thumbnail.target_width,
        height = config.thumbnail.target_height,
        "starting thumbnail server"
    );

    let app = router(AppState {
        cache: Arc::new(cache),
    });
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("thumbnail server stopped");
    Ok(())
}

fn write_placeholder(config: &ServerConfig, out: PathBuf) -> Result<()> {
    if let Err(reason) = config.thumbnail.validate() {
        anyhow::bail!("Invalid [thumbnail] settings: {}", reason);
    }
    let bytes = render_placeholder(&config.thumbnail)?;
    match write_new_file(&out, &bytes)? {
        WriteOutcome::Written => info!(path = %out.display(), bytes = bytes.len(), "wrote placeholder"),
        WriteOutcome::AlreadyExists => info!(path = %out.display(), "placeholder already exists, left untouched"),
    }
    Ok(())
}

/// Publish a stock placeholder when the configured asset is missing, so the
/// fallback path serves an image instead of failing every request.
fn ensure_placeholder(config: &ServerConfig) -> Result<()> {
    if config.placeholder_path.is_file() {
        return Ok(());
    }
    warn!(
        path = %config.placeholder_path.display(),
        "placeholder asset missing, rendering a stock one"
    );
    write_placeholder(config, config.placeholder_path.clone())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use thumbnail_cache::ThumbnailSource;

    fn config_in(dir: &std::path::Path) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.backend_api_uri = "http://127.0.0.1:9/api".to_string();
        config.cache_dir = dir.join("cache");
        config.placeholder_path = dir.join("assets").join("placeholder.webp");
        config
    }

    #[test]
    fn test_missing_placeholder_is_rendered_at_startup() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = config_in(temp_dir.path());

        ensure_placeholder(&config)?;
        let bytes = std::fs::read(&config.placeholder_path)?;
        let decoded = image_size(&bytes)?;
        assert_eq!(decoded, (480, 270));
        Ok(())
    }

    #[test]
    fn test_existing_placeholder_is_left_alone() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = config_in(temp_dir.path());
        std::fs::create_dir_all(temp_dir.path().join("assets"))?;
        std::fs::write(&config.placeholder_path, b"custom asset")?;

        ensure_placeholder(&config)?;
        assert_eq!(std::fs::read(&config.placeholder_path)?, b"custom asset");
        Ok(())
    }

    #[tokio::test]
    async fn test_fallback_serves_rendered_placeholder() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = config_in(temp_dir.path());
        ensure_placeholder(&config)?;

        // The backend is unreachable, so every request falls back
        let cache = build_cache(&config)?;
        let thumbnail = cache.get("abc123").await?;
        assert_eq!(thumbnail.source, ThumbnailSource::Placeholder);
        assert_eq!(thumbnail.mime, "image/webp");
        assert_eq!(thumbnail.bytes, std::fs::read(&config.placeholder_path)?);
        Ok(())
    }

    fn image_size(bytes: &[u8]) -> Result<(u32, u32)> {
        let decoded = thumbnail_cache::decode::MediaDecoder::default()
            .decode(bytes, thumbnail_cache::MediaKind::Image)?;
        Ok(decoded.dimensions())
    }
}
