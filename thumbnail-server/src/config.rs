//! Process-wide configuration, loaded once at startup

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thumbnail_cache::ThumbnailPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Backend API root, e.g. `http://127.0.0.1:8000/api`
    pub backend_api_uri: String,
    pub cache_dir: PathBuf,
    pub placeholder_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub thumbnail: ThumbnailPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            backend_api_uri: String::new(),
            cache_dir: PathBuf::from("cache"),
            placeholder_path: PathBuf::from("assets/placeholder.webp"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            thumbnail: ThumbnailPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with the TOML file at `path`, when given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend_api_uri.trim().is_empty() {
            bail!("backend_api_uri must be set (config file or THUMBNAIL_BACKEND_URI)");
        }
        if let Err(reason) = self.thumbnail.validate() {
            bail!("Invalid [thumbnail] settings: {}", reason);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thumbnail_cache::PadMode;

    #[test]
    fn test_full_config_parses() -> Result<()> {
        let config = ServerConfig::from_toml(
            r#"
            listen = "0.0.0.0:9000"
            backend_api_uri = "http://127.0.0.1:8000/api"
            cache_dir = "/var/cache/thumbs"

            [thumbnail]
            target_width = 320
            target_height = 180
            pad_mode = "opaque"
            pad_color = [16, 16, 16]
            blur_tags = ["nsfw", "spoiler"]
            blur_strength = 16.0
            "#,
        )?;

        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/thumbs"));
        assert_eq!(config.placeholder_path, PathBuf::from("assets/placeholder.webp"));
        assert_eq!(config.thumbnail.pad_mode, PadMode::Opaque);
        assert_eq!(config.thumbnail.pad_color, [16, 16, 16]);
        assert_eq!(config.thumbnail.blur_strength, 16.0);
        config.validate()?;
        Ok(())
    }

    #[test]
    fn test_missing_backend_fails_validation() {
        let config = ServerConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_policy_fails_validation() -> Result<()> {
        let mut config = ServerConfig::from_toml(
            r#"
            backend_api_uri = "http://backend/api"
            [thumbnail]
            target_width = 0
            "#,
        )?;
        assert!(config.validate().is_err());

        config.thumbnail.target_width = 480;
        config.validate()?;
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(ServerConfig::load(Some(Path::new("/nonexistent/thumbnail.toml"))).is_err());
        assert!(ServerConfig::load(None).is_ok());
    }
}
