//! Content identifiers and their mapping onto the cache directory
//!
//! Every id is validated lexically before it is joined onto the cache root,
//! so a hostile id is rejected without touching the filesystem.

use crate::error::{Result, ThumbnailError};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// File extension of every cached thumbnail
pub const THUMBNAIL_EXTENSION: &str = "webp";

const MAX_ID_LEN: usize = 200;

const RESERVED_CHARS: &[char] = &['/', '\\', ':', '"', '<', '>', '|', '?', '*'];

const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Backend-issued media identifier that is safe to use as a file stem
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(String);

impl ContentId {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(ThumbnailError::invalid_id(raw, "empty identifier"));
        }
        if raw.len() > MAX_ID_LEN {
            return Err(ThumbnailError::invalid_id(raw, "identifier too long"));
        }
        if raw.contains("..") {
            return Err(ThumbnailError::invalid_id(raw, "traversal sequence"));
        }
        if raw
            .chars()
            .any(|c| RESERVED_CHARS.contains(&c) || c.is_control())
        {
            return Err(ThumbnailError::invalid_id(raw, "path separator or reserved character"));
        }
        // Leading dots would also collide with the store's temporary files.
        if raw.starts_with('.') {
            return Err(ThumbnailError::invalid_id(raw, "hidden file name"));
        }
        if raw.ends_with('.') || raw.ends_with(' ') {
            return Err(ThumbnailError::invalid_id(raw, "trailing dot or space"));
        }

        let stem = raw.split('.').next().unwrap_or(raw).trim_end();
        if RESERVED_NAMES
            .iter()
            .any(|name| stem.eq_ignore_ascii_case(name))
        {
            return Err(ThumbnailError::invalid_id(raw, "reserved device name"));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Download name presented to clients, e.g. `abc123.webp`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, THUMBNAIL_EXTENSION)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ContentId {
    type Err = ThumbnailError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Maps content ids onto files directly below the cache root
#[derive(Debug, Clone)]
pub struct CachePathResolver {
    root: PathBuf,
}

impl CachePathResolver {
    /// The root is made absolute against the current directory and
    /// normalized lexically; it does not need to exist yet.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let absolute =
            std::path::absolute(root).map_err(|e| ThumbnailError::io(root, e))?;
        Ok(Self {
            root: normalize(&absolute),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the on-disk location of a thumbnail
    pub fn resolve(&self, id: &ContentId) -> Result<PathBuf> {
        let candidate = normalize(&self.root.join(id.file_name()));

        if candidate.parent() != Some(self.root.as_path()) {
            return Err(ThumbnailError::invalid_id(id.as_str(), "escapes the cache root"));
        }
        if candidate.file_name().and_then(|n| n.to_str()) != Some(id.file_name().as_str()) {
            return Err(ThumbnailError::invalid_id(id.as_str(), "not a plain file name"));
        }

        Ok(candidate)
    }

    /// Parse and resolve in one step
    pub fn resolve_raw(&self, raw: &str) -> Result<(ContentId, PathBuf)> {
        let id = ContentId::parse(raw)?;
        let path = self.resolve(&id)?;
        Ok((id, path))
    }
}

/// Lexical normalization: drops `.` and folds `..` without consulting the
/// filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ids_are_accepted() {
        for raw in ["abc123", "aBcdEfgH", "with-dash_and_underscore", "a.b"] {
            assert!(ContentId::parse(raw).is_ok(), "{raw} should be accepted");
        }
    }

    #[test]
    fn test_hostile_ids_are_rejected() {
        let hostile = [
            "",
            ".",
            "..",
            "../../etc/passwd",
            "..\\..\\windows",
            "/etc/passwd",
            "C:\\Windows",
            "sub/dir",
            "a..b",
            ".hidden",
            "trailing.",
            "trailing ",
            "nul\0byte",
            "CON",
            "lpt1.txt",
            "Aux",
            "quote\"d",
            "wild*card",
        ];
        for raw in hostile {
            let err = ContentId::parse(raw).unwrap_err();
            assert!(
                matches!(err, ThumbnailError::InvalidIdentifier { .. }),
                "{raw:?} gave {err}"
            );
        }
    }

    #[test]
    fn test_overlong_id_is_rejected() {
        let raw = "a".repeat(MAX_ID_LEN + 1);
        assert!(ContentId::parse(&raw).is_err());
        assert!(ContentId::parse(&"a".repeat(MAX_ID_LEN)).is_ok());
    }

    #[test]
    fn test_resolved_path_is_direct_child_of_root() -> anyhow::Result<()> {
        let resolver = CachePathResolver::new("/srv/thumbs/./cache")?;
        let id = ContentId::parse("abc123")?;
        let path = resolver.resolve(&id)?;

        assert_eq!(path, PathBuf::from("/srv/thumbs/cache/abc123.webp"));
        assert_eq!(path.parent(), Some(resolver.root()));
        Ok(())
    }

    #[test]
    fn test_relative_root_becomes_absolute() -> anyhow::Result<()> {
        let resolver = CachePathResolver::new("cache")?;
        assert!(resolver.root().is_absolute());
        assert!(resolver.root().ends_with("cache"));
        Ok(())
    }

    #[test]
    fn test_resolution_does_not_touch_the_filesystem() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().join("not-created");
        let resolver = CachePathResolver::new(&root)?;

        assert!(resolver.resolve_raw("../../etc/passwd").is_err());
        resolver.resolve_raw("abc123")?;
        assert!(!root.exists());
        Ok(())
    }

    #[test]
    fn test_file_name_uses_fixed_extension() -> anyhow::Result<()> {
        let id: ContentId = "abc123".parse()?;
        assert_eq!(id.file_name(), "abc123.webp");
        assert_eq!(id.to_string(), "abc123");
        Ok(())
    }
}
