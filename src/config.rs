//! Configuration file parser for ~/.config/reelfeed/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::remote::ContentKind;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The `Debug` impl masks `api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the remote document store.
    pub backend_url: String,

    /// Base URL of the media object storage.
    pub storage_url: String,

    /// Collection holding photo posts (read-only in this client).
    pub posts_collection: String,

    /// Collection holding reels; its documents carry a mirrored `liked` field.
    pub reels_collection: String,

    /// Collection holding user profiles, keyed by uid.
    pub users_collection: String,

    /// Uid of the signed-in user, for the profile screen.
    pub user_id: Option<String>,

    /// Height of one reel in the paged list, in scroll-offset units.
    pub item_height: f64,

    /// Per-request timeout for backend calls.
    pub request_timeout_secs: u64,

    /// Author name written into documents created by uploads.
    pub author_name: String,

    /// Static API key for backends that require one in addition to the session token.
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8080/v1".to_string(),
            storage_url: "http://localhost:8080/storage".to_string(),
            posts_collection: "posts".to_string(),
            reels_collection: "videos".to_string(),
            users_collection: "users".to_string(),
            user_id: None,
            item_height: 800.0,
            request_timeout_secs: 20,
            author_name: "anonymous".to_string(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("backend_url", &self.backend_url)
            .field("storage_url", &self.storage_url)
            .field("posts_collection", &self.posts_collection)
            .field("reels_collection", &self.reels_collection)
            .field("users_collection", &self.users_collection)
            .field("user_id", &self.user_id)
            .field("item_height", &self.item_height)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("author_name", &self.author_name)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "backend_url",
        "storage_url",
        "posts_collection",
        "reels_collection",
        "users_collection",
        "user_id",
        "item_height",
        "request_timeout_secs",
        "author_name",
        "api_key",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            backend = %config.backend_url,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Collection name backing a feed of the given kind.
    pub fn collection(&self, kind: ContentKind) -> &str {
        match kind {
            ContentKind::Post => &self.posts_collection,
            ContentKind::Reel => &self.reels_collection,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("reelfeed_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.posts_collection, "posts");
        assert_eq!(config.reels_collection, "videos");
        assert_eq!(config.users_collection, "users");
        assert!(config.user_id.is_none());
        assert_eq!(config.item_height, 800.0);
        assert_eq!(config.request_timeout_secs, 20);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/reelfeed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.reels_collection, "videos");
    }

    #[test]
    fn test_empty_and_whitespace_files_return_default() {
        let path = write_config("empty", "   \n  \n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.posts_collection, "posts");
        cleanup(&path);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let path = write_config("partial", "reels_collection = \"reels\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.reels_collection, "reels");
        assert_eq!(config.posts_collection, "posts");
        assert_eq!(config.item_height, 800.0);
        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
backend_url = "https://api.example.com/v1"
storage_url = "https://media.example.com"
posts_collection = "photos"
reels_collection = "clips"
users_collection = "people"
user_id = "u-42"
item_height = 640.0
request_timeout_secs = 5
author_name = "mohit"
api_key = "key-123"
"#;
        let path = write_config("full", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.backend_url, "https://api.example.com/v1");
        assert_eq!(config.storage_url, "https://media.example.com");
        assert_eq!(config.collection(ContentKind::Post), "photos");
        assert_eq!(config.collection(ContentKind::Reel), "clips");
        assert_eq!(config.users_collection, "people");
        assert_eq!(config.user_id.as_deref(), Some("u-42"));
        assert_eq!(config.item_height, 640.0);
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.author_name, "mohit");
        assert_eq!(config.api_key.as_deref(), Some("key-123"));
        cleanup(&path);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        cleanup(&path);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let path = write_config("unknown", "reels_collection = \"v\"\ntotally_fake = 1\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.reels_collection, "v");
        cleanup(&path);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let path = write_config("wrongtype", "item_height = \"tall\"\n");
        assert!(Config::load(&path).is_err());
        cleanup(&path);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        cleanup(&path);
    }

    #[test]
    fn test_debug_masks_api_key() {
        let config = Config {
            api_key: Some("super-secret-key-12345".to_string()),
            ..Config::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
