//! Run configuration.
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! an optional TOML file, then command-line flags (applied by `main`). API
//! credentials additionally fall back to `REDDIT_CLIENT_ID` and
//! `REDDIT_CLIENT_SECRET` when neither the file nor the flags set them.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::resolve::api::{DEFAULT_API_BASE, DEFAULT_AUTH_BASE};
use crate::resolve::{ApiCredentials, RetryPolicy, NEWS_FLAIR};

pub const CLIENT_ID_ENV: &str = "REDDIT_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "REDDIT_CLIENT_SECRET";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// How each entry's flair and outbound link are looked up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Read the rendered permalink page.
    #[default]
    Scrape,
    /// Query the Reddit API with application credentials.
    Api,
}

/// Top-level run configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// SEC-015: Custom Debug impl masks `client_secret`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed to filter.
    pub feed_url: String,

    /// Where the rewritten feed is written. Parent directories are created.
    pub output_path: PathBuf,

    pub strategy: StrategyKind,

    /// Flair label an entry must carry to be kept.
    pub flair: String,

    pub user_agent: String,

    /// Maximum number of entries resolved at the same time.
    pub concurrency: usize,

    /// Attempts per entry, counting the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,

    /// Timeout applied to every individual HTTP request.
    pub request_timeout_secs: u64,

    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    pub auth_base: String,
    pub api_base: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: "https://www.reddit.com/r/formula1.rss".to_string(),
            output_path: PathBuf::from("feed.xml"),
            strategy: StrategyKind::Scrape,
            flair: NEWS_FLAIR.to_string(),
            user_agent: concat!("flairfeed/", env!("CARGO_PKG_VERSION")).to_string(),
            concurrency: 4,
            max_attempts: 10,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            request_timeout_secs: 20,
            client_id: None,
            client_secret: None,
            auth_base: DEFAULT_AUTH_BASE.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

/// SEC-015: Mask client_secret in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("feed_url", &self.feed_url)
            .field("output_path", &self.output_path)
            .field("strategy", &self.strategy)
            .field("flair", &self.flair)
            .field("user_agent", &self.user_agent)
            .field("concurrency", &self.concurrency)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("auth_base", &self.auth_base)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 14] = [
        "feed_url",
        "output_path",
        "strategy",
        "flair",
        "user_agent",
        "concurrency",
        "max_attempts",
        "base_delay_ms",
        "max_delay_ms",
        "request_timeout_secs",
        "client_id",
        "client_secret",
        "auth_base",
        "api_base",
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
                // Race condition: file deleted between metadata and read
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
            strategy = ?config.strategy,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Fills unset credentials from `REDDIT_CLIENT_ID` / `REDDIT_CLIENT_SECRET`.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if self.client_id.is_none() {
            self.client_id = non_empty(CLIENT_ID_ENV);
        }
        if self.client_secret.is_none() {
            self.client_secret = non_empty(CLIENT_SECRET_ENV);
        }
    }

    /// API credentials, if both halves are configured.
    pub fn credentials(&self) -> Option<ApiCredentials> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some(ApiCredentials {
                client_id: id.clone(),
                client_secret: SecretString::from(secret.clone()),
            }),
            _ => None,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("flairfeed_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.feed_url, "https://www.reddit.com/r/formula1.rss");
        assert_eq!(config.output_path, PathBuf::from("feed.xml"));
        assert_eq!(config.strategy, StrategyKind::Scrape);
        assert_eq!(config.flair, ":post-news: News");
        assert!(config.user_agent.starts_with("flairfeed/"));
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_attempts, 10);
        assert!(config.client_id.is_none());
        assert!(config.client_secret.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/flairfeed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.strategy, StrategyKind::Scrape);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "strategy = \"api\"\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.strategy, StrategyKind::Api);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.flair, NEWS_FLAIR);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
feed_url = "https://www.reddit.com/r/rust.rss"
output_path = "out/rust.xml"
strategy = "api"
flair = "Announcement"
user_agent = "test-agent/1.0"
concurrency = 8
max_attempts = 3
base_delay_ms = 100
max_delay_ms = 1000
request_timeout_secs = 5
client_id = "id-123"
client_secret = "secret-456"
auth_base = "http://localhost:1"
api_base = "http://localhost:2"
"#;
        let (dir, path) = write_config("full", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.feed_url, "https://www.reddit.com/r/rust.rss");
        assert_eq!(config.output_path, PathBuf::from("out/rust.xml"));
        assert_eq!(config.strategy, StrategyKind::Api);
        assert_eq!(config.flair, "Announcement");
        assert_eq!(config.user_agent, "test-agent/1.0");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.retry_policy().max_attempts(), 3);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.auth_base, "http://localhost:1");
        assert_eq!(config.api_base, "http://localhost:2");

        let creds = config.credentials().unwrap();
        assert_eq!(creds.client_id, "id-123");
        assert_eq!(creds.client_secret.expose_secret(), "secret-456");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let (dir, path) = write_config("bad_strategy", "strategy = \"carrier-pigeon\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
concurrency = 2
totally_fake_key = "should not fail"
"#;
        let (dir, path) = write_config("unknown", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.concurrency, 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_env_fills_missing_credentials() {
        let mut config = Config::default();
        config.apply_env_from(|key| match key {
            CLIENT_ID_ENV => Some("env-id".to_string()),
            CLIENT_SECRET_ENV => Some("env-secret".to_string()),
            _ => None,
        });

        let creds = config.credentials().unwrap();
        assert_eq!(creds.client_id, "env-id");
        assert_eq!(creds.client_secret.expose_secret(), "env-secret");
    }

    #[test]
    fn test_env_does_not_override_configured_credentials() {
        let mut config = Config {
            client_id: Some("flag-id".to_string()),
            ..Config::default()
        };
        config.apply_env_from(|key| match key {
            CLIENT_ID_ENV => Some("env-id".to_string()),
            CLIENT_SECRET_ENV => Some("   ".to_string()),
            _ => None,
        });

        assert_eq!(config.client_id.as_deref(), Some("flag-id"));
        assert!(config.client_secret.is_none());
        assert!(config.credentials().is_none());
    }

    // SEC-015: Debug output masks the client secret
    #[test]
    fn test_debug_masks_client_secret() {
        let config = Config {
            client_secret: Some("super-secret-key-12345".to_string()),
            ..Config::default()
        };

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let config = Config {
            client_id: Some("id".to_string()),
            client_secret: Some("super-secret-key-12345".to_string()),
            ..Config::default()
        };

        let creds = config.credentials().unwrap();
        assert!(!format!("{:?}", creds).contains("super-secret-key-12345"));
    }
}
