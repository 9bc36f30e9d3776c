//! Configuration file support for booru-sync.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `BOORU_SYNC_`, e.g., `BOORU_SYNC_DATABASE_URL`)
//! 3. Config file (~/.config/booru-sync/config.toml or ./booru-sync.toml)
//! 4. Built-in defaults
//!
//! The database URL defaults to `sqlite://~/.local/state/booru-sync/booru-sync.db` on Linux
//! (using the XDG state directory) if not explicitly configured. Journal files
//! with relative names live next to it unless `[cache] dir` says otherwise.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "sqlite://~/.local/state/booru-sync/booru-sync.db"  # optional, this is the default
//!
//! [remote]
//! base_url = "https://danbooru.donmai.us"
//! timeout_secs = 30
//! request_spacing_ms = 100
//!
//! [reconcile]
//! threads = 5
//! retry = 5
//! submit = false
//! shuffle = false
//!
//! [proxy]
//! enabled = false
//! file = "proxies.txt"        # or `address` for a raw list served over HTTP
//! auth = "user:password"
//! refresh_secs = 10800
//!
//! [cache]
//! dir = "/var/lib/booru-sync"
//! difference_file = "differences.jsonl"
//! patch_state_file = "patched.jsonl"
//! tag_creation_file = "created_tags.jsonl"
//! requests_file = "requests.jsonl"   # optional
//!
//! [logging]
//! file = "booru-sync.log"     # optional
//! ```

use std::path::{Path, PathBuf};

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;

const APP_NAME: &str = "booru-sync";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Remote API configuration.
    pub remote: RemoteConfig,
    /// Default reconcile options.
    pub reconcile: ReconcileConfig,
    /// Proxy rotation.
    pub proxy: ProxyConfig,
    /// Journal file locations.
    pub cache: CacheConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL.
    /// Supports sqlite:// and postgres:// schemes.
    /// Defaults to `sqlite://~/.local/state/booru-sync/booru-sync.db` if not specified.
    pub url: Option<String>,
}

/// Remote API configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the image board.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Minimum spacing between two requests through the same egress point.
    pub request_spacing_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://danbooru.donmai.us".to_string(),
            timeout_secs: 30,
            request_spacing_ms: 100,
        }
    }
}

/// Default reconcile options.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Number of posts diffed concurrently.
    pub threads: usize,
    /// Retry budget per post.
    pub retry: usize,
    /// Apply drift instead of only recording it.
    pub submit: bool,
    /// Visit posts in random order.
    pub shuffle: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            threads: booru_sync::sync::DEFAULT_WORKERS,
            retry: booru_sync::sync::DEFAULT_RETRY_ATTEMPTS,
            submit: false,
            shuffle: false,
        }
    }
}

/// Proxy rotation.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Route requests through the proxy pool.
    pub enabled: bool,
    /// Local proxy list, one proxy per line.
    pub file: Option<PathBuf>,
    /// Raw proxy list served over HTTP. Takes effect when `file` is unset.
    pub address: Option<String>,
    /// `user:password` applied to every proxy.
    pub auth: Option<String>,
    /// How often the list is reloaded.
    pub refresh_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: None,
            address: None,
            auth: None,
            refresh_secs: booru_sync::remote::proxy::DEFAULT_PROXY_REFRESH.as_secs(),
        }
    }
}

/// Journal file locations.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory relative file names resolve against.
    /// Defaults to the state directory.
    pub dir: Option<PathBuf>,
    pub difference_file: PathBuf,
    pub patch_state_file: PathBuf,
    pub tag_creation_file: PathBuf,
    /// Response cache journal. Responses are only kept in memory when unset.
    pub requests_file: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            difference_file: PathBuf::from("differences.jsonl"),
            patch_state_file: PathBuf::from("patched.jsonl"),
            tag_creation_file: PathBuf::from("created_tags.jsonl"),
            requests_file: None,
        }
    }
}

/// Log output.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write log events to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/booru-sync/config.toml)
    /// 3. Local config file (./booru-sync.toml)
    /// 4. Environment variables with BOORU_SYNC_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(xdg_config) = Self::default_config_path().filter(|p| p.exists()) {
            tracing::debug!("Loading config from {:?}", xdg_config);
            builder = builder.add_source(
                File::from(xdg_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // Add local config file (higher priority than XDG)
        let local_config = PathBuf::from("booru-sync.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./booru-sync.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., BOORU_SYNC_DATABASE_URL -> database.url
        builder = builder.add_source(
            Environment::with_prefix("BOORU_SYNC")
                .separator("_")
                .try_parsing(true),
        );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// The `mode=rwc` parameter enables read-write access and creates the file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join("booru-sync.db");
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    /// Directory that relative journal paths resolve against.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache.dir.clone().or_else(Self::default_state_dir)
    }

    /// Resolve a journal path. Absolute paths are returned unchanged.
    pub fn resolve_cache_path(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            return file.to_path_buf();
        }
        match self.cache_dir() {
            Some(dir) => dir.join(file),
            None => file.to_path_buf(),
        }
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/booru-sync` or `~/.local/state/booru-sync`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| {
            // state_dir() returns None on macOS/Windows, fall back to data_dir
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_content: &str) -> Config {
        let settings = ConfigBuilder::builder()
            .add_source(config::File::from_str(toml_content, FileFormat::Toml))
            .build()
            .unwrap();
        settings.try_deserialize().unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database.url.is_none());
        assert_eq!(config.remote.base_url, "https://danbooru.donmai.us");
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.remote.request_spacing_ms, 100);
        assert_eq!(config.reconcile.threads, 5);
        assert_eq!(config.reconcile.retry, 5);
        assert!(!config.reconcile.submit);
        assert!(!config.reconcile.shuffle);
        assert!(!config.proxy.enabled);
        assert_eq!(config.proxy.refresh_secs, 3 * 60 * 60);
        assert_eq!(
            config.cache.difference_file,
            PathBuf::from("differences.jsonl")
        );
        assert!(config.cache.requests_file.is_none());
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_config_builder_with_toml_string() {
        let config = parse(
            r#"
            [database]
            url = "sqlite:///tmp/test.db"

            [remote]
            base_url = "https://booru.example.org"
            request_spacing_ms = 250

            [reconcile]
            threads = 12
            submit = true
        "#,
        );

        assert_eq!(
            config.database.url,
            Some("sqlite:///tmp/test.db".to_string())
        );
        assert_eq!(config.remote.base_url, "https://booru.example.org");
        assert_eq!(config.remote.request_spacing_ms, 250);
        // Untouched keys keep their defaults
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.reconcile.threads, 12);
        assert!(config.reconcile.submit);
        assert_eq!(config.reconcile.retry, 5);
    }

    #[test]
    fn test_config_builder_with_defaults() {
        let settings = ConfigBuilder::builder().build().unwrap();
        let config: Config = settings.try_deserialize().unwrap_or_default();

        assert_eq!(config.reconcile.threads, 5);
        assert!(!config.proxy.enabled);
    }

    #[test]
    fn test_proxy_and_cache_sections() {
        let config = parse(
            r#"
            [proxy]
            enabled = true
            address = "https://lists.example.org/*.txt"
            auth = "user:secret"
            refresh_secs = 600

            [cache]
            dir = "/var/lib/booru-sync"
            requests_file = "requests.jsonl"

            [logging]
            file = "/var/log/booru-sync.log"
        "#,
        );

        assert!(config.proxy.enabled);
        assert!(config.proxy.file.is_none());
        assert_eq!(
            config.proxy.address.as_deref(),
            Some("https://lists.example.org/*.txt")
        );
        assert_eq!(config.proxy.auth.as_deref(), Some("user:secret"));
        assert_eq!(config.proxy.refresh_secs, 600);
        assert_eq!(
            config.cache.requests_file,
            Some(PathBuf::from("requests.jsonl"))
        );
        assert_eq!(
            config.logging.file,
            Some(PathBuf::from("/var/log/booru-sync.log"))
        );
    }

    #[test]
    fn test_resolve_cache_path_uses_cache_dir() {
        let config = parse(
            r#"
            [cache]
            dir = "/var/lib/booru-sync"
        "#,
        );

        assert_eq!(
            config.resolve_cache_path(Path::new("differences.jsonl")),
            PathBuf::from("/var/lib/booru-sync/differences.jsonl")
        );
        assert_eq!(
            config.resolve_cache_path(Path::new("/tmp/other.jsonl")),
            PathBuf::from("/tmp/other.jsonl")
        );
    }

    #[test]
    fn test_database_url_prefers_configured_value() {
        let config = parse(
            r#"
            [database]
            url = "postgres://localhost/mirror"
        "#,
        );
        assert_eq!(
            config.database_url().as_deref(),
            Some("postgres://localhost/mirror")
        );
    }

    #[test]
    fn test_database_url_default_is_sqlite_rwc() {
        let config = Config::default();
        if let Some(url) = config.database_url() {
            assert!(url.starts_with("sqlite://"));
            assert!(url.ends_with("booru-sync.db?mode=rwc"));
        }
    }
}
