//! Configuration for the content server.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`yb.toml`)
//! - Environment variable overrides
//!
//! It also owns [`LiveConfig`], the versioned snapshot that the hot-reload
//! coordinator swaps while requests keep reading.
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `YB_` and use double underscores
//! to separate nested levels:
//! - `YB_SERVER__PORT=9000` sets `server.port`
//! - `YB_RATE_LIMIT__PER_SECOND=10` sets `rate_limit.per_second`
//! - `YB_SNAPSHOT__ENABLED=true` sets `snapshot.enabled`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "yb.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Listener and route prefixes
    #[serde(default)]
    pub server: ServerConfig,

    /// Content tree and render cache
    #[serde(default)]
    pub content: ContentConfig,

    /// Per-identity request budgets
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Hide/private pattern lists
    #[serde(default)]
    pub privacy: PrivacyConfig,

    /// Static snapshot generation
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Search defaults and plugin strategies
    #[serde(default)]
    pub search: SearchConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Port for the HTTP listener
    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix the content tree is mounted under
    #[serde(default = "default_content_router")]
    pub content_router: String,

    /// Prefix for the search API
    #[serde(default = "default_api_router")]
    pub api_router: String,

    /// Take the client address for rate limiting from `X-Real-IP` /
    /// `X-Forwarded-For`. Only enable behind a proxy that overwrites them.
    #[serde(default = "default_false")]
    pub trust_proxy_headers: bool,
}

impl ServerConfig {
    /// Whether `other` binds and mounts the same way. Only these fields
    /// need a restart to change.
    pub fn same_mount(&self, other: &ServerConfig) -> bool {
        self.port == other.port
            && self.content_router == other.content_router
            && self.api_router == other.api_router
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ContentConfig {
    /// Directory holding documents and assets
    #[serde(default = "default_content_root")]
    pub root: PathBuf,

    /// Maximum number of rendered entries kept in memory
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

/// Request thresholds. A value of `0` disables that window.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_second")]
    pub per_second: u32,

    #[serde(default = "default_per_minute")]
    pub per_minute: u32,

    #[serde(default = "default_per_hour")]
    pub per_hour: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct PrivacyConfig {
    /// Paths left out of listings, search and serving
    #[serde(default)]
    pub hide: Vec<String>,

    /// Paths that must never be served
    #[serde(default)]
    pub private: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SnapshotConfig {
    /// Write a static copy of every successfully served route
    #[serde(default = "default_false")]
    pub enabled: bool,

    /// Destination directory for static copies
    #[serde(default = "default_snapshot_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    /// Result count when the request does not say
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    /// Strategy used when the request does not name one
    #[serde(default = "default_strategy")]
    pub default_strategy: String,

    /// Maximum number of cached result lists
    #[serde(default = "default_cache_capacity")]
    pub result_cache_capacity: usize,

    /// External search strategies
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    pub name: String,

    #[serde(default)]
    pub brief: String,

    /// Program invoked as `<command> <args...> <query> <limit>`
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Removes the strategy (plugin or built-in) from the registry
    #[serde(default = "default_false")]
    pub disable: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `ybook::search = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_false() -> bool {
    false
}
fn default_port() -> u16 {
    8080
}
fn default_content_router() -> String {
    "/blog".to_string()
}
fn default_api_router() -> String {
    "/api".to_string()
}
fn default_content_root() -> PathBuf {
    PathBuf::from("blog")
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_per_second() -> u32 {
    5
}
fn default_per_minute() -> u32 {
    30
}
fn default_per_hour() -> u32 {
    1000
}
fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("public")
}
fn default_search_limit() -> usize {
    10
}
fn default_strategy() -> String {
    "title".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            server: ServerConfig::default(),
            content: ContentConfig::default(),
            rate_limit: RateLimitConfig::default(),
            privacy: PrivacyConfig {
                hide: vec!["hide.md".to_string()],
                private: vec!["private.md".to_string()],
            },
            snapshot: SnapshotConfig::default(),
            search: SearchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            content_router: default_content_router(),
            api_router: default_api_router(),
            trust_proxy_headers: false,
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            root: default_content_root(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: default_per_second(),
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: default_snapshot_dir(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            default_strategy: default_strategy(),
            result_cache_capacity: default_cache_capacity(),
            plugins: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from a specific file, layered over defaults and
    /// `YB_` environment variables. Relative paths in the result are
    /// relative to the file's directory.
    ///
    /// Unlike a plain figment merge, a missing file is an error: a reload
    /// triggered by a deleted config must not silently fall back to defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }

        let mut settings = Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Settings::default()))
                .merge(Toml::file(path)),
        )?;
        if let Some(base) = path.parent() {
            settings.resolve_relative_to(base);
        }
        Ok(settings)
    }

    /// Anchor relative `content.root` and `snapshot.output_dir` at `base`,
    /// the directory of the config file they were read from.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        if base.as_os_str().is_empty() {
            return;
        }
        for path in [&mut self.content.root, &mut self.snapshot.output_dir] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Defaults layered with `YB_` environment variables, for running without
    /// a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Serialized::defaults(Settings::default())))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Settings = figment
            // Double underscore separates nested levels, single underscores stay
            .merge(Env::prefixed("YB_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the router and normalizer cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, prefix) in [
            ("server.content_router", &self.server.content_router),
            ("server.api_router", &self.server.api_router),
        ] {
            if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "{field} must look like \"/name\", got {prefix:?}"
                )));
            }
        }
        if self.server.content_router == self.server.api_router {
            return Err(ConfigError::Invalid(
                "server.content_router and server.api_router must differ".to_string(),
            ));
        }
        if self.search.default_limit == 0 {
            return Err(ConfigError::Invalid(
                "search.default_limit must be positive".to_string(),
            ));
        }
        for plugin in &self.search.plugins {
            if plugin.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "search.plugins entries need a name".to_string(),
                ));
            }
            if !plugin.disable && plugin.command.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "plugin {:?} has no command",
                    plugin.name
                )));
            }
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file
    pub fn init_config_file(path: impl AsRef<Path>, force: bool) -> Result<PathBuf, ConfigError> {
        let path = path.as_ref();
        if !force && path.exists() {
            return Err(ConfigError::Invalid(format!(
                "{} already exists. Use --force to overwrite",
                path.display()
            )));
        }

        Settings::default().save(path)?;
        Ok(path.to_path_buf())
    }
}

/// Command-line values that take precedence over the file.
///
/// Applied at startup and again after every reload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Overrides {
    pub port: Option<u16>,
    pub snapshot: bool,
}

impl Overrides {
    pub fn apply(self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.snapshot {
            settings.snapshot.enabled = true;
        }
    }
}

/// One version of the configuration as seen by readers.
#[derive(Debug)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub settings: Settings,
}

impl Deref for ConfigSnapshot {
    type Target = Settings;

    fn deref(&self) -> &Settings {
        &self.settings
    }
}

/// The live configuration shared by requests and background tasks.
///
/// Readers clone the current `Arc<ConfigSnapshot>` under a short read lock
/// and never hold the lock while doing I/O. The hot-reload coordinator is
/// the only writer; it replaces the whole snapshot at once.
#[derive(Debug)]
pub struct LiveConfig {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl LiveConfig {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(ConfigSnapshot {
                version: 1,
                settings,
            })),
        }
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Replace the configuration, returning the new version.
    pub fn replace(&self, settings: Settings) -> u64 {
        self.commit(settings, |_| {})
    }

    /// Replace the configuration and run `derived` while the write lock is
    /// still held, so dependent live objects flip together with the snapshot.
    pub fn commit<F>(&self, settings: Settings, derived: F) -> u64
    where
        F: FnOnce(&ConfigSnapshot),
    {
        let mut guard = self.current.write();
        let next = Arc::new(ConfigSnapshot {
            version: guard.version + 1,
            settings,
        });
        derived(&next);
        let version = next.version;
        *guard = next;
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.server.content_router, "/blog");
        assert_eq!(settings.rate_limit.per_second, 5);
        assert_eq!(settings.search.default_strategy, "title");
        assert!(!settings.snapshot.enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("yb.toml");

        let toml_content = r#"
[server]
port = 9090
content_router = "/notes"

[rate_limit]
per_second = 2

[privacy]
private = ["drafts/"]

[[search.plugins]]
name = "grep"
command = "rg"
args = ["-l"]
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.content_router, "/notes");
        assert_eq!(settings.rate_limit.per_second, 2);
        // Untouched fields keep their defaults
        assert_eq!(settings.rate_limit.per_minute, 30);
        assert_eq!(settings.privacy.private, vec!["drafts/"]);
        assert_eq!(settings.search.plugins.len(), 1);
        assert_eq!(settings.search.plugins[0].args, vec!["-l"]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = Settings::load_from(temp_dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("yb.toml");
        fs::write(&config_path, "[server\nport = ").unwrap();

        let err = Settings::load_from(&config_path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_router_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("yb.toml");
        fs::write(&config_path, "[server]\ncontent_router = \"blog/\"\n").unwrap();

        let err = Settings::load_from(&config_path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested/yb.toml");

        let mut settings = Settings::default();
        settings.server.port = 9999;
        settings.snapshot.enabled = true;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        settings.resolve_relative_to(&temp_dir.path().join("nested"));
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_relative_paths_follow_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let site = temp_dir.path().join("site");
        let config_path = site.join("yb.toml");
        fs::create_dir_all(&site).unwrap();
        fs::write(
            &config_path,
            "[content]\nroot = \"notes\"\n[snapshot]\noutput_dir = \"/var/www/out\"\n",
        )
        .unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.content.root, site.join("notes"));
        assert_eq!(settings.snapshot.output_dir, PathBuf::from("/var/www/out"));
    }

    #[test]
    fn test_bare_file_name_keeps_paths_relative() {
        let mut settings = Settings::default();
        settings.resolve_relative_to(Path::new(""));
        assert_eq!(settings.content.root, PathBuf::from("blog"));
        assert_eq!(settings.snapshot.output_dir, PathBuf::from("public"));
    }

    #[test]
    fn test_overrides_apply() {
        let mut settings = Settings::default();
        Overrides {
            port: Some(9000),
            snapshot: true,
        }
        .apply(&mut settings);
        assert_eq!(settings.server.port, 9000);
        assert!(settings.snapshot.enabled);

        let mut untouched = Settings::default();
        Overrides::default().apply(&mut untouched);
        assert_eq!(untouched, Settings::default());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("yb.toml");

        Settings::init_config_file(&config_path, false).unwrap();
        assert!(Settings::init_config_file(&config_path, false).is_err());
        assert!(Settings::init_config_file(&config_path, true).is_ok());
    }

    #[test]
    fn test_live_config_versions() {
        let live = LiveConfig::new(Settings::default());
        assert_eq!(live.version(), 1);

        let before = live.snapshot();
        let mut next = Settings::default();
        next.server.port = 1234;
        assert_eq!(live.replace(next), 2);

        // Old readers keep the snapshot they took
        assert_eq!(before.server.port, 8080);
        assert_eq!(live.snapshot().server.port, 1234);
    }

    #[test]
    fn test_commit_runs_derived_update_before_publish() {
        let live = LiveConfig::new(Settings::default());
        let mut seen = None;
        live.commit(Settings::default(), |snap| seen = Some(snap.version));
        assert_eq!(seen, Some(2));
    }

    #[test]
    fn test_readers_never_see_mixed_versions() {
        let live = Arc::new(LiveConfig::new(Settings::default()));

        let writer = {
            let live = Arc::clone(&live);
            std::thread::spawn(move || {
                for i in 1..500u32 {
                    let mut s = Settings::default();
                    s.rate_limit.per_second = i;
                    s.rate_limit.per_minute = i;
                    s.rate_limit.per_hour = i;
                    live.replace(s);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let live = Arc::clone(&live);
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        let snap = live.snapshot();
                        let limits = snap.rate_limit;
                        if snap.version > 1 {
                            assert_eq!(limits.per_second, limits.per_minute);
                            assert_eq!(limits.per_minute, limits.per_hour);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(live.version(), 500);
    }
}
