//! Configuration loading for thumbd.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.thumbproxy/config.toml` (user)
//! 3. `/etc/thumbproxy/config.toml` (system)
//!
//! Without any file the built-in defaults apply.
//!
//! Secrets (headers for authenticated asset calls) are loaded separately with
//! mandatory permission checks:
//! 1. `~/.thumbproxy/secrets.toml` (user, must be 0600)
//! 2. `/etc/thumbproxy/secrets.toml` (system, must be 0600)

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::cache::CacheConfig;
use crate::fetch::{RequestOptions, RetryPolicy};
use crate::upstream::{DEFAULT_ASSET_URL, DEFAULT_THUMBNAIL_URL, UpstreamApi};
use crate::{ProxyError, Result};

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub retry: RetrySection,
}

/// Server network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0:3000).
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:3000".to_string()
}

impl ServerConfig {
    /// Parse the bind address, letting `port` (usually `$PORT`) override the port.
    pub fn bind_address(&self, port: Option<&str>) -> Result<SocketAddr> {
        let mut addr: SocketAddr = self.address.parse().map_err(|e| {
            ProxyError::Configuration(format!("invalid address {:?}: {e}", self.address))
        })?;
        if let Some(port) = port {
            let port = port
                .parse::<u16>()
                .map_err(|_| ProxyError::Configuration(format!("invalid port value: {port}")))?;
            addr.set_port(port);
        }
        Ok(addr)
    }
}

/// Upstream endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_thumbnail_url")]
    pub thumbnail_url: String,
    #[serde(default = "default_asset_url")]
    pub asset_url: String,
    /// Thumbnail size (default: 420x420).
    #[serde(default = "default_size")]
    pub size: String,
    /// Thumbnail format (default: Png).
    #[serde(default = "default_format")]
    pub format: String,
    /// Per-request transport timeout in seconds (default: 10).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            thumbnail_url: default_thumbnail_url(),
            asset_url: default_asset_url(),
            size: default_size(),
            format: default_format(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_thumbnail_url() -> String {
    DEFAULT_THUMBNAIL_URL.to_string()
}

fn default_asset_url() -> String {
    DEFAULT_ASSET_URL.to_string()
}

fn default_size() -> String {
    "420x420".to_string()
}

fn default_format() -> String {
    "Png".to_string()
}

fn default_timeout() -> u64 {
    10
}

impl UpstreamConfig {
    pub fn api(&self) -> UpstreamApi {
        UpstreamApi::new()
            .thumbnail_base(&self.thumbnail_url)
            .asset_base(&self.asset_url)
            .size(&self.size)
            .format(&self.format)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Lookup cache limits.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Lifetime of cached entries in seconds (default: 1800).
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    /// Lifetime of overload placeholders in seconds (default: 60).
    #[serde(default = "default_transient_ttl")]
    pub transient_ttl_secs: u64,
    /// Maximum stored entries (default: 100000).
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            transient_ttl_secs: default_transient_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_ttl() -> u64 {
    30 * 60
}

fn default_transient_ttl() -> u64 {
    60
}

fn default_max_entries() -> u64 {
    100_000
}

impl CacheSection {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .ttl(Duration::from_secs(self.ttl_secs))
            .transient_ttl(Duration::from_secs(self.transient_ttl_secs))
            .max_entries(self.max_entries)
    }
}

/// Retry budgets per call site.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    /// Retries for single lookups and asset calls (default: 3).
    #[serde(default = "default_single_retries")]
    pub single_max_retries: u32,
    /// Retries for batched lookups (default: 5).
    #[serde(default = "default_batch_retries")]
    pub batch_max_retries: u32,
    /// Overall deadline per upstream call in seconds (default: 30).
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            single_max_retries: default_single_retries(),
            batch_max_retries: default_batch_retries(),
            deadline_secs: default_deadline(),
        }
    }
}

fn default_single_retries() -> u32 {
    3
}

fn default_batch_retries() -> u32 {
    5
}

fn default_deadline() -> u64 {
    30
}

impl RetrySection {
    pub fn single_policy(&self) -> RetryPolicy {
        RetryPolicy::single()
            .max_retries(self.single_max_retries)
            .deadline(Duration::from_secs(self.deadline_secs))
    }

    pub fn batch_policy(&self) -> RetryPolicy {
        RetryPolicy::batch()
            .max_retries(self.batch_max_retries)
            .deadline(Duration::from_secs(self.deadline_secs))
    }

    pub fn asset_policy(&self) -> RetryPolicy {
        RetryPolicy::new("asset")
            .max_retries(self.single_max_retries)
            .deadline(Duration::from_secs(self.deadline_secs))
    }
}

/// Secrets configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub asset: Option<AssetSecrets>,
}

/// Headers sent with asset-delivery calls (e.g. a session cookie).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetSecrets {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided; must exist)
    /// 2. `~/.thumbproxy/config.toml`
    /// 3. `/etc/thumbproxy/config.toml`
    /// 4. Built-in defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::from_file(&path),
            None => {
                info!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ProxyError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            ProxyError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(ProxyError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".thumbproxy").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/thumbproxy/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists.
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".thumbproxy").join("secrets.toml");
            if user_secrets.exists() {
                return Self::from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/thumbproxy/secrets.toml");
        if system_secrets.exists() {
            return Self::from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load a secrets file after checking its permissions.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            ProxyError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            ProxyError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            ProxyError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(ProxyError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Request options for asset-delivery calls.
    pub fn asset_options(&self) -> Result<RequestOptions> {
        let Some(asset) = &self.asset else {
            return Ok(RequestOptions::new());
        };
        asset
            .headers
            .iter()
            .try_fold(RequestOptions::new(), |options, (name, value)| {
                options.header(name, value)
            })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.address, "0.0.0.0:3000");
        assert_eq!(config.upstream.thumbnail_url, DEFAULT_THUMBNAIL_URL);
        assert_eq!(config.upstream.timeout_secs, 10);
        assert_eq!(config.cache.ttl_secs, 1800);
        assert_eq!(config.cache.transient_ttl_secs, 60);
        assert_eq!(config.retry.single_max_retries, 3);
        assert_eq!(config.retry.batch_max_retries, 5);
    }

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
            [server]
            address = "127.0.0.1:8080"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.address, "127.0.0.1:8080");
        // Defaults preserved
        assert_eq!(config.cache.max_entries, 100_000);
        assert_eq!(config.upstream.size, "420x420");
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [server]
            address = "127.0.0.1:3000"

            [upstream]
            thumbnail_url = "http://localhost:9000/v1/assets"
            asset_url = "http://localhost:9000/v1/assetId"
            size = "150x150"
            format = "Jpeg"
            timeout_secs = 3

            [cache]
            ttl_secs = 600
            transient_ttl_secs = 15
            max_entries = 500

            [retry]
            single_max_retries = 1
            batch_max_retries = 7
            deadline_secs = 12
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.upstream.api().thumbnails_url(&["5"]),
            "http://localhost:9000/v1/assets?assetIds=5&size=150x150&format=Jpeg"
        );
        assert_eq!(config.upstream.timeout(), Duration::from_secs(3));

        let cache = config.cache.cache_config();
        assert_eq!(cache.ttl, Duration::from_secs(600));
        assert_eq!(cache.transient_ttl, Duration::from_secs(15));
        assert_eq!(cache.max_entries, 500);

        let batch = config.retry.batch_policy();
        assert_eq!(batch.max_retries, 7);
        assert_eq!(batch.deadline, Some(Duration::from_secs(12)));
        assert_eq!(config.retry.single_policy().max_retries, 1);
        assert_eq!(config.retry.asset_policy().name, "asset");
    }

    #[test]
    fn bind_address_respects_port_override() {
        let server = ServerConfig::default();
        assert_eq!(server.bind_address(None).unwrap().port(), 3000);
        assert_eq!(server.bind_address(Some("8081")).unwrap().port(), 8081);
        assert!(server.bind_address(Some("http")).is_err());

        let bad = ServerConfig {
            address: "not-an-address".into(),
        };
        assert!(bad.bind_address(None).is_err());
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn config_loads_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nttl_secs = 42").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.cache.ttl_secs, 42);
    }

    #[test]
    fn parse_secrets_into_headers() {
        let toml = r#"
            [asset.headers]
            Cookie = ".SESSION=abc"
            "X-Client" = "thumbd"
        "#;
        let secrets: Secrets = toml::from_str(toml).unwrap();
        let options = secrets.asset_options().unwrap();
        assert_eq!(options.headers["cookie"], ".SESSION=abc");
        assert_eq!(options.headers["x-client"], "thumbd");
    }

    #[test]
    fn missing_secrets_mean_no_headers() {
        let options = Secrets::default().asset_options().unwrap();
        assert!(options.headers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn secrets_with_open_permissions_are_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[asset.headers]\nCookie = \"x\"").unwrap();
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o644)).unwrap();
        let err = Secrets::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("insecure permissions"));

        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600)).unwrap();
        let secrets = Secrets::from_file(file.path()).unwrap();
        assert!(secrets.asset.is_some());
    }
}
