use crate::catalog::CatalogOptions;
use crate::cli::Cli;
use crate::http_client::{HttpClientConfig, parse_proxy};
use crate::resolver::{ResolverOptions, TOO_MANY_SCHEMAS};
use crate::tar_writer::{FileOwnership, MAX_OCTAL_ID};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub network: NetworkConfig,
    pub resolution: ResolutionConfig,
    /// Ownership stamped on archive entries
    pub archive: FileOwnership,
}

/// On-disk store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Root holding `schemas/` and `collections/`
    pub data_root: PathBuf,
    /// Collections untouched for longer than this are evicted
    pub collection_ttl_days: u64,
    /// How long to wait for a file lock
    pub lock_timeout_seconds: u64,
    /// Create a missing collection on first save instead of refusing
    pub auto_create_collections: bool,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Caching proxy, `host` or `host:port`
    pub proxy: Option<String>,
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
    /// Redirects followed per schema location
    pub max_redirects: usize,
    pub user_agent: String,
}

/// Resolution limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Schemas considered for one document before giving up
    pub max_schemas: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_root: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("xmlresolution"),
            collection_ttl_days: 14,
            lock_timeout_seconds: 10,
            auto_create_collections: false,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let client = HttpClientConfig::default();
        Self {
            proxy: None,
            timeout_seconds: client.timeout_seconds,
            max_redirects: crate::catalog::MAX_REDIRECTS,
            user_agent: client.user_agent,
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            max_schemas: TOO_MANY_SCHEMAS,
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }

    pub fn collection_ttl(&self) -> Duration {
        Duration::from_secs(self.collection_ttl_days * 24 * 60 * 60)
    }
}

impl Config {
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout_seconds: self.network.timeout_seconds,
            user_agent: self.network.user_agent.clone(),
            proxy: self.network.proxy.clone(),
        }
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            max_schemas: self.resolution.max_schemas,
            catalog: CatalogOptions {
                max_redirects: self.network.max_redirects,
                lock_timeout: self.store.lock_timeout(),
            },
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider, cli).await
    }

    pub async fn load_config_with(env: &impl EnvProvider, cli: &Cli) -> Result<Config> {
        let mut config = match &cli.config {
            Some(config_path) => Self::load_from_file(config_path).await?,
            None => Self::find_config_file().await?.unwrap_or_default(),
        };

        config = Self::apply_environment_overrides_with(env, config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "xmlresolution.toml",
            "xmlresolution.json",
            ".xmlresolution.toml",
            ".xmlresolution.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("xmlresolution");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(data_root) = env.get("XMLRESOLUTION_DATA_ROOT") {
            config.store.data_root = PathBuf::from(data_root);
        }

        if let Some(proxy) = env.get("XMLRESOLUTION_PROXY") {
            config.network.proxy = if proxy.trim().is_empty() {
                None
            } else {
                Some(proxy)
            };
        }

        if let Some(timeout) = env.get("XMLRESOLUTION_TIMEOUT") {
            config.network.timeout_seconds = parse_env("XMLRESOLUTION_TIMEOUT", &timeout)?;
        }

        if let Some(max_schemas) = env.get("XMLRESOLUTION_MAX_SCHEMAS") {
            config.resolution.max_schemas = parse_env("XMLRESOLUTION_MAX_SCHEMAS", &max_schemas)?;
        }

        if let Some(ttl) = env.get("XMLRESOLUTION_COLLECTION_TTL_DAYS") {
            config.store.collection_ttl_days = parse_env("XMLRESOLUTION_COLLECTION_TTL_DAYS", &ttl)?;
        }

        if let Some(lock_timeout) = env.get("XMLRESOLUTION_LOCK_TIMEOUT") {
            config.store.lock_timeout_seconds =
                parse_env("XMLRESOLUTION_LOCK_TIMEOUT", &lock_timeout)?;
        }

        if let Some(auto_create) = env.get("XMLRESOLUTION_AUTO_CREATE") {
            config.store.auto_create_collections =
                parse_env("XMLRESOLUTION_AUTO_CREATE", &auto_create)?;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(data_root) = &cli.data_root {
            config.store.data_root = data_root.clone();
        }
        if let Some(proxy) = &cli.proxy {
            config.network.proxy = Some(proxy.clone());
        }
        if let Some(timeout) = cli.timeout {
            config.network.timeout_seconds = timeout;
        }
        if let Some(max_schemas) = cli.max_schemas {
            config.resolution.max_schemas = max_schemas;
        }
        if cli.auto_create {
            config.store.auto_create_collections = true;
        }

        config
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.store.collection_ttl_days == 0 {
            return Err(ConfigError::Validation(
                "Collection TTL must be greater than 0".to_string(),
            ));
        }

        if config.store.lock_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Lock timeout must be greater than 0".to_string(),
            ));
        }

        if config.network.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(proxy) = &config.network.proxy {
            parse_proxy(proxy).map_err(|e| ConfigError::Validation(e.to_string()))?;
        }

        if config.resolution.max_schemas == 0 {
            return Err(ConfigError::Validation(
                "Maximum schema count must be greater than 0".to_string(),
            ));
        }

        if config.archive.uid > MAX_OCTAL_ID || config.archive.gid > MAX_OCTAL_ID {
            return Err(ConfigError::Validation(format!(
                "Archive uid and gid must not exceed {}",
                MAX_OCTAL_ID
            )));
        }

        if config.archive.username.is_empty() || config.archive.groupname.is_empty() {
            return Err(ConfigError::Validation(
                "Archive owner and group names must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
}
