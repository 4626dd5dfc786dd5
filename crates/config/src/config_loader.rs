use chatrelay_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Enables the Redis-backed store when set to `"true"`
pub const ENV_DISTRIBUTED_MODE: &str = "ENABLED_DISTRIBUTED_MODE";
pub const ENV_CONNECTION_STRING: &str = "REDIS_CONNECTION_STRING";
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_PORT: &str = "CHATRELAY_PORT";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Conversation store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Use the shared Redis store instead of process memory
    #[serde(default)]
    pub distributed_mode: bool,
    /// Redis URL, only read in distributed mode
    #[serde(default)]
    pub connection_string: Option<String>,
}

/// Remote completion service configuration
///
/// Missing fields take their defaults; `"max_tokens": null` sends no limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Default bearer credential, used when a request carries none
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Stream completions unless a request asks otherwise
    pub stream: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.6,
            max_tokens: Some(100),
            stream: true,
        }
    }
}

impl AppConfig {
    /// Overlay values taken from `lookup`, normally the process environment
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(flag) = lookup(ENV_DISTRIBUTED_MODE) {
            self.store.distributed_mode = flag == "true";
        }
        if let Some(url) = lookup(ENV_CONNECTION_STRING).filter(|s| !s.is_empty()) {
            self.store.connection_string = Some(url);
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|s| !s.is_empty()) {
            self.upstream.api_key = Some(key);
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("{} is not a valid port: {}", ENV_PORT, port)))?;
        }
        Ok(())
    }

    /// Reject combinations that cannot start
    pub fn validate(&self) -> Result<()> {
        if self.store.distributed_mode
            && self.store.connection_string.as_deref().map_or(true, str::is_empty)
        {
            return Err(Error::Config(
                "distributed mode requires a store connection string".into(),
            ));
        }
        if self.upstream.base_url.is_empty() {
            return Err(Error::Config("upstream base_url cannot be empty".into()));
        }
        Ok(())
    }
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file or defaults, then apply the environment
    pub fn load(path: Option<&PathBuf>) -> Result<AppConfig> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file or use defaults
    pub fn load_file(path: Option<&PathBuf>) -> Result<AppConfig> {
        if let Some(path) = path {
            if path.exists() {
                return Self::read(path);
            }
        }

        // Check default locations
        let default_paths = vec![
            PathBuf::from("chatrelay.json"),
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("chatrelay/config.json"),
        ];

        for path in default_paths {
            if path.exists() {
                return Self::read(&path);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(AppConfig::default())
    }

    fn read(path: &PathBuf) -> Result<AppConfig> {
        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(config: &AppConfig, path: &PathBuf) -> Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
