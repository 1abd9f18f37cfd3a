//! Configuration loading from taskflow.toml.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ModelConfig {
    /// API key for the model provider. Falls back to OPENAI_API_KEY.
    pub api_key: Option<String>,

    /// Model to use.
    #[serde(default = "default_model")]
    pub model: String,

    /// Alternative OpenAI-compatible endpoint.
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AuthConfig {
    /// HS256 secret shared with the credential issuer.
    /// Falls back to TASKFLOW_JWT_SECRET.
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    /// Maximum model rounds per request.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Per-tool-call timeout in seconds.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// History cap per session, preamble included.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Inactivity window before a session is evicted.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_rounds() -> usize {
    5
}

fn default_tool_timeout_secs() -> u64 {
    10
}

fn default_max_messages() -> usize {
    21
}

fn default_ttl_hours() -> i64 {
    24
}

fn default_db_path() -> String {
    "taskflow.db".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            ttl_hours: default_ttl_hours(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// The model API key, from config or environment.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.model
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or(ConfigError::MissingApiKey)
    }

    /// The JWT secret, from config or environment.
    pub fn jwt_secret(&self) -> Result<String, ConfigError> {
        self.auth
            .jwt_secret
            .clone()
            .or_else(|| std::env::var("TASKFLOW_JWT_SECRET").ok())
            .ok_or(ConfigError::MissingJwtSecret)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("model API key not configured: set model.api_key or OPENAI_API_KEY")]
    MissingApiKey,

    #[error("JWT secret not configured: set auth.jwt_secret or TASKFLOW_JWT_SECRET")]
    MissingJwtSecret,
}
