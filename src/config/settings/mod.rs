
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

/// Environment variable that relocates the base directory
pub const HOME_ENV_VAR: &str = "KNOWLEDGE_CHAT_HOME";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Database location, relative paths resolve against the base directory
    pub path: PathBuf,
    pub table: String,
    /// IVF partitions probed per query once an ANN index exists
    pub nprobes: usize,
    /// Number of chunks retrieved per question
    pub top_k: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vectors"),
            table: "knowledge_base".to_string(),
            nprobes: 20,
            top_k: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://localhost/".to_string(),
            deployment: "gpt-4o".to_string(),
            api_version: "2024-06-01".to_string(),
            temperature: 0.7,
            timeout_secs: 60,
            api_key_env: "AZURE_OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Turns kept per conversation, 0 keeps everything
    pub max_turns: usize,
    /// Seconds of inactivity before a conversation is dropped, 0 never expires
    pub idle_timeout_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            idle_timeout_secs: 3600,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid chunk size: {0} (must be greater than 0)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid table name: {0:?} (cannot be empty)")]
    InvalidTable(String),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid nprobes: {0} (must be greater than 0)")]
    InvalidNprobes(usize),
    #[error("Invalid deployment name: {0:?} (cannot be empty)")]
    InvalidDeployment(String),
    #[error("Invalid API version: {0:?} (cannot be empty)")]
    InvalidApiVersion(String),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error(
        "Memory idle timeout ({0}s) must exceed the language model timeout ({1}s), or be 0 to disable expiry"
    )]
    IdleTimeoutTooShort(u64, u64),
    #[error("Invalid environment override {0}={1}")]
    InvalidOverride(String, String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default base directory, `$KNOWLEDGE_CHAT_HOME` or `~/.knowledge-chat`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os(HOME_ENV_VAR) {
            return Ok(PathBuf::from(home));
        }

        dirs::home_dir()
            .map(|home| home.join(".knowledge-chat"))
            .or_else(|| dirs::data_dir().map(|data| data.join("knowledge-chat")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, then apply environment overrides
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let mut config = Self::load_file(config_dir)?;

        config
            .apply_env_overrides(|key| std::env::var(key).ok())
            .context("Failed to apply environment overrides")?;

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load `config.toml` without consulting the environment
    #[inline]
    pub fn load_file<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Apply the documented environment overrides using `lookup` to read variables
    #[inline]
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("AZURE_OPENAI_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Some(deployment) = lookup("AZURE_OPENAI_DEPLOYMENT_NAME") {
            self.llm.deployment = deployment;
        }
        if let Some(api_version) = lookup("AZURE_OPENAI_API_VERSION") {
            self.llm.api_version = api_version;
        }
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.ollama.host = host;
        }
        if let Some(port) = lookup("OLLAMA_PORT") {
            self.ollama.port = parse_override("OLLAMA_PORT", &port)?;
        }
        if let Some(size) = lookup("KNOWLEDGE_CHAT_CHUNK_SIZE") {
            self.chunking.chunk_size = parse_override("KNOWLEDGE_CHAT_CHUNK_SIZE", &size)?;
        }
        if let Some(overlap) = lookup("KNOWLEDGE_CHAT_CHUNK_OVERLAP") {
            self.chunking.chunk_overlap =
                parse_override("KNOWLEDGE_CHAT_CHUNK_OVERLAP", &overlap)?;
        }
        if let Some(dimension) = lookup("KNOWLEDGE_CHAT_VECTOR_DIM") {
            self.ollama.embedding_dimension =
                parse_override("KNOWLEDGE_CHAT_VECTOR_DIM", &dimension)?;
        }
        if let Some(table) = lookup("KNOWLEDGE_CHAT_TABLE") {
            self.vector_store.table = table;
        }
        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.chunking.validate()?;
        self.vector_store.validate()?;
        self.llm.validate()?;

        // A conversation must outlive the slowest answer generated for it
        let idle = self.memory.idle_timeout_secs;
        if idle != 0 && idle <= self.llm.timeout_secs {
            return Err(ConfigError::IdleTimeoutTooShort(idle, self.llm.timeout_secs));
        }
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        if self.vector_store.path.is_absolute() {
            self.vector_store.path.clone()
        } else {
            self.get_base_dir().join(&self.vector_store.path)
        }
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride(key.to_string(), value.to_string()))
}

impl OllamaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    #[inline]
    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(1..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}

impl VectorStoreConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.trim().is_empty() {
            return Err(ConfigError::InvalidTable(self.table.clone()));
        }

        if !(1..=100).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        if self.nprobes == 0 {
            return Err(ConfigError::InvalidNprobes(self.nprobes));
        }

        Ok(())
    }
}

impl LlmConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_url()?;

        if self.deployment.trim().is_empty() {
            return Err(ConfigError::InvalidDeployment(self.deployment.clone()));
        }

        if self.api_version.trim().is_empty() {
            return Err(ConfigError::InvalidApiVersion(self.api_version.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        Ok(())
    }

    /// Endpoint as a base URL, always ending in `/` so relative joins append
    #[inline]
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let mut endpoint = self.endpoint.trim().to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }

        let url =
            Url::parse(&endpoint).map_err(|_| ConfigError::InvalidUrl(self.endpoint.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }
        Ok(url)
    }

    /// Read the API key from the configured environment variable
    #[inline]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl MemoryConfig {
    /// History window, `None` when unbounded
    #[inline]
    pub fn max_turns(&self) -> Option<usize> {
        (self.max_turns > 0).then_some(self.max_turns)
    }

    /// Idle expiry, `None` when conversations never expire
    #[inline]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}
