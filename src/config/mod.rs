// Configuration management module
// TOML settings with environment overrides, plus the interactive editor

pub mod interactive;
pub mod settings;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, LlmConfig, MemoryConfig, OllamaConfig, VectorStoreConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_dir()
}
