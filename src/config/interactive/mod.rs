
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, LlmConfig, OllamaConfig};
use crate::embeddings::chunking::ChunkingConfig;

#[inline]
pub fn run_interactive_config(config_dir: &std::path::Path) -> Result<()> {
    eprintln!("{}", style("🔧 Knowledge Chat Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure the Ollama instance used for embedding generation.");
    eprintln!();
    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Language Model Configuration").bold().yellow());
    eprintln!("Configure the Azure OpenAI deployment that answers questions.");
    eprintln!();
    configure_llm(&mut config.llm)?;

    eprintln!();
    eprintln!("{}", style("Document Segmentation").bold().yellow());
    configure_chunking(&mut config.chunking)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before uploading.");
    }

    if config.llm.api_key().is_none() {
        eprintln!(
            "{}",
            style(format!(
                "⚠ Warning: {} is not set, questions cannot be answered until it is",
                config.llm.api_key_env
            ))
            .yellow()
        );
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    eprintln!(
        "  Embedding Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Language Model:").bold().yellow());
    eprintln!("  Endpoint: {}", style(&config.llm.endpoint).cyan());
    eprintln!("  Deployment: {}", style(&config.llm.deployment).cyan());
    eprintln!("  API Version: {}", style(&config.llm.api_version).cyan());
    eprintln!("  Temperature: {}", style(config.llm.temperature).cyan());
    let key_state = if config.llm.api_key().is_some() {
        style("set".to_string()).green()
    } else {
        style("missing".to_string()).red()
    };
    eprintln!("  API Key ({}): {}", config.llm.api_key_env, key_state);

    eprintln!();
    eprintln!("{}", style("Vector Store:").bold().yellow());
    eprintln!(
        "  Path: {}",
        style(config.vector_database_path().display()).cyan()
    );
    eprintln!("  Table: {}", style(&config.vector_store.table).cyan());
    eprintln!("  Top K: {}", style(config.vector_store.top_k).cyan());

    eprintln!();
    eprintln!("{}", style("Segmentation & Memory:").bold().yellow());
    eprintln!(
        "  Chunk Size / Overlap: {} / {}",
        style(config.chunking.chunk_size).cyan(),
        style(config.chunking.chunk_overlap).cyan()
    );
    eprintln!(
        "  History Window: {}",
        style(config.memory.max_turns().map_or_else(|| "unbounded".to_string(), |n| n.to_string())).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &std::path::Path) -> Config {
    match Config::load_file(config_dir) {
        Ok(config) if config.config_file_path().exists() => {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        }
        Ok(config) => {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            config
        }
        Err(e) => {
            eprintln!(
                "{}",
                style(format!("Existing configuration unreadable ({e}). Using defaults.")).yellow()
            );
            Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            }
        }
    }
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;
    ollama.protocol = protocols[protocol_index].to_string();

    let protocol = ollama.protocol.clone();
    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            }
            .validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .interact_text()?;

    let dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(ollama.embedding_dimension)
        .interact_text()?;

    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_embedding_dimension(dimension)?;

    Ok(())
}

fn configure_llm(llm: &mut LlmConfig) -> Result<()> {
    llm.endpoint = Input::new()
        .with_prompt("Azure OpenAI endpoint")
        .default(llm.endpoint.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            LlmConfig {
                endpoint: input.clone(),
                ..LlmConfig::default()
            }
            .endpoint_url()
            .map(|_| ())
        })
        .interact_text()?;

    llm.deployment = Input::new()
        .with_prompt("Deployment name")
        .default(llm.deployment.clone())
        .interact_text()?;

    llm.api_version = Input::new()
        .with_prompt("API version")
        .default(llm.api_version.clone())
        .interact_text()?;

    llm.validate()?;
    Ok(())
}

fn configure_chunking(chunking: &mut ChunkingConfig) -> Result<()> {
    let chunk_size: usize = Input::new()
        .with_prompt("Chunk size (characters)")
        .default(chunking.chunk_size)
        .interact_text()?;

    let chunk_overlap: usize = Input::new()
        .with_prompt("Chunk overlap (characters)")
        .default(chunking.chunk_overlap)
        .validate_with(|input: &usize| -> Result<(), ConfigError> {
            ChunkingConfig {
                chunk_size,
                chunk_overlap: *input,
            }
            .validate()
        })
        .interact_text()?;

    chunking.chunk_size = chunk_size;
    chunking.chunk_overlap = chunk_overlap;
    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
