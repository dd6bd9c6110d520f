use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::embeddings::OllamaClient;
use crate::llm::AzureOpenAiClient;
use crate::mcp::{McpServer, register_knowledge_tools};
use crate::service::KnowledgeBase;

const CLEAR_COMMAND: &str = "/clear";
const EXIT_COMMAND: &str = "/exit";
/// Memory is per process, so a one-shot question always starts a fresh conversation
const ONE_SHOT_CONVERSATION: &str = "ask";

async fn open_knowledge_base(config_dir: &Path) -> Result<KnowledgeBase> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    KnowledgeBase::open(&config)
        .await
        .context("Failed to open knowledge base")
}

fn spinner(message: String) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Extract, segment and index one document from disk
#[inline]
pub async fn upload_file(config_dir: &Path, file: &Path) -> Result<()> {
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("Not a file path: {}", file.display()))?;

    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let knowledge_base = open_knowledge_base(config_dir).await?;

    let bar = spinner(format!("Indexing {filename}"));
    let result = knowledge_base.upload(bytes, &filename).await;
    bar.finish_and_clear();

    let report = result.with_context(|| format!("Failed to upload {filename}"))?;
    if report.chunks == 0 {
        println!(
            "⚠️  {} contained no text; nothing was indexed",
            style(&report.filename).bold()
        );
    } else {
        println!(
            "✅ Uploaded {}: {} characters indexed as {} chunks",
            style(&report.filename).bold(),
            report.characters,
            report.chunks
        );
    }
    Ok(())
}

/// Answer a single question without history and print the answer
#[inline]
pub async fn ask(config_dir: &Path, question: &str) -> Result<()> {
    let knowledge_base = open_knowledge_base(config_dir).await?;

    let bar = spinner("Thinking".to_string());
    let result = knowledge_base.query(ONE_SHOT_CONVERSATION, question).await;
    bar.finish_and_clear();

    println!("{}", result.context("Failed to answer question")?);
    Ok(())
}

/// Interactive question loop within one conversation
#[inline]
pub async fn chat(config_dir: &Path, conversation_id: &str) -> Result<()> {
    let knowledge_base = open_knowledge_base(config_dir).await?;

    println!(
        "{}",
        style(format!("Conversation '{conversation_id}'")).bold()
    );
    println!(
        "{}",
        style(format!(
            "Type {CLEAR_COMMAND} to forget the conversation, {EXIT_COMMAND} to quit"
        ))
        .dim()
    );

    loop {
        let line = tokio::task::spawn_blocking(|| {
            Input::<String>::new().with_prompt("You").interact_text()
        })
        .await
        .context("Input task failed")?
        .context("Failed to read input")?;

        let question = line.trim();
        match question {
            "" => continue,
            EXIT_COMMAND => break,
            CLEAR_COMMAND => {
                knowledge_base.clear_memory(conversation_id).await;
                println!(
                    "{}",
                    style(format!("Memory cleared for conversation {conversation_id}")).dim()
                );
            }
            _ => {
                let bar = spinner("Thinking".to_string());
                let result = knowledge_base.query(conversation_id, question).await;
                bar.finish_and_clear();

                match result {
                    Ok(answer) => println!("{} {}", style("Assistant:").cyan().bold(), answer),
                    Err(e) => {
                        error!("Query failed: {}", e);
                        println!("{} {}", style("Error:").red().bold(), e);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Print the state of the index and its collaborators
#[inline]
pub async fn show_status(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    println!("📊 Knowledge Chat Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match client.health_check() {
            Ok(()) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                println!("   📋 Model: {}", config.ollama.model);
                println!("   🔢 Batch Size: {}", config.ollama.batch_size);
            }
            Err(e) => {
                println!("   ⚠️  Ollama: Unhealthy - {e:#}");
            }
        },
        Err(e) => {
            println!("   ❌ Ollama: Invalid configuration - {e:#}");
        }
    }

    println!();
    println!("🧠 Language Model:");
    match AzureOpenAiClient::new(&config.llm) {
        Ok(client) => {
            println!("   🌐 Endpoint: {}", client.completions_url());
            if client.has_api_key() {
                println!("   ✅ API key: present in ${}", config.llm.api_key_env);
            } else {
                println!("   ❌ API key: ${} is not set", config.llm.api_key_env);
            }
        }
        Err(e) => {
            println!("   ❌ Invalid configuration - {e:#}");
        }
    }

    println!();
    println!("🔍 Vector Index:");
    println!("   📁 Path: {}", config.vector_database_path().display());
    println!("   🗂️  Table: {}", config.vector_store.table);
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match crate::database::VectorStore::open(&config, Arc::new(client)).await {
            Ok(store) => match store.count_records().await {
                Ok(count) => println!("   ✅ Records: {count}"),
                Err(e) => println!("   ⚠️  Records: unknown - {e}"),
            },
            Err(e) => println!("   ❌ LanceDB: {e}"),
        },
        Err(e) => println!("   ❌ LanceDB: skipped - {e:#}"),
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'knowledge-chat upload <file>' to index a document");
    println!("   • Use 'knowledge-chat chat' to ask questions interactively");
    println!("   • Use 'knowledge-chat serve' to start the MCP server for AI assistants");

    Ok(())
}

/// Build the approximate nearest-neighbor index over stored vectors
#[inline]
pub async fn build_index(config_dir: &Path) -> Result<()> {
    let knowledge_base = open_knowledge_base(config_dir).await?;

    let bar = spinner("Building vector index".to_string());
    let result = knowledge_base.index().create_vector_index().await;
    bar.finish_and_clear();

    if result.context("Failed to build vector index")? {
        println!("✅ Vector index built");
    } else {
        println!("ℹ️  Not enough records for an approximate index yet; searches stay exact");
    }
    Ok(())
}

/// Serve the knowledge base over MCP on stdio until the client disconnects
#[inline]
pub async fn serve_mcp(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    match OllamaClient::new(&config.ollama)?.health_check() {
        Ok(()) => info!(
            "Ollama connected at {}:{} with model {}",
            config.ollama.host, config.ollama.port, config.ollama.model
        ),
        Err(e) => warn!("Ollama may not be ready; uploads and queries may fail: {:#}", e),
    }

    let knowledge_base = Arc::new(
        KnowledgeBase::open(&config)
            .await
            .context("Failed to open knowledge base")?,
    );

    let server = McpServer::new("knowledge-chat", env!("CARGO_PKG_VERSION")).with_instructions(
        "Knowledge base chat: upload documents, then ask questions within a conversation",
    );
    register_knowledge_tools(&server, &knowledge_base).await;

    // stdout carries the protocol
    eprintln!(
        "MCP server ready with tools: {}",
        server.tool_names().await.join(", ")
    );

    tokio::select! {
        result = server.serve_stdio() => {
            result.context("MCP server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Received interrupt signal, shutting down...");
        }
    }

    Ok(())
}
