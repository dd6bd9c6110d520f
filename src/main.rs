use anyhow::Result;
use clap::{Parser, Subcommand};
use knowledge_chat::commands::{ask, build_index, chat, serve_mcp, show_status, upload_file};
use knowledge_chat::config::{Config, get_config_dir, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "knowledge-chat")]
#[command(about = "Chat with your documents: retrieval-augmented answers with conversation memory")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the vector database [default: $KNOWLEDGE_CHAT_HOME or ~/.knowledge-chat]
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama, the language model and chunking
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Index a PDF or text document
    Upload {
        /// Path of the document
        file: PathBuf,
    },
    /// Ask a single question, without conversation history
    Ask {
        /// The question
        question: String,
    },
    /// Ask questions interactively; history is kept until the session ends
    Chat {
        /// Name of the conversation within this session
        #[arg(long, default_value = "default")]
        conversation: String,
    },
    /// Start MCP server on stdio
    Serve,
    /// Show the state of the index and its services
    Status,
    /// Build the approximate nearest-neighbor index
    Index,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                let config = Config::load(&config_dir)?;
                show_config(&config)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Upload { file } => {
            upload_file(&config_dir, &file).await?;
        }
        Commands::Ask { question } => {
            ask(&config_dir, &question).await?;
        }
        Commands::Chat { conversation } => {
            chat(&config_dir, &conversation).await?;
        }
        Commands::Serve => {
            serve_mcp(&config_dir).await?;
        }
        Commands::Status => {
            show_status(&config_dir).await?;
        }
        Commands::Index => {
            build_index(&config_dir).await?;
        }
    }

    Ok(())
}
