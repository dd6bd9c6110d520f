use thiserror::Error;

pub type Result<T> = std::result::Result<T, KnowledgeError>;

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Text extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl KnowledgeError {
    /// Stable machine-readable name of the error kind
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::IndexUnavailable(_) => "index_unavailable",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::Database(_) => "database",
            Self::Embedding(_) => "embedding",
            Self::GenerationFailed(_) => "generation_failed",
            Self::ExtractionFailed(_) => "extraction_failed",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod database;
pub mod documents;
pub mod embeddings;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod service;
