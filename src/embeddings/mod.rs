// Embeddings module
// Text segmentation and the Ollama-backed embedding capability

pub mod chunking;
pub mod ollama;

use async_trait::async_trait;

use crate::{KnowledgeError, Result};

pub use chunking::{Chunk, ChunkingConfig, Segmenter, segment};
pub use ollama::OllamaClient;

/// Turns text into fixed-dimension vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed every text, returning one vector per input in the same order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    #[inline]
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| KnowledgeError::Embedding("embedder returned no vector".to_string()))
    }
}
