// Knowledge base service
// The upload, query and clear-memory operations wired to their collaborators


use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::chat::ChatPipeline;
use crate::config::Config;
use crate::database::VectorStore;
use crate::documents::extract_text;
use crate::embeddings::{Embedder, OllamaClient, Segmenter};
use crate::llm::{AzureOpenAiClient, LanguageModel};
use crate::memory::{ConversationMemory, MemoryPolicy};
use crate::{KnowledgeError, Result};

/// Outcome of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub filename: String,
    /// Characters of text extracted from the document
    pub characters: usize,
    /// Chunks written to the index
    pub chunks: usize,
}

/// Document ingestion and question answering over one vector index
#[derive(Debug)]
pub struct KnowledgeBase {
    segmenter: Segmenter,
    index: Arc<VectorStore>,
    memory: Arc<ConversationMemory>,
    pipeline: ChatPipeline,
}

impl KnowledgeBase {
    /// Connect to Ollama, LanceDB and Azure OpenAI as described by `config`
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(
            OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?,
        );
        let model: Arc<dyn LanguageModel> = Arc::new(
            AzureOpenAiClient::new(&config.llm).context("Failed to create language model client")?,
        );

        let index = VectorStore::open(config, embedder).await?;
        let memory = ConversationMemory::new(MemoryPolicy::from(&config.memory));
        let segmenter = Segmenter::new(config.chunking)
            .map_err(|e| KnowledgeError::Config(e.to_string()))?;

        Ok(Self::from_parts(
            segmenter,
            Arc::new(index),
            model,
            Arc::new(memory),
            config.vector_store.top_k,
        ))
    }

    /// Assemble a knowledge base from already constructed collaborators
    #[inline]
    pub fn from_parts(
        segmenter: Segmenter,
        index: Arc<VectorStore>,
        model: Arc<dyn LanguageModel>,
        memory: Arc<ConversationMemory>,
        top_k: usize,
    ) -> Self {
        let pipeline =
            ChatPipeline::new(Arc::clone(&index), model, Arc::clone(&memory)).with_top_k(top_k);
        Self {
            segmenter,
            index,
            memory,
            pipeline,
        }
    }

    #[inline]
    pub fn index(&self) -> &Arc<VectorStore> {
        &self.index
    }

    #[inline]
    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    /// Extract, segment and index an uploaded document
    #[inline]
    pub async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<UploadReport> {
        info!("Uploading {} ({} bytes)", filename, bytes.len());

        let name = filename.to_string();
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, &name))
            .await
            .map_err(|e| KnowledgeError::ExtractionFailed(format!("Extraction task failed: {e}")))??;

        let chunks = self.segmenter.segment(&text);
        debug!("{} produced {} chunks", filename, chunks.len());

        let stored = self.index.ingest_chunks(&chunks, Some(filename)).await?;

        info!("Indexed {} chunks from {}", stored, filename);
        Ok(UploadReport {
            filename: filename.to_string(),
            characters: text.chars().count(),
            chunks: stored,
        })
    }

    /// Answer a question within a conversation
    #[inline]
    pub async fn query(&self, conversation_id: &str, question: &str) -> Result<String> {
        self.memory.evict_idle().await;
        self.pipeline.ask(conversation_id, question).await
    }

    /// Forget a conversation; always succeeds
    #[inline]
    pub async fn clear_memory(&self, conversation_id: &str) {
        self.memory.clear(conversation_id).await;
    }
}
