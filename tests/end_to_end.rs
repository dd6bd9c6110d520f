#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! End-to-end tests: upload, retrieval, generation and memory against an on-disk LanceDB

use async_trait::async_trait;
use knowledge_chat::database::VectorStore;
use knowledge_chat::embeddings::{ChunkingConfig, Embedder, Segmenter};
use knowledge_chat::llm::{ChatMessage, LanguageModel, Role};
use knowledge_chat::memory::{ConversationMemory, MemoryPolicy};
use knowledge_chat::service::KnowledgeBase;
use knowledge_chat::{KnowledgeError, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const KEYWORDS: [&str; 3] = ["refund", "shipping", "warranty"];

const DOCUMENT: &str = "Refunds take five business days.\n\n\
                        Shipping is free above 50 euros.\n\n\
                        Warranty covers two full years.";

/// Embeds text as keyword counts so nearest neighbors are predictable
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                KEYWORDS
                    .iter()
                    .map(|word| lower.matches(word).count() as f32)
                    .collect()
            })
            .collect())
    }
}

/// Records every prompt; answers with a numbered reply or fails on demand
#[derive(Default)]
struct RecordingModel {
    fail: bool,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl RecordingModel {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().expect("prompt lock").clone()
    }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut prompts = self.prompts.lock().expect("prompt lock");
        prompts.push(messages.to_vec());
        if self.fail {
            return Err(KnowledgeError::GenerationFailed(
                "HTTP 503: deployment overloaded".to_string(),
            ));
        }
        Ok(format!("answer {}", prompts.len()))
    }
}

/// Takes longer than the memory idle timeout for questions mentioning "slowly"
struct SlowModel;

#[async_trait]
impl LanguageModel for SlowModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let question = messages.last().map_or("", |m| m.content.as_str());
        if question.contains("slowly") {
            tokio::time::sleep(Duration::from_millis(1500)).await;
        }
        Ok(format!("reply after {} messages", messages.len()))
    }
}

async fn knowledge_base(
    temp_dir: &TempDir,
    model: Arc<RecordingModel>,
    top_k: usize,
) -> KnowledgeBase {
    knowledge_base_with(temp_dir, model, MemoryPolicy::default(), top_k).await
}

async fn knowledge_base_with(
    temp_dir: &TempDir,
    model: Arc<dyn LanguageModel>,
    policy: MemoryPolicy,
    top_k: usize,
) -> KnowledgeBase {
    // Several tests share the process; only the first install wins
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let store = VectorStore::connect(
        &temp_dir.path().join("vectors"),
        "knowledge_base",
        KEYWORDS.len(),
        1,
        Arc::new(KeywordEmbedder),
    )
    .await
    .expect("should open vector store");

    let segmenter = Segmenter::new(ChunkingConfig {
        chunk_size: 40,
        chunk_overlap: 4,
    })
    .expect("valid chunking config");

    KnowledgeBase::from_parts(
        segmenter,
        Arc::new(store),
        model,
        Arc::new(ConversationMemory::new(policy)),
        top_k,
    )
}

#[tokio::test]
async fn document_of_three_chunks_is_fully_retrieved() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let kb = knowledge_base(&temp_dir, Arc::new(RecordingModel::default()), 4).await;

    let report = kb
        .upload(DOCUMENT.as_bytes().to_vec(), "policies.txt")
        .await
        .expect("upload should succeed");
    assert_eq!(report.chunks, 3);

    let hits = kb
        .index()
        .query("How long does a refund take?", 4)
        .await
        .expect("query should succeed");
    assert_eq!(hits.len(), 3);
    assert!(hits[0].contains("Refunds take five business days."));
    assert!(hits.iter().any(|hit| hit.contains("Shipping")));
    assert!(hits.iter().any(|hit| hit.contains("Warranty")));
}

#[tokio::test]
async fn unknown_conversation_starts_empty_and_gains_one_turn() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let model = Arc::new(RecordingModel::default());
    let kb = knowledge_base(&temp_dir, Arc::clone(&model), 4).await;
    kb.upload(DOCUMENT.as_bytes().to_vec(), "policies.txt")
        .await
        .expect("upload should succeed");

    assert!(!kb.memory().contains("brand-new").await);

    let answer = kb
        .query("brand-new", "Is shipping free?")
        .await
        .expect("query should succeed");
    assert_eq!(answer, "answer 1");

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 1);
    // System instruction and the question only: no history
    assert_eq!(prompts[0].len(), 2);
    assert_eq!(prompts[0][0].role, Role::System);

    let history = kb.memory().history("brand-new").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].user, "Is shipping free?");
    assert_eq!(history[0].assistant, "answer 1");
}

#[tokio::test]
async fn generation_failure_appends_no_turn() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let kb = knowledge_base(&temp_dir, Arc::new(RecordingModel::failing()), 4).await;
    kb.upload(DOCUMENT.as_bytes().to_vec(), "policies.txt")
        .await
        .expect("upload should succeed");

    let error = kb
        .query("c-1", "What does the warranty cover?")
        .await
        .expect_err("generation should fail");
    assert!(matches!(error, KnowledgeError::GenerationFailed(_)));
    assert_eq!(error.kind(), "generation_failed");
    assert!(kb.memory().history("c-1").await.is_empty());
}

#[tokio::test]
async fn second_query_sees_first_turn_as_history() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let model = Arc::new(RecordingModel::default());
    let kb = knowledge_base(&temp_dir, Arc::clone(&model), 4).await;
    kb.upload(DOCUMENT.as_bytes().to_vec(), "policies.txt")
        .await
        .expect("upload should succeed");

    kb.query("c-2", "How long do refunds take?")
        .await
        .expect("first query should succeed");
    kb.query("c-2", "And the warranty?")
        .await
        .expect("second query should succeed");

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 2);

    let second = &prompts[1];
    assert_eq!(second.len(), 4);
    assert_eq!(second[0].role, Role::System);
    assert_eq!(second[1], ChatMessage::user("How long do refunds take?"));
    assert_eq!(second[2], ChatMessage::assistant("answer 1"));
    assert_eq!(second[3].role, Role::User);
    assert!(second[3].content.starts_with("Question: And the warranty?"));

    assert_eq!(kb.memory().history("c-2").await.len(), 2);
}

#[tokio::test]
async fn conversations_do_not_share_history() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let model = Arc::new(RecordingModel::default());
    let kb = knowledge_base(&temp_dir, Arc::clone(&model), 4).await;

    kb.query("alice", "First question")
        .await
        .expect("query should succeed");
    kb.query("bob", "Second question")
        .await
        .expect("query should succeed");

    let prompts = model.prompts();
    assert_eq!(prompts[1].len(), 2);
    assert_eq!(kb.memory().history("alice").await.len(), 1);
    assert_eq!(kb.memory().history("bob").await.len(), 1);
}

#[tokio::test]
async fn slow_answer_survives_idle_eviction_by_other_conversation() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let policy = MemoryPolicy {
        max_turns: None,
        idle_timeout: Some(Duration::from_secs(1)),
    };
    let kb = knowledge_base_with(&temp_dir, Arc::new(SlowModel), policy, 4).await;

    kb.query("long", "What is the refund window?")
        .await
        .expect("first query should succeed");

    // The other conversation evicts idle ones while the slow answer is still generating
    let (slow, other) = tokio::join!(kb.query("long", "Explain shipping slowly"), async {
        tokio::time::sleep(Duration::from_millis(1200)).await;
        kb.query("other", "Is there a warranty?").await
    });
    slow.expect("slow query should succeed");
    other.expect("other query should succeed");

    let history = kb.memory().history("long").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].user, "What is the refund window?");
    assert_eq!(history[1].user, "Explain shipping slowly");
    // The slow answer saw the first turn as history
    assert_eq!(history[1].assistant, "reply after 4 messages");
}

#[tokio::test]
async fn reopened_index_keeps_records() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    {
        let kb = knowledge_base(&temp_dir, Arc::new(RecordingModel::default()), 4).await;
        kb.upload(DOCUMENT.as_bytes().to_vec(), "policies.txt")
            .await
            .expect("upload should succeed");
    }

    let kb = knowledge_base(&temp_dir, Arc::new(RecordingModel::default()), 4).await;
    assert_eq!(kb.index().count_records().await.expect("should count"), 3);
}

#[tokio::test]
async fn changed_dimension_is_rejected_on_open() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let _kb = knowledge_base(&temp_dir, Arc::new(RecordingModel::default()), 4).await;

    let error = VectorStore::connect(
        &temp_dir.path().join("vectors"),
        "knowledge_base",
        8,
        1,
        Arc::new(KeywordEmbedder),
    )
    .await
    .expect_err("dimension change should be rejected");

    assert!(matches!(
        error,
        KnowledgeError::DimensionMismatch {
            expected: 8,
            actual: 3
        }
    ));
}
