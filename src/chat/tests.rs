use super::*;
use crate::embeddings::Embedder;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tempfile::TempDir;

/// Embeds text by counting a few marker words
struct KeywordEmbedder;

const KEYWORDS: [&str; 3] = ["refund", "shipping", "warranty"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
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

/// Replays canned replies and records every prompt it receives
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<crate::Result<String>>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    fn new(replies: Vec<crate::Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().expect("prompt lock").clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> crate::Result<String> {
        self.prompts
            .lock()
            .expect("prompt lock")
            .push(messages.to_vec());
        self.replies
            .lock()
            .expect("reply lock")
            .pop_front()
            .unwrap_or_else(|| Ok("default answer".to_string()))
    }
}

async fn pipeline_with(model: Arc<ScriptedModel>) -> (ChatPipeline, Arc<VectorStore>, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = VectorStore::connect(
        &temp_dir.path().join("vectors"),
        "chat_test",
        KEYWORDS.len(),
        1,
        Arc::new(KeywordEmbedder),
    )
    .await
    .expect("should open vector store");
    let store = Arc::new(store);

    let pipeline = ChatPipeline::new(
        Arc::clone(&store),
        model,
        Arc::new(ConversationMemory::default()),
    );
    (pipeline, store, temp_dir)
}

#[test]
fn stages_run_retrieve_then_generate() {
    assert_eq!(Stage::SEQUENCE, [Stage::Retrieve, Stage::Generate]);
}

#[test]
fn prompt_layout() {
    let state = QueryState {
        question: "How long do refunds take?".to_string(),
        context: vec!["Refunds take 5 days.".to_string(), "Refunds need a receipt.".to_string()],
        history: vec![Turn::new("Hi", "Hello! How can I help?")],
        answer: String::new(),
    };

    let messages = build_prompt(&state);
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0], ChatMessage::system(SYSTEM_PROMPT));
    assert_eq!(messages[1], ChatMessage::user("Hi"));
    assert_eq!(messages[2], ChatMessage::assistant("Hello! How can I help?"));
    assert_eq!(
        messages[3].content,
        "Question: How long do refunds take?\nKnown information:\n\
         Refunds take 5 days.\n\nRefunds need a receipt.\nAnswer:"
    );
}

#[test]
fn prompt_without_context_or_history() {
    let messages = build_prompt(&QueryState::new("Anything?", Vec::new()));
    assert_eq!(messages.len(), 2);
    assert!(messages[1].content.contains("Known information:\n(none)"));
}

#[tokio::test]
async fn answer_is_returned_and_recorded() {
    let model = ScriptedModel::new(vec![Ok("  Five business days.  ".to_string())]);
    let (pipeline, store, _temp_dir) = pipeline_with(Arc::clone(&model)).await;
    store
        .ingest(&[
            "Refund requests are handled within five business days.".to_string(),
            "Shipping is free above fifty euros.".to_string(),
        ])
        .await
        .expect("ingest should succeed");

    let answer = pipeline
        .ask("c1", "How long does a refund take?")
        .await
        .expect("pipeline should succeed");
    assert_eq!(answer, "Five business days.");

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 1);
    let question = &prompts[0].last().expect("prompt has messages").content;
    assert!(question.starts_with(
        "Question: How long does a refund take?\nKnown information:\nRefund requests"
    ));

    let history = pipeline.memory().history("c1").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].user, "How long does a refund take?");
    assert_eq!(history[0].assistant, "Five business days.");
}

#[tokio::test]
async fn failed_generation_records_nothing() {
    let model = ScriptedModel::new(vec![Err(KnowledgeError::GenerationFailed(
        "rate limited".to_string(),
    ))]);
    let (pipeline, _store, _temp_dir) = pipeline_with(model).await;

    let error = pipeline
        .ask("c1", "Anything?")
        .await
        .expect_err("generation failure should propagate");
    assert!(matches!(error, KnowledgeError::GenerationFailed(_)));
    assert!(pipeline.memory().history("c1").await.is_empty());
}

#[tokio::test]
async fn other_model_errors_become_generation_failures() {
    let model = ScriptedModel::new(vec![Err(KnowledgeError::Other(anyhow::anyhow!(
        "socket closed"
    )))]);
    let (pipeline, _store, _temp_dir) = pipeline_with(model).await;

    let error = pipeline
        .ask("c1", "Anything?")
        .await
        .expect_err("model failure should propagate");
    assert_eq!(error.kind(), "generation_failed");
    assert!(error.to_string().contains("socket closed"));
}

#[tokio::test]
async fn blank_answer_is_a_failure() {
    let model = ScriptedModel::new(vec![Ok("   \n".to_string())]);
    let (pipeline, _store, _temp_dir) = pipeline_with(model).await;

    let error = pipeline
        .ask("c1", "Anything?")
        .await
        .expect_err("blank answer should fail");
    assert_eq!(error.kind(), "generation_failed");
    assert!(pipeline.memory().history("c1").await.is_empty());
}

#[tokio::test]
async fn top_k_limits_context() {
    let model = ScriptedModel::new(Vec::new());
    let (pipeline, store, _temp_dir) = pipeline_with(Arc::clone(&model)).await;
    let pipeline = pipeline.with_top_k(1);
    assert_eq!(pipeline.top_k(), 1);

    store
        .ingest(&[
            "Warranty covers two years.".to_string(),
            "Shipping takes a week.".to_string(),
        ])
        .await
        .expect("ingest should succeed");

    pipeline
        .ask("c1", "What does the warranty cover?")
        .await
        .expect("pipeline should succeed");

    let prompt = &model.prompts()[0];
    let question = &prompt.last().expect("prompt has messages").content;
    assert!(question.contains("Warranty covers two years."));
    assert!(!question.contains("Shipping takes a week."));
}
