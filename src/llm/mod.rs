// Language model module
// Chat-completion capability used by the answer pipeline

pub mod azure;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use azure::AzureOpenAiClient;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat-completion prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Produces a reply to a chat prompt
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `messages`, returning the assistant's reply text.
    ///
    /// Any failure, including an empty reply, is reported as `GenerationFailed`.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}
