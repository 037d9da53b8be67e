//! Chat model seam.
//!
//! Agents reach a language model only through [`ChatModel::invoke`]. Which
//! model backs an agent is decided by a [`ModelProvider`], given the agent's
//! declared [`LlmSpec`].

pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::spec::LlmSpec;

pub use openai::{OpenAiChatModel, OpenAiProvider};

/// Model used when neither the agent nor the service configures one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// An opaque `invoke(messages) -> text` capability.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    async fn invoke(&self, messages: &[ChatMessage]) -> anyhow::Result<String>;
}

/// Picks the chat model for an agent.
pub trait ModelProvider: Send + Sync {
    fn model_for(&self, spec: Option<&LlmSpec>) -> anyhow::Result<Arc<dyn ChatModel>>;
}
