//! LLM provider seam.
//!
//! The runtime consumes language models through a single operation:
//! [`LlmProvider::chat`]. Vendor wire protocols live outside this crate;
//! anything that can turn a [`ChatRequest`] into a [`ChatResponse`] can
//! drive an agent.

mod scripted;

pub use scripted::ScriptedProvider;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::Result;
use crate::message::{Message, ToolCall};
use crate::tool::ToolDefinition;

/// A chat completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Ordered conversation messages.
    pub messages: Vec<Message>,
    /// Tools advertised to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

impl ChatRequest {
    /// Create a request with messages.
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
        }
    }

    /// Advertise tools to the model.
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A chat completion response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Assistant text content.
    pub content: String,
    /// Structured tool calls, when the model requested any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    /// Create a text-only response.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Create a response carrying tool calls.
    #[must_use]
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
        }
    }

    /// Returns `true` if the model requested tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Convert into the assistant message to append to history.
    #[must_use]
    pub fn into_message(self) -> Message {
        if self.tool_calls.is_empty() {
            Message::assistant(self.content)
        } else {
            Message::assistant_with_tool_calls(self.content, self.tool_calls)
        }
    }
}

/// Trait for chat-capable LLM backends.
///
/// Errors propagate unchanged; the agent loop wraps them as recoverable
/// `llm_error` failures at its boundary.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and receive the full response.
    async fn chat(&self, ctx: &RunContext, request: &ChatRequest) -> Result<ChatResponse>;

    /// Name of this provider, used in logs and error messages.
    fn provider_name(&self) -> &'static str {
        "llm"
    }
}

/// Type alias for a shared provider handle.
pub type SharedProvider = Arc<dyn LlmProvider>;
