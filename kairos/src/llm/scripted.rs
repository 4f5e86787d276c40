//! Scripted provider for testing.
//!
//! Returns queued responses in order without making network calls,
//! recording every request it sees.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, LlmProvider};
use crate::context::RunContext;
use crate::error::{Error, Result};

/// A provider that replays a fixed script of responses.
///
/// Each call pops the next queued response; an exhausted script is a
/// provider error, which keeps tests honest about the number of turns a
/// loop performs.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    responses: Mutex<std::collections::VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    /// Create a provider from a response script.
    #[must_use]
    pub fn new(responses: impl IntoIterator<Item = ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Delay every response, to exercise cancellation and deadlines.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of chat calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Snapshot of every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, _ctx: &RunContext, request: &ChatRequest) -> Result<ChatResponse> {
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .ok_or_else(|| Error::llm("scripted provider exhausted"))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_responses_in_order() {
        let provider = ScriptedProvider::new([
            ChatResponse::text("first"),
            ChatResponse::text("second"),
        ]);
        let ctx = RunContext::new();
        let req = ChatRequest::new("test-model", Vec::new());

        assert_eq!(provider.chat(&ctx, &req).await.unwrap().content, "first");
        assert_eq!(provider.chat(&ctx, &req).await.unwrap().content, "second");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_is_an_error() {
        let provider = ScriptedProvider::new([]);
        let ctx = RunContext::new();
        let req = ChatRequest::new("test-model", Vec::new());

        let err = provider.chat(&ctx, &req).await.unwrap_err();
        assert!(err.is(crate::error::ErrorCode::LlmError));
    }
}
