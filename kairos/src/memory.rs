//! Memory backend seams and in-memory reference implementations.
//!
//! The runtime consumes two independent memory capabilities:
//!
//! - **Semantic memory** ([`Memory`]): free-form store/retrieve used to
//!   inject background context before the first turn.
//! - **Conversational memory** ([`ConversationMemory`]): ordered
//!   per-session message history with a truncation policy.
//!
//! Backends are expected to be internally safe for concurrent use; the
//! runtime makes no serialization attempt around them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::context::RunContext;
use crate::error::Result;
use crate::message::Message;

/// Semantic memory backend.
///
/// The query shape is backend-specific; a null query must be valid and is
/// used as the fallback when a typed query fails.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Store a datum.
    async fn store(&self, ctx: &RunContext, data: Value) -> Result<()>;

    /// Retrieve data matching the query.
    async fn retrieve(&self, ctx: &RunContext, query: Value) -> Result<Value>;
}

/// How conversational history is bounded before injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TruncationPolicy {
    /// Keep the most recent N messages.
    WindowOfN(usize),
    /// Keep as many trailing messages as fit a character budget
    /// (a cheap stand-in for token counting).
    CharBudget(usize),
    /// Keep the most recent N messages verbatim and collapse everything
    /// older into one deterministic summary message.
    SummarizeOldest {
        /// How many recent messages survive verbatim.
        keep_recent: usize,
    },
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self::WindowOfN(20)
    }
}

/// Longest excerpt of a message carried into a summary line.
const SUMMARY_EXCERPT: usize = 80;

impl TruncationPolicy {
    /// Apply the policy to a history slice, keeping the tail.
    #[must_use]
    pub fn apply(&self, history: &[Message]) -> Vec<Message> {
        match *self {
            Self::WindowOfN(n) => {
                let start = history.len().saturating_sub(n);
                history[start..].to_vec()
            }
            Self::CharBudget(budget) => {
                let mut used = 0usize;
                let mut kept = Vec::new();
                for msg in history.iter().rev() {
                    used += msg.content.len();
                    if used > budget && !kept.is_empty() {
                        break;
                    }
                    kept.push(msg.clone());
                    if used > budget {
                        break;
                    }
                }
                kept.reverse();
                kept
            }
            Self::SummarizeOldest { keep_recent } => {
                if history.len() <= keep_recent {
                    return history.to_vec();
                }
                let split = history.len() - keep_recent;
                let summary: Vec<String> = history[..split]
                    .iter()
                    .map(|m| {
                        let excerpt: String = m.content.chars().take(SUMMARY_EXCERPT).collect();
                        format!("{}: {excerpt}", m.role.as_str())
                    })
                    .collect();
                let mut kept = Vec::with_capacity(keep_recent + 1);
                kept.push(Message::system(format!(
                    "Earlier conversation summary:\n{}",
                    summary.join("\n")
                )));
                kept.extend(history[split..].iter().cloned());
                kept
            }
        }
    }
}

/// Conversational memory backend keyed by session id.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    /// Read up to `limit` most recent messages for a session.
    async fn get_messages(
        &self,
        ctx: &RunContext,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>>;

    /// Append a message to a session.
    async fn append_message(
        &self,
        ctx: &RunContext,
        session_id: &str,
        message: Message,
    ) -> Result<()>;

    /// Remove all messages for a session.
    async fn clear(&self, ctx: &RunContext, session_id: &str) -> Result<()>;
}

/// Flatten a retrieval result into memory-context lines.
///
/// Strings pass through, lists are flattened element-wise, any other
/// value is rendered as compact JSON. Null yields nothing.
#[must_use]
pub fn flatten_context(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) if s.is_empty() => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .flat_map(|item| match item {
                Value::String(s) if !s.is_empty() => vec![s.clone()],
                Value::String(_) => Vec::new(),
                other => vec![other.to_string()],
            })
            .collect(),
        other => vec![other.to_string()],
    }
}

/// In-memory semantic store.
///
/// Retrieval is recency-ordered substring match against the stored
/// records' JSON rendering; a null query returns the most recent records.
/// Doubles as the test fixture for the loop's memory integration.
#[derive(Debug)]
pub struct InMemoryStore {
    records: RwLock<Vec<Value>>,
    limit: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(8)
    }
}

impl InMemoryStore {
    /// Create a store returning at most `limit` records per retrieval.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            limit: limit.max(1),
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns `true` when nothing has been stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl Memory for InMemoryStore {
    async fn store(&self, _ctx: &RunContext, data: Value) -> Result<()> {
        self.records.write().await.push(data);
        Ok(())
    }

    async fn retrieve(&self, _ctx: &RunContext, query: Value) -> Result<Value> {
        let records = self.records.read().await;
        let needle = match &query {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.to_lowercase()),
            other => Some(other.to_string().to_lowercase()),
        };

        let matched: Vec<Value> = records
            .iter()
            .rev()
            .filter(|r| match &needle {
                None => true,
                Some(n) => r.to_string().to_lowercase().contains(n.as_str()),
            })
            .take(self.limit)
            .cloned()
            .collect();
        Ok(Value::Array(matched))
    }
}

/// In-memory conversational store keyed by session id.
#[derive(Debug, Default)]
pub struct InMemoryConversation {
    sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryConversation {
    /// Create an empty conversation store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationMemory for InMemoryConversation {
    async fn get_messages(
        &self,
        _ctx: &RunContext,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        let sessions = self.sessions.read().await;
        let history = sessions.get(session_id).cloned().unwrap_or_default();
        Ok(match limit {
            Some(n) => {
                let start = history.len().saturating_sub(n);
                history[start..].to_vec()
            }
            None => history,
        })
    }

    async fn append_message(
        &self,
        _ctx: &RunContext,
        session_id: &str,
        message: Message,
    ) -> Result<()> {
        self.sessions
            .write()
            .await
            .entry(session_id.to_owned())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn clear(&self, _ctx: &RunContext, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

/// Shared handles.
pub type SharedMemory = Arc<dyn Memory>;
/// Shared conversational memory handle.
pub type SharedConversation = Arc<dyn ConversationMemory>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flatten_handles_strings_lists_and_values() {
        assert_eq!(flatten_context(&Value::String("a".into())), vec!["a"]);
        assert_eq!(
            flatten_context(&serde_json::json!(["a", "b"])),
            vec!["a", "b"]
        );
        assert_eq!(
            flatten_context(&serde_json::json!([{"k": 1}])),
            vec![r#"{"k":1}"#]
        );
        assert!(flatten_context(&Value::Null).is_empty());
    }

    #[test]
    fn window_policy_keeps_the_tail() {
        let history: Vec<Message> = (0..5).map(|i| Message::user(format!("m{i}"))).collect();
        let kept = TruncationPolicy::WindowOfN(2).apply(&history);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].content, "m3");
        assert_eq!(kept[1].content, "m4");
    }

    #[test]
    fn char_budget_policy_keeps_at_least_one() {
        let history = vec![Message::user("a".repeat(100))];
        let kept = TruncationPolicy::CharBudget(10).apply(&history);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn summarize_policy_collapses_the_old_tail() {
        let history: Vec<Message> = (0..5).map(|i| Message::user(format!("m{i}"))).collect();
        let kept = TruncationPolicy::SummarizeOldest { keep_recent: 2 }.apply(&history);

        assert_eq!(kept.len(), 3);
        assert!(kept[0].content.starts_with("Earlier conversation summary:"));
        assert!(kept[0].content.contains("user: m0"));
        assert!(kept[0].content.contains("user: m2"));
        assert_eq!(kept[1].content, "m3");
        assert_eq!(kept[2].content, "m4");

        // Short histories pass through untouched.
        let short = TruncationPolicy::SummarizeOldest { keep_recent: 10 }.apply(&history);
        assert_eq!(short.len(), 5);
    }

    #[tokio::test]
    async fn store_retrieve_roundtrip_with_query() {
        let store = InMemoryStore::new(8);
        let ctx = RunContext::new();

        store
            .store(&ctx, serde_json::json!({"note": "rust is fast"}))
            .await
            .unwrap();
        store
            .store(&ctx, serde_json::json!({"note": "go is simple"}))
            .await
            .unwrap();

        let out = store
            .retrieve(&ctx, Value::String("rust".into()))
            .await
            .unwrap();
        let items = out.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].to_string().contains("rust"));
    }

    #[tokio::test]
    async fn null_query_returns_recent_records() {
        let store = InMemoryStore::new(2);
        let ctx = RunContext::new();
        for i in 0..4 {
            store.store(&ctx, Value::from(i)).await.unwrap();
        }
        let out = store.retrieve(&ctx, Value::Null).await.unwrap();
        assert_eq!(out.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn conversation_append_get_clear() {
        let conv = InMemoryConversation::new();
        let ctx = RunContext::new();

        conv.append_message(&ctx, "s1", Message::user("hi")).await.unwrap();
        conv.append_message(&ctx, "s1", Message::assistant("hello")).await.unwrap();

        let history = conv.get_messages(&ctx, "s1", None).await.unwrap();
        assert_eq!(history.len(), 2);

        let limited = conv.get_messages(&ctx, "s1", Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].content, "hello");

        conv.clear(&ctx, "s1").await.unwrap();
        assert!(conv.get_messages(&ctx, "s1", None).await.unwrap().is_empty());
    }
}
