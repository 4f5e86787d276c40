//! Message types for agent-model communication.
//!
//! Defines the conversation data model shared by the emergent loop, the
//! plan executor, and the task surface, following chat completion API
//! conventions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing instructions.
    System,
    /// User message.
    User,
    /// Assistant (model) message.
    Assistant,
    /// Tool observation message.
    Tool,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool call requested by the model.
///
/// The `arguments` payload is polymorphic: the LLM sends JSON text, plan
/// nodes supply native maps. [`decode_arguments`] normalizes either shape
/// once at the dispatch boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call within the turn.
    pub id: String,
    /// Name of the tool being called.
    pub name: String,
    /// Argument payload (JSON text, object, or any value).
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Decode the arguments into a name → value mapping.
    pub fn decoded_arguments(&self) -> Result<Map<String, Value>> {
        decode_arguments(&self.arguments)
    }
}

/// Normalize a tool-argument payload into a `mapping<string, value>`.
///
/// Accepted inputs: a JSON-text string, a raw object, a byte array of
/// JSON text, or any other value (serialized and reparsed). Null and the
/// empty string yield an empty mapping. Decoding is idempotent.
pub fn decode_arguments(payload: &Value) -> Result<Map<String, Value>> {
    match payload {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(Map::new());
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => {
                    // Non-object JSON (a bare string or number) is wrapped
                    // under "input" so tool handlers stay monomorphic.
                    let mut map = Map::new();
                    map.insert("input".to_owned(), other);
                    Ok(map)
                }
                Err(_) => {
                    let mut map = Map::new();
                    map.insert("input".to_owned(), Value::String(trimmed.to_owned()));
                    Ok(map)
                }
            }
        }
        Value::Array(items) => {
            // Byte payload: an array of u8 holding JSON text.
            let bytes: Option<Vec<u8>> = items
                .iter()
                .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
                .collect();
            if let Some(bytes) = bytes {
                let text = String::from_utf8(bytes)
                    .map_err(|e| Error::invalid_input(format!("invalid utf-8 payload: {e}")))?;
                return decode_arguments(&Value::String(text));
            }
            let reparsed = serde_json::to_string(payload)?;
            decode_arguments(&Value::String(reparsed))
        }
        other => {
            let reparsed = serde_json::to_string(other)?;
            decode_arguments(&Value::String(reparsed))
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Tool calls made by the model (assistant messages only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call id this message answers (tool messages only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a new system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create an assistant message carrying tool calls.
    #[must_use]
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Create a tool observation answering `tool_call_id`.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Returns `true` if this message carries at least one tool call.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// The text content, or `None` when empty.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        (!self.content.is_empty()).then_some(self.content.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod decode {
        use super::*;

        #[test]
        fn json_text_decodes_to_mapping() {
            let args = decode_arguments(&Value::String(r#"{"q": "rust", "n": 3}"#.into())).unwrap();
            assert_eq!(args.get("q").unwrap(), "rust");
            assert_eq!(args.get("n").unwrap(), 3);
        }

        #[test]
        fn raw_mapping_passes_through() {
            let payload = serde_json::json!({"q": "rust"});
            let args = decode_arguments(&payload).unwrap();
            assert_eq!(args.get("q").unwrap(), "rust");
        }

        #[test]
        fn decoding_is_idempotent() {
            let payload = Value::String(r#"{"a": 1}"#.into());
            let once = decode_arguments(&payload).unwrap();
            let twice = decode_arguments(&Value::Object(once.clone())).unwrap();
            assert_eq!(once, twice);
        }

        #[test]
        fn empty_inputs_yield_empty_mapping() {
            assert!(decode_arguments(&Value::Null).unwrap().is_empty());
            assert!(decode_arguments(&Value::String(String::new())).unwrap().is_empty());
            assert!(decode_arguments(&Value::String("  ".into())).unwrap().is_empty());
        }

        #[test]
        fn byte_payload_is_decoded() {
            let text = r#"{"k": "v"}"#;
            let bytes: Vec<Value> = text.bytes().map(|b| Value::from(u64::from(b))).collect();
            let args = decode_arguments(&Value::Array(bytes)).unwrap();
            assert_eq!(args.get("k").unwrap(), "v");
        }

        #[test]
        fn plain_text_is_wrapped_under_input() {
            let args = decode_arguments(&Value::String("10 + 5".into())).unwrap();
            assert_eq!(args.get("input").unwrap(), "10 + 5");
        }

        #[test]
        fn scalar_value_is_wrapped_under_input() {
            let args = decode_arguments(&Value::Bool(true)).unwrap();
            assert_eq!(args.get("input").unwrap(), &Value::Bool(true));
        }
    }

    mod message {
        use super::*;

        #[test]
        fn constructors_set_roles() {
            assert_eq!(Message::system("s").role, Role::System);
            assert_eq!(Message::user("u").role, Role::User);
            assert_eq!(Message::assistant("a").role, Role::Assistant);
            assert_eq!(Message::tool("c1", "obs").role, Role::Tool);
        }

        #[test]
        fn tool_message_carries_call_id() {
            let msg = Message::tool("c1", "result");
            assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
        }

        #[test]
        fn has_tool_calls_ignores_empty_list() {
            let msg = Message::assistant_with_tool_calls("", Vec::new());
            assert!(!msg.has_tool_calls());

            let msg = Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c1", "search", Value::Null)],
            );
            assert!(msg.has_tool_calls());
        }

        #[test]
        fn serde_skips_absent_fields() {
            let json = serde_json::to_string(&Message::user("hi")).unwrap();
            assert!(!json.contains("tool_calls"));
            assert!(!json.contains("tool_call_id"));
        }
    }
}
