//! Error types for the kairos runtime.
//!
//! Every failure in the runtime is an [`Error`] carrying a stable
//! [`ErrorCode`], a human-readable message, an optional cause, a key/value
//! context map, and a `recoverable` flag. The code set is closed: callers
//! can match on it without worrying about new variants appearing in patch
//! releases.

use std::collections::BTreeMap;
use std::fmt;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of error codes used across the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    /// Unexpected internal failure.
    Internal,
    /// The caller supplied malformed or rejected input.
    InvalidInput,
    /// A named resource (task, tool, server) does not exist.
    NotFound,
    /// A policy or approval gate refused the action.
    Unauthorized,
    /// A deadline elapsed or an iteration budget was exhausted.
    Timeout,
    /// An upstream rate limit was hit.
    RateLimit,
    /// A tool invocation failed.
    ToolFailure,
    /// The LLM provider returned an error.
    LlmError,
    /// A memory backend read or write failed.
    MemoryError,
    /// The run context was cancelled or lost.
    ContextLost,
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::ToolFailure => "tool_failure",
            Self::LlmError => "llm_error",
            Self::MemoryError => "memory_error",
            Self::ContextLost => "context_lost",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for runtime operations.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Error {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Underlying cause, when one exists.
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Structured attributes attached at the failure site (run id, tool
    /// name, server name, ...).
    pub context: BTreeMap<String, String>,
    /// Whether the caller may reasonably retry the whole operation.
    pub recoverable: bool,
}

impl Error {
    /// Create an error with an explicit code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            context: BTreeMap::new(),
            recoverable: false,
        }
    }

    /// Attach a cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach a context attribute.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Mark the error as recoverable.
    #[must_use]
    pub const fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    /// Unexpected internal failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Malformed or rejected input. Non-recoverable.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Missing resource.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Policy or approval refusal.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Deadline or iteration budget exhausted.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    /// Upstream rate limit.
    #[must_use]
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimit, message).recoverable()
    }

    /// Tool invocation failure. Recoverable: the loop surfaces it as an
    /// observation and continues.
    #[must_use]
    pub fn tool_failure(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ToolFailure, message)
            .with_context("tool", tool)
            .recoverable()
    }

    /// LLM provider failure. Recoverable at the caller's discretion.
    #[must_use]
    pub fn llm(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::LlmError, message).recoverable()
    }

    /// Memory backend failure.
    #[must_use]
    pub fn memory(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MemoryError, message).recoverable()
    }

    /// Cancelled or lost run context.
    #[must_use]
    pub fn context_lost(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ContextLost, message)
    }

    /// Returns `true` if this error carries the given code.
    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    /// Returns `true` when the failure came from cancellation rather than
    /// an elapsed deadline.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.code == ErrorCode::ContextLost
            || self
                .context
                .get("cancelled")
                .is_some_and(|v| v.as_str() == "true")
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_input(err.to_string()).with_cause(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn codes_have_stable_wire_names() {
        assert_eq!(ErrorCode::InvalidInput.as_str(), "invalid_input");
        assert_eq!(ErrorCode::ToolFailure.as_str(), "tool_failure");
        assert_eq!(ErrorCode::ContextLost.as_str(), "context_lost");
    }

    #[test]
    fn constructors_set_recoverable_flag() {
        assert!(Error::llm("boom").recoverable);
        assert!(Error::tool_failure("search", "boom").recoverable);
        assert!(!Error::timeout("deadline").recoverable);
        assert!(!Error::invalid_input("bad").recoverable);
    }

    #[test]
    fn context_attributes_are_attached() {
        let err = Error::tool_failure("search", "boom").with_context("run_id", "r-1");
        assert_eq!(err.context.get("tool").unwrap(), "search");
        assert_eq!(err.context.get("run_id").unwrap(), "r-1");
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = Error::timeout("deadline elapsed");
        assert_eq!(err.to_string(), "timeout: deadline elapsed");
    }

    #[test]
    fn cause_chain_is_preserved() {
        let inner = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::llm("provider failed").with_cause(inner);
        assert!(std::error::Error::source(&err).is_some());
    }
}
