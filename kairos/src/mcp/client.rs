//! MCP connection seam and call-retry wrapper.
//!
//! The pool manages values behind [`McpConnection`]; the rmcp-backed
//! implementation lives in [`rmcp_client`](super::rmcp_client) behind the
//! `rmcp` feature, which keeps the pool itself transport-agnostic and
//! testable with in-process fakes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::context::RunContext;
use crate::error::{Error, ErrorCode, Result};
use crate::tool::ToolDefinition;

/// Contract every MCP client fulfils.
#[async_trait]
pub trait McpConnection: Send + Sync {
    /// List the tools the server exposes.
    async fn list_tools(&self, ctx: &RunContext) -> Result<Vec<ToolDefinition>>;

    /// Invoke a remote tool.
    async fn call_tool(
        &self,
        ctx: &RunContext,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<Value>;

    /// Close the connection. For stdio transports this terminates the
    /// child process.
    async fn close(&self) -> Result<()>;
}

/// Shared connection handle.
pub type SharedConnection = Arc<dyn McpConnection>;

/// Retry configuration for `call_tool`.
///
/// Retries apply only to transient failures (timeouts, connection
/// resets); schema and argument errors are surfaced immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Backoff before the second attempt; doubles each retry.
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 1,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    /// Retry up to `attempts` times with exponential backoff.
    #[must_use]
    pub const fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts,
            initial_backoff,
        }
    }
}

fn is_transient(err: &Error) -> bool {
    matches!(err.code, ErrorCode::Timeout | ErrorCode::RateLimit)
        || (err.code == ErrorCode::Internal
            && (err.message.contains("connection reset") || err.message.contains("broken pipe")))
}

/// Wrapper adding list caching and transient-failure retries to any
/// [`McpConnection`].
pub struct CachedConnection {
    inner: SharedConnection,
    server: String,
    list_ttl: Option<Duration>,
    retry: RetryConfig,
    cache: Mutex<Option<(Instant, Vec<ToolDefinition>)>>,
}

impl std::fmt::Debug for CachedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedConnection")
            .field("server", &self.server)
            .field("list_ttl", &self.list_ttl)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl CachedConnection {
    /// Wrap a connection for `server`.
    #[must_use]
    pub fn new(server: impl Into<String>, inner: SharedConnection) -> Self {
        Self {
            inner,
            server: server.into(),
            list_ttl: None,
            retry: RetryConfig::default(),
            cache: Mutex::new(None),
        }
    }

    /// Cache `list_tools` results for `ttl`.
    #[must_use]
    pub const fn with_list_ttl(mut self, ttl: Duration) -> Self {
        self.list_ttl = Some(ttl);
        self
    }

    /// Configure call retries.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The server this connection belongs to.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }
}

#[async_trait]
impl McpConnection for CachedConnection {
    async fn list_tools(&self, ctx: &RunContext) -> Result<Vec<ToolDefinition>> {
        if let Some(ttl) = self.list_ttl {
            let cache = self.cache.lock().await;
            if let Some((at, ref tools)) = *cache {
                if at.elapsed() < ttl {
                    return Ok(tools.clone());
                }
            }
        }

        let tools = self.inner.list_tools(ctx).await?;

        if self.list_ttl.is_some() {
            *self.cache.lock().await = Some((Instant::now(), tools.clone()));
        }
        Ok(tools)
    }

    async fn call_tool(
        &self,
        ctx: &RunContext,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<Value> {
        let mut backoff = self.retry.initial_backoff;
        let attempts = self.retry.attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            ctx.check()?;
            match self.inner.call_tool(ctx, name, args.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && is_transient(&err) => {
                    tracing::debug!(
                        server = %self.server,
                        tool = name,
                        attempt,
                        error = %err,
                        "Transient MCP call failure; retrying",
                    );
                    last_err = Some(err);
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::internal(format!("mcp call to '{name}' failed without an error"))
        }))
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fake connection that fails transiently a configurable number of
    /// times before succeeding.
    struct Flaky {
        failures: AtomicU32,
        lists: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                lists: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl McpConnection for Flaky {
        async fn list_tools(&self, _ctx: &RunContext) -> Result<Vec<ToolDefinition>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ToolDefinition::new(
                "remote_echo",
                "Echo.",
                serde_json::json!({"type": "object"}),
            )])
        }

        async fn call_tool(
            &self,
            _ctx: &RunContext,
            name: &str,
            _args: Map<String, Value>,
        ) -> Result<Value> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::timeout("simulated timeout"));
            }
            Ok(Value::String(format!("called {name}")))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let conn = CachedConnection::new("srv", Arc::new(Flaky::new(2)))
            .with_retry(RetryConfig::new(3, Duration::from_millis(1)));
        let ctx = RunContext::new();

        let out = conn.call_tool(&ctx, "remote_echo", Map::new()).await.unwrap();
        assert_eq!(out, Value::String("called remote_echo".into()));
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let conn = CachedConnection::new("srv", Arc::new(Flaky::new(5)))
            .with_retry(RetryConfig::new(2, Duration::from_millis(1)));
        let ctx = RunContext::new();

        let err = conn.call_tool(&ctx, "remote_echo", Map::new()).await.unwrap_err();
        assert!(err.is(ErrorCode::Timeout));
    }

    #[tokio::test]
    async fn schema_errors_are_not_retried() {
        struct SchemaFail(AtomicU32);

        #[async_trait]
        impl McpConnection for SchemaFail {
            async fn list_tools(&self, _ctx: &RunContext) -> Result<Vec<ToolDefinition>> {
                Ok(Vec::new())
            }
            async fn call_tool(
                &self,
                _ctx: &RunContext,
                _name: &str,
                _args: Map<String, Value>,
            ) -> Result<Value> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(Error::invalid_input("missing required field"))
            }
            async fn close(&self) -> Result<()> {
                Ok(())
            }
        }

        let inner = Arc::new(SchemaFail(AtomicU32::new(0)));
        let conn = CachedConnection::new("srv", Arc::clone(&inner) as SharedConnection)
            .with_retry(RetryConfig::new(3, Duration::from_millis(1)));
        let ctx = RunContext::new();

        let err = conn.call_tool(&ctx, "x", Map::new()).await.unwrap_err();
        assert!(err.is(ErrorCode::InvalidInput));
        assert_eq!(inner.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn list_cache_respects_ttl() {
        let inner = Arc::new(Flaky::new(0));
        let conn = CachedConnection::new("srv", Arc::clone(&inner) as SharedConnection)
            .with_list_ttl(Duration::from_secs(60));
        let ctx = RunContext::new();

        conn.list_tools(&ctx).await.unwrap();
        conn.list_tools(&ctx).await.unwrap();
        assert_eq!(inner.lists.load(Ordering::SeqCst), 1);
    }
}
