//! Remote tool proxy: exposes a pool-backed MCP tool as a [`DynTool`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::pool::McpPool;
use crate::context::RunContext;
use crate::error::Result;
use crate::tool::{DynTool, ToolDefinition, ToolSource};

/// Bridges a remote MCP tool into the local tool abstraction.
///
/// Each call acquires a connection lease from the pool, dispatches, and
/// releases the lease, so concurrent proxies multiplex the same pooled
/// transports.
pub struct McpToolProxy {
    pool: Arc<McpPool>,
    server: String,
    definition: ToolDefinition,
}

impl std::fmt::Debug for McpToolProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpToolProxy")
            .field("server", &self.server)
            .field("tool", &self.definition.name)
            .finish_non_exhaustive()
    }
}

impl McpToolProxy {
    /// Create a proxy for a remote tool on `server`.
    #[must_use]
    pub fn new(pool: Arc<McpPool>, server: impl Into<String>, definition: ToolDefinition) -> Self {
        let server = server.into();
        let definition = definition.with_source(ToolSource::Mcp(server.clone()));
        Self {
            pool,
            server,
            definition,
        }
    }

    /// The server this proxy dispatches to.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Dispatch with an explicit run context.
    pub async fn call_with_context(
        &self,
        ctx: &RunContext,
        args: Map<String, Value>,
    ) -> Result<Value> {
        let lease = self.pool.get(ctx, &self.server).await?;
        let result = lease
            .connection()
            .call_tool(ctx, &self.definition.name, args)
            .await;
        self.pool.release(lease).await;
        result
    }
}

#[async_trait]
impl DynTool for McpToolProxy {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn call_json(&self, args: Map<String, Value>) -> Result<Value> {
        // Callers that go through the agent loop use call_with_context;
        // this path exists for direct DynTool use and carries no deadline.
        self.call_with_context(&RunContext::new(), args).await
    }
}
