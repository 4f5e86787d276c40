//! rmcp-backed MCP connection (feature `rmcp`).

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::{
    ServiceExt,
    model::{CallToolRequestParam, ClientCapabilities, Implementation, InitializeRequestParams},
    service::ServerSink,
    transport::{StreamableHttpClientTransport, child_process::TokioChildProcess},
};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::client::McpConnection;
use super::pool::Connector;
use super::transport::TransportConfig;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::tool::{ToolDefinition, ToolSource};

/// Client identification sent during the MCP handshake.
#[derive(Debug, Clone)]
pub struct RmcpClientConfig {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

impl Default for RmcpClientConfig {
    fn default() -> Self {
        Self {
            name: "kairos".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// An MCP connection over an rmcp service, stdio or streamable HTTP.
pub struct RmcpConnection {
    server: String,
    sink: ServerSink,
    /// Background task keeping the service alive; aborted on close, which
    /// drops the transport (and terminates the child for stdio).
    service_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RmcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmcpConnection")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl RmcpConnection {
    /// Open a connection for `server` over `transport`.
    pub async fn connect(
        server: &str,
        transport: &TransportConfig,
        client_config: RmcpClientConfig,
    ) -> Result<Self> {
        let client_info = InitializeRequestParams {
            meta: None,
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: client_config.name,
                version: client_config.version,
                ..Default::default()
            },
        };

        let (sink, handle) = match transport {
            TransportConfig::Http { url, .. } => {
                let transport = StreamableHttpClientTransport::from_uri(url.as_str());
                let service = client_info.serve(transport).await.map_err(|e| {
                    Error::internal(format!("http connect to '{server}' failed: {e}"))
                        .with_context("url", url)
                })?;
                let sink = service.peer().clone();
                let handle = tokio::spawn(async move {
                    let _ = service.waiting().await;
                });
                (sink, handle)
            }
            TransportConfig::Stdio { command, args, env } => {
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(args);
                for (key, value) in env {
                    cmd.env(key, value);
                }
                let transport = TokioChildProcess::new(cmd).map_err(|e| {
                    Error::internal(format!("spawning '{command}' for '{server}' failed: {e}"))
                })?;
                let service = client_info.serve(transport).await.map_err(|e| {
                    Error::internal(format!("stdio connect to '{server}' failed: {e}"))
                        .with_context("command", command)
                })?;
                let sink = service.peer().clone();
                let handle = tokio::spawn(async move {
                    let _ = service.waiting().await;
                });
                (sink, handle)
            }
        };

        info!(server, "MCP connection established");
        Ok(Self {
            server: server.to_owned(),
            sink,
            service_handle: Mutex::new(Some(handle)),
        })
    }

    /// Extract a usable value from a `call_tool` result.
    ///
    /// Text content is joined into a single string; anything else is
    /// returned as the raw serialized result.
    fn result_to_value(result: &impl serde::Serialize) -> Result<Value> {
        let raw = serde_json::to_value(result)
            .map_err(|e| Error::internal(format!("unserializable MCP result: {e}")))?;

        if let Some(content) = raw.get("content").and_then(Value::as_array) {
            let texts: Vec<&str> = content
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            if !texts.is_empty() {
                return Ok(Value::String(texts.join("\n")));
            }
        }
        Ok(raw)
    }
}

#[async_trait]
impl McpConnection for RmcpConnection {
    async fn list_tools(&self, ctx: &RunContext) -> Result<Vec<ToolDefinition>> {
        let listing = ctx
            .run_scoped(None, async {
                self.sink.list_tools(Default::default()).await.map_err(|e| {
                    Error::internal(format!("list_tools on '{}' failed: {e}", self.server))
                })
            })
            .await?;

        let defs = listing
            .tools
            .iter()
            .map(|tool| {
                let parameters = serde_json::to_value(tool.input_schema.as_ref())
                    .unwrap_or_else(|_| serde_json::json!({"type": "object"}));
                ToolDefinition::new(
                    tool.name.to_string(),
                    tool.description
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                    parameters,
                )
                .with_source(ToolSource::Mcp(self.server.clone()))
            })
            .collect();
        Ok(defs)
    }

    async fn call_tool(
        &self,
        ctx: &RunContext,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<Value> {
        let request = CallToolRequestParam {
            name: name.to_owned().into(),
            arguments: if args.is_empty() { None } else { Some(args) },
        };
        let result = ctx
            .run_scoped(None, async {
                self.sink.call_tool(request).await.map_err(|e| {
                    Error::tool_failure(name, format!("mcp call failed: {e}"))
                        .with_context("server", &self.server)
                })
            })
            .await?;
        Self::result_to_value(&result)
    }

    async fn close(&self) -> Result<()> {
        if let Some(handle) = self.service_handle.lock().await.take() {
            handle.abort();
            debug!(server = %self.server, "MCP connection closed");
        }
        Ok(())
    }
}

/// Pool connector that opens [`RmcpConnection`]s.
#[derive(Debug, Clone, Default)]
pub struct RmcpConnector {
    config: RmcpClientConfig,
}

impl RmcpConnector {
    /// Create a connector with the default client identification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector with custom client identification.
    #[must_use]
    pub const fn with_config(config: RmcpClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(
        &self,
        _ctx: &RunContext,
        server: &str,
        transport: &TransportConfig,
    ) -> Result<super::client::SharedConnection> {
        let conn = RmcpConnection::connect(server, transport, self.config.clone()).await?;
        Ok(Arc::new(conn))
    }
}
