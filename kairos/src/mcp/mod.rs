//! Model Context Protocol (MCP) integration.
//!
//! Remote tool servers are reached through a reference-counted
//! [`McpPool`] shared across agents. Registration stores a transport
//! descriptor; the first acquisition connects. Two transports are
//! supported: stdio (child process) and streamable HTTP.
//!
//! ```rust,ignore
//! use kairos::mcp::{McpPool, PoolConfig, TransportConfig};
//!
//! let pool = McpPool::new(Arc::new(RmcpConnector::new()), PoolConfig::default());
//! pool.register("filesystem", TransportConfig::stdio("python", &["fs_server.py"])).await?;
//!
//! let lease = pool.get(&ctx, "filesystem").await?;
//! let tools = lease.connection().list_tools(&ctx).await?;
//! pool.release(lease).await;
//! ```

mod client;
mod pool;
mod tool;
mod transport;

#[cfg(feature = "rmcp")]
mod rmcp_client;

pub use client::{CachedConnection, McpConnection, RetryConfig, SharedConnection};
pub use pool::{Connector, McpPool, PoolConfig, PoolStats, PooledClient};
pub use tool::McpToolProxy;
pub use transport::{DEFAULT_PROTOCOL_VERSION, TransportConfig};

#[cfg(feature = "rmcp")]
pub use rmcp_client::{RmcpClientConfig, RmcpConnection, RmcpConnector};
