//! MCP transport descriptors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default protocol version tag sent to HTTP servers.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

/// Transport configuration for an MCP server.
///
/// Two families are supported: **stdio** spawns a child process and talks
/// over its standard streams; **http** posts to a streamable endpoint.
/// The protocol version is an opaque string passed through to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Child-process transport.
    Stdio {
        /// Command to execute.
        command: String,
        /// Command arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Extra environment variables for the child.
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Streamable HTTP transport.
    Http {
        /// Endpoint URL.
        url: String,
        /// Protocol version tag.
        #[serde(default = "default_protocol_version")]
        protocol_version: String,
    },
}

fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.to_owned()
}

impl TransportConfig {
    /// Create a stdio descriptor.
    #[must_use]
    pub fn stdio(command: impl Into<String>, args: &[&str]) -> Self {
        Self::Stdio {
            command: command.into(),
            args: args.iter().map(|&a| a.to_owned()).collect(),
            env: HashMap::new(),
        }
    }

    /// Create an HTTP descriptor with the default protocol version.
    #[must_use]
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            protocol_version: default_protocol_version(),
        }
    }

    /// Set environment variables on a stdio descriptor. No-op for HTTP.
    #[must_use]
    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        if let Self::Stdio { ref mut env, .. } = self {
            *env = vars;
        }
        self
    }

    /// Set the protocol version on an HTTP descriptor. No-op for stdio.
    #[must_use]
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        if let Self::Http {
            ref mut protocol_version,
            ..
        } = self
        {
            *protocol_version = version.into();
        }
        self
    }

    /// Validate the descriptor for registration.
    pub fn validate(&self, server_name: &str) -> Result<()> {
        if server_name.trim().is_empty() {
            return Err(Error::invalid_input("server name must not be empty"));
        }
        match self {
            Self::Stdio { command, .. } if command.trim().is_empty() => Err(Error::invalid_input(
                format!("stdio transport for '{server_name}' has an empty command"),
            )),
            Self::Http { url, .. } if url.trim().is_empty() => Err(Error::invalid_input(format!(
                "http transport for '{server_name}' has an empty url"
            ))),
            _ => Ok(()),
        }
    }

    /// Short human-readable descriptor for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Stdio { command, args, .. } => format!("stdio:{command} {}", args.join(" ")),
            Self::Http { url, .. } => format!("http:{url}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn stdio_descriptor_validates() {
        let transport = TransportConfig::stdio("python", &["server.py"]);
        assert!(transport.validate("files").is_ok());
    }

    #[test]
    fn empty_fields_are_rejected() {
        assert!(TransportConfig::stdio("python", &[]).validate("").is_err());
        assert!(TransportConfig::stdio("", &[]).validate("files").is_err());
        assert!(TransportConfig::http("").validate("web").is_err());
    }

    #[test]
    fn http_carries_protocol_version() {
        let transport = TransportConfig::http("http://localhost:8080")
            .with_protocol_version("2024-11-05");
        match transport {
            TransportConfig::Http {
                protocol_version, ..
            } => assert_eq!(protocol_version, "2024-11-05"),
            TransportConfig::Stdio { .. } => panic!("expected http"),
        }
    }

    #[test]
    fn serde_roundtrip() {
        let transport = TransportConfig::stdio("node", &["tools.js"]);
        let json = serde_json::to_string(&transport).unwrap();
        let parsed: TransportConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, transport);
    }
}
