//! Agent cards and discovery.
//!
//! An [`AgentCard`] describes an agent's identity and capabilities for
//! consumers. Cards are served at a well-known path; [`fetch_agent_card`]
//! retrieves and caches them, and a [`CardRegistry`] supports dynamic
//! composition. Discovery hints come from the environment
//! (`KAIROS_AGENT_CARD_URLS`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

/// Well-known path where agents expose their card.
pub const AGENT_CARD_PATH: &str = "/.well-known/agent-card.json";

/// Environment variable: gRPC listen address hint.
pub const ENV_GRPC_ADDR: &str = "KAIROS_GRPC_ADDR";
/// Environment variable: HTTP base URL hint.
pub const ENV_HTTP_URL: &str = "KAIROS_HTTP_URL";
/// Environment variable: comma-separated agent-card URLs for discovery.
pub const ENV_AGENT_CARD_URLS: &str = "KAIROS_AGENT_CARD_URLS";

/// A declared skill on an agent card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDecl {
    /// Skill name.
    pub name: String,
    /// Human description.
    pub description: String,
}

/// Capability flags advertised by an agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Whether the agent supports streaming responses.
    #[serde(default)]
    pub streaming: bool,
}

/// A document describing an agent for discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    /// Agent name.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Declared skills.
    #[serde(default)]
    pub skills: Vec<SkillDecl>,
    /// Capability flags.
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl AgentCard {
    /// Create a card.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            skills: Vec::new(),
            capabilities: Capabilities::default(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a skill.
    #[must_use]
    pub fn with_skill(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.skills.push(SkillDecl {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    /// Set capability flags.
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Listen-address hints read from the environment.
///
/// Only the variables the core consumes; everything else in the
/// environment belongs to external collaborators.
#[derive(Debug, Clone, Default)]
pub struct RuntimeEndpoints {
    /// gRPC listen address from `KAIROS_GRPC_ADDR`.
    pub grpc_addr: Option<String>,
    /// HTTP base URL from `KAIROS_HTTP_URL`.
    pub http_url: Option<String>,
}

impl RuntimeEndpoints {
    /// Read the endpoint hints from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };
        Self {
            grpc_addr: read(ENV_GRPC_ADDR),
            http_url: read(ENV_HTTP_URL),
        }
    }
}

/// Comma-separated discovery hints from `KAIROS_AGENT_CARD_URLS`.
#[must_use]
pub fn discovery_hints() -> Vec<String> {
    std::env::var(ENV_AGENT_CARD_URLS)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Fetch an agent card from a base URL, appending the well-known path
/// when the URL does not already point at a card document.
pub async fn fetch_agent_card(base_url: &str) -> Result<AgentCard> {
    let url = if base_url.ends_with(".json") {
        base_url.to_owned()
    } else {
        format!("{}{AGENT_CARD_PATH}", base_url.trim_end_matches('/'))
    };

    let response = reqwest::get(&url)
        .await
        .map_err(|e| Error::internal(format!("agent card fetch from '{url}' failed: {e}")))?;
    if !response.status().is_success() {
        return Err(Error::not_found(format!(
            "agent card fetch from '{url}' returned {}",
            response.status()
        )));
    }
    response
        .json::<AgentCard>()
        .await
        .map_err(|e| Error::invalid_input(format!("malformed agent card at '{url}': {e}")))
}

/// Registry of known agent cards for dynamic composition, with a fetch
/// cache.
#[derive(Debug)]
pub struct CardRegistry {
    cards: RwLock<HashMap<String, AgentCard>>,
    cache: RwLock<HashMap<String, (Instant, AgentCard)>>,
    cache_ttl: Duration,
}

impl Default for CardRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl CardRegistry {
    /// Create a registry with a fetch-cache TTL.
    #[must_use]
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            cards: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// Register a card under its name. Re-registration replaces.
    pub async fn register(&self, card: AgentCard) {
        self.cards.write().await.insert(card.name.clone(), card);
    }

    /// All registered cards, sorted by name.
    pub async fn list(&self) -> Vec<AgentCard> {
        let mut cards: Vec<AgentCard> = self.cards.read().await.values().cloned().collect();
        cards.sort_by(|a, b| a.name.cmp(&b.name));
        cards
    }

    /// Look up a registered card by name.
    pub async fn get(&self, name: &str) -> Option<AgentCard> {
        self.cards.read().await.get(name).cloned()
    }

    /// Fetch a remote card through the cache.
    pub async fn fetch(&self, base_url: &str) -> Result<AgentCard> {
        {
            let cache = self.cache.read().await;
            if let Some((at, card)) = cache.get(base_url) {
                if at.elapsed() < self.cache_ttl {
                    debug!(url = base_url, "Agent card served from cache");
                    return Ok(card.clone());
                }
            }
        }
        let card = fetch_agent_card(base_url).await?;
        self.cache
            .write()
            .await
            .insert(base_url.to_owned(), (Instant::now(), card.clone()));
        Ok(card)
    }
}
