//! Agents: configured LLM-driven executors.
//!
//! An [`Agent`] is built once from configuration and never mutated
//! afterwards. A single [`Agent::run`] is logically sequential: one LLM
//! call at a time, tool calls serialized in declaration order. Many runs
//! may execute concurrently against the same agent.
//!
//! # Example
//!
//! ```rust,ignore
//! let agent = Agent::builder()
//!     .name("assistant")
//!     .role("You are a helpful assistant.")
//!     .provider(provider)
//!     .model("gpt-4o")
//!     .tool(Box::new(Calculator))
//!     .build()?;
//!
//! let answer = agent.run(&RunContext::new(), "What is 10 + 5?").await?;
//! ```

mod builder;
mod dispatch;
mod runner;

pub use builder::AgentBuilder;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::card::{AgentCard, Capabilities};
use crate::error::{Error, Result};
use crate::event::SharedHub;
use crate::guardrail::Guardrails;
use crate::llm::SharedProvider;
use crate::mcp::McpPool;
use crate::memory::{SharedConversation, SharedMemory, TruncationPolicy};
use crate::plan::{NodeHandler, PlanGraph};
use crate::policy::{ApprovalHook, SharedPolicy};
use crate::telemetry::RunMetrics;
use crate::tool::ToolRegistry;

/// A configured LLM-driven executor.
///
/// Immutable after construction; cheap to share behind [`Arc`].
pub struct Agent {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) role: String,
    pub(crate) manifest: Option<String>,
    pub(crate) provider: SharedProvider,
    pub(crate) model: String,
    pub(crate) max_iterations: usize,
    pub(crate) tools: ToolRegistry,
    pub(crate) mcp_servers: Vec<String>,
    pub(crate) allowed_skills: Option<Vec<String>>,
    pub(crate) pool: Option<Arc<McpPool>>,
    pub(crate) policy: Option<SharedPolicy>,
    pub(crate) approval: Option<Arc<dyn ApprovalHook>>,
    pub(crate) guardrails: Guardrails,
    pub(crate) memory: Option<SharedMemory>,
    pub(crate) conversation: Option<SharedConversation>,
    pub(crate) truncation: TruncationPolicy,
    pub(crate) hub: Option<SharedHub>,
    pub(crate) plan: Option<PlanGraph>,
    pub(crate) plan_handlers: Vec<(String, Arc<dyn NodeHandler>)>,
    pub(crate) tool_timeout: Option<Duration>,
    pub(crate) legacy_directives: bool,
    pub(crate) metrics: Arc<RunMetrics>,
    pub(crate) closed: AtomicBool,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model", &self.model)
            .field("max_iterations", &self.max_iterations)
            .field("tools", &self.tools)
            .field("mcp_servers", &self.mcp_servers)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Create a new agent builder.
    #[inline]
    #[must_use]
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// Stable agent id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Agent name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model the agent chats with.
    #[inline]
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Iteration bound for the reason-act loop.
    #[inline]
    #[must_use]
    pub const fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Cumulative run metrics.
    #[inline]
    #[must_use]
    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// The agent's event hub, when one is attached.
    #[inline]
    #[must_use]
    pub fn hub(&self) -> Option<&SharedHub> {
        self.hub.as_ref()
    }

    /// The card describing this agent for discovery.
    #[must_use]
    pub fn card(&self) -> AgentCard {
        let mut card = AgentCard::new(&self.name, env!("CARGO_PKG_VERSION"))
            .with_description(&self.role)
            .with_capabilities(Capabilities { streaming: true });
        if let Some(skills) = &self.allowed_skills {
            for skill in skills {
                card = card.with_skill(skill, "");
            }
        }
        for def in self.tools.definitions() {
            card = card.with_skill(&def.name, &def.description);
        }
        card
    }

    /// Close the agent: subsequent runs are refused. Pool connections are
    /// shared infrastructure and stay with the pool.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the agent has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::internal(format!("agent '{}' is closed", self.name)));
        }
        Ok(())
    }
}
