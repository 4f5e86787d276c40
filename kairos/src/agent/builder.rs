//! Agent builder.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use uuid::Uuid;

use super::Agent;
use crate::error::{Error, Result};
use crate::event::SharedHub;
use crate::guardrail::Guardrails;
use crate::llm::SharedProvider;
use crate::mcp::McpPool;
use crate::memory::{SharedConversation, SharedMemory, TruncationPolicy};
use crate::plan::{NodeHandler, PlanGraph};
use crate::policy::{ApprovalHook, SharedPolicy};
use crate::telemetry::RunMetrics;
use crate::tool::{BoxedTool, ToolRegistry};

/// Default iteration bound for the reason-act loop.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Fluent builder for [`Agent`].
///
/// ```rust,ignore
/// let agent = Agent::builder()
///     .name("researcher")
///     .role("You research topics thoroughly.")
///     .provider(provider)
///     .model("gpt-4o")
///     .mcp_server("filesystem")
///     .pool(pool)
///     .build()?;
/// ```
#[derive(Default)]
pub struct AgentBuilder {
    name: Option<String>,
    role: Option<String>,
    manifest: Option<String>,
    provider: Option<SharedProvider>,
    model: Option<String>,
    max_iterations: Option<usize>,
    tools: ToolRegistry,
    mcp_servers: Vec<String>,
    allowed_skills: Option<Vec<String>>,
    pool: Option<Arc<McpPool>>,
    policy: Option<SharedPolicy>,
    approval: Option<Arc<dyn ApprovalHook>>,
    guardrails: Guardrails,
    memory: Option<SharedMemory>,
    conversation: Option<SharedConversation>,
    truncation: TruncationPolicy,
    hub: Option<SharedHub>,
    plan: Option<PlanGraph>,
    plan_handlers: Vec<(String, Arc<dyn NodeHandler>)>,
    tool_timeout: Option<Duration>,
    legacy_directives: bool,
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("name", &self.name)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl AgentBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the agent name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the role text used as the system prompt.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Append a behavioral manifest to the system prompt.
    #[must_use]
    pub fn manifest(mut self, manifest: impl Into<String>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }

    /// Set the LLM provider.
    #[must_use]
    pub fn provider(mut self, provider: SharedProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the model name.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Bound the reason-act loop (default 10).
    #[must_use]
    pub const fn max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Register a local tool.
    #[must_use]
    pub fn tool(mut self, tool: BoxedTool) -> Self {
        self.tools.add(tool);
        self
    }

    /// Attach an MCP server by registered name.
    #[must_use]
    pub fn mcp_server(mut self, server: impl Into<String>) -> Self {
        self.mcp_servers.push(server.into());
        self
    }

    /// Restrict remote tools to a skill allow-list.
    #[must_use]
    pub fn allowed_skills(mut self, skills: Vec<String>) -> Self {
        self.allowed_skills = Some(skills);
        self
    }

    /// Attach the shared MCP pool.
    #[must_use]
    pub fn pool(mut self, pool: Arc<McpPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Attach a policy engine.
    #[must_use]
    pub fn policy(mut self, policy: SharedPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Attach an approval hook for pending policy decisions.
    #[must_use]
    pub fn approval(mut self, hook: Arc<dyn ApprovalHook>) -> Self {
        self.approval = Some(hook);
        self
    }

    /// Attach guardrails.
    #[must_use]
    pub fn guardrails(mut self, guardrails: Guardrails) -> Self {
        self.guardrails = guardrails;
        self
    }

    /// Attach semantic memory.
    #[must_use]
    pub fn memory(mut self, memory: SharedMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach conversational memory.
    #[must_use]
    pub fn conversation(mut self, conversation: SharedConversation) -> Self {
        self.conversation = Some(conversation);
        self
    }

    /// Set the conversational truncation policy.
    #[must_use]
    pub const fn truncation(mut self, policy: TruncationPolicy) -> Self {
        self.truncation = policy;
        self
    }

    /// Attach an event hub.
    #[must_use]
    pub fn hub(mut self, hub: SharedHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Configure an explicit plan; when set, runs execute the plan
    /// instead of the reason-act loop.
    #[must_use]
    pub fn plan(mut self, plan: PlanGraph) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Register a custom plan-node handler, overriding built-ins by key.
    #[must_use]
    pub fn plan_handler(mut self, key: impl Into<String>, handler: Arc<dyn NodeHandler>) -> Self {
        self.plan_handlers.push((key.into(), handler));
        self
    }

    /// Per-tool timeout.
    #[must_use]
    pub const fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    /// Enable the legacy textual `Action:` directive fallback
    /// (off by default).
    #[must_use]
    pub const fn legacy_directives(mut self, enabled: bool) -> Self {
        self.legacy_directives = enabled;
        self
    }

    /// Build the agent.
    ///
    /// Fails when no provider or model is configured, when MCP servers
    /// are attached without a pool, or when the configured plan does not
    /// validate.
    pub fn build(self) -> Result<Arc<Agent>> {
        let provider = self
            .provider
            .ok_or_else(|| Error::invalid_input("agent has no provider configured"))?;
        let model = self
            .model
            .ok_or_else(|| Error::invalid_input("agent has no model configured"))?;
        if !self.mcp_servers.is_empty() && self.pool.is_none() {
            return Err(Error::invalid_input(
                "agent attaches MCP servers but no pool",
            ));
        }
        if let Some(ref plan) = self.plan {
            plan.validate()?;
        }
        let max_iterations = self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS).max(1);

        Ok(Arc::new(Agent {
            id: Uuid::new_v4().to_string(),
            name: self.name.unwrap_or_else(|| "agent".to_owned()),
            role: self.role.unwrap_or_default(),
            manifest: self.manifest,
            provider,
            model,
            max_iterations,
            tools: self.tools,
            mcp_servers: self.mcp_servers,
            allowed_skills: self.allowed_skills,
            pool: self.pool,
            policy: self.policy,
            approval: self.approval,
            guardrails: self.guardrails,
            memory: self.memory,
            conversation: self.conversation,
            truncation: self.truncation,
            hub: self.hub,
            plan: self.plan,
            plan_handlers: self.plan_handlers,
            tool_timeout: self.tool_timeout,
            legacy_directives: self.legacy_directives,
            metrics: Arc::new(RunMetrics::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, ScriptedProvider};

    fn provider() -> SharedProvider {
        Arc::new(ScriptedProvider::new([ChatResponse::text("hi")]))
    }

    #[test]
    fn build_requires_provider_and_model() {
        assert!(AgentBuilder::new().model("m").build().is_err());
        assert!(AgentBuilder::new().provider(provider()).build().is_err());
        assert!(
            AgentBuilder::new()
                .provider(provider())
                .model("m")
                .build()
                .is_ok()
        );
    }

    #[test]
    fn mcp_servers_require_a_pool() {
        let err = AgentBuilder::new()
            .provider(provider())
            .model("m")
            .mcp_server("files")
            .build()
            .unwrap_err();
        assert!(err.is(crate::error::ErrorCode::InvalidInput));
    }

    #[test]
    fn invalid_plan_is_rejected_at_build() {
        let plan = crate::plan::PlanGraph::new("p", "missing");
        let err = AgentBuilder::new()
            .provider(provider())
            .model("m")
            .plan(plan)
            .build()
            .unwrap_err();
        assert!(err.is(crate::error::ErrorCode::InvalidInput));
    }

    #[test]
    fn defaults_are_applied() {
        let agent = AgentBuilder::new()
            .provider(provider())
            .model("m")
            .build()
            .unwrap();
        assert_eq!(agent.name(), "agent");
        assert_eq!(agent.max_iterations(), DEFAULT_MAX_ITERATIONS);
        assert!(!agent.is_closed());
    }
}
