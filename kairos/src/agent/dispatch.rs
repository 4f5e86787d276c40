//! Tool resolution and dispatch.
//!
//! Both execution modes, the reason-act loop and the plan executor,
//! funnel every tool call through one [`Dispatcher`], which owns the
//! resolved name-to-binding table and applies the full invocation
//! sequence: lookup, policy consult, argument normalization, deadline
//! enforcement, and telemetry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{Instrument as _, info_span, warn};

use crate::context::RunContext;
use crate::error::ErrorCode;
use crate::event::{AgentEvent, EventKind, SharedHub};
use crate::mcp::McpPool;
use crate::message::{ToolCall, decode_arguments};
use crate::policy::{Action, ApprovalHook, DecisionStatus, SharedPolicy};
use crate::telemetry::RunMetrics;
use crate::tool::{BoxedTool, ToolDefinition, resolve_toolset};

/// Where a resolved tool name dispatches to.
#[derive(Clone)]
pub(crate) enum Binding {
    Local(Arc<BoxedTool>),
    Remote { server: String },
}

/// Outcome of a dispatch, consumed by the caller to build an observation
/// or a node output.
#[derive(Debug)]
pub(crate) enum DispatchOutcome {
    /// The tool ran and produced a value.
    Success(Value),
    /// No tool with this name exists in the resolved set.
    NotFound,
    /// Policy refused the call (deny, or unresolved pending).
    Denied(String),
    /// The tool ran and failed.
    Failed(crate::error::Error),
}

impl DispatchOutcome {
    /// Render the outcome as the observation text appended to history.
    pub(crate) fn observation(&self, tool_name: &str) -> String {
        match self {
            Self::Success(value) => match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Self::NotFound => format!("Tool {tool_name} not found"),
            Self::Denied(reason) => format!("Policy denied: {reason}"),
            Self::Failed(err) => format!("Observation: Error executing tool: {err}"),
        }
    }
}

/// Result of the policy consult for one call.
enum PolicyGate {
    Allow,
    Deny(String),
    Unresolved(crate::error::Error),
}

/// Per-run dispatch table and governance handles.
pub(crate) struct Dispatcher {
    agent_id: String,
    bindings: HashMap<String, Binding>,
    definitions: Vec<ToolDefinition>,
    pool: Option<Arc<McpPool>>,
    policy: Option<SharedPolicy>,
    approval: Option<Arc<dyn ApprovalHook>>,
    tool_timeout: Option<Duration>,
    metrics: Arc<RunMetrics>,
    hub: Option<SharedHub>,
}

impl Dispatcher {
    /// Resolve the effective toolset for a run.
    ///
    /// Local tools come first in registration order, then each attached
    /// MCP server's listing (filtered by the skill allow-list when one is
    /// declared), deduplicated by name with first occurrence winning and
    /// stably sorted by name.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn resolve(
        ctx: &RunContext,
        agent_id: &str,
        local: &crate::tool::ToolRegistry,
        servers: &[String],
        allowed_skills: Option<&[String]>,
        pool: Option<Arc<McpPool>>,
        policy: Option<SharedPolicy>,
        approval: Option<Arc<dyn ApprovalHook>>,
        tool_timeout: Option<Duration>,
        metrics: Arc<RunMetrics>,
        hub: Option<SharedHub>,
    ) -> Self {
        let local_defs = local.definitions();
        let mut bindings: HashMap<String, Binding> = HashMap::new();
        for def in &local_defs {
            if let Some(tool) = local.get(&def.name) {
                bindings.insert(def.name.clone(), Binding::Local(tool));
            }
        }

        let mut remote_lists: Vec<Vec<ToolDefinition>> = Vec::new();
        if let Some(ref pool) = pool {
            for server in servers {
                match pool.get(ctx, server).await {
                    Ok(lease) => {
                        match lease.connection().list_tools(ctx).await {
                            Ok(defs) => {
                                for def in &defs {
                                    bindings.entry(def.name.clone()).or_insert_with(|| {
                                        Binding::Remote {
                                            server: server.clone(),
                                        }
                                    });
                                }
                                remote_lists.push(defs);
                            }
                            Err(err) => {
                                warn!(server = %server, error = %err, "MCP tool listing failed");
                            }
                        }
                        pool.release(lease).await;
                    }
                    Err(err) => {
                        warn!(server = %server, error = %err, "MCP acquisition failed during resolution");
                    }
                }
            }
        }

        let definitions = resolve_toolset(local_defs, remote_lists, allowed_skills);
        // Drop bindings for names the allow-list filtered out.
        bindings.retain(|name, _| definitions.iter().any(|d| &d.name == name));

        Self {
            agent_id: agent_id.to_owned(),
            bindings,
            definitions,
            pool,
            policy,
            approval,
            tool_timeout,
            metrics,
            hub,
        }
    }

    /// The definitions advertised to the LLM.
    pub(crate) fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Returns `true` when the resolved toolset is empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    async fn emit(&self, ctx: &RunContext, kind: EventKind, message: String, payload: Value) {
        if let Some(hub) = &self.hub {
            hub.emit(AgentEvent::new(kind, ctx.run_id(), message).with_payload(payload))
                .await;
        }
    }

    /// Consult the policy engine for a tool call.
    ///
    /// Denials (including pending with no hook, which is treated as a
    /// deny) become observations at the call site. A hook that fails to
    /// resolve (timeout, expiry, backend error) is an `unauthorized`
    /// failure that aborts the run.
    async fn consult_policy(&self, ctx: &RunContext, call: &ToolCall) -> PolicyGate {
        let Some(policy) = self.policy.as_ref() else {
            return PolicyGate::Allow;
        };
        let action = Action::tool(&call.name)
            .with_metadata("agent_id", &self.agent_id)
            .with_metadata("tool_call_id", &call.id);

        let decision = match policy.evaluate(ctx, &action).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(tool = %call.name, error = %err, "Policy evaluation failed; denying");
                return PolicyGate::Deny(format!("policy evaluation failed: {err}"));
            }
        };

        match decision.status {
            DecisionStatus::Allow => PolicyGate::Allow,
            DecisionStatus::Deny => {
                self.metrics.record_policy_denial();
                PolicyGate::Deny(decision.reason)
            }
            DecisionStatus::Pending => {
                self.emit(
                    ctx,
                    EventKind::ApprovalRequired,
                    format!("approval required for tool '{}'", call.name),
                    serde_json::json!({"tool": call.name, "reason": decision.reason}),
                )
                .await;

                let Some(hook) = self.approval.as_ref() else {
                    self.metrics.record_policy_denial();
                    return PolicyGate::Deny(format!("approval required: {}", decision.reason));
                };
                match hook.approve(ctx, &action, &decision.reason).await {
                    Ok(true) => PolicyGate::Allow,
                    Ok(false) => {
                        self.metrics.record_policy_denial();
                        PolicyGate::Deny(decision.reason)
                    }
                    Err(err) => {
                        self.metrics.record_policy_denial();
                        PolicyGate::Unresolved(
                            crate::error::Error::unauthorized(format!(
                                "approval for tool '{}' was not resolved: {err}",
                                call.name
                            ))
                            .with_context("tool_call_id", &call.id),
                        )
                    }
                }
            }
        }
    }

    /// Dispatch one tool call: lookup, policy, decode, invoke, record.
    pub(crate) async fn dispatch(&self, ctx: &RunContext, call: &ToolCall) -> DispatchOutcome {
        let span = info_span!(
            "tool",
            tool.name = %call.name,
            tool.id = %call.id,
            run_id = %ctx.run_id(),
            tool.success = tracing::field::Empty,
        );

        async {
            let Some(binding) = self.bindings.get(&call.name) else {
                warn!(tool = %call.name, "Tool not found");
                return DispatchOutcome::NotFound;
            };

            match self.consult_policy(ctx, call).await {
                PolicyGate::Allow => {}
                PolicyGate::Deny(reason) => {
                    tracing::Span::current().record("tool.success", false);
                    return DispatchOutcome::Denied(reason);
                }
                PolicyGate::Unresolved(err) => {
                    tracing::Span::current().record("tool.success", false);
                    return DispatchOutcome::Failed(err);
                }
            }

            let args = match decode_arguments(&call.arguments) {
                Ok(args) => args,
                Err(err) => {
                    self.metrics.record_tool_error();
                    return DispatchOutcome::Failed(err);
                }
            };

            self.emit(
                ctx,
                EventKind::ToolStart,
                format!("tool '{}' started", call.name),
                serde_json::json!({"tool": call.name, "tool_call_id": call.id}),
            )
            .await;

            let started = std::time::Instant::now();
            let result = match binding {
                Binding::Local(tool) => {
                    let tool = Arc::clone(tool);
                    ctx.run_scoped(self.tool_timeout, async move { tool.call_json(args).await })
                        .await
                }
                Binding::Remote { server } => match self.pool.as_ref() {
                    Some(pool) => {
                        let lease = match pool.get(ctx, server).await {
                            Ok(lease) => lease,
                            Err(err) => {
                                self.metrics.record_tool_error();
                                return DispatchOutcome::Failed(err);
                            }
                        };
                        let out = ctx
                            .run_scoped(self.tool_timeout, async {
                                lease.connection().call_tool(ctx, &call.name, args).await
                            })
                            .await;
                        pool.release(lease).await;
                        out
                    }
                    None => Err(crate::error::Error::internal(format!(
                        "tool '{}' is remote but no pool is attached",
                        call.name
                    ))),
                },
            };
            let latency = started.elapsed();

            match result {
                Ok(value) => {
                    self.metrics.record_tool_call(latency);
                    tracing::Span::current().record("tool.success", true);
                    self.emit(
                        ctx,
                        EventKind::ToolDone,
                        format!("tool '{}' completed", call.name),
                        serde_json::json!({
                            "tool": call.name,
                            "tool_call_id": call.id,
                            "latency_ms": latency.as_millis() as u64,
                        }),
                    )
                    .await;
                    DispatchOutcome::Success(value)
                }
                Err(err) => {
                    self.metrics.record_tool_call(latency);
                    self.metrics.record_tool_error();
                    tracing::Span::current().record("tool.success", false);
                    warn!(tool = %call.name, error = %err, "Tool execution failed");
                    self.emit(
                        ctx,
                        EventKind::ToolDone,
                        format!("tool '{}' failed", call.name),
                        serde_json::json!({
                            "tool": call.name,
                            "tool_call_id": call.id,
                            "error": err.to_string(),
                        }),
                    )
                    .await;
                    // Cancellation and deadline failures abort the run;
                    // anything else is a recoverable tool failure.
                    if err.is(ErrorCode::ContextLost) || err.is_cancellation() {
                        DispatchOutcome::Failed(err)
                    } else if err.is(ErrorCode::Timeout) {
                        DispatchOutcome::Failed(
                            crate::error::Error::tool_failure(
                                &call.name,
                                format!("tool timed out: {err}"),
                            )
                            .with_context("tool_call_id", &call.id),
                        )
                    } else {
                        DispatchOutcome::Failed(
                            crate::error::Error::tool_failure(&call.name, err.to_string())
                                .with_context("tool_call_id", &call.id),
                        )
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}
