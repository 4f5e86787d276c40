//! Agent execution: the reason-act loop and the plan delegation path.
//!
//! Both modes share one set of primitives (tool dispatch through
//! [`Dispatcher`], governance, memory, event emission), so a tool
//! call behaves identically whether the LLM requested it or a plan node
//! declared it.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::SystemTime;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{Instrument as _, debug, info, info_span, warn};
use uuid::Uuid;

use super::Agent;
use super::dispatch::{DispatchOutcome, Dispatcher};
use crate::context::RunContext;
use crate::error::{Error, ErrorCode, Result};
use crate::event::{AgentEvent, EventKind, SharedHub};
use crate::llm::{ChatRequest, ChatResponse};
use crate::memory::flatten_context;
use crate::message::{Message, ToolCall};
use crate::plan::{ExecutionState, NodeHandler, PlanExecutor, PlanNode};

/// Marker that ends an emergent run with everything after it as the
/// answer.
pub const FINAL_ANSWER_MARKER: &str = "Final Answer:";

static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Action:[ \t]*([^\n]+)").expect("valid regex"));
static ACTION_INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?ms)^Action Input:[ \t]*(.*)\z").expect("valid regex"));

/// Parse the legacy `Action:` / `Action Input:` directive.
fn parse_action(content: &str) -> Option<(String, String)> {
    let name = ACTION_RE.captures(content)?.get(1)?.as_str().trim().to_owned();
    let input = ACTION_INPUT_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_owned())
        .unwrap_or_default();
    Some((name, input))
}

impl Agent {
    /// Run the agent to completion.
    ///
    /// Executes the configured plan when one exists, otherwise the
    /// reason-act loop. The context supplies the run id (generated if
    /// absent at construction), cancellation, and deadline.
    pub async fn run(self: &Arc<Self>, ctx: &RunContext, input: &str) -> Result<String> {
        self.run_with_hub(ctx, input, self.hub.clone()).await
    }

    /// Run with an explicit event hub (the task layer passes per-task
    /// hubs through here).
    pub(crate) async fn run_with_hub(
        self: &Arc<Self>,
        ctx: &RunContext,
        input: &str,
        hub: Option<SharedHub>,
    ) -> Result<String> {
        self.check_open()?;

        let mut ctx = ctx.clone();
        if self.conversation.is_some() && ctx.session_id().is_none() {
            ctx.ensure_session_id();
        }

        let input = self.guardrails.check_input(&ctx, input).await?;

        let span = info_span!(
            "agent",
            agent.name = %self.name,
            agent.model = %self.model,
            run_id = %ctx.run_id(),
            agent.max_iterations = self.max_iterations,
        );

        if self.plan.is_some() {
            self.run_plan(&ctx, &input, hub).instrument(span).await
        } else {
            self.run_emergent(&ctx, &input, hub).instrument(span).await
        }
    }

    async fn emit(
        hub: Option<&SharedHub>,
        ctx: &RunContext,
        kind: EventKind,
        message: String,
        payload: Value,
    ) {
        if let Some(hub) = hub {
            hub.emit(AgentEvent::new(kind, ctx.run_id(), message).with_payload(payload))
                .await;
        }
    }

    fn system_prompt(&self) -> Option<String> {
        let mut prompt = self.role.clone();
        if let Some(manifest) = &self.manifest {
            if !prompt.is_empty() {
                prompt.push_str("\n\n");
            }
            prompt.push_str(manifest);
        }
        (!prompt.is_empty()).then_some(prompt)
    }

    /// Query semantic memory for context to inject before the first turn.
    ///
    /// A failing typed query is retried once with a null query; a second
    /// failure drops the context entirely (the run proceeds without it).
    async fn memory_context(
        &self,
        ctx: &RunContext,
        input: &str,
        hub: Option<&SharedHub>,
    ) -> Option<String> {
        let memory = self.memory.as_ref()?;

        Self::emit(
            hub,
            ctx,
            EventKind::RetrievalStart,
            "memory retrieval started".to_owned(),
            Value::Null,
        )
        .await;
        self.metrics.record_memory_read();

        let result = match memory.retrieve(ctx, Value::String(input.to_owned())).await {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(error = %err, "Memory query failed; retrying with null query");
                match memory.retrieve(ctx, Value::Null).await {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!(error = %err, "Memory retrieval failed; omitting context");
                        None
                    }
                }
            }
        };

        let lines = result.as_ref().map(flatten_context).unwrap_or_default();

        Self::emit(
            hub,
            ctx,
            EventKind::RetrievalDone,
            format!("memory retrieval finished ({} items)", lines.len()),
            serde_json::json!({"items": lines.len()}),
        )
        .await;

        (!lines.is_empty()).then(|| format!("Memory context:\n{}", lines.join("\n")))
    }

    /// Store the run outcome and append the conversational turn.
    /// Both writes are best-effort.
    async fn finalize(
        &self,
        ctx: &RunContext,
        input: &str,
        answer: String,
        hub: Option<&SharedHub>,
    ) -> Result<String> {
        let answer = self.guardrails.filter_output(ctx, &answer).await?;

        if let Some(memory) = &self.memory {
            let timestamp = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let record = serde_json::json!({
                "timestamp": timestamp,
                "input": input,
                "answer": answer,
            });
            self.metrics.record_memory_write();
            if let Err(err) = memory.store(ctx, record).await {
                warn!(error = %err, "Memory store failed; ignoring");
            }
        }

        if let (Some(conversation), Some(session)) = (&self.conversation, ctx.session_id()) {
            if let Err(err) = conversation
                .append_message(ctx, session, Message::user(input))
                .await
            {
                warn!(error = %err, "Conversation append failed; ignoring");
            }
            if let Err(err) = conversation
                .append_message(ctx, session, Message::assistant(&answer))
                .await
            {
                warn!(error = %err, "Conversation append failed; ignoring");
            }
        }

        Self::emit(
            hub,
            ctx,
            EventKind::ResponseDelta,
            answer.clone(),
            Value::Null,
        )
        .await;

        info!(agent = %self.name, "Run completed");
        Ok(answer)
    }

    async fn dispatcher(&self, ctx: &RunContext, hub: Option<SharedHub>) -> Dispatcher {
        Dispatcher::resolve(
            ctx,
            &self.id,
            &self.tools,
            &self.mcp_servers,
            self.allowed_skills.as_deref(),
            self.pool.clone(),
            self.policy.clone(),
            self.approval.clone(),
            self.tool_timeout,
            Arc::clone(&self.metrics),
            hub,
        )
        .await
    }

    /// Call the LLM, wrapping failures per the propagation policy:
    /// cancellation and deadline failures keep their codes, anything else
    /// becomes a recoverable `llm_error`.
    async fn chat_turn(&self, ctx: &RunContext, request: &ChatRequest) -> Result<ChatResponse> {
        self.metrics.record_llm_call();
        let out = ctx
            .run_scoped(None, self.provider.chat(ctx, request))
            .await;
        out.map_err(|err| {
            self.metrics.record_llm_error();
            if err.is(ErrorCode::ContextLost) || err.is(ErrorCode::Timeout) {
                err
            } else {
                let message = format!("llm call failed: {err}");
                Error::llm(message).with_cause(err).with_context("agent", &self.name)
            }
        })
    }

    /// The emergent reason-act loop.
    async fn run_emergent(
        self: &Arc<Self>,
        ctx: &RunContext,
        input: &str,
        hub: Option<SharedHub>,
    ) -> Result<String> {
        let dispatcher = self.dispatcher(ctx, hub.clone()).await;
        let hub_ref = hub.as_ref();

        let mut messages = Vec::new();
        if let Some(system) = self.system_prompt() {
            messages.push(Message::system(system));
        }
        if let Some(context) = self.memory_context(ctx, input, hub_ref).await {
            messages.push(Message::system(context));
        }
        if let (Some(conversation), Some(session)) = (&self.conversation, ctx.session_id()) {
            match conversation.get_messages(ctx, session, None).await {
                Ok(history) => messages.extend(self.truncation.apply(&history)),
                Err(err) => warn!(error = %err, "Conversation history load failed; skipping"),
            }
        }
        messages.push(Message::user(input));

        let definitions = dispatcher.definitions().to_vec();

        for iteration in 1..=self.max_iterations {
            ctx.check()?;
            debug!(agent = %self.name, iteration, "Starting iteration");
            Self::emit(
                hub_ref,
                ctx,
                EventKind::Thinking,
                format!("iteration {iteration}"),
                serde_json::json!({"iteration": iteration}),
            )
            .await;

            let request =
                ChatRequest::new(&self.model, messages.clone()).tools(definitions.clone());
            let response = self.chat_turn(ctx, &request).await?;

            let tool_calls = response.tool_calls.clone();
            messages.push(response.into_message());

            // Structured tool calls: dispatch strictly in request order,
            // observations appended in the same order.
            if !tool_calls.is_empty() {
                for call in &tool_calls {
                    let outcome = match dispatcher.dispatch(ctx, call).await {
                        DispatchOutcome::Failed(err) => {
                            if err.is(ErrorCode::ContextLost) || err.is_cancellation() {
                                return Err(Error::context_lost("run cancelled during tool call")
                                    .with_context("tool", &call.name)
                                    .with_context("cancelled", "true"));
                            }
                            // Unresolved approvals abort the run as unauthorized.
                            if err.is(ErrorCode::Unauthorized) {
                                return Err(err);
                            }
                            DispatchOutcome::Failed(err)
                        }
                        other => other,
                    };
                    let observation = outcome.observation(&call.name);
                    messages.push(Message::tool(&call.id, observation));
                }
                continue;
            }

            let content = match messages.last() {
                Some(msg) => msg.content.clone(),
                None => String::new(),
            };

            // Final answer marker ends the run.
            if let Some((_, rest)) = content.split_once(FINAL_ANSWER_MARKER) {
                let answer = rest.trim().to_owned();
                return self.finalize(ctx, input, answer, hub_ref).await;
            }

            // Legacy textual directive, honored only when enabled.
            if self.legacy_directives {
                if let Some((name, action_input)) = parse_action(&content) {
                    let call = ToolCall::new(
                        format!("legacy-{iteration}"),
                        name.clone(),
                        Value::String(action_input),
                    );
                    let outcome = match dispatcher.dispatch(ctx, &call).await {
                        DispatchOutcome::Failed(err) => {
                            if err.is(ErrorCode::ContextLost) || err.is_cancellation() {
                                return Err(Error::context_lost("run cancelled during tool call")
                                    .with_context("tool", &name)
                                    .with_context("cancelled", "true"));
                            }
                            if err.is(ErrorCode::Unauthorized) {
                                return Err(err);
                            }
                            DispatchOutcome::Failed(err)
                        }
                        other => other,
                    };
                    let observation = outcome.observation(&name);
                    let text = if observation.starts_with("Observation:") {
                        observation
                    } else {
                        format!("Observation: {observation}")
                    };
                    messages.push(Message::user(text));
                    continue;
                }
            }

            // With no tools there is nothing left to wait for: the
            // content is the answer.
            if dispatcher.is_empty() {
                return self.finalize(ctx, input, content, hub_ref).await;
            }

            // Plain assistant output with tools available: keep iterating.
        }

        Err(Error::timeout(format!(
            "exceeded max iterations ({})",
            self.max_iterations
        ))
        .with_context("agent", &self.name))
    }

    /// The explicit plan path.
    async fn run_plan(
        self: &Arc<Self>,
        ctx: &RunContext,
        input: &str,
        hub: Option<SharedHub>,
    ) -> Result<String> {
        let Some(plan) = self.plan.clone() else {
            return Err(Error::internal("run_plan called without a plan"));
        };
        let hub_ref = hub.clone();

        let dispatcher = Arc::new(self.dispatcher(ctx, hub.clone()).await);

        let mut executor = PlanExecutor::new();
        if let Some(h) = hub.clone() {
            executor = executor.with_hub(h);
        }
        executor.register(
            "tool",
            Arc::new(ToolNodeHandler {
                dispatcher: Arc::clone(&dispatcher),
            }),
        );
        executor.register(
            "llm",
            Arc::new(LlmNodeHandler {
                agent: Arc::clone(self),
            }),
        );
        executor.register(
            "agent",
            Arc::new(AgentNodeHandler {
                agent: Arc::clone(self),
                hub: hub.clone(),
            }),
        );
        for (key, handler) in &self.plan_handlers {
            executor.register(key.clone(), Arc::clone(handler));
        }

        let mut state = ExecutionState::new(Value::String(input.to_owned()));
        if let Some(context) = self.memory_context(ctx, input, hub_ref.as_ref()).await {
            state.record("memory_context", Value::String(context));
            // Seed again so `last` is the input, not the memory context.
            state.record("input", Value::String(input.to_owned()));
        }

        let output = executor.execute(ctx, &plan, state).await?;
        let answer = match output {
            Value::String(s) => s,
            other => other.to_string(),
        };
        self.finalize(ctx, input, answer, hub_ref.as_ref()).await
    }
}

/// Plan handler for `tool` nodes: routes through the shared dispatcher.
struct ToolNodeHandler {
    dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl NodeHandler for ToolNodeHandler {
    async fn handle(
        &self,
        ctx: &RunContext,
        node: &PlanNode,
        input: Value,
        _state: &ExecutionState,
    ) -> Result<Value> {
        let tool = node.tool.clone().ok_or_else(|| {
            Error::invalid_input(format!("tool node '{}' has no tool binding", node.id))
        })?;
        let call = ToolCall::new(format!("plan-{}", Uuid::new_v4()), tool.clone(), input);
        match self.dispatcher.dispatch(ctx, &call).await {
            DispatchOutcome::Success(value) => Ok(value),
            DispatchOutcome::NotFound => {
                Err(Error::not_found(format!("Tool {tool} not found")))
            }
            DispatchOutcome::Denied(reason) => {
                Err(Error::unauthorized(format!("Policy denied: {reason}")))
            }
            DispatchOutcome::Failed(err) => Err(err),
        }
    }
}

/// Plan handler for `llm` nodes: a single chat call on the node input.
struct LlmNodeHandler {
    agent: Arc<Agent>,
}

#[async_trait]
impl NodeHandler for LlmNodeHandler {
    async fn handle(
        &self,
        ctx: &RunContext,
        _node: &PlanNode,
        input: Value,
        _state: &ExecutionState,
    ) -> Result<Value> {
        let text = match input {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let mut messages = Vec::new();
        if let Some(system) = self.agent.system_prompt() {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(text));
        let request = ChatRequest::new(&self.agent.model, messages);
        let response = self.agent.chat_turn(ctx, &request).await?;
        Ok(Value::String(response.content))
    }
}

/// Plan handler for `agent` nodes: a nested emergent run.
struct AgentNodeHandler {
    agent: Arc<Agent>,
    hub: Option<SharedHub>,
}

#[async_trait]
impl NodeHandler for AgentNodeHandler {
    async fn handle(
        &self,
        ctx: &RunContext,
        _node: &PlanNode,
        input: Value,
        _state: &ExecutionState,
    ) -> Result<Value> {
        let text = match input {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let answer = self.agent.run_emergent(ctx, &text, self.hub.clone()).await?;
        Ok(Value::String(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_directive_parses_name_and_input() {
        let content = "Thought: need math. Action: Calculator\nAction Input: 10 + 5";
        let (name, input) = parse_action(content).unwrap_or_default();
        assert_eq!(name, "Calculator");
        assert_eq!(input, "10 + 5");
    }

    #[test]
    fn action_without_input_defaults_to_empty() {
        let (name, input) = parse_action("Action: list_files").unwrap_or_default();
        assert_eq!(name, "list_files");
        assert_eq!(input, "");
    }

    #[test]
    fn plain_text_is_not_a_directive() {
        assert!(parse_action("Just thinking about actions.").is_none());
    }

    #[test]
    fn multiline_action_input_is_kept() {
        let content = "Action: write\nAction Input: line one\nline two";
        let (_, input) = parse_action(content).unwrap_or_default();
        assert_eq!(input, "line one\nline two");
    }
}
