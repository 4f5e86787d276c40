//! Plan executor: walks a [`PlanGraph`] over an [`ExecutionState`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info_span};
use tracing::Instrument as _;

use super::{END, EdgeCondition, PlanGraph, PlanNode};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::event::{AgentEvent, EventKind, SharedHub};

/// Key/value output map keyed by node id plus a `last` slot holding the
/// most recent value.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    outputs: Map<String, Value>,
    last: Value,
}

impl ExecutionState {
    /// Seed a state with the run input.
    ///
    /// The input lands in the `input` key and the `last` slot.
    #[must_use]
    pub fn new(input: Value) -> Self {
        let mut outputs = Map::new();
        outputs.insert("input".to_owned(), input.clone());
        Self {
            outputs,
            last: input,
        }
    }

    /// Record a node's output and update `last`.
    pub fn record(&mut self, node_id: &str, value: Value) {
        self.outputs.insert(node_id.to_owned(), value.clone());
        self.last = value;
    }

    /// The most recent output.
    #[must_use]
    pub const fn last(&self) -> &Value {
        &self.last
    }

    /// Raw output map.
    #[must_use]
    pub const fn outputs(&self) -> &Map<String, Value> {
        &self.outputs
    }

    /// Resolve a dot-separated path rooted at a node id or `last`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;
        let mut current = if root == "last" {
            self.last.clone()
        } else {
            self.outputs.get(root)?.clone()
        };
        for segment in segments {
            current = current.get(segment)?.clone();
        }
        Some(current)
    }
}

/// Handler for one node type.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Execute a node. `input` is the resolved node input; the full state
    /// is available for handlers that need more than one upstream value.
    async fn handle(
        &self,
        ctx: &RunContext,
        node: &PlanNode,
        input: Value,
        state: &ExecutionState,
    ) -> Result<Value>;
}

/// Pass-through handler used for `noop` and `decision` nodes.
struct PassThrough;

#[async_trait]
impl NodeHandler for PassThrough {
    async fn handle(
        &self,
        _ctx: &RunContext,
        _node: &PlanNode,
        input: Value,
        _state: &ExecutionState,
    ) -> Result<Value> {
        Ok(input)
    }
}

/// Upper bound on visited nodes, a guard against condition cycles.
const MAX_VISITS: usize = 256;

/// Walks a plan graph, resolving node handlers by type key with
/// user-registered handlers taking precedence over built-ins.
pub struct PlanExecutor {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
    hub: Option<SharedHub>,
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        f.debug_struct("PlanExecutor").field("handlers", &keys).finish()
    }
}

impl Default for PlanExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanExecutor {
    /// Create an executor with the built-in `noop` and `decision`
    /// handlers. `tool`, `agent`, and `llm` handlers are installed by the
    /// agent that owns the plan.
    #[must_use]
    pub fn new() -> Self {
        let mut handlers: HashMap<String, Arc<dyn NodeHandler>> = HashMap::new();
        handlers.insert("noop".to_owned(), Arc::new(PassThrough));
        handlers.insert("decision".to_owned(), Arc::new(PassThrough));
        Self { handlers, hub: None }
    }

    /// Emit node events through `hub`.
    #[must_use]
    pub fn with_hub(mut self, hub: SharedHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Register (or override) a handler by key.
    pub fn register(&mut self, key: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(key.into(), handler);
    }

    /// Returns `true` if a handler is registered for `key`.
    #[must_use]
    pub fn has_handler(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    async fn emit(&self, ctx: &RunContext, kind: EventKind, message: String, payload: Value) {
        if let Some(hub) = &self.hub {
            hub.emit(AgentEvent::new(kind, ctx.run_id(), message).with_payload(payload))
                .await;
        }
    }

    /// Execute `plan` from its start node and return the final `last`
    /// value.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        plan: &PlanGraph,
        mut state: ExecutionState,
    ) -> Result<Value> {
        plan.validate()?;
        let span = info_span!("plan", plan.id = %plan.id, run_id = %ctx.run_id());
        self.execute_inner(ctx, plan, &mut state)
            .instrument(span)
            .await?;
        Ok(state.last().clone())
    }

    async fn execute_inner(
        &self,
        ctx: &RunContext,
        plan: &PlanGraph,
        state: &mut ExecutionState,
    ) -> Result<()> {
        let mut current = plan.start.clone();
        let mut visits = 0usize;

        loop {
            ctx.check()?;
            visits += 1;
            if visits > MAX_VISITS {
                return Err(Error::timeout(format!(
                    "plan '{}' exceeded {MAX_VISITS} node visits",
                    plan.id
                )));
            }

            let node = plan
                .nodes
                .get(&current)
                .ok_or_else(|| Error::internal(format!("plan node '{current}' vanished")))?;

            let input = node
                .input
                .as_deref()
                .and_then(|path| state.resolve(path))
                .unwrap_or_else(|| state.last().clone());

            let key = node.kind.handler_key();
            let handler = self.handlers.get(key).ok_or_else(|| {
                Error::not_found(format!("no handler registered for node type '{key}'"))
            })?;

            let started = Instant::now();
            let output = handler.handle(ctx, node, input, state).await.map_err(|e| {
                e.with_context("node", &node.id).with_context("plan", &plan.id)
            })?;
            let elapsed = started.elapsed();
            debug!(node = %node.id, kind = key, elapsed_ms = elapsed.as_millis() as u64, "Plan node executed");

            state.record(&node.id, output);

            // Edge selection: declaration order, first match wins;
            // `default` edges are considered only after everything else.
            let edges = plan.edges_from(&current);
            let chosen = edges
                .iter()
                .find(|e| e.condition.matches(state))
                .or_else(|| {
                    edges
                        .iter()
                        .find(|e| e.condition == EdgeCondition::Default)
                })
                .copied();

            self.emit(
                ctx,
                EventKind::Thinking,
                format!("plan node '{}' completed", node.id),
                serde_json::json!({
                    "node": node.id,
                    "elapsed_ms": elapsed.as_millis() as u64,
                    "next": chosen.map(|e| e.to.clone()),
                }),
            )
            .await;

            match chosen {
                None => return Ok(()),
                Some(edge) if edge.to == END => return Ok(()),
                Some(edge) => current = edge.to.clone(),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::plan::NodeKind;

    struct Upper;

    #[async_trait]
    impl NodeHandler for Upper {
        async fn handle(
            &self,
            _ctx: &RunContext,
            _node: &PlanNode,
            input: Value,
            _state: &ExecutionState,
        ) -> Result<Value> {
            Ok(Value::String(
                input.as_str().unwrap_or_default().to_uppercase(),
            ))
        }
    }

    struct Classify;

    #[async_trait]
    impl NodeHandler for Classify {
        async fn handle(
            &self,
            _ctx: &RunContext,
            _node: &PlanNode,
            input: Value,
            _state: &ExecutionState,
        ) -> Result<Value> {
            let text = input.as_str().unwrap_or_default();
            Ok(Value::String(
                if text.len() > 3 { "long" } else { "short" }.to_owned(),
            ))
        }
    }

    fn executor() -> PlanExecutor {
        let mut exec = PlanExecutor::new();
        exec.register("upper", Arc::new(Upper));
        exec.register("classify", Arc::new(Classify));
        exec
    }

    fn custom(id: &str, handler: &str) -> PlanNode {
        PlanNode::new(
            id,
            NodeKind::Custom {
                handler: handler.to_owned(),
            },
        )
    }

    #[tokio::test]
    async fn linear_plan_returns_last_output() {
        let plan = PlanGraph::new("p", "up")
            .node(custom("up", "upper"))
            .edge("up", END);

        let out = executor()
            .execute(
                &RunContext::new(),
                &plan,
                ExecutionState::new(Value::String("hello".into())),
            )
            .await
            .unwrap();
        assert_eq!(out, Value::String("HELLO".into()));
    }

    #[tokio::test]
    async fn conditional_routing_picks_first_match() {
        let plan = PlanGraph::new("p", "classify")
            .node(custom("classify", "classify"))
            .node(custom("long_path", "upper"))
            .node(PlanNode::new("short_path", NodeKind::Noop))
            .edge_when("classify", "long_path", EdgeCondition::expr("classify == \"long\""))
            .edge_when("classify", "short_path", EdgeCondition::Default)
            .edge("long_path", END)
            .edge("short_path", END);

        let exec = executor();

        let out = exec
            .execute(
                &RunContext::new(),
                &plan,
                ExecutionState::new(Value::String("lengthy".into())),
            )
            .await
            .unwrap();
        assert_eq!(out, Value::String("LONG".into()));

        let out = exec
            .execute(
                &RunContext::new(),
                &plan,
                ExecutionState::new(Value::String("ab".into())),
            )
            .await
            .unwrap();
        assert_eq!(out, Value::String("short".into()));
    }

    #[tokio::test]
    async fn node_without_outgoing_edges_halts() {
        let plan = PlanGraph::new("p", "only").node(custom("only", "upper"));
        let out = executor()
            .execute(
                &RunContext::new(),
                &plan,
                ExecutionState::new(Value::String("x".into())),
            )
            .await
            .unwrap();
        assert_eq!(out, Value::String("X".into()));
    }

    #[tokio::test]
    async fn empty_input_executes_with_empty_last() {
        let plan = PlanGraph::new("p", "noop")
            .node(PlanNode::new("noop", NodeKind::Noop))
            .edge("noop", END);
        let out = executor()
            .execute(
                &RunContext::new(),
                &plan,
                ExecutionState::new(Value::String(String::new())),
            )
            .await
            .unwrap();
        assert_eq!(out, Value::String(String::new()));
    }

    #[tokio::test]
    async fn cycle_is_bounded() {
        let plan = PlanGraph::new("p", "a")
            .node(PlanNode::new("a", NodeKind::Noop))
            .node(PlanNode::new("b", NodeKind::Noop))
            .edge("a", "b")
            .edge("b", "a");
        let err = executor()
            .execute(&RunContext::new(), &plan, ExecutionState::new(Value::Null))
            .await
            .unwrap_err();
        assert!(err.is(crate::error::ErrorCode::Timeout));
    }

    #[tokio::test]
    async fn missing_handler_is_reported() {
        let plan = PlanGraph::new("p", "a")
            .node(custom("a", "nonexistent"))
            .edge("a", END);
        let err = PlanExecutor::new()
            .execute(&RunContext::new(), &plan, ExecutionState::new(Value::Null))
            .await
            .unwrap_err();
        assert!(err.is(crate::error::ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn deterministic_walk_same_sequence() {
        let plan = PlanGraph::new("p", "classify")
            .node(custom("classify", "classify"))
            .node(custom("up", "upper"))
            .edge_when("classify", "up", EdgeCondition::expr("classify == \"short\""))
            .edge("up", END);

        let exec = executor();
        let run = || async {
            exec.execute(
                &RunContext::new(),
                &plan,
                ExecutionState::new(Value::String("ab".into())),
            )
            .await
            .unwrap()
        };
        assert_eq!(run().await, run().await);
    }

    #[tokio::test]
    async fn input_path_overrides_last() {
        let plan = PlanGraph::new("p", "first")
            .node(custom("first", "classify"))
            .node(custom("second", "upper").with_input("input"))
            .edge("first", "second")
            .edge("second", END);

        let out = executor()
            .execute(
                &RunContext::new(),
                &plan,
                ExecutionState::new(Value::String("abc".into())),
            )
            .await
            .unwrap();
        // "second" read the original input, not classify's verdict.
        assert_eq!(out, Value::String("ABC".into()));
    }
}
