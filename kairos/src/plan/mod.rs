//! Explicit plans: directed graphs executed instead of the reason-act loop.
//!
//! A [`PlanGraph`] is a set of typed nodes joined by condition-bearing
//! edges. Add nodes and edges, then [`PlanGraph::validate`] before
//! execution; the executor walks from the start node, choosing the first
//! matching edge at each step, until a node has no outgoing edges or a
//! matched edge targets [`END`].

mod condition;
mod executor;

pub use condition::EdgeCondition;
pub use executor::{ExecutionState, NodeHandler, PlanExecutor};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sentinel edge target for plan exit.
pub const END: &str = "__end__";

/// The type of a plan node, which selects its handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    /// Invoke a tool.
    Tool,
    /// Delegate to a sub-agent run.
    Agent,
    /// Make a raw LLM call.
    Llm,
    /// Pass the input through unchanged.
    Noop,
    /// Route on state without producing output.
    Decision,
    /// A user-registered handler, resolved by name.
    Custom {
        /// Handler name to resolve.
        handler: String,
    },
}

impl NodeKind {
    /// The handler-registry key for this kind.
    #[must_use]
    pub fn handler_key(&self) -> &str {
        match self {
            Self::Tool => "tool",
            Self::Agent => "agent",
            Self::Llm => "llm",
            Self::Noop => "noop",
            Self::Decision => "decision",
            Self::Custom { handler } => handler,
        }
    }
}

/// A single plan node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    /// Node id, unique within the graph.
    pub id: String,
    /// Node type.
    pub kind: NodeKind,
    /// Optional state path evaluated as the node input; defaults to the
    /// `last` slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Tool binding for `tool` nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl PlanNode {
    /// Create a node.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            input: None,
            tool: None,
        }
    }

    /// Create a tool node bound to `tool`.
    #[must_use]
    pub fn tool(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Tool,
            input: None,
            tool: Some(tool.into()),
        }
    }

    /// Set the input state path.
    #[must_use]
    pub fn with_input(mut self, path: impl Into<String>) -> Self {
        self.input = Some(path.into());
        self
    }
}

/// A directed edge with a condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEdge {
    /// Source node id.
    pub from: String,
    /// Target node id, or [`END`].
    pub to: String,
    /// When the edge is taken.
    pub condition: EdgeCondition,
}

/// A declarative execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanGraph {
    /// Plan id.
    pub id: String,
    /// Node the walk starts at.
    pub start: String,
    /// Nodes keyed by id.
    pub nodes: HashMap<String, PlanNode>,
    /// Edges in declaration order; order is evaluation order.
    pub edges: Vec<PlanEdge>,
}

impl PlanGraph {
    /// Create an empty plan starting at `start`.
    #[must_use]
    pub fn new(id: impl Into<String>, start: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start: start.into(),
            nodes: HashMap::new(),
            edges: Vec::new(),
        }
    }

    /// Add a node. Replaces any node with the same id.
    #[must_use]
    pub fn node(mut self, node: PlanNode) -> Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    /// Add an unconditional edge.
    #[must_use]
    pub fn edge(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edge_when(from, to, EdgeCondition::Always)
    }

    /// Add an edge taken when `condition` matches.
    #[must_use]
    pub fn edge_when(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: EdgeCondition,
    ) -> Self {
        self.edges.push(PlanEdge {
            from: from.into(),
            to: to.into(),
            condition,
        });
        self
    }

    /// Outgoing edges of `node`, in declaration order.
    #[must_use]
    pub fn edges_from(&self, node: &str) -> Vec<&PlanEdge> {
        self.edges.iter().filter(|e| e.from == node).collect()
    }

    /// Validate the graph: the start node and every edge endpoint must
    /// exist (with [`END`] allowed as a target).
    pub fn validate(&self) -> Result<()> {
        if !self.nodes.contains_key(&self.start) {
            return Err(Error::invalid_input(format!(
                "plan '{}' start node '{}' does not exist",
                self.id, self.start
            )));
        }
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) {
                return Err(Error::invalid_input(format!(
                    "plan '{}' edge references unknown source '{}'",
                    self.id, edge.from
                )));
            }
            if edge.to != END && !self.nodes.contains_key(&edge.to) {
                return Err(Error::invalid_input(format!(
                    "plan '{}' edge references unknown target '{}'",
                    self.id, edge.to
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_well_formed_graph() {
        let plan = PlanGraph::new("p", "a")
            .node(PlanNode::new("a", NodeKind::Noop))
            .node(PlanNode::new("b", NodeKind::Noop))
            .edge("a", "b")
            .edge("b", END);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_start_and_endpoints() {
        let plan = PlanGraph::new("p", "missing");
        assert!(plan.validate().is_err());

        let plan = PlanGraph::new("p", "a")
            .node(PlanNode::new("a", NodeKind::Noop))
            .edge("a", "ghost");
        assert!(plan.validate().is_err());
    }

    #[test]
    fn edges_from_preserves_declaration_order() {
        let plan = PlanGraph::new("p", "a")
            .node(PlanNode::new("a", NodeKind::Decision))
            .node(PlanNode::new("b", NodeKind::Noop))
            .node(PlanNode::new("c", NodeKind::Noop))
            .edge_when("a", "b", EdgeCondition::expr("last == \"b\""))
            .edge_when("a", "c", EdgeCondition::Default);

        let edges = plan.edges_from("a");
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].to, "b");
        assert_eq!(edges[1].to, "c");
    }

    #[test]
    fn serde_roundtrip() {
        let plan = PlanGraph::new("p", "a")
            .node(PlanNode::tool("a", "search").with_input("input"))
            .edge("a", END);
        let json = serde_json::to_string(&plan).unwrap();
        let parsed: PlanGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.start, "a");
        assert_eq!(parsed.nodes["a"].tool.as_deref(), Some("search"));
    }
}
