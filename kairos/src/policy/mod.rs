//! Governance policies for agent actions.
//!
//! Before any tool call the loop consults the agent's policy engine. A
//! decision is a tri-state (allow, deny, or pending) where pending is a
//! first-class outcome, not an exception: callers without an approval
//! hook must treat it as deny.

mod approval;

pub use approval::{
    ApprovalHook, ApprovalRecord, ApprovalStatus, ApprovalStore, ConsoleApprovalHook,
    StaticApprovalHook, StoreApprovalHook,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::Result;

/// The kind of action being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ActionKind {
    /// A tool invocation.
    Tool,
    /// An LLM chat call.
    Llm,
    /// A memory read or write.
    Memory,
}

/// An action submitted for evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// What kind of action this is.
    pub kind: ActionKind,
    /// Name of the target (tool name, model name, ...).
    pub name: String,
    /// Caller-supplied attributes (agent id, tool-call id, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Action {
    /// Create a tool action.
    #[must_use]
    pub fn tool(name: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Tool,
            name: name.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata attribute.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The tri-state outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// The action may proceed.
    Allow,
    /// The action is refused.
    Deny,
    /// A human decision is required.
    Pending,
}

/// A policy decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Tri-state outcome.
    pub status: DecisionStatus,
    /// Id of the rule that matched, when one did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Human-readable reason.
    pub reason: String,
}

impl Decision {
    /// An allowing decision.
    #[must_use]
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            status: DecisionStatus::Allow,
            rule_id: None,
            reason: reason.into(),
        }
    }

    /// A denying decision.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            status: DecisionStatus::Deny,
            rule_id: None,
            reason: reason.into(),
        }
    }

    /// A pending decision requiring human approval.
    #[must_use]
    pub fn pending(reason: impl Into<String>) -> Self {
        Self {
            status: DecisionStatus::Pending,
            rule_id: None,
            reason: reason.into(),
        }
    }

    /// Tag the decision with the rule that produced it.
    #[must_use]
    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    /// Returns `true` when the action may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.status == DecisionStatus::Allow
    }
}

/// Trait for policy engines.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Evaluate an action and return a decision.
    async fn evaluate(&self, ctx: &RunContext, action: &Action) -> Result<Decision>;
}

/// Shared policy engine handle.
pub type SharedPolicy = Arc<dyn PolicyEngine>;

/// How a single rule matches an action.
#[derive(Debug, Clone)]
pub enum RuleMatch {
    /// Match a specific action name exactly.
    Name(String),
    /// Match any action of a kind.
    Kind(ActionKind),
    /// Match every action.
    Any,
}

impl RuleMatch {
    fn matches(&self, action: &Action) -> bool {
        match self {
            Self::Name(name) => action.name == *name,
            Self::Kind(kind) => action.kind == *kind,
            Self::Any => true,
        }
    }
}

/// A single ordered rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Stable rule id, reported in decisions.
    pub id: String,
    /// What the rule matches.
    pub matcher: RuleMatch,
    /// The outcome when it matches.
    pub status: DecisionStatus,
    /// The reason reported with the outcome.
    pub reason: String,
}

impl Rule {
    /// Create a rule.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        matcher: RuleMatch,
        status: DecisionStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            matcher,
            status,
            reason: reason.into(),
        }
    }

    /// Shorthand: deny a named tool.
    #[must_use]
    pub fn deny_tool(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            format!("deny-{name}"),
            RuleMatch::Name(name),
            DecisionStatus::Deny,
            reason,
        )
    }

    /// Shorthand: require approval for a named tool.
    #[must_use]
    pub fn approve_tool(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            format!("approve-{name}"),
            RuleMatch::Name(name),
            DecisionStatus::Pending,
            reason,
        )
    }
}

/// Ordered-rule policy engine: the first matching rule decides.
///
/// When no rule matches, the configurable default applies (allow unless
/// changed).
#[derive(Debug, Clone)]
pub struct RulePolicy {
    rules: Vec<Rule>,
    default_status: DecisionStatus,
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RulePolicy {
    /// Create an empty policy with a default-allow fallback.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_status: DecisionStatus::Allow,
        }
    }

    /// Append a rule. Order is evaluation order.
    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Change the fallback when no rule matches.
    #[must_use]
    pub const fn default_status(mut self, status: DecisionStatus) -> Self {
        self.default_status = status;
        self
    }
}

#[async_trait]
impl PolicyEngine for RulePolicy {
    async fn evaluate(&self, _ctx: &RunContext, action: &Action) -> Result<Decision> {
        for rule in &self.rules {
            if rule.matcher.matches(action) {
                return Ok(Decision {
                    status: rule.status,
                    rule_id: Some(rule.id.clone()),
                    reason: rule.reason.clone(),
                });
            }
        }
        Ok(Decision {
            status: self.default_status,
            rule_id: None,
            reason: "no rule matched".to_owned(),
        })
    }
}
