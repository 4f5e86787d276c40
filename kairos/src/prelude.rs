//! Convenience re-exports of the common surface.
//!
//! ```rust,ignore
//! use kairos::prelude::*;
//! ```

pub use crate::agent::{Agent, AgentBuilder};
pub use crate::card::{AgentCard, Capabilities};
pub use crate::context::RunContext;
pub use crate::error::{Error, ErrorCode, Result};
pub use crate::event::{AgentEvent, EventHub, EventKind, Subscription};
pub use crate::guardrail::{Guardrails, InputCheck, OutputFilter, RegexFilter, RewriteMode, Verdict};
pub use crate::llm::{ChatRequest, ChatResponse, LlmProvider, ScriptedProvider};
pub use crate::mcp::{McpPool, PoolConfig, TransportConfig};
pub use crate::memory::{
    ConversationMemory, InMemoryConversation, InMemoryStore, Memory, TruncationPolicy,
};
pub use crate::message::{Message, Role, ToolCall};
pub use crate::plan::{EdgeCondition, NodeKind, PlanGraph, PlanNode};
pub use crate::policy::{
    Action, ApprovalHook, ApprovalStore, Decision, DecisionStatus, PolicyEngine, Rule, RulePolicy,
    StaticApprovalHook,
};
pub use crate::task::{StreamEvent, Task, TaskManager, TaskState};
pub use crate::tool::{BoxedTool, DynTool, FnTool, Tool, ToolDefinition, ToolRegistry};
