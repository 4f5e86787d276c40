#![cfg_attr(docsrs, feature(doc_cfg))]
//! Kairos is a multi-agent runtime for LLM-driven workloads.
//!
//! The crate centers on an agent execution core: a reason-act loop (or a
//! declarative plan) over a shared tool abstraction, with dynamically
//! discovered MCP tools behind a reference-counted connection pool,
//! governance policies and guardrails woven into every call, and an A2A
//! task surface that streams progress to subscribers.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use kairos::prelude::*;
//!
//! let agent = Agent::builder()
//!     .name("assistant")
//!     .role("You are a helpful assistant.")
//!     .provider(provider)
//!     .model("gpt-4o")
//!     .build()?;
//!
//! let answer = agent.run(&RunContext::new(), "Hello!").await?;
//! ```

// Core primitives
pub mod context;
pub mod error;
pub mod event;
pub mod message;
pub mod telemetry;

// Agent and tools
pub mod agent;
pub mod llm;
pub mod tool;

// Subsystems
pub mod guardrail;
pub mod mcp;
pub mod memory;
pub mod plan;
pub mod policy;
pub mod task;

// Surfaces
pub mod card;
pub mod prelude;

// Re-export the most commonly used types at the crate root.
pub use agent::{Agent, AgentBuilder};
pub use context::RunContext;
pub use error::{Error, ErrorCode, Result};
