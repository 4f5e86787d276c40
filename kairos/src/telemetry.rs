//! Per-run metrics.
//!
//! A [`RunMetrics`] collector rides along on each run and is read after
//! completion. Counters are atomic so the collector can be shared with
//! spawned work without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Wall-clock timing for a run.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    started: Instant,
    completed: Option<Instant>,
}

impl Timing {
    /// Start timing now.
    #[must_use]
    pub fn start_now() -> Self {
        Self {
            started: Instant::now(),
            completed: None,
        }
    }

    /// Mark completion.
    pub fn complete(&mut self) {
        self.completed = Some(Instant::now());
    }

    /// Elapsed time, up to completion or now.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.completed
            .unwrap_or_else(Instant::now)
            .duration_since(self.started)
    }
}

/// Counters collected over one run.
#[derive(Debug, Default)]
pub struct RunMetrics {
    llm_calls: AtomicU64,
    llm_errors: AtomicU64,
    tool_calls: AtomicU64,
    tool_errors: AtomicU64,
    policy_denials: AtomicU64,
    memory_reads: AtomicU64,
    memory_writes: AtomicU64,
    tool_latency_ms: AtomicU64,
}

impl RunMetrics {
    /// Create a zeroed collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an LLM call.
    pub fn record_llm_call(&self) {
        self.llm_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an LLM failure.
    pub fn record_llm_error(&self) {
        self.llm_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tool invocation and its latency.
    pub fn record_tool_call(&self, latency: Duration) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        self.tool_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a tool failure.
    pub fn record_tool_error(&self) {
        self.tool_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a policy denial.
    pub fn record_policy_denial(&self) {
        self.policy_denials.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a memory read.
    pub fn record_memory_read(&self) {
        self.memory_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a memory write.
    pub fn record_memory_write(&self) {
        self.memory_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// LLM calls made.
    #[must_use]
    pub fn llm_calls(&self) -> u64 {
        self.llm_calls.load(Ordering::Relaxed)
    }

    /// LLM failures.
    #[must_use]
    pub fn llm_errors(&self) -> u64 {
        self.llm_errors.load(Ordering::Relaxed)
    }

    /// Tool invocations.
    #[must_use]
    pub fn tool_calls(&self) -> u64 {
        self.tool_calls.load(Ordering::Relaxed)
    }

    /// Tool failures.
    #[must_use]
    pub fn tool_errors(&self) -> u64 {
        self.tool_errors.load(Ordering::Relaxed)
    }

    /// Policy denials.
    #[must_use]
    pub fn policy_denials(&self) -> u64 {
        self.policy_denials.load(Ordering::Relaxed)
    }

    /// Cumulative tool latency in milliseconds.
    #[must_use]
    pub fn tool_latency_ms(&self) -> u64 {
        self.tool_latency_ms.load(Ordering::Relaxed)
    }
}
