//! Run context carried through every call in the runtime.
//!
//! A [`RunContext`] bundles the correlation identifiers (run id per
//! invocation, session id per conversation), an optional deadline, and a
//! cancellation token. Every blocking seam (LLM chat, tool invocation,
//! memory access, pool acquisition, event emission) receives a
//! `&RunContext` and observes both the deadline and the token.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Context for a single run: correlation ids, deadline, cancellation.
///
/// Cloning is cheap; clones share the same cancellation token, so
/// cancelling any clone cancels the whole run.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    session_id: Option<String>,
    task_id: Option<String>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RunContext {
    /// Create a fresh context with a generated run id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            session_id: None,
            task_id: None,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Set an explicit run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Set the session id.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Associate a task with this run.
    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Set an absolute deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The run id. Always present.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The session id, when the run belongs to a conversation.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Ensure a session id exists, generating one if absent.
    pub fn ensure_session_id(&mut self) -> &str {
        if self.session_id.is_none() {
            self.session_id = Some(Uuid::new_v4().to_string());
        }
        self.session_id.as_deref().unwrap_or_default()
    }

    /// The associated task id, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    /// The absolute deadline, if one is set.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation token shared by all clones of this context.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the run. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Remaining time until the deadline, or `None` when no deadline is set.
    ///
    /// A deadline in the past yields `Some(Duration::ZERO)`.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The tighter of `per_call` and the context deadline.
    #[must_use]
    pub fn call_budget(&self, per_call: Option<Duration>) -> Option<Duration> {
        match (per_call, self.remaining()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        }
    }

    /// Fail fast when the run is already cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::context_lost("run cancelled")
                .with_context("run_id", &self.run_id)
                .with_context("cancelled", "true"));
        }
        if self.remaining().is_some_and(|r| r.is_zero()) {
            return Err(Error::timeout("run deadline elapsed").with_context("run_id", &self.run_id));
        }
        Ok(())
    }

    /// Run a future under this context's cancellation and call budget.
    ///
    /// Cancellation maps to `context_lost`, an elapsed budget to `timeout`.
    pub async fn run_scoped<F, T>(&self, per_call: Option<Duration>, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        self.check()?;
        let budget = self.call_budget(per_call);
        let guarded = async {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(Error::context_lost("run cancelled")
                    .with_context("run_id", &self.run_id)
                    .with_context("cancelled", "true")),
                out = fut => out,
            }
        };
        match budget {
            Some(limit) => tokio::time::timeout(limit, guarded).await.map_or_else(
                |_| {
                    Err(Error::timeout("call deadline elapsed")
                        .with_context("run_id", &self.run_id))
                },
                |out| out,
            ),
            None => guarded.await,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_always_present() {
        let ctx = RunContext::new();
        assert!(!ctx.run_id().is_empty());
    }

    #[test]
    fn ensure_session_id_generates_once() {
        let mut ctx = RunContext::new();
        let first = ctx.ensure_session_id().to_owned();
        let second = ctx.ensure_session_id().to_owned();
        assert_eq!(first, second);
    }

    #[test]
    fn call_budget_takes_the_tighter_bound() {
        let ctx = RunContext::new().with_timeout(Duration::from_secs(10));
        let budget = ctx.call_budget(Some(Duration::from_secs(2))).unwrap();
        assert!(budget <= Duration::from_secs(2));

        let budget = ctx.call_budget(Some(Duration::from_secs(60))).unwrap();
        assert!(budget <= Duration::from_secs(10));
    }

    #[test]
    fn clones_share_cancellation() {
        let ctx = RunContext::new();
        let other = ctx.clone();
        ctx.cancel();
        assert!(other.is_cancelled());
    }

    #[tokio::test]
    async fn run_scoped_maps_cancellation_to_context_lost() {
        let ctx = RunContext::new();
        ctx.cancel();
        let out: Result<()> = ctx.run_scoped(None, async { Ok(()) }).await;
        let err = out.unwrap_err();
        assert!(err.is(crate::error::ErrorCode::ContextLost));
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn run_scoped_maps_elapsed_budget_to_timeout() {
        let ctx = RunContext::new();
        let out: Result<()> = ctx
            .run_scoped(Some(Duration::from_millis(10)), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(out.unwrap_err().is(crate::error::ErrorCode::Timeout));
    }

    #[tokio::test]
    async fn run_scoped_cancel_mid_flight() {
        let ctx = RunContext::new();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        let out: Result<()> = ctx
            .run_scoped(None, async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(out.unwrap_err().is_cancellation());
    }
}
