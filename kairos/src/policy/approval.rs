//! Approval records and hooks for pending policy decisions.
//!
//! A `pending` decision hands control to an [`ApprovalHook`]. Three
//! shapes ship with the runtime: a static answer, an interactive console
//! prompt with an optional timeout, and a store-backed record resolved
//! out-of-band by an operator. Expiry is enforced lazily by the store on
//! every read.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use super::Action;
use crate::context::RunContext;
use crate::error::{Error, Result};

/// Status of an approval record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved by an operator.
    Approved,
    /// Rejected by an operator.
    Rejected,
    /// The decision window elapsed.
    Expired,
}

/// A record representing a pending human decision.
#[derive(Debug, Clone)]
pub struct ApprovalRecord {
    /// Record id.
    pub id: String,
    /// Task the gated action belongs to.
    pub task_id: Option<String>,
    /// Current status.
    pub status: ApprovalStatus,
    /// When the record stops being decidable.
    pub expires_at: Option<Instant>,
    /// Why the approval was requested.
    pub reason: String,
    /// When the record was decided, if it has been.
    pub decided_at: Option<Instant>,
}

impl ApprovalRecord {
    fn is_past_expiry(&self) -> bool {
        self.status == ApprovalStatus::Pending
            && self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory approval store.
///
/// Expiry is pull-based: every read re-checks `expires_at` and flips
/// stale pending records to `Expired` before returning them.
#[derive(Debug, Default)]
pub struct ApprovalStore {
    records: RwLock<HashMap<String, ApprovalRecord>>,
    changed: Notify,
}

impl ApprovalStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending record and return its id.
    pub async fn create(
        &self,
        task_id: Option<String>,
        reason: impl Into<String>,
        ttl: Option<Duration>,
    ) -> String {
        let record = ApprovalRecord {
            id: Uuid::new_v4().to_string(),
            task_id,
            status: ApprovalStatus::Pending,
            expires_at: ttl.map(|t| Instant::now() + t),
            reason: reason.into(),
            decided_at: None,
        };
        let id = record.id.clone();
        self.records.write().await.insert(id.clone(), record);
        id
    }

    /// Fetch a record, applying lazy expiry.
    pub async fn get(&self, id: &str) -> Result<ApprovalRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("approval '{id}' does not exist")))?;
        if record.is_past_expiry() {
            record.status = ApprovalStatus::Expired;
            record.decided_at = Some(Instant::now());
        }
        Ok(record.clone())
    }

    /// Resolve a pending record.
    ///
    /// Resolving a record that already expired or was decided is a
    /// conflict, reported as `invalid_input`.
    pub async fn resolve(&self, id: &str, approve: bool) -> Result<ApprovalRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("approval '{id}' does not exist")))?;
        if record.is_past_expiry() {
            record.status = ApprovalStatus::Expired;
            record.decided_at = Some(Instant::now());
        }
        if record.status != ApprovalStatus::Pending {
            return Err(Error::invalid_input(format!(
                "approval '{id}' is already {:?}",
                record.status
            )));
        }
        record.status = if approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        record.decided_at = Some(Instant::now());
        let out = record.clone();
        drop(records);
        self.changed.notify_waiters();
        Ok(out)
    }

    /// Pending records, oldest expiry first. Applies lazy expiry.
    pub async fn pending(&self) -> Vec<ApprovalRecord> {
        let mut records = self.records.write().await;
        for record in records.values_mut() {
            if record.is_past_expiry() {
                record.status = ApprovalStatus::Expired;
                record.decided_at = Some(Instant::now());
            }
        }
        let mut out: Vec<ApprovalRecord> = records
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.expires_at);
        out
    }

    /// Wait until a record leaves the pending state or the deadline hits.
    pub async fn wait_for_decision(
        &self,
        id: &str,
        deadline: Option<Duration>,
    ) -> Result<ApprovalRecord> {
        let wait_until = deadline.map(|d| Instant::now() + d);
        loop {
            let record = self.get(id).await?;
            if record.status != ApprovalStatus::Pending {
                return Ok(record);
            }
            let notified = self.changed.notified();
            match wait_until {
                Some(until) => {
                    let left = until.saturating_duration_since(Instant::now());
                    if left.is_zero()
                        || tokio::time::timeout(left, notified).await.is_err()
                    {
                        // One last read: the record may have expired on its own.
                        let record = self.get(id).await?;
                        if record.status != ApprovalStatus::Pending {
                            return Ok(record);
                        }
                        return Err(Error::unauthorized(format!(
                            "approval '{id}' timed out without a decision"
                        )));
                    }
                }
                None => notified.await,
            }
        }
    }
}

/// Hook consulted when a policy decision is `pending`.
#[async_trait]
pub trait ApprovalHook: Send + Sync {
    /// Decide whether the gated action may proceed.
    async fn approve(&self, ctx: &RunContext, action: &Action, reason: &str) -> Result<bool>;
}

/// A hook that always returns the same answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticApprovalHook {
    approve: bool,
}

impl StaticApprovalHook {
    /// Always approve.
    #[must_use]
    pub const fn allow() -> Self {
        Self { approve: true }
    }

    /// Always deny.
    #[must_use]
    pub const fn deny() -> Self {
        Self { approve: false }
    }
}

#[async_trait]
impl ApprovalHook for StaticApprovalHook {
    async fn approve(&self, _ctx: &RunContext, _action: &Action, _reason: &str) -> Result<bool> {
        Ok(self.approve)
    }
}

/// Interactive console prompt with an optional timeout.
///
/// Timeout without a decision is a deny. The prompt runs on a blocking
/// thread so the runtime is never stalled on stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleApprovalHook {
    timeout: Option<Duration>,
}

impl ConsoleApprovalHook {
    /// Create a prompt without a timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Deny automatically after `timeout` without an answer.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl ApprovalHook for ConsoleApprovalHook {
    async fn approve(&self, _ctx: &RunContext, action: &Action, reason: &str) -> Result<bool> {
        let prompt = format!(
            "Approve action '{}' ({reason})? [y/N] ",
            action.name
        );
        let ask = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(prompt.as_bytes());
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        });

        let answer = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, ask).await {
                Ok(joined) => joined,
                Err(_) => return Ok(false),
            },
            None => ask.await,
        };

        let line = answer
            .map_err(|e| Error::internal(format!("approval prompt task failed: {e}")))?
            .map_err(|e| Error::internal(format!("approval prompt read failed: {e}")))?;
        let trimmed = line.trim().to_lowercase();
        Ok(trimmed == "y" || trimmed == "yes")
    }
}

/// Hook that records a pending approval on a store and waits for an
/// operator to resolve it out-of-band.
#[derive(Debug, Clone)]
pub struct StoreApprovalHook {
    store: Arc<ApprovalStore>,
    wait: Option<Duration>,
    ttl: Option<Duration>,
}

impl StoreApprovalHook {
    /// Create a hook backed by `store`.
    #[must_use]
    pub const fn new(store: Arc<ApprovalStore>) -> Self {
        Self {
            store,
            wait: None,
            ttl: None,
        }
    }

    /// Bound how long the hook waits for a decision.
    #[must_use]
    pub const fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Bound how long the record stays decidable.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[async_trait]
impl ApprovalHook for StoreApprovalHook {
    async fn approve(&self, ctx: &RunContext, _action: &Action, reason: &str) -> Result<bool> {
        let id = self
            .store
            .create(ctx.task_id().map(str::to_owned), reason, self.ttl)
            .await;
        let record = self.store.wait_for_decision(&id, self.wait).await?;
        Ok(record.status == ApprovalStatus::Approved)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_resolve_roundtrip() {
        let store = ApprovalStore::new();
        let id = store.create(Some("tasks/1".into()), "risky", None).await;

        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, ApprovalStatus::Pending);

        let resolved = store.resolve(&id, true).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert!(resolved.decided_at.is_some());
    }

    #[tokio::test]
    async fn double_resolution_is_a_conflict() {
        let store = ApprovalStore::new();
        let id = store.create(None, "risky", None).await;
        store.resolve(&id, false).await.unwrap();
        let err = store.resolve(&id, true).await.unwrap_err();
        assert!(err.is(crate::error::ErrorCode::InvalidInput));
    }

    #[tokio::test]
    async fn expiry_is_applied_on_read() {
        let store = ApprovalStore::new();
        let id = store
            .create(None, "short-lived", Some(Duration::from_millis(1)))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, ApprovalStatus::Expired);
        assert!(store.pending().await.is_empty());
    }

    #[tokio::test]
    async fn store_hook_waits_for_operator() {
        let store = Arc::new(ApprovalStore::new());
        let hook = StoreApprovalHook::new(Arc::clone(&store)).with_wait(Duration::from_secs(5));

        let resolver = Arc::clone(&store);
        tokio::spawn(async move {
            loop {
                let pending = resolver.pending().await;
                if let Some(record) = pending.first() {
                    resolver.resolve(&record.id, true).await.unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let ctx = RunContext::new();
        let approved = hook
            .approve(&ctx, &Action::tool("transfer"), "money moves")
            .await
            .unwrap();
        assert!(approved);
    }

    #[tokio::test]
    async fn store_hook_timeout_is_deny() {
        let store = Arc::new(ApprovalStore::new());
        let hook = StoreApprovalHook::new(store).with_wait(Duration::from_millis(20));
        let ctx = RunContext::new();
        let err = hook
            .approve(&ctx, &Action::tool("transfer"), "money moves")
            .await
            .unwrap_err();
        assert!(err.is(crate::error::ErrorCode::Unauthorized));
    }

    #[tokio::test]
    async fn static_hooks() {
        let ctx = RunContext::new();
        let action = Action::tool("x");
        assert!(StaticApprovalHook::allow()
            .approve(&ctx, &action, "r")
            .await
            .unwrap());
        assert!(!StaticApprovalHook::deny()
            .approve(&ctx, &action, "r")
            .await
            .unwrap());
    }
}
