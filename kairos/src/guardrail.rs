//! Guardrails: safety checks woven into agent inputs and outputs.
//!
//! - **Input checkers** run pre-flight over the user input. Checkers
//!   compose first-blocker-wins; a blocked input aborts the run with a
//!   non-recoverable `invalid_input` error.
//! - **Output filters** run post-flight over the final answer. A filter
//!   may block, pass, or rewrite (mask, redact, hash) matched content.
//!
//! Checker errors follow the fail-safe policy: the default is fail-closed
//! (an erroring checker blocks); fail-open is an explicit opt-in.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::context::RunContext;
use crate::error::{Error, Result};

/// Verdict of a single guardrail check.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Content is acceptable as-is.
    Pass,
    /// Content is acceptable after rewriting.
    Rewrite(String),
    /// Content is blocked, with a reason.
    Block(String),
}

impl Verdict {
    /// Returns `true` for a blocking verdict.
    #[must_use]
    pub const fn is_block(&self) -> bool {
        matches!(self, Self::Block(_))
    }
}

/// An input safety check run before the first LLM turn.
#[async_trait]
pub trait InputCheck: Send + Sync {
    /// Name of this check, used in errors and tracing.
    fn name(&self) -> &str;

    /// Inspect the user input.
    async fn check(&self, ctx: &RunContext, input: &str) -> Result<Verdict>;
}

/// An output filter run over the final answer.
#[async_trait]
pub trait OutputFilter: Send + Sync {
    /// Name of this filter, used in errors and tracing.
    fn name(&self) -> &str;

    /// Inspect or rewrite the output.
    async fn check(&self, ctx: &RunContext, output: &str) -> Result<Verdict>;
}

/// What an erroring checker does to the content it was inspecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// A checker error blocks the content.
    #[default]
    Closed,
    /// A checker error lets the content through.
    Open,
}

/// Composed guardrail set attached to an agent.
#[derive(Default, Clone)]
pub struct Guardrails {
    inputs: Vec<Arc<dyn InputCheck>>,
    outputs: Vec<Arc<dyn OutputFilter>>,
    policy: FailurePolicy,
}

impl std::fmt::Debug for Guardrails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardrails")
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Guardrails {
    /// Create an empty, fail-closed guardrail set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input check.
    #[must_use]
    pub fn with_input(mut self, check: impl InputCheck + 'static) -> Self {
        self.inputs.push(Arc::new(check));
        self
    }

    /// Add an output filter.
    #[must_use]
    pub fn with_output(mut self, filter: impl OutputFilter + 'static) -> Self {
        self.outputs.push(Arc::new(filter));
        self
    }

    /// Set the failure policy for erroring checkers.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns `true` when no checks are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Run input checks in order; the first blocker wins.
    ///
    /// Returns the (possibly rewritten) input, or `invalid_input` when a
    /// check blocks it.
    pub async fn check_input(&self, ctx: &RunContext, input: &str) -> Result<String> {
        let mut current = input.to_owned();
        for check in &self.inputs {
            match check.check(ctx, &current).await {
                Ok(Verdict::Pass) => {}
                Ok(Verdict::Rewrite(text)) => current = text,
                Ok(Verdict::Block(reason)) => {
                    return Err(Error::invalid_input(format!(
                        "input blocked by guardrail '{}': {reason}",
                        check.name()
                    )));
                }
                Err(err) => match self.policy {
                    FailurePolicy::Closed => {
                        tracing::warn!(guardrail = check.name(), error = %err, "Input check failed; blocking");
                        return Err(Error::invalid_input(format!(
                            "guardrail '{}' failed closed",
                            check.name()
                        ))
                        .with_cause(err));
                    }
                    FailurePolicy::Open => {
                        tracing::warn!(guardrail = check.name(), error = %err, "Input check failed; passing open");
                    }
                },
            }
        }
        Ok(current)
    }

    /// Run output filters in order, applying rewrites cumulatively.
    pub async fn filter_output(&self, ctx: &RunContext, output: &str) -> Result<String> {
        let mut current = output.to_owned();
        for filter in &self.outputs {
            match filter.check(ctx, &current).await {
                Ok(Verdict::Pass) => {}
                Ok(Verdict::Rewrite(text)) => current = text,
                Ok(Verdict::Block(reason)) => {
                    return Err(Error::invalid_input(format!(
                        "output blocked by guardrail '{}': {reason}",
                        filter.name()
                    )));
                }
                Err(err) => match self.policy {
                    FailurePolicy::Closed => {
                        tracing::warn!(guardrail = filter.name(), error = %err, "Output filter failed; blocking");
                        return Err(Error::invalid_input(format!(
                            "guardrail '{}' failed closed",
                            filter.name()
                        ))
                        .with_cause(err));
                    }
                    FailurePolicy::Open => {
                        tracing::warn!(guardrail = filter.name(), error = %err, "Output filter failed; passing open");
                    }
                },
            }
        }
        Ok(current)
    }
}

/// How a [`RegexFilter`] rewrites matched substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RewriteMode {
    /// Replace every matched character with `*`.
    Mask,
    /// Replace the match with `[redacted]`.
    Redact,
    /// Replace the match with a short stable hash of its content.
    Hash,
}

/// Regex-based output filter that rewrites rather than blocks.
#[derive(Debug, Clone)]
pub struct RegexFilter {
    name: String,
    pattern: Regex,
    mode: RewriteMode,
}

impl RegexFilter {
    /// Create a filter from a pattern.
    pub fn new(name: impl Into<String>, pattern: &str, mode: RewriteMode) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::invalid_input(format!("invalid filter pattern: {e}")))?;
        Ok(Self {
            name: name.into(),
            pattern,
            mode,
        })
    }

    fn rewrite(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let matched = &caps[0];
                match self.mode {
                    RewriteMode::Mask => "*".repeat(matched.chars().count()),
                    RewriteMode::Redact => "[redacted]".to_owned(),
                    RewriteMode::Hash => {
                        use std::hash::{DefaultHasher, Hash, Hasher};
                        let mut hasher = DefaultHasher::new();
                        matched.hash(&mut hasher);
                        format!("[#{:08x}]", hasher.finish() as u32)
                    }
                }
            })
            .into_owned()
    }
}

#[async_trait]
impl OutputFilter for RegexFilter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _ctx: &RunContext, output: &str) -> Result<Verdict> {
        if self.pattern.is_match(output) {
            Ok(Verdict::Rewrite(self.rewrite(output)))
        } else {
            Ok(Verdict::Pass)
        }
    }
}

/// Input check that blocks when any of the configured terms appears.
#[derive(Debug, Clone)]
pub struct DenyTermsCheck {
    name: String,
    terms: Vec<String>,
}

impl DenyTermsCheck {
    /// Create a check from a list of lowercase terms.
    #[must_use]
    pub fn new(name: impl Into<String>, terms: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            terms: terms.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl InputCheck for DenyTermsCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _ctx: &RunContext, input: &str) -> Result<Verdict> {
        let lowered = input.to_lowercase();
        for term in &self.terms {
            if lowered.contains(term.as_str()) {
                return Ok(Verdict::Block(format!("term '{term}' is not allowed")));
            }
        }
        Ok(Verdict::Pass)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl InputCheck for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        async fn check(&self, _ctx: &RunContext, _input: &str) -> Result<Verdict> {
            Err(Error::internal("checker backend down"))
        }
    }

    #[tokio::test]
    async fn first_blocker_wins() {
        let rails = Guardrails::new()
            .with_input(DenyTermsCheck::new("deny", ["secret".to_owned()]))
            .with_input(DenyTermsCheck::new("never-reached", ["secret".to_owned()]));
        let ctx = RunContext::new();

        let err = rails.check_input(&ctx, "tell me the secret").await.unwrap_err();
        assert!(err.is(crate::error::ErrorCode::InvalidInput));
        assert!(err.message.contains("deny"));

        let ok = rails.check_input(&ctx, "hello").await.unwrap();
        assert_eq!(ok, "hello");
    }

    #[tokio::test]
    async fn fail_closed_blocks_on_checker_error() {
        let rails = Guardrails::new().with_input(Failing);
        let ctx = RunContext::new();
        let err = rails.check_input(&ctx, "anything").await.unwrap_err();
        assert!(err.message.contains("failed closed"));
    }

    #[tokio::test]
    async fn fail_open_passes_on_checker_error() {
        let rails = Guardrails::new()
            .with_input(Failing)
            .with_failure_policy(FailurePolicy::Open);
        let ctx = RunContext::new();
        assert_eq!(rails.check_input(&ctx, "anything").await.unwrap(), "anything");
    }

    #[tokio::test]
    async fn regex_filter_masks_matches() {
        let filter = RegexFilter::new("ssn", r"\d{3}-\d{2}-\d{4}", RewriteMode::Mask).unwrap();
        let rails = Guardrails::new().with_output(filter);
        let ctx = RunContext::new();

        let out = rails
            .filter_output(&ctx, "ssn is 123-45-6789 ok")
            .await
            .unwrap();
        assert_eq!(out, "ssn is *********** ok");
    }

    #[tokio::test]
    async fn regex_filter_redacts_and_hashes() {
        let ctx = RunContext::new();

        let redact = RegexFilter::new("email", r"\S+@\S+", RewriteMode::Redact).unwrap();
        let out = redact.check(&ctx, "mail a@b.com now").await.unwrap();
        match out {
            Verdict::Rewrite(text) => assert_eq!(text, "mail [redacted] now"),
            other => panic!("expected rewrite, got {other:?}"),
        }

        let hash = RegexFilter::new("email", r"\S+@\S+", RewriteMode::Hash).unwrap();
        let Verdict::Rewrite(first) = hash.check(&ctx, "a@b.com").await.unwrap() else {
            panic!("expected rewrite");
        };
        let Verdict::Rewrite(second) = hash.check(&ctx, "a@b.com").await.unwrap() else {
            panic!("expected rewrite");
        };
        // Hashing is stable for identical input.
        assert_eq!(first, second);
        assert!(first.starts_with("[#"));
    }

    #[tokio::test]
    async fn rewrites_compose_across_filters() {
        let rails = Guardrails::new()
            .with_output(RegexFilter::new("a", "alpha", RewriteMode::Redact).unwrap())
            .with_output(RegexFilter::new("b", "beta", RewriteMode::Redact).unwrap());
        let ctx = RunContext::new();
        let out = rails.filter_output(&ctx, "alpha and beta").await.unwrap();
        assert_eq!(out, "[redacted] and [redacted]");
    }
}
