//! Edge conditions evaluated against the execution state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::executor::ExecutionState;

/// When an edge is taken.
///
/// Conditions are evaluated in edge declaration order; the first match
/// wins. `Always` matches unconditionally, `Default` only when no earlier
/// edge of the same node matched, and `Expr` evaluates a small predicate
/// against the execution state.
///
/// The expression grammar is deliberately small:
///
/// - `path`: truthy test (present, non-null, non-false, non-empty)
/// - `path == literal` / `path != literal`
/// - `path contains literal`
///
/// where `path` is dot-separated (`check.verdict`), rooted at a node id
/// or the `last` slot, and `literal` is a JSON string, number, or bool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EdgeCondition {
    /// Matches unconditionally.
    Always,
    /// Matches only if no earlier edge matched.
    Default,
    /// Predicate over the execution state.
    Expr {
        /// The predicate source.
        expr: String,
    },
}

impl EdgeCondition {
    /// Create an expression condition.
    #[must_use]
    pub fn expr(source: impl Into<String>) -> Self {
        Self::Expr {
            expr: source.into(),
        }
    }

    /// Evaluate against the state. `Default` never matches here; the
    /// executor applies it only after every other edge failed.
    #[must_use]
    pub fn matches(&self, state: &ExecutionState) -> bool {
        match self {
            Self::Always => true,
            Self::Default => false,
            Self::Expr { expr } => evaluate(expr, state),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn parse_literal(raw: &str) -> Value {
    let trimmed = raw.trim();
    serde_json::from_str(trimmed)
        .unwrap_or_else(|_| Value::String(trimmed.trim_matches(['\'', '"']).to_owned()))
}

fn evaluate(expr: &str, state: &ExecutionState) -> bool {
    let expr = expr.trim();

    for op in ["==", "!=", " contains "] {
        if let Some((lhs, rhs)) = expr.split_once(op) {
            let Some(left) = state.resolve(lhs.trim()) else {
                // An absent path only satisfies a `!=` test.
                return op == "!=";
            };
            let right = parse_literal(rhs);
            return match op {
                "==" => left == right,
                "!=" => left != right,
                _ => match (&left, &right) {
                    (Value::String(haystack), Value::String(needle)) => {
                        haystack.contains(needle.as_str())
                    }
                    (Value::Array(items), needle) => items.contains(needle),
                    _ => false,
                },
            };
        }
    }

    state.resolve(expr).as_ref().is_some_and(is_truthy)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn state_with(key: &str, value: Value) -> ExecutionState {
        let mut state = ExecutionState::new(Value::String("seed".into()));
        state.record(key, value);
        state
    }

    #[test]
    fn always_matches_default_does_not() {
        let state = ExecutionState::new(Value::Null);
        assert!(EdgeCondition::Always.matches(&state));
        assert!(!EdgeCondition::Default.matches(&state));
    }

    #[test]
    fn equality_against_string_literal() {
        let state = state_with("verdict", Value::String("pass".into()));
        assert!(EdgeCondition::expr("verdict == \"pass\"").matches(&state));
        assert!(!EdgeCondition::expr("verdict == \"fail\"").matches(&state));
        assert!(EdgeCondition::expr("verdict != \"fail\"").matches(&state));
    }

    #[test]
    fn equality_against_number_and_bool() {
        let state = state_with("count", Value::from(3));
        assert!(EdgeCondition::expr("count == 3").matches(&state));

        let state = state_with("ok", Value::Bool(true));
        assert!(EdgeCondition::expr("ok == true").matches(&state));
    }

    #[test]
    fn dotted_paths_descend_into_objects() {
        let state = state_with("check", serde_json::json!({"verdict": "pass"}));
        assert!(EdgeCondition::expr("check.verdict == \"pass\"").matches(&state));
    }

    #[test]
    fn contains_on_strings_and_arrays() {
        let state = state_with("text", Value::String("hello world".into()));
        assert!(EdgeCondition::expr("text contains \"world\"").matches(&state));

        let state = state_with("tags", serde_json::json!(["a", "b"]));
        assert!(EdgeCondition::expr("tags contains \"a\"").matches(&state));
        assert!(!EdgeCondition::expr("tags contains \"z\"").matches(&state));
    }

    #[test]
    fn bare_path_is_a_truthy_test() {
        assert!(EdgeCondition::expr("flag").matches(&state_with("flag", Value::Bool(true))));
        assert!(!EdgeCondition::expr("flag").matches(&state_with("flag", Value::Bool(false))));
        assert!(!EdgeCondition::expr("missing").matches(&state_with("flag", Value::Bool(true))));
        assert!(!EdgeCondition::expr("empty").matches(&state_with("empty", Value::String(String::new()))));
    }

    #[test]
    fn last_slot_is_addressable() {
        let mut state = ExecutionState::new(Value::Null);
        state.record("n1", Value::String("output".into()));
        assert!(EdgeCondition::expr("last == \"output\"").matches(&state));
    }

    #[test]
    fn absent_path_satisfies_inequality_only() {
        let state = ExecutionState::new(Value::Null);
        assert!(EdgeCondition::expr("ghost != \"x\"").matches(&state));
        assert!(!EdgeCondition::expr("ghost == \"x\"").matches(&state));
    }
}
