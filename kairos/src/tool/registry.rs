//! Local tool registry and toolset resolution.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::{BoxedTool, ToolDefinition};
use crate::error::{Error, Result};

/// An ordered collection of locally registered tools.
///
/// Registration order is preserved; it is the tie-breaking order used by
/// resolution when two sources define the same name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<BoxedTool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.tools.iter().map(|t| t.name()).collect();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with a duplicate name replaces the earlier
    /// registration in place, keeping its original position.
    pub fn add(&mut self, tool: BoxedTool) {
        let name = tool.name().to_owned();
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name() == name) {
            *existing = Arc::new(tool);
        } else {
            self.tools.push(Arc::new(tool));
        }
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns `true` if a tool with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<BoxedTool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Definitions in registration order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Dispatch a call to a registered tool.
    pub async fn call(&self, name: &str, args: Map<String, Value>) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::not_found(format!("tool '{name}' is not registered")))?;
        tool.call_json(args).await
    }
}

/// Compute the effective toolset for a run.
///
/// Local definitions come first in registration order, then each remote
/// list in attachment order, optionally filtered by a skill allow-list.
/// Duplicates are removed by name (first occurrence wins) and the result
/// is stably sorted by name so the model sees a reproducible menu.
#[must_use]
pub fn resolve_toolset(
    local: Vec<ToolDefinition>,
    remote: Vec<Vec<ToolDefinition>>,
    allowed_skills: Option<&[String]>,
) -> Vec<ToolDefinition> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut resolved: Vec<ToolDefinition> = Vec::new();

    for def in local {
        if seen.insert(def.name.clone()) {
            resolved.push(def);
        }
    }
    for list in remote {
        for def in list {
            if let Some(allowed) = allowed_skills {
                if !allowed.iter().any(|a| a == &def.name) {
                    continue;
                }
            }
            if seen.insert(def.name.clone()) {
                resolved.push(def);
            }
        }
    }

    resolved.sort_by(|a, b| a.name.cmp(&b.name));
    resolved
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tool::FnTool;

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, format!("{name} tool"), serde_json::json!({"type": "object"}))
    }

    fn echo_tool(name: &str) -> BoxedTool {
        Box::new(FnTool::new(
            name.to_owned(),
            "Echo.",
            serde_json::json!({"type": "object"}),
            |args| Ok(Value::Object(args)),
        ))
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut registry = ToolRegistry::new();
        registry.add(echo_tool("beta"));
        registry.add(echo_tool("alpha"));

        let names: Vec<String> = registry.definitions().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["beta", "alpha"]);
    }

    #[test]
    fn duplicate_registration_replaces_in_place() {
        let mut registry = ToolRegistry::new();
        registry.add(echo_tool("a"));
        registry.add(echo_tool("b"));
        registry.add(echo_tool("a"));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn call_unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.call("missing", Map::new()).await.unwrap_err();
        assert!(err.is(crate::error::ErrorCode::NotFound));
    }

    #[test]
    fn resolution_dedupes_first_wins_and_sorts() {
        let local = vec![def("zeta"), def("alpha")];
        let remote = vec![vec![
            def("alpha").with_source(crate::tool::ToolSource::Mcp("srv".into())),
            def("mid"),
        ]];

        let resolved = resolve_toolset(local, remote, None);
        let names: Vec<&str> = resolved.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        // Local alpha won over the remote one.
        assert_eq!(resolved[0].source, crate::tool::ToolSource::Local);
    }

    #[test]
    fn skill_allow_list_filters_remote_only() {
        let local = vec![def("local_tool")];
        let remote = vec![vec![def("allowed"), def("blocked")]];
        let allow = vec!["allowed".to_owned()];

        let resolved = resolve_toolset(local, remote, Some(&allow));
        let names: Vec<&str> = resolved.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["allowed", "local_tool"]);
    }

    #[test]
    fn resolution_is_deterministic() {
        let make = || {
            resolve_toolset(
                vec![def("c"), def("a")],
                vec![vec![def("b"), def("a")]],
                None,
            )
        };
        let first: Vec<String> = make().iter().map(|d| d.name.clone()).collect();
        let second: Vec<String> = make().iter().map(|d| d.name.clone()).collect();
        assert_eq!(first, second);
    }
}
