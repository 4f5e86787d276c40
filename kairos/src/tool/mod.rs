//! Tool trait and definitions for agent capabilities.
//!
//! Tools are the primary way agents interact with the world. Local tools
//! run in-process; remote tools discovered over MCP are bridged into the
//! same abstraction so the loop dispatches both identically.
//!
//! # OpenAI API Alignment
//!
//! [`ToolDefinition`] serializes to the `{"type": "function", "function":
//! {...}}` shape expected by function-calling chat APIs.

mod registry;

pub use registry::{ToolRegistry, resolve_toolset};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Where a tool definition came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    /// Registered in-process.
    #[default]
    Local,
    /// Discovered on a named MCP server.
    Mcp(String),
    /// Backed by an agent-level skill.
    Skill,
}

impl ToolSource {
    /// Human-readable tag (`local`, `mcp:<server>`, `skill`).
    #[must_use]
    pub fn tag(&self) -> String {
        match self {
            Self::Local => "local".to_owned(),
            Self::Mcp(server) => format!("mcp:{server}"),
            Self::Skill => "skill".to_owned(),
        }
    }
}

/// Definition of a tool for LLM function calling.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    /// Name of the tool. Unique within a resolved toolset.
    pub name: String,
    /// Description that helps the model decide when to call it.
    pub description: String,
    /// JSON-Schema-shaped parameter object.
    pub parameters: Value,
    /// Provenance tag.
    #[serde(default)]
    pub source: ToolSource,
}

impl ToolDefinition {
    /// Create a new local tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            source: ToolSource::Local,
        }
    }

    /// Set the provenance tag.
    #[must_use]
    pub fn with_source(mut self, source: ToolSource) -> Self {
        self.source = source;
        self
    }

    /// Returns the tool name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Custom serialization to the function-calling wire format.
impl Serialize for ToolDefinition {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut function = serde_json::Map::new();
        function.insert("name".to_owned(), Value::String(self.name.clone()));
        function.insert(
            "description".to_owned(),
            Value::String(self.description.clone()),
        );
        function.insert("parameters".to_owned(), self.parameters.clone());

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "function")?;
        map.serialize_entry("function", &function)?;
        map.end()
    }
}

/// The core trait for typed tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static name of the tool.
    const NAME: &'static str;

    /// Arguments type for the tool.
    type Args: for<'de> Deserialize<'de> + Send;

    /// Output type of the tool.
    type Output: Serialize + Send;

    /// Get the name of the tool.
    fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Get the description of the tool.
    fn description(&self) -> String;

    /// Get the JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn call(&self, args: Self::Args) -> Result<Self::Output>;

    /// Get the tool definition for LLM function calling.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters_schema())
    }

    /// Call the tool with a decoded argument mapping, returning JSON.
    async fn call_json(&self, args: Map<String, Value>) -> Result<Value>
    where
        Self::Output: 'static,
    {
        let typed: Self::Args = serde_json::from_value(Value::Object(args))
            .map_err(|e| Error::invalid_input(format!("invalid arguments: {e}")))?;
        let output = self.call(typed).await?;
        serde_json::to_value(output)
            .map_err(|e| Error::tool_failure(Self::NAME, format!("unserializable output: {e}")))
    }
}

/// Generate a JSON-Schema parameter object from a Rust type.
///
/// The type must derive [`schemars::JsonSchema`]. The `$schema` meta
/// field is stripped; chat APIs do not want it.
#[must_use]
pub fn parameters_for<T: schemars::JsonSchema>() -> Value {
    let root = schemars::schema_for!(T);
    let mut schema = serde_json::to_value(&root).unwrap_or_else(|_| serde_json::json!({}));
    if let Value::Object(ref mut map) = schema {
        map.remove("$schema");
    }
    schema
}

/// A boxed dynamic tool usable in collections.
pub type BoxedTool = Box<dyn DynTool>;

/// Object-safe version of [`Tool`] for dynamic dispatch.
#[async_trait]
pub trait DynTool: Send + Sync {
    /// Get the name of the tool.
    fn name(&self) -> &str;

    /// Get the tool definition.
    fn definition(&self) -> ToolDefinition;

    /// Call the tool with a decoded argument mapping.
    async fn call_json(&self, args: Map<String, Value>) -> Result<Value>;
}

#[async_trait]
impl<T: Tool + 'static> DynTool for T
where
    T::Output: 'static,
{
    fn name(&self) -> &str {
        Tool::name(self)
    }

    fn definition(&self) -> ToolDefinition {
        Tool::definition(self)
    }

    async fn call_json(&self, args: Map<String, Value>) -> Result<Value> {
        Tool::call_json(self, args).await
    }
}

/// A tool built from a closure, for lightweight registration.
pub struct FnTool<F> {
    name: String,
    description: String,
    parameters: Value,
    handler: F,
}

impl<F> FnTool<F>
where
    F: Fn(Map<String, Value>) -> Result<Value> + Send + Sync,
{
    /// Create a closure-backed tool.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
        }
    }
}

impl<F> std::fmt::Debug for FnTool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> DynTool for FnTool<F>
where
    F: Fn(Map<String, Value>) -> Result<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(&self.name, &self.description, self.parameters.clone())
    }

    async fn call_json(&self, args: Map<String, Value>) -> Result<Value> {
        (self.handler)(args)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct AddArgs {
        x: i64,
        y: i64,
    }

    #[derive(Debug, Clone, Copy, Default)]
    struct Adder;

    #[async_trait]
    impl Tool for Adder {
        const NAME: &'static str = "add";
        type Args = AddArgs;
        type Output = i64;

        fn description(&self) -> String {
            "Add two integers.".to_owned()
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "x": {"type": "integer"},
                    "y": {"type": "integer"}
                },
                "required": ["x", "y"]
            })
        }

        async fn call(&self, args: Self::Args) -> Result<Self::Output> {
            Ok(args.x + args.y)
        }
    }

    #[test]
    fn definition_serializes_to_function_shape() {
        let def = Tool::definition(&Adder);
        let json: Value = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "add");
        assert!(json["function"]["parameters"].is_object());
    }

    #[tokio::test]
    async fn typed_tool_call_through_dyn() {
        let tool: BoxedTool = Box::new(Adder);
        let args = crate::message::decode_arguments(&serde_json::json!({"x": 2, "y": 3})).unwrap();
        let out = tool.call_json(args).await.unwrap();
        assert_eq!(out, Value::from(5));
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected() {
        let tool: BoxedTool = Box::new(Adder);
        let args = crate::message::decode_arguments(&serde_json::json!({"x": "two"})).unwrap();
        let err = tool.call_json(args).await.unwrap_err();
        assert!(err.is(crate::error::ErrorCode::InvalidInput));
    }

    #[tokio::test]
    async fn fn_tool_dispatches_closure() {
        let tool = FnTool::new(
            "echo",
            "Echo back the input.",
            serde_json::json!({"type": "object"}),
            |args| Ok(args.get("input").cloned().unwrap_or(Value::Null)),
        );
        let args = crate::message::decode_arguments(&Value::String("hello".into())).unwrap();
        let out = tool.call_json(args).await.unwrap();
        assert_eq!(out, Value::String("hello".into()));
    }

    #[test]
    fn schema_generation_strips_the_meta_field() {
        #[derive(Deserialize, schemars::JsonSchema)]
        #[allow(dead_code)]
        struct WeatherArgs {
            city: String,
        }

        let schema = parameters_for::<WeatherArgs>();
        assert!(schema.get("$schema").is_none());
        assert_eq!(schema["properties"]["city"]["type"], "string");
    }

    #[test]
    fn source_tags() {
        assert_eq!(ToolSource::Local.tag(), "local");
        assert_eq!(ToolSource::Mcp("filesystem".into()).tag(), "mcp:filesystem");
        assert_eq!(ToolSource::Skill.tag(), "skill");
    }
}
