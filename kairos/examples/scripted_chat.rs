//! Minimal end-to-end run against the scripted provider.
//!
//! ```sh
//! cargo run --example scripted_chat
//! ```

use std::sync::Arc;

use kairos::prelude::*;
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<()> {
    let provider = Arc::new(ScriptedProvider::new([
        ChatResponse::with_tool_calls(
            "",
            vec![ToolCall::new(
                "c1",
                "Calculator",
                Value::String(r#"{"input": "10 + 5"}"#.into()),
            )],
        ),
        ChatResponse::text("Final Answer: 15"),
    ]));

    let calculator = FnTool::new(
        "Calculator",
        "Evaluates arithmetic expressions.",
        serde_json::json!({
            "type": "object",
            "properties": {"input": {"type": "string"}},
            "required": ["input"]
        }),
        |args| {
            let input = args.get("input").and_then(Value::as_str).unwrap_or_default();
            Ok(Value::String(format!("Result from Calculator with {input}")))
        },
    );

    let agent = Agent::builder()
        .name("mathy")
        .role("You answer math questions.")
        .provider(provider)
        .model("scripted")
        .tool(Box::new(calculator))
        .build()?;

    let answer = agent.run(&RunContext::new(), "What is 10 + 5?").await?;
    println!("answer: {answer}");
    println!(
        "llm calls: {}, tool calls: {}",
        agent.metrics().llm_calls(),
        agent.metrics().tool_calls()
    );
    Ok(())
}
