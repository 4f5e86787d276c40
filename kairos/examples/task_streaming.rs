//! Stream task lifecycle events while an agent runs.
//!
//! ```sh
//! cargo run --example task_streaming
//! ```

use std::sync::Arc;

use futures::StreamExt as _;
use kairos::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let provider = Arc::new(ScriptedProvider::new([ChatResponse::text(
        "Final Answer: all systems nominal",
    )]));
    let agent = Agent::builder()
        .name("reporter")
        .role("You report system status.")
        .provider(provider)
        .model("scripted")
        .build()?;

    let manager = TaskManager::new(agent);
    let stream = manager.send_streaming_message(Message::user("status?"), None, None);
    futures::pin_mut!(stream);

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Task(task) => {
                println!("task {} [{}]", task.name(), task.status.state.as_str());
            }
            StreamEvent::Status { event, state, is_final } => {
                println!(
                    "status [{}] {} final={is_final}",
                    state.as_str(),
                    event.kind.as_str()
                );
            }
            StreamEvent::Message(reply) => println!("reply: {}", reply.content),
        }
    }
    Ok(())
}
