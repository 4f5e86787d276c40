//! Task manager: the A2A operations surface.
//!
//! Binds an [`Agent`] to a [`TaskStore`] and exposes the task lifecycle:
//! send (blocking and streaming), get, list, cancel, subscribe, retry.
//! Each task gets its own event hub; the agent loop publishes into it and
//! every subscriber receives events in emission order, with the terminal
//! event always last.

use std::collections::HashMap;
use std::sync::Arc;

use futures::Stream;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::{InMemoryTaskStore, ListTasksFilter, TaskPage, TaskStore};
use super::{Task, TaskState, parse_task_name};
use crate::agent::Agent;
use crate::card::AgentCard;
use crate::context::RunContext;
use crate::error::{Error, ErrorCode, Result};
use crate::event::{AgentEvent, EventHub, EventKind, SharedHub};
use crate::message::{Message, Role};
use crate::policy::ApprovalStore;

/// One item of a task event stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Initial (or re-attach) task snapshot.
    Task(Task),
    /// A status update during execution.
    Status {
        /// The underlying event.
        event: AgentEvent,
        /// Task state at emission time.
        state: TaskState,
        /// `true` for the terminal status update; always the last status
        /// a subscriber sees.
        is_final: bool,
    },
    /// The closing message carrying the full assistant reply.
    Message(Message),
}

/// Binds an agent to a task store and exposes the A2A surface.
pub struct TaskManager {
    agent: Arc<Agent>,
    store: Arc<dyn TaskStore>,
    hubs: Mutex<HashMap<String, SharedHub>>,
    running: Mutex<HashMap<String, RunContext>>,
    approvals: Arc<ApprovalStore>,
    buffer: usize,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("agent", &self.agent.name())
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Create a manager over an in-memory store.
    #[must_use]
    pub fn new(agent: Arc<Agent>) -> Arc<Self> {
        Self::with_store(agent, Arc::new(InMemoryTaskStore::new()))
    }

    /// Create a manager over a custom store.
    #[must_use]
    pub fn with_store(agent: Arc<Agent>, store: Arc<dyn TaskStore>) -> Arc<Self> {
        Arc::new(Self {
            agent,
            store,
            hubs: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            approvals: Arc::new(ApprovalStore::new()),
            buffer: crate::event::DEFAULT_BUFFER,
        })
    }

    /// The approval store operators resolve pending records on.
    #[must_use]
    pub fn approvals(&self) -> Arc<ApprovalStore> {
        Arc::clone(&self.approvals)
    }

    /// Metadata describing the bound agent.
    #[must_use]
    pub fn get_extended_agent_card(&self) -> AgentCard {
        self.agent.card()
    }

    async fn hub_for(&self, task_id: &str) -> SharedHub {
        let mut hubs = self.hubs.lock().await;
        Arc::clone(
            hubs.entry(task_id.to_owned())
                .or_insert_with(|| Arc::new(EventHub::new(self.buffer))),
        )
    }

    async fn drop_hub(&self, task_id: &str) {
        if let Some(hub) = self.hubs.lock().await.remove(task_id) {
            hub.close().await;
        }
    }

    fn validate_message(message: &Message) -> Result<()> {
        if message.role != Role::User {
            return Err(Error::invalid_input("sent messages must have the user role"));
        }
        Ok(())
    }

    /// Find or create the task for an incoming message and append it.
    async fn ensure_task(
        &self,
        task_name: Option<&str>,
        context_id: Option<String>,
        message: &Message,
    ) -> Result<Task> {
        match task_name {
            Some(name) => {
                let id = parse_task_name(name)?.to_owned();
                if self.running.lock().await.contains_key(&id) {
                    return Err(Error::invalid_input(format!(
                        "task '{id}' is currently executing"
                    )));
                }
                let message = message.clone();
                self.store
                    .update(
                        &id,
                        Box::new(move |task| {
                            if task.status.state.is_terminal() {
                                return Err(Error::invalid_input(format!(
                                    "task '{}' is {} and accepts no new messages",
                                    task.id,
                                    task.status.state.as_str()
                                )));
                            }
                            // A user message resumes an input-waiting task.
                            if matches!(
                                task.status.state,
                                TaskState::InputRequired | TaskState::AuthRequired
                            ) {
                                task.transition(TaskState::Working, None)?;
                            }
                            task.push_message(message);
                            Ok(())
                        }),
                    )
                    .await
            }
            None => {
                let mut task = Task::new(context_id);
                task.push_message(message.clone());
                self.store.insert(task.clone()).await?;
                info!(task = %task.id, "Task created");
                Ok(task)
            }
        }
    }

    /// Run the agent for a task and settle its terminal state.
    async fn execute(&self, task_id: &str, input: String, hub: SharedHub) -> Result<String> {
        let task = self.store.get(task_id).await?;
        let ctx = RunContext::new()
            .with_task_id(task_id)
            .with_session_id(task.context_id.clone());

        self.running
            .lock()
            .await
            .insert(task_id.to_owned(), ctx.clone());

        let _ = self
            .store
            .update(
                task_id,
                Box::new(|task| task.transition(TaskState::Working, None)),
            )
            .await;

        let result = self
            .agent
            .run_with_hub(&ctx, &input, Some(Arc::clone(&hub)))
            .await;

        self.running.lock().await.remove(task_id);

        match result {
            Ok(answer) => {
                let reply = Message::assistant(&answer);
                let _ = self
                    .store
                    .update(
                        task_id,
                        Box::new(move |task| {
                            task.push_message(reply);
                            task.transition(TaskState::Completed, None)
                        }),
                    )
                    .await;
                hub.emit(
                    AgentEvent::new(EventKind::ResponseFinal, ctx.run_id(), answer.clone())
                        .with_payload(serde_json::json!({"terminal": true})),
                )
                .await;
                self.drop_hub(task_id).await;
                Ok(answer)
            }
            Err(err) => {
                let state = if err.is_cancellation() || ctx.is_cancelled() {
                    TaskState::Cancelled
                } else if err.is(ErrorCode::Unauthorized) {
                    TaskState::Rejected
                } else {
                    TaskState::Failed
                };
                warn!(task = task_id, error = %err, state = state.as_str(), "Task run failed");
                let status_message = Some(err.to_string());
                let _ = self
                    .store
                    .update(
                        task_id,
                        Box::new(move |task| {
                            if task.status.state.is_terminal() {
                                return Ok(());
                            }
                            task.transition(state, status_message)
                        }),
                    )
                    .await;
                hub.emit(
                    AgentEvent::new(EventKind::Error, ctx.run_id(), err.to_string()).with_payload(
                        serde_json::json!({
                            "terminal": true,
                            "code": err.code.as_str(),
                        }),
                    ),
                )
                .await;
                self.drop_hub(task_id).await;
                Err(err)
            }
        }
    }

    /// Send a message and wait for the final assistant reply.
    ///
    /// Creates a task when `task_name` is absent; otherwise appends to
    /// the named task. Returns the settled task and the final message.
    pub async fn send_message(
        &self,
        message: Message,
        task_name: Option<&str>,
        context_id: Option<String>,
    ) -> Result<(Task, Message)> {
        Self::validate_message(&message)?;
        let input = message.content.clone();
        let task = self.ensure_task(task_name, context_id, &message).await?;
        let hub = self.hub_for(&task.id).await;

        let answer = self.execute(&task.id, input, hub).await?;
        let task = self.store.get(&task.id).await?;
        Ok((task, Message::assistant(answer)))
    }

    /// Send a message and stream lifecycle events.
    ///
    /// The stream yields a `Task` snapshot first, then status updates in
    /// emission order, then the terminal status marked final, and
    /// finally a `Message` with the full assistant reply.
    pub fn send_streaming_message(
        self: &Arc<Self>,
        message: Message,
        task_name: Option<String>,
        context_id: Option<String>,
    ) -> impl Stream<Item = Result<StreamEvent>> + Send + use<> {
        let manager = Arc::clone(self);
        async_stream::try_stream! {
            Self::validate_message(&message)?;
            let input = message.content.clone();
            let task = manager
                .ensure_task(task_name.as_deref(), context_id, &message)
                .await?;
            let task_id = task.id.clone();
            let hub = manager.hub_for(&task_id).await;
            let mut subscription = hub.subscribe().await;

            let runner = Arc::clone(&manager);
            let run_hub = Arc::clone(&hub);
            let run_id = task_id.clone();
            tokio::spawn(async move {
                let _ = runner.execute(&run_id, input, run_hub).await;
            });

            yield StreamEvent::Task(task.snapshot(None, false));

            while let Some(event) = subscription.recv().await {
                let is_final = event
                    .payload
                    .as_ref()
                    .and_then(|p| p.get("terminal"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let state = if is_final {
                    manager
                        .store
                        .get(&task_id)
                        .await
                        .map(|t| t.status.state)
                        .unwrap_or(TaskState::Failed)
                } else {
                    TaskState::Working
                };
                yield StreamEvent::Status { event, state, is_final };
                if is_final {
                    break;
                }
            }

            let task = manager.store.get(&task_id).await?;
            let reply = task
                .history
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant)
                .cloned()
                .unwrap_or_else(|| {
                    Message::assistant(task.status.message.clone().unwrap_or_default())
                });
            yield StreamEvent::Message(reply);
        }
    }

    /// Fetch a task, optionally trimming history and gating artifacts.
    pub async fn get_task(
        &self,
        name: &str,
        history_length: Option<usize>,
        include_artifacts: bool,
    ) -> Result<Task> {
        let id = parse_task_name(name)?;
        let task = self.store.get(id).await?;
        Ok(task.snapshot(history_length, include_artifacts))
    }

    /// List tasks matching a filter, paginated by token.
    pub async fn list_tasks(&self, filter: ListTasksFilter) -> Result<TaskPage> {
        self.store.list(filter).await
    }

    /// Cancel a task.
    ///
    /// Cancels in-flight work through its run context, settles the task
    /// in `cancelled`, and emits a terminal error event. Cancelling a
    /// task that is already terminal is a no-op.
    pub async fn cancel_task(&self, name: &str) -> Result<Task> {
        let id = parse_task_name(name)?.to_owned();
        let task = self.store.get(&id).await?;
        if task.status.state.is_terminal() {
            debug!(task = %id, "Cancel on terminal task is a no-op");
            return Ok(task);
        }

        if let Some(ctx) = self.running.lock().await.get(&id) {
            ctx.cancel();
        }

        let task = self
            .store
            .update(
                &id,
                Box::new(|task| {
                    if task.status.state.is_terminal() {
                        return Ok(());
                    }
                    task.transition(TaskState::Cancelled, Some("cancelled by caller".into()))
                }),
            )
            .await?;

        let hub = self.hub_for(&id).await;
        hub.emit(
            AgentEvent::new(EventKind::Error, &id, "task cancelled").with_payload(
                serde_json::json!({"terminal": true, "code": ErrorCode::ContextLost.as_str()}),
            ),
        )
        .await;
        self.drop_hub(&id).await;

        Ok(task)
    }

    /// Re-attach to a task's event stream.
    ///
    /// For an in-progress task: a current snapshot, then events from here
    /// forward (no replay). For a terminal task: the terminal snapshot
    /// and a synthetic final status, then the stream closes.
    pub fn subscribe_to_task(
        self: &Arc<Self>,
        name: &str,
    ) -> impl Stream<Item = Result<StreamEvent>> + Send + use<> {
        let manager = Arc::clone(self);
        let name = name.to_owned();
        async_stream::try_stream! {
            let id = parse_task_name(&name)?.to_owned();
            let task = manager.store.get(&id).await?;

            if task.status.state.is_terminal() {
                let state = task.status.state;
                let message = task.status.message.clone().unwrap_or_default();
                yield StreamEvent::Task(task.snapshot(None, true));
                yield StreamEvent::Status {
                    event: AgentEvent::new(EventKind::ResponseFinal, &id, message)
                        .with_payload(serde_json::json!({"terminal": true})),
                    state,
                    is_final: true,
                };
            } else {
                let hub = manager.hub_for(&id).await;
                let mut subscription = hub.subscribe().await;
                yield StreamEvent::Task(task.snapshot(None, false));

                while let Some(event) = subscription.recv().await {
                    let is_final = event
                        .payload
                        .as_ref()
                        .and_then(|p| p.get("terminal"))
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    let state = if is_final {
                        manager
                            .store
                            .get(&id)
                            .await
                            .map(|t| t.status.state)
                            .unwrap_or(TaskState::Failed)
                    } else {
                        TaskState::Working
                    };
                    yield StreamEvent::Status { event, state, is_final };
                    if is_final {
                        break;
                    }
                }
            }
        }
    }

    /// Resubmit the last user message of a task as a fresh request.
    ///
    /// The clone carries no task or context id, so a new task is created.
    pub async fn retry(&self, name: &str) -> Result<(Task, Message)> {
        let id = parse_task_name(name)?;
        let task = self.store.get(id).await?;
        let last_user = task.last_user_message().cloned().ok_or_else(|| {
            Error::invalid_input(format!("task '{id}' has no user message to retry"))
        })?;
        self.send_message(Message::user(last_user.content), None, None)
            .await
    }

    /// Park a task waiting for more user input.
    pub async fn require_input(&self, name: &str, prompt: impl Into<String>) -> Result<Task> {
        self.park(name, TaskState::InputRequired, prompt.into()).await
    }

    /// Park a task waiting for authorization.
    pub async fn require_auth(&self, name: &str, prompt: impl Into<String>) -> Result<Task> {
        self.park(name, TaskState::AuthRequired, prompt.into()).await
    }

    async fn park(&self, name: &str, state: TaskState, prompt: String) -> Result<Task> {
        let id = parse_task_name(name)?.to_owned();
        let status = prompt.clone();
        let task = self
            .store
            .update(
                &id,
                Box::new(move |task| task.transition(state, Some(status))),
            )
            .await?;

        let hub = self.hub_for(&id).await;
        hub.emit(
            AgentEvent::new(EventKind::ApprovalRequired, &id, prompt)
                .with_payload(serde_json::json!({"state": state.as_str()})),
        )
        .await;
        Ok(task)
    }

    /// Attach an artifact to a task.
    pub async fn add_artifact(&self, name: &str, artifact: super::Artifact) -> Result<Task> {
        let id = parse_task_name(name)?;
        self.store
            .update(
                id,
                Box::new(move |task| {
                    task.artifacts.push(artifact);
                    task.updated_at = std::time::SystemTime::now();
                    Ok(())
                }),
            )
            .await
    }
}
