//! Event and telemetry fabric.
//!
//! Every observable moment in a run (thinking, retrieval, tool dispatch,
//! response deltas, errors, approval requests) is an [`AgentEvent`]
//! published through an [`EventHub`]. Subscribers receive events over
//! bounded channels in emission order; a slow subscriber back-pressures
//! the producer only up to its buffer, after which events for that
//! subscriber are dropped and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

/// The kind of an event, carried as `event_type` in the payload metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum EventKind {
    /// The model is reasoning.
    #[serde(rename = "thinking")]
    Thinking,
    /// Memory retrieval started.
    #[serde(rename = "retrieval.start")]
    RetrievalStart,
    /// Memory retrieval finished.
    #[serde(rename = "retrieval.done")]
    RetrievalDone,
    /// A tool invocation started.
    #[serde(rename = "tool.start")]
    ToolStart,
    /// A tool invocation finished.
    #[serde(rename = "tool.done")]
    ToolDone,
    /// Incremental response text.
    #[serde(rename = "response.delta")]
    ResponseDelta,
    /// The final response text.
    #[serde(rename = "response.final")]
    ResponseFinal,
    /// An error occurred.
    #[serde(rename = "error")]
    Error,
    /// A human approval is required.
    #[serde(rename = "approval.required")]
    ApprovalRequired,
}

impl EventKind {
    /// Wire name of the event kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::RetrievalStart => "retrieval.start",
            Self::RetrievalDone => "retrieval.done",
            Self::ToolStart => "tool.start",
            Self::ToolDone => "tool.done",
            Self::ResponseDelta => "response.delta",
            Self::ResponseFinal => "response.final",
            Self::Error => "error",
            Self::ApprovalRequired => "approval.required",
        }
    }
}

/// A status event emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Event kind tag.
    pub kind: EventKind,
    /// Free-text message.
    pub message: String,
    /// Run id the event belongs to.
    pub trace_id: String,
    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl AgentEvent {
    /// Create a new event.
    #[must_use]
    pub fn new(kind: EventKind, trace_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace_id: trace_id.into(),
            payload: None,
        }
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Default per-subscriber buffer size.
pub const DEFAULT_BUFFER: usize = 64;

struct Subscriber {
    tx: mpsc::Sender<AgentEvent>,
    dropped: Arc<AtomicU64>,
}

/// Fan-out hub for [`AgentEvent`]s.
///
/// Emission never blocks past a subscriber's buffer: a full channel drops
/// the event for that subscriber and increments its drop counter
/// (liveness over completeness). Subscribers whose receivers are gone are
/// pruned on the next emission.
pub struct EventHub {
    subscribers: Mutex<Vec<Subscriber>>,
    buffer: usize,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("buffer", &self.buffer)
            .field("emitted", &self.emitted.load(Ordering::Relaxed))
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl EventHub {
    /// Create a hub with the given per-subscriber buffer size.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attach a new subscriber.
    ///
    /// The returned handle yields events from this point forward; no
    /// replay of earlier events is performed.
    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let dropped = Arc::new(AtomicU64::new(0));
        self.subscribers.lock().await.push(Subscriber {
            tx,
            dropped: Arc::clone(&dropped),
        });
        Subscription { rx, dropped }
    }

    /// Emit an event to every live subscriber.
    pub async fn emit(&self, event: AgentEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                sub.dropped.fetch_add(1, Ordering::Relaxed);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Total events emitted through this hub.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Total events dropped across all subscribers.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Disconnect every subscriber. Their streams end after draining.
    pub async fn close(&self) {
        self.subscribers.lock().await.clear();
    }
}

/// A subscriber handle returned by [`EventHub::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<AgentEvent>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Receive the next event. Returns `None` once the hub is closed and
    /// the buffer is drained.
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }

    /// Attempt to receive without waiting.
    pub fn try_recv(&mut self) -> Option<AgentEvent> {
        self.rx.try_recv().ok()
    }

    /// Events dropped for this subscriber because its buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Shared emitter handle used across the runtime.
pub type SharedHub = Arc<EventHub>;
