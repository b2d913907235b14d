//! Domain events and the sinks they are published to
//!
//! Each aggregate owns a closed event enum ([`RunEvent`], [`InterruptEvent`],
//! [`ThreadEvent`], [`WorkerEvent`]) and the engine emits [`ExecutionEvent`]s.
//! All of them implement [`Event`] and are wrapped in [`DomainEvent`] for
//! publishing.
//!
//! Publishing is fire-and-forget: [`EventSink::publish`] never blocks on
//! subscribers. The default [`BroadcastEventSink`] scopes every event to a
//! topic (`run:{id}`, `thread:{id}`, `worker:{id}`) so a streaming layer can
//! filter per run:
//!
//! ```rust,ignore
//! use duragraph_core::events::BroadcastEventSink;
//! use futures::StreamExt;
//!
//! let sink = BroadcastEventSink::new(256);
//! let mut stream = sink.subscribe_topic("run:run-123");
//! while let Some(envelope) = stream.next().await {
//!     println!("{} -> {}", envelope.topic, envelope.event.event_type());
//! }
//! ```

use crate::humanloop::InterruptEvent;
use crate::run::RunEvent;
use crate::thread::ThreadEvent;
use crate::worker::WorkerEvent;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Common capability of every domain event
pub trait Event {
    /// Dotted event name, e.g. `run.completed`
    fn event_type(&self) -> &'static str;
    /// Id of the aggregate the event belongs to
    fn aggregate_id(&self) -> &str;
    /// Aggregate kind, e.g. `run`
    fn aggregate_type(&self) -> &'static str;
}

/// Node-level execution events emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    #[serde(rename = "node.started")]
    NodeStarted {
        run_id: String,
        node_id: String,
        node_type: String,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "node.completed")]
    NodeCompleted {
        run_id: String,
        node_id: String,
        output: Value,
        duration_ms: u64,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "node.failed")]
    NodeFailed {
        run_id: String,
        node_id: String,
        error: String,
        occurred_at: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn node_id(&self) -> &str {
        match self {
            ExecutionEvent::NodeStarted { node_id, .. }
            | ExecutionEvent::NodeCompleted { node_id, .. }
            | ExecutionEvent::NodeFailed { node_id, .. } => node_id,
        }
    }
}

impl Event for ExecutionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ExecutionEvent::NodeStarted { .. } => "node.started",
            ExecutionEvent::NodeCompleted { .. } => "node.completed",
            ExecutionEvent::NodeFailed { .. } => "node.failed",
        }
    }

    fn aggregate_id(&self) -> &str {
        match self {
            ExecutionEvent::NodeStarted { run_id, .. }
            | ExecutionEvent::NodeCompleted { run_id, .. }
            | ExecutionEvent::NodeFailed { run_id, .. } => run_id,
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "execution"
    }
}

/// Any event the core publishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomainEvent {
    Run(RunEvent),
    Interrupt(InterruptEvent),
    Thread(ThreadEvent),
    Execution(ExecutionEvent),
    Worker(WorkerEvent),
}

impl DomainEvent {
    /// Run the event is scoped to, when it is run-scoped
    pub fn run_id(&self) -> Option<&str> {
        match self {
            DomainEvent::Run(e) => Some(e.aggregate_id()),
            DomainEvent::Execution(e) => Some(e.aggregate_id()),
            DomainEvent::Interrupt(e) => Some(e.run_id()),
            DomainEvent::Thread(_) | DomainEvent::Worker(_) => None,
        }
    }

    /// Publish topic: `run:{id}`, `thread:{id}` or `worker:{id}`
    pub fn topic(&self) -> String {
        match self {
            DomainEvent::Thread(e) => format!("thread:{}", e.aggregate_id()),
            DomainEvent::Worker(e) => format!("worker:{}", e.aggregate_id()),
            other => format!("run:{}", other.run_id().unwrap_or_default()),
        }
    }

    fn inner(&self) -> &dyn Event {
        match self {
            DomainEvent::Run(e) => e,
            DomainEvent::Interrupt(e) => e,
            DomainEvent::Thread(e) => e,
            DomainEvent::Execution(e) => e,
            DomainEvent::Worker(e) => e,
        }
    }
}

impl Event for DomainEvent {
    fn event_type(&self) -> &'static str {
        self.inner().event_type()
    }

    fn aggregate_id(&self) -> &str {
        self.inner().aggregate_id()
    }

    fn aggregate_type(&self) -> &'static str {
        self.inner().aggregate_type()
    }
}

impl From<RunEvent> for DomainEvent {
    fn from(e: RunEvent) -> Self {
        DomainEvent::Run(e)
    }
}

impl From<InterruptEvent> for DomainEvent {
    fn from(e: InterruptEvent) -> Self {
        DomainEvent::Interrupt(e)
    }
}

impl From<ThreadEvent> for DomainEvent {
    fn from(e: ThreadEvent) -> Self {
        DomainEvent::Thread(e)
    }
}

impl From<ExecutionEvent> for DomainEvent {
    fn from(e: ExecutionEvent) -> Self {
        DomainEvent::Execution(e)
    }
}

impl From<WorkerEvent> for DomainEvent {
    fn from(e: WorkerEvent) -> Self {
        DomainEvent::Worker(e)
    }
}

/// Destination for published events
pub trait EventSink: Send + Sync {
    /// Publish without waiting for subscribers
    fn publish(&self, event: DomainEvent);

    /// Publish every event in order
    fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

/// Event together with its topic and publish time
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub topic: String,
    pub event: DomainEvent,
    pub published_at: DateTime<Utc>,
}

/// Sink backed by a `tokio::sync::broadcast` channel
///
/// Slow subscribers lag and miss events rather than blocking publishers.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<EventEnvelope>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Stream of events on one topic; lagged gaps are skipped
    pub fn subscribe_topic(
        &self,
        topic: impl Into<String>,
    ) -> impl Stream<Item = EventEnvelope> + Send + 'static {
        let topic = topic.into();
        BroadcastStream::new(self.tx.subscribe()).filter_map(move |item| {
            let keep = match item {
                Ok(envelope) if envelope.topic == topic => Some(envelope),
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!(%topic, "event subscriber lagged: {}", err);
                    None
                }
            };
            futures::future::ready(keep)
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: DomainEvent) {
        let envelope = EventEnvelope {
            topic: event.topic(),
            event,
            published_at: Utc::now(),
        };
        // no subscribers is not an error
        let _ = self.tx.send(envelope);
    }
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: DomainEvent) {}
}

/// Sink that keeps every event in memory, for inspection in tests and tools
#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events with the given type
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    /// Recorded event types in publish order
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.event_type()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: DomainEvent) {
        self.events.lock().push(event);
    }
}

/// Fan out to several sinks
#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutEventSink {
    fn publish(&self, event: DomainEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(run: &str) -> DomainEvent {
        ExecutionEvent::NodeStarted {
            run_id: run.to_string(),
            node_id: "llm".to_string(),
            node_type: "llm".to_string(),
            occurred_at: Utc::now(),
        }
        .into()
    }

    #[test]
    fn test_topic_is_run_scoped() {
        let event = started("run-1");
        assert_eq!(event.topic(), "run:run-1");
        assert_eq!(event.event_type(), "node.started");
        assert_eq!(event.aggregate_type(), "execution");
        assert_eq!(event.run_id(), Some("run-1"));
    }

    #[test]
    fn test_recording_sink_counts() {
        let sink = RecordingEventSink::new();
        sink.publish_all(vec![started("a"), started("b")]);
        assert_eq!(sink.count("node.started"), 2);
        assert_eq!(sink.count("node.completed"), 0);
    }

    #[test]
    fn test_serialized_shape_carries_type_tag() {
        let json = serde_json::to_value(started("run-1")).unwrap();
        assert_eq!(json["type"], "node.started");
        assert_eq!(json["run_id"], "run-1");

        let back: DomainEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type(), "node.started");
    }

    #[tokio::test]
    async fn test_broadcast_topic_filter() {
        let sink = BroadcastEventSink::new(16);
        let stream = sink.subscribe_topic("run:keep");
        tokio::pin!(stream);

        sink.publish(started("other"));
        sink.publish(started("keep"));

        let envelope = stream.next().await.unwrap();
        assert_eq!(envelope.topic, "run:keep");
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let sink = BroadcastEventSink::default();
        sink.publish(started("run-1"));
        assert_eq!(sink.subscriber_count(), 0);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = RecordingEventSink::new();
        let b = RecordingEventSink::new();
        let fanout = FanoutEventSink::new()
            .with_sink(Arc::new(a.clone()))
            .with_sink(Arc::new(b.clone()));
        fanout.publish(started("run-1"));
        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }
}
