use crate::events::{DomainEvent, EventSink, NoopEventSink};
use crate::StateMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked by the engine before each node
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run-level collaborators handed to every node executor
#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub thread_id: String,
    /// Run config (`recursion_limit`, `configurable`, ...)
    pub config: StateMap,
    pub cancellation: Cancellation,
    events: Arc<dyn EventSink>,
}

impl ExecutionContext {
    pub fn new(run_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            thread_id: thread_id.into(),
            config: StateMap::new(),
            cancellation: Cancellation::new(),
            events: Arc::new(NoopEventSink),
        }
    }

    pub fn with_config(mut self, config: StateMap) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn publish(&self, event: impl Into<DomainEvent>) {
        self.events.publish(event.into());
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("thread_id", &self.thread_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
