//! Request and response bodies

use chrono::{DateTime, Utc};
use duragraph_core::assistant::Assistant;
use duragraph_core::graph::GraphDefinition;
use duragraph_core::run::{MultitaskStrategy, NewRun, Run, RunStatus};
use duragraph_core::thread::{Message, Thread};
use duragraph_core::worker::{
    Capabilities, Worker, WorkerGraphDefinition, WorkerStatus, WorkerTask,
};
use duragraph_core::StateMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub name: String,
    pub version: String,
    pub workers: usize,
    pub uptime_secs: i64,
}

// ---------------------------------------------------------------------------
// assistants

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAssistantRequest {
    #[serde(default)]
    pub assistant_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: StateMap,
    #[serde(default)]
    pub config: StateMap,
    #[serde(default)]
    pub graph: Option<GraphDefinition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantResponse {
    pub assistant_id: String,
    pub name: String,
    pub description: String,
    pub graph_id: String,
    pub metadata: StateMap,
    pub config: StateMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Assistant> for AssistantResponse {
    fn from(a: Assistant) -> Self {
        Self {
            graph_id: a.graph_id().to_string(),
            assistant_id: a.id,
            name: a.name,
            description: a.description,
            metadata: a.metadata,
            config: a.config,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// threads

#[derive(Debug, Clone, Deserialize)]
pub struct MessageInput {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub metadata: StateMap,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub metadata: StateMap,
    #[serde(default)]
    pub messages: Vec<MessageInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadResponse {
    pub thread_id: String,
    pub metadata: StateMap,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Thread> for ThreadResponse {
    fn from(t: Thread) -> Self {
        Self {
            thread_id: t.id,
            metadata: t.metadata,
            messages: t.messages,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CopyThreadRequest {
    #[serde(default)]
    pub checkpoint_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadStateQuery {
    #[serde(default)]
    pub checkpoint_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateThreadStateRequest {
    pub values: StateMap,
    #[serde(default)]
    pub as_node: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub before: Option<String>,
}

// ---------------------------------------------------------------------------
// runs

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRunRequest {
    pub assistant_id: String,
    #[serde(default)]
    pub input: StateMap,
    #[serde(default)]
    pub config: StateMap,
    #[serde(default)]
    pub metadata: StateMap,
    /// Unknown names count as `reject`
    #[serde(default)]
    pub multitask_strategy: Option<String>,
    /// Only used by `/runs/wait`
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CreateRunRequest {
    pub fn into_new_run(self, thread_id: &str) -> NewRun {
        let strategy = self
            .multitask_strategy
            .as_deref()
            .map(MultitaskStrategy::parse_lenient)
            .unwrap_or_default();
        NewRun::new(thread_id, self.assistant_id)
            .with_input(self.input)
            .with_config(self.config)
            .with_metadata(self.metadata)
            .with_multitask_strategy(strategy)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub run_id: String,
    pub thread_id: String,
    pub assistant_id: String,
    pub status: RunStatus,
    pub input: StateMap,
    pub output: StateMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: StateMap,
    pub config: StateMap,
    pub multitask_strategy: MultitaskStrategy,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<Run> for RunResponse {
    fn from(r: Run) -> Self {
        Self {
            run_id: r.id,
            thread_id: r.thread_id,
            assistant_id: r.assistant_id,
            status: r.status,
            input: r.input,
            output: r.output,
            error: r.error,
            metadata: r.metadata,
            config: r.config,
            multitask_strategy: r.multitask_strategy,
            created_at: r.created_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelRunRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitToolOutputsRequest {
    pub tool_outputs: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResumeRunRequest {
    #[serde(default)]
    pub input: StateMap,
    /// Thread state edits applied before resuming
    #[serde(default)]
    pub update: Option<StateMap>,
}

// ---------------------------------------------------------------------------
// workers

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterWorkerRequest {
    #[serde(default)]
    pub worker_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub graph_definitions: Vec<WorkerGraphDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerResponse {
    pub worker_id: String,
    pub registered: bool,
    pub heartbeat_url: String,
    pub poll_url: String,
    pub deregister_url: String,
    pub event_stream_url: String,
}

impl RegisterWorkerResponse {
    pub fn for_worker(worker_id: &str) -> Self {
        let base = format!("/api/v1/workers/{worker_id}");
        Self {
            worker_id: worker_id.to_string(),
            registered: true,
            heartbeat_url: format!("{base}/heartbeat"),
            poll_url: format!("{base}/poll"),
            deregister_url: format!("{base}/deregister"),
            event_stream_url: format!("{base}/events"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default = "default_worker_status")]
    pub status: String,
    #[serde(default)]
    pub active_runs: u32,
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub failed_runs: u64,
}

fn default_worker_status() -> String {
    "ready".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollRequest {
    #[serde(default)]
    pub max_tasks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub tasks: Vec<WorkerTask>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerEventRequest {
    pub run_id: String,
    pub event_type: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEventResponse {
    pub received: bool,
    pub run_status: RunStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeregisterWorkerResponse {
    pub worker_id: String,
    pub deregistered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatusResponse {
    pub worker_id: String,
    pub name: String,
    pub status: WorkerStatus,
    pub healthy: bool,
    pub active_runs: u32,
    pub total_runs: u64,
    pub failed_runs: u64,
    pub max_concurrent_runs: u32,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub graphs: Vec<String>,
}

impl WorkerStatusResponse {
    pub fn new(worker: Worker, healthy: bool) -> Self {
        Self {
            worker_id: worker.id,
            name: worker.name,
            status: worker.status,
            healthy,
            active_runs: worker.active_runs,
            total_runs: worker.total_runs,
            failed_runs: worker.failed_runs,
            max_concurrent_runs: worker.capabilities.max_concurrent_runs,
            last_heartbeat: worker.last_heartbeat,
            registered_at: worker.registered_at,
            graphs: worker.capabilities.graphs,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListWorkersQuery {
    #[serde(default)]
    pub healthy: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListWorkersResponse {
    pub workers: Vec<WorkerStatusResponse>,
    pub total: usize,
}
