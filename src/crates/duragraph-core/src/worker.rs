//! External worker registry and task queue
//!
//! Workers register the graphs they can run, heartbeat periodically and pull
//! [`WorkerTask`]s. The registry answers "which healthy worker with spare
//! capacity advertises graph X"; the [`TaskQueue`] holds tasks until the
//! assigned worker polls for them.

use crate::error::{DomainError, Result};
use crate::events::Event;
use crate::StateMap;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    #[default]
    Ready,
    Running,
    Idle,
    Offline,
}

impl FromStr for WorkerStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ready" => Ok(WorkerStatus::Ready),
            "running" => Ok(WorkerStatus::Running),
            "idle" => Ok(WorkerStatus::Idle),
            "offline" => Ok(WorkerStatus::Offline),
            other => Err(DomainError::invalid_input(
                "status",
                format!("unknown worker status '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub graphs: Vec<String>,
    /// Zero means unlimited
    #[serde(default)]
    pub max_concurrent_runs: u32,
}

/// Graph shape advertised by a worker, carried opaquely
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerGraphDefinition {
    pub graph_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<Value>,
    #[serde(default)]
    pub edges: Vec<Value>,
    #[serde(default)]
    pub entry_point: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    #[serde(rename = "worker_id")]
    pub id: String,
    pub name: String,
    pub status: WorkerStatus,
    pub capabilities: Capabilities,
    #[serde(default)]
    pub graph_definitions: Vec<WorkerGraphDefinition>,
    pub active_runs: u32,
    pub total_runs: u64,
    pub failed_runs: u64,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(id: impl Into<String>, name: impl Into<String>, capabilities: Capabilities) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            status: WorkerStatus::Ready,
            capabilities,
            graph_definitions: Vec::new(),
            active_runs: 0,
            total_runs: 0,
            failed_runs: 0,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    pub fn with_graph_definitions(mut self, definitions: Vec<WorkerGraphDefinition>) -> Self {
        self.graph_definitions = definitions;
        self
    }

    pub fn can_execute(&self, graph_id: &str) -> bool {
        self.capabilities.graphs.iter().any(|g| g == graph_id)
    }

    pub fn has_capacity(&self) -> bool {
        self.capabilities.max_concurrent_runs == 0
            || self.active_runs < self.capabilities.max_concurrent_runs
    }

    pub fn heartbeat_age(&self) -> Duration {
        (Utc::now() - self.last_heartbeat)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_healthy(&self, threshold: Duration) -> bool {
        self.status != WorkerStatus::Offline && self.heartbeat_age() < threshold
    }
}

/// Heartbeat payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub status: WorkerStatus,
    #[serde(default)]
    pub active_runs: u32,
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub failed_runs: u64,
}

/// In-process worker registry
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a worker; registration counts as a heartbeat
    pub fn register(&self, mut worker: Worker) -> Result<Worker> {
        if worker.id.trim().is_empty() {
            return Err(DomainError::invalid_input("worker_id", "worker_id is required"));
        }
        let now = Utc::now();
        worker.registered_at = now;
        worker.last_heartbeat = now;
        if worker.status == WorkerStatus::Offline {
            worker.status = WorkerStatus::Ready;
        }
        self.workers.write().insert(worker.id.clone(), worker.clone());
        Ok(worker)
    }

    pub fn deregister(&self, worker_id: &str) -> bool {
        self.workers.write().remove(worker_id).is_some()
    }

    pub fn get(&self, worker_id: &str) -> Option<Worker> {
        self.workers.read().get(worker_id).cloned()
    }

    pub fn heartbeat(&self, worker_id: &str, beat: WorkerHeartbeat) -> Result<()> {
        let mut workers = self.workers.write();
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| DomainError::not_found("worker", worker_id))?;
        worker.status = beat.status;
        worker.active_runs = beat.active_runs;
        worker.total_runs = beat.total_runs;
        worker.failed_runs = beat.failed_runs;
        worker.last_heartbeat = Utc::now();
        Ok(())
    }

    /// Healthy worker with capacity that advertises `graph_id`
    pub fn find_worker_for_graph(&self, graph_id: &str, threshold: Duration) -> Option<Worker> {
        let workers = self.workers.read();
        let mut candidates: Vec<&Worker> = workers
            .values()
            .filter(|w| w.can_execute(graph_id) && w.has_capacity() && w.is_healthy(threshold))
            .collect();
        // least loaded first, ties by id for a stable choice
        candidates.sort_by(|a, b| a.active_runs.cmp(&b.active_runs).then(a.id.cmp(&b.id)));
        candidates.first().map(|w| (*w).clone())
    }

    pub fn healthy_workers(&self, threshold: Duration) -> Vec<Worker> {
        let mut healthy: Vec<Worker> = self
            .workers
            .read()
            .values()
            .filter(|w| w.is_healthy(threshold))
            .cloned()
            .collect();
        healthy.sort_by(|a, b| a.id.cmp(&b.id));
        healthy
    }

    pub fn all_workers(&self) -> Vec<Worker> {
        let mut all: Vec<Worker> = self.workers.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    /// Mark workers whose heartbeat is older than `threshold` offline
    ///
    /// Returns the ids newly marked.
    pub fn cleanup_stale_workers(&self, threshold: Duration) -> Vec<String> {
        let mut marked = Vec::new();
        for worker in self.workers.write().values_mut() {
            if worker.status != WorkerStatus::Offline && worker.heartbeat_age() >= threshold {
                worker.status = WorkerStatus::Offline;
                marked.push(worker.id.clone());
            }
        }
        marked.sort();
        marked
    }

    pub fn graph_definition(&self, graph_id: &str) -> Option<WorkerGraphDefinition> {
        self.workers
            .read()
            .values()
            .flat_map(|w| w.graph_definitions.iter())
            .find(|g| g.graph_id == graph_id)
            .cloned()
    }

    /// Adjust the in-flight count when a dispatched run starts or finishes
    pub fn adjust_active_runs(&self, worker_id: &str, started: bool, failed: bool) {
        if let Some(worker) = self.workers.write().get_mut(worker_id) {
            if started {
                worker.active_runs += 1;
                worker.total_runs += 1;
            } else {
                worker.active_runs = worker.active_runs.saturating_sub(1);
                if failed {
                    worker.failed_runs += 1;
                }
            }
        }
    }
}

/// Unit of work handed to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTask {
    pub task_id: String,
    pub run_id: String,
    pub thread_id: String,
    pub assistant_id: String,
    pub graph_id: String,
    pub input: StateMap,
    pub config: StateMap,
    pub created_at: DateTime<Utc>,
}

impl WorkerTask {
    pub fn task_id_for(run_id: &str) -> String {
        format!("task-{run_id}")
    }
}

/// Pending tasks per worker
#[derive(Debug, Default)]
pub struct TaskQueue {
    pending: Mutex<HashMap<String, VecDeque<WorkerTask>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, worker_id: &str, task: WorkerTask) {
        self.pending
            .lock()
            .entry(worker_id.to_string())
            .or_default()
            .push_back(task);
    }

    /// Remove and return up to `max` tasks, oldest first
    pub fn drain(&self, worker_id: &str, max: usize) -> Vec<WorkerTask> {
        let mut pending = self.pending.lock();
        let Some(queue) = pending.get_mut(worker_id) else {
            return Vec::new();
        };
        let count = max.min(queue.len());
        queue.drain(..count).collect()
    }

    pub fn pending_for(&self, worker_id: &str) -> usize {
        self.pending.lock().get(worker_id).map_or(0, VecDeque::len)
    }

    /// Drop a worker's queue, returning what was left in it
    pub fn remove_worker(&self, worker_id: &str) -> Vec<WorkerTask> {
        self.pending
            .lock()
            .remove(worker_id)
            .map(Vec::from)
            .unwrap_or_default()
    }
}

/// Run progress reported by a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerReport {
    RunStarted,
    RunCompleted,
    RunFailed,
    RunInterrupted,
    RunCancelled,
}

impl WorkerReport {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerReport::RunStarted => "run_started",
            WorkerReport::RunCompleted => "run_completed",
            WorkerReport::RunFailed => "run_failed",
            WorkerReport::RunInterrupted => "run_interrupted",
            WorkerReport::RunCancelled => "run_cancelled",
        }
    }

    /// Status name understood by run status updates
    pub fn run_status(&self) -> &'static str {
        match self {
            WorkerReport::RunStarted => "running",
            WorkerReport::RunCompleted => "completed",
            WorkerReport::RunFailed => "failed",
            WorkerReport::RunInterrupted => "interrupted",
            WorkerReport::RunCancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerReport {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "run_started" => Ok(WorkerReport::RunStarted),
            "run_completed" => Ok(WorkerReport::RunCompleted),
            "run_failed" => Ok(WorkerReport::RunFailed),
            "run_interrupted" => Ok(WorkerReport::RunInterrupted),
            "run_cancelled" => Ok(WorkerReport::RunCancelled),
            other => Err(DomainError::invalid_input(
                "event_type",
                format!("unknown worker event '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerEvent {
    #[serde(rename = "worker.registered")]
    Registered {
        worker_id: String,
        graphs: Vec<String>,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "worker.deregistered")]
    Deregistered {
        worker_id: String,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "worker.offline")]
    MarkedOffline {
        worker_id: String,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "worker.task_dispatched")]
    TaskDispatched {
        worker_id: String,
        run_id: String,
        task_id: String,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "worker.run_reported")]
    RunReported {
        worker_id: String,
        run_id: String,
        report: WorkerReport,
        #[serde(default)]
        data: Value,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for WorkerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WorkerEvent::Registered { .. } => "worker.registered",
            WorkerEvent::Deregistered { .. } => "worker.deregistered",
            WorkerEvent::MarkedOffline { .. } => "worker.offline",
            WorkerEvent::TaskDispatched { .. } => "worker.task_dispatched",
            WorkerEvent::RunReported { .. } => "worker.run_reported",
        }
    }

    fn aggregate_id(&self) -> &str {
        match self {
            WorkerEvent::Registered { worker_id, .. }
            | WorkerEvent::Deregistered { worker_id, .. }
            | WorkerEvent::MarkedOffline { worker_id, .. }
            | WorkerEvent::TaskDispatched { worker_id, .. }
            | WorkerEvent::RunReported { worker_id, .. } => worker_id,
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "worker"
    }
}
