//! Threads and their checkpointed state

use crate::services::Repositories;
use duragraph_checkpoint::{state, CheckpointStore, HistoryQuery, ThreadState};
use duragraph_core::error::{DomainError, Result};
use duragraph_core::events::{DomainEvent, EventSink};
use duragraph_core::thread::{Message, Thread};
use duragraph_core::StateMap;
use std::sync::Arc;

const ROOT_NAMESPACE: &str = "";

#[derive(Clone)]
pub struct ThreadService {
    repos: Repositories,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventSink>,
}

impl ThreadService {
    pub fn new(
        repos: Repositories,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repos,
            checkpoints,
            events,
        }
    }

    pub async fn create_thread(&self, metadata: StateMap) -> Result<Thread> {
        let mut thread = Thread::new(metadata);
        self.save(&mut thread).await?;
        tracing::info!(thread_id = %thread.id, "thread created");
        Ok(thread)
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Thread> {
        self.repos.threads.find_by_id(thread_id).await
    }

    pub async fn update_metadata(&self, thread_id: &str, metadata: StateMap) -> Result<Thread> {
        let mut thread = self.get_thread(thread_id).await?;
        thread.update_metadata(metadata);
        self.save(&mut thread).await?;
        Ok(thread)
    }

    pub async fn add_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
        metadata: StateMap,
    ) -> Result<Message> {
        let mut thread = self.get_thread(thread_id).await?;
        let message = thread.add_message(role, content, metadata)?.clone();
        self.save(&mut thread).await?;
        Ok(message)
    }

    /// Delete a thread with its checkpoints; refused while a run is active
    pub async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        if let Some(run) = self.repos.runs.find_active_by_thread(thread_id).await? {
            return Err(DomainError::invalid_state(
                run.status.as_str(),
                format!("delete thread with active run {}", run.id),
            ));
        }
        self.repos.threads.delete(thread_id).await?;
        self.checkpoints.delete_thread(thread_id).await?;
        tracing::info!(thread_id, "thread deleted");
        Ok(())
    }

    /// Fork a thread
    ///
    /// The copy gets the source's metadata and messages and a root checkpoint
    /// holding the source state at `checkpoint_id` (latest when `None`). It
    /// shares no checkpoint history with the source.
    pub async fn copy_thread(&self, thread_id: &str, checkpoint_id: Option<&str>) -> Result<Thread> {
        let source = self.get_thread(thread_id).await?;
        let checkpoint = match checkpoint_id {
            Some(id) => Some(
                self.checkpoints
                    .find_by_checkpoint_id(thread_id, ROOT_NAMESPACE, id)
                    .await?
                    .ok_or_else(|| DomainError::not_found("checkpoint", id))?,
            ),
            None => self.checkpoints.find_latest(thread_id, ROOT_NAMESPACE).await?,
        };

        let mut copy = Thread::new(source.metadata.clone());
        for message in &source.messages {
            copy.add_message(message.role.as_str(), &message.content, message.metadata.clone())?;
        }
        self.save(&mut copy).await?;

        if let Some(checkpoint) = checkpoint {
            state::fork_checkpoint(self.checkpoints.as_ref(), &checkpoint, &copy.id).await?;
        }
        tracing::info!(source = thread_id, thread_id = %copy.id, "thread copied");
        Ok(copy)
    }

    /// Current state, or the state at `checkpoint_id`
    pub async fn get_state(&self, thread_id: &str, checkpoint_id: Option<&str>) -> Result<ThreadState> {
        self.ensure_exists(thread_id).await?;
        let view = match checkpoint_id {
            Some(id) => {
                state::get_thread_state_at(self.checkpoints.as_ref(), thread_id, ROOT_NAMESPACE, id)
                    .await?
            }
            None => state::get_thread_state(self.checkpoints.as_ref(), thread_id, ROOT_NAMESPACE).await?,
        };
        Ok(view)
    }

    /// Merge `values` into the thread state as a new checkpoint
    pub async fn update_state(
        &self,
        thread_id: &str,
        values: StateMap,
        as_node: Option<&str>,
    ) -> Result<ThreadState> {
        self.ensure_exists(thread_id).await?;
        let checkpoint = state::update_thread_state(
            self.checkpoints.as_ref(),
            thread_id,
            ROOT_NAMESPACE,
            values,
            as_node,
        )
        .await?;
        tracing::debug!(thread_id, checkpoint_id = %checkpoint.checkpoint_id, "thread state updated");
        Ok(ThreadState::from(&checkpoint))
    }

    /// Snapshot the current state without changing it
    pub async fn create_checkpoint(&self, thread_id: &str) -> Result<ThreadState> {
        self.ensure_exists(thread_id).await?;
        let checkpoint =
            state::create_checkpoint(self.checkpoints.as_ref(), thread_id, ROOT_NAMESPACE).await?;
        Ok(ThreadState::from(&checkpoint))
    }

    /// Checkpoint history, newest first
    pub async fn history(
        &self,
        thread_id: &str,
        limit: Option<usize>,
        before: Option<String>,
    ) -> Result<Vec<ThreadState>> {
        self.ensure_exists(thread_id).await?;
        let mut query = HistoryQuery::new();
        if let Some(limit) = limit {
            query = query.with_limit(limit);
        }
        if let Some(before) = before {
            query = query.with_before(before);
        }
        let checkpoints = self
            .checkpoints
            .find_history(thread_id, ROOT_NAMESPACE, query)
            .await?;
        Ok(checkpoints.iter().map(ThreadState::from).collect())
    }

    async fn ensure_exists(&self, thread_id: &str) -> Result<()> {
        if self.repos.threads.exists(thread_id).await? {
            Ok(())
        } else {
            Err(DomainError::not_found("thread", thread_id))
        }
    }

    async fn save(&self, thread: &mut Thread) -> Result<()> {
        self.repos.threads.save(thread).await?;
        self.events.publish_all(
            thread
                .take_events()
                .into_iter()
                .map(DomainEvent::from)
                .collect(),
        );
        Ok(())
    }
}
