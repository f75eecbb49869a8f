//! Task queue contract
//!
//! The queue is an external scheduling subsystem; the orchestrator only
//! enqueues, inspects, and cancels. [`InMemoryTaskQueue`] is a minimal
//! implementation for tests and single-process use — it records state
//! transitions but does no scheduling of its own.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Unique identifier for queued tasks
pub type TaskId = String;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task already in terminal state: {0}")]
    AlreadyTerminal(TaskId),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Shared reference to a task queue
pub type SharedTaskQueue = Arc<dyn TaskQueue>;

/// Scheduling state of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting to be scheduled
    Queued,
    /// Currently executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled before completion
    Cancelled,
}

impl TaskState {
    /// Whether this state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// A task handed to the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    /// Unique task identifier
    pub id: TaskId,

    /// Kind of work (e.g. `"draft-chapter"`)
    pub kind: String,

    /// Structured work payload
    pub payload: Value,

    /// Scheduling priority, higher first
    pub priority: u8,

    /// Current scheduling state
    pub state: TaskState,

    /// When the task was enqueued
    pub created_at: DateTime<Utc>,

    /// Last state change
    pub updated_at: DateTime<Utc>,

    /// Failure or cancellation detail
    pub error: Option<String>,
}

/// A task to enqueue
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Kind of work
    pub kind: String,
    /// Structured work payload
    pub payload: Value,
    /// Scheduling priority, higher first
    pub priority: u8,
}

impl NewTask {
    /// Create a task with default priority
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            priority: 0,
        }
    }

    /// Set the scheduling priority
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Queue-wide counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    /// Total tasks ever enqueued
    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.failed + self.cancelled
    }
}

/// Contract the orchestrator consumes for task scheduling
///
/// Priority handling, retries, and dependency graphs are internals of the
/// implementing subsystem.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task and return its id
    async fn enqueue(&self, task: NewTask) -> QueueResult<TaskId>;

    /// Look up a task by id
    async fn get(&self, task_id: &str) -> QueueResult<Option<QueuedTask>>;

    /// Cancel a non-terminal task
    async fn cancel(&self, task_id: &str, reason: &str) -> QueueResult<()>;

    /// Queue-wide counters
    async fn stats(&self) -> QueueResult<QueueStats>;
}

/// In-memory queue that records tasks and state transitions
pub struct InMemoryTaskQueue {
    tasks: RwLock<HashMap<TaskId, QueuedTask>>,
}

impl InMemoryTaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Create a shared reference to a new queue
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn transition(&self, task_id: &str, state: TaskState, error: Option<String>) -> QueueResult<()> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))?;
        if task.state.is_terminal() {
            return Err(QueueError::AlreadyTerminal(task_id.to_string()));
        }
        task.state = state;
        task.error = error;
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Mark a task as running
    pub fn mark_running(&self, task_id: &str) -> QueueResult<()> {
        self.transition(task_id, TaskState::Running, None)
    }

    /// Mark a task as completed
    pub fn mark_completed(&self, task_id: &str) -> QueueResult<()> {
        self.transition(task_id, TaskState::Completed, None)
    }

    /// Mark a task as failed
    pub fn mark_failed(&self, task_id: &str, error: impl Into<String>) -> QueueResult<()> {
        self.transition(task_id, TaskState::Failed, Some(error.into()))
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: NewTask) -> QueueResult<TaskId> {
        let now = Utc::now();
        let queued = QueuedTask {
            id: uuid::Uuid::new_v4().to_string(),
            kind: task.kind,
            payload: task.payload,
            priority: task.priority,
            state: TaskState::Queued,
            created_at: now,
            updated_at: now,
            error: None,
        };

        let id = queued.id.clone();
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        tasks.insert(id.clone(), queued);
        debug!(task_id = %id, "Task enqueued");
        Ok(id)
    }

    async fn get(&self, task_id: &str) -> QueueResult<Option<QueuedTask>> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        Ok(tasks.get(task_id).cloned())
    }

    async fn cancel(&self, task_id: &str, reason: &str) -> QueueResult<()> {
        self.transition(task_id, TaskState::Cancelled, Some(reason.to_string()))?;
        debug!(task_id, reason, "Task cancelled");
        Ok(())
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        let mut stats = QueueStats::default();
        for task in tasks.values() {
            match task.state {
                TaskState::Queued => stats.queued += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Completed => stats.completed += 1,
                TaskState::Failed => stats.failed += 1,
                TaskState::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_and_get() {
        let queue = InMemoryTaskQueue::new();
        let id = queue
            .enqueue(NewTask::new("draft-chapter", json!({"chapter": 3})).with_priority(5))
            .await
            .unwrap();

        let task = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(task.kind, "draft-chapter");
        assert_eq!(task.priority, 5);
        assert_eq!(task.state, TaskState::Queued);

        assert!(queue.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let queue = InMemoryTaskQueue::new();
        let id = queue
            .enqueue(NewTask::new("draft-chapter", json!({})))
            .await
            .unwrap();

        queue.mark_running(&id).unwrap();
        queue.mark_completed(&id).unwrap();

        let task = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Completed);

        // Terminal tasks refuse further transitions
        let again = queue.mark_failed(&id, "late failure");
        assert!(matches!(again, Err(QueueError::AlreadyTerminal(_))));
    }

    #[tokio::test]
    async fn test_cancel() {
        let queue = InMemoryTaskQueue::new();
        let id = queue
            .enqueue(NewTask::new("draft-chapter", json!({})))
            .await
            .unwrap();

        queue.cancel(&id, "session ended").await.unwrap();
        let task = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Cancelled);
        assert_eq!(task.error.as_deref(), Some("session ended"));

        let missing = queue.cancel("missing", "nope").await;
        assert!(matches!(missing, Err(QueueError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_stats() {
        let queue = InMemoryTaskQueue::new();
        let a = queue
            .enqueue(NewTask::new("draft-chapter", json!({})))
            .await
            .unwrap();
        let b = queue
            .enqueue(NewTask::new("review-chapter", json!({})))
            .await
            .unwrap();
        queue
            .enqueue(NewTask::new("index-chapter", json!({})))
            .await
            .unwrap();

        queue.mark_completed(&a).unwrap();
        queue.mark_failed(&b, "reviewer unavailable").unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total(), 3);
    }
}
