use crate::job::TaskType;
use crate::task::Task;

use core::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building a pool or scheduler from its builder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Worker count (`worker_count`) must be greater than zero")]
  ZeroWorkers,
  #[error("Queue capacity must be greater than zero")]
  ZeroQueueCapacity,
  #[error("Tick interval must be greater than zero")]
  ZeroTickInterval,
}

/// Errors returned by the `ThreadPool` submission APIs.
///
/// Every variant hands the rejected [`Task`] back so the caller can decide what
/// to do with it (the scheduler runs it inline instead of losing it).
#[derive(Error)]
pub enum SubmitError {
  #[error("Work queue is at capacity, task rejected.")]
  QueueFull(Task),
  #[error("Thread pool is not running.")]
  NotRunning(Task),
  #[error("Work queue lock was contended, task rejected without blocking.")]
  Contended(Task),
  #[error("No worker with id {id} in this pool.")]
  UnknownWorker { id: usize, task: Task },
}

impl SubmitError {
  /// Recovers the task that failed to be submitted.
  pub fn into_task(self) -> Task {
    match self {
      SubmitError::QueueFull(task)
      | SubmitError::NotRunning(task)
      | SubmitError::Contended(task)
      | SubmitError::UnknownWorker { task, .. } => task,
    }
  }
}

impl fmt::Debug for SubmitError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SubmitError::QueueFull(task) => f.debug_tuple("SubmitError::QueueFull").field(task).finish(),
      SubmitError::NotRunning(task) => f.debug_tuple("SubmitError::NotRunning").field(task).finish(),
      SubmitError::Contended(task) => f.debug_tuple("SubmitError::Contended").field(task).finish(),
      SubmitError::UnknownWorker { id, task } => f
        .debug_struct("SubmitError::UnknownWorker")
        .field("id", id)
        .field("task", task)
        .finish(),
    }
  }
}

/// Errors raised while starting pool workers or the scheduler loop thread.
#[derive(Error, Debug)]
pub enum StartError {
  #[error("Failed to spawn thread `{name}`: {source}")]
  Spawn {
    name: String,
    #[source]
    source: io::Error,
  },
}

// --- Query Errors ---

/// Errors related to looking up or mutating registered tasks
/// (e.g., via `set_task_enabled`, `remove_task`, `run_now`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
  #[error("Task named `{0}` not found.")]
  TaskNotFound(String),
  #[error("Task index {index} out of range ({len} tasks registered).")]
  IndexOutOfRange { index: usize, len: usize },
  #[error("Cannot run task `{0}`: it is already running.")]
  TaskAlreadyRunning(String),
}

// --- Shutdown Errors ---

/// Errors related to the scheduler's `stop` procedure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Timed out waiting for {still_running} running task(s) to drain.")]
  Timeout { still_running: usize },
  #[error("The scheduler loop thread panicked.")]
  TaskPanic,
}

// --- Task Errors ---

/// Failure of a scheduled task body.
///
/// Returned by custom callbacks and by the built-in maintenance bodies. The
/// scheduler decides whether a failure is retried based on the task's
/// `RetryPolicy`.
#[derive(Error, Debug)]
pub enum TaskError {
  #[error("I/O error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("Task requires a `path` in its configuration")]
  MissingPath,
  #[error("{0:?} task has no callback registered")]
  MissingCallback(TaskType),
  #[error("No compressor configured for the scheduler")]
  NoCompressor,
  #[error("Health check failed: {0}")]
  HealthCheck(String),
  #[error("Task body panicked")]
  Panicked,
  #[error("{0}")]
  Custom(String),
}

impl TaskError {
  /// Convenience constructor for callback bodies.
  pub fn custom(message: impl Into<String>) -> Self {
    TaskError::Custom(message.into())
  }

  pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    TaskError::Io {
      path: path.into(),
      source,
    }
  }
}
