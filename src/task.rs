use crate::arena::ScratchArena;

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Execution priority of a queued item or a scheduled task.
///
/// Ordered `Low < Normal < High < Critical`; a work queue always pops the
/// highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Priority {
  Low = 0,
  #[default]
  Normal = 1,
  High = 2,
  Critical = 3,
}

/// Shared, type-erased context handed to a [`Task::Callback`].
pub type CallbackContext = Arc<dyn Any + Send + Sync>;

/// Plain function pointer form of a pool task. Receives the context it was
/// submitted with and the executing worker's scratch arena, if any.
pub type CallbackFn = fn(&(dyn Any + Send + Sync), Option<&mut ScratchArena>);

/// The unit of work executed by a pool worker.
///
/// Execution is fire-and-forget: nothing is returned to the submitter. Panics
/// are caught by the worker and counted, never propagated.
pub enum Task {
  /// An owned closure, run at most once.
  Function(Box<dyn FnOnce(Option<&mut ScratchArena>) + Send + 'static>),
  /// A function pointer plus the context it operates on.
  Callback {
    func: CallbackFn,
    context: CallbackContext,
  },
}

impl Task {
  /// Wraps a closure as a task.
  pub fn function<F>(f: F) -> Self
  where
    F: FnOnce(Option<&mut ScratchArena>) + Send + 'static,
  {
    Task::Function(Box::new(f))
  }

  /// Builds a callback task from a function pointer and its context.
  pub fn callback(func: CallbackFn, context: CallbackContext) -> Self {
    Task::Callback { func, context }
  }

  /// Runs the task body, consuming it.
  pub fn run(self, scratch: Option<&mut ScratchArena>) {
    match self {
      Task::Function(f) => f(scratch),
      Task::Callback { func, context } => func(context.as_ref(), scratch),
    }
  }
}

impl fmt::Debug for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Task::Function(_) => f.write_str("Task::Function(<FnOnce>)"),
      Task::Callback { .. } => f.write_str("Task::Callback(<fn>, <context>)"),
    }
  }
}

/// A task together with its queueing metadata. Immutable once queued.
#[derive(Debug)]
pub struct WorkItem {
  pub task: Task,
  pub submitted_at: Instant,
  pub priority: Priority,
}

impl WorkItem {
  /// Stamps `task` with the current instant.
  pub fn new(task: Task, priority: Priority) -> Self {
    Self {
      task,
      submitted_at: Instant::now(),
      priority,
    }
  }
}
