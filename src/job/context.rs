use super::{TaskId, TaskType};

use std::cell::RefCell;

/// Contextual information available to a running scheduled task via a
/// thread-local. Accessible inside a task body with
/// [`try_get_current_task_context`] when the `task_context` feature is enabled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskContext {
  /// The registered task's id.
  pub task_id: TaskId,
  pub name: String,
  pub task_type: TaskType,
  /// Retries already spent in the current failure streak (0 on a first try).
  pub attempt: u32,
}

thread_local! {
  static CURRENT_TASK_CONTEXT: RefCell<Option<TaskContext>> = const { RefCell::new(None) };
}

/// Returns the context of the task executing on this thread, if any.
pub fn try_get_current_task_context() -> Option<TaskContext> {
  CURRENT_TASK_CONTEXT.with(|ctx| ctx.borrow().clone())
}

/// Restores the previous context when dropped, including during unwinding.
struct ContextGuard {
  previous: Option<TaskContext>,
}

impl Drop for ContextGuard {
  fn drop(&mut self) {
    let previous = self.previous.take();
    CURRENT_TASK_CONTEXT.with(|ctx| *ctx.borrow_mut() = previous);
  }
}

/// Runs `f` with `context` installed as the current task context.
pub(crate) fn scope<R>(context: TaskContext, f: impl FnOnce() -> R) -> R {
  let previous = CURRENT_TASK_CONTEXT.with(|ctx| ctx.borrow_mut().replace(context));
  let _guard = ContextGuard { previous };
  f()
}

#[cfg(test)]
mod tests {
  use super::*;
  use uuid::Uuid;

  fn context(name: &str) -> TaskContext {
    TaskContext {
      task_id: Uuid::new_v4(),
      name: name.to_string(),
      task_type: TaskType::Custom,
      attempt: 0,
    }
  }

  #[test]
  fn test_context_visible_only_inside_scope() {
    assert!(try_get_current_task_context().is_none());
    let seen = scope(context("outer"), || try_get_current_task_context().map(|c| c.name));
    assert_eq!(seen.as_deref(), Some("outer"));
    assert!(try_get_current_task_context().is_none());
  }

  #[test]
  fn test_nested_scope_restores_outer() {
    scope(context("outer"), || {
      scope(context("inner"), || {
        assert_eq!(try_get_current_task_context().unwrap().name, "inner");
      });
      assert_eq!(try_get_current_task_context().unwrap().name, "outer");
    });
  }

  #[test]
  fn test_context_cleared_after_panic() {
    let result = std::panic::catch_unwind(|| scope(context("boom"), || panic!("body failed")));
    assert!(result.is_err());
    assert!(try_get_current_task_context().is_none());
  }
}
