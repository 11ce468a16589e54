// file: tests/update.rs
//! Tests for task mutation: enable, priority, retry policy, dependency, removal.

mod common;

use crate::common::{build_scheduler, counting_callback, flag_callback, setup_tracing, wait_until};
use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc,
};
use std::thread;
use std::time::Duration as StdDuration;
use logkeeper::{Priority, QueryError, RetryPolicy, Schedule};

#[test]
fn test_update_priority_and_retry_policy() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  scheduler.add_custom_task("tunable", Schedule::every(StdDuration::from_secs(60)), |_task| Ok(()));

  scheduler.set_task_priority("tunable", Priority::Critical).unwrap();
  scheduler
    .set_task_retry_policy("tunable", RetryPolicy::new(7, 250, 3.0))
    .unwrap();

  let details = scheduler.task("tunable").unwrap();
  assert_eq!(details.priority, Priority::Critical);
  assert_eq!(details.retry_policy, RetryPolicy::new(7, 250, 3.0));
  assert_eq!(details.retries_remaining, 7, "New policy refills retries");
}

#[test]
fn test_update_unknown_task_fails() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  let missing = || QueryError::TaskNotFound("ghost".to_string());

  assert_eq!(scheduler.set_task_enabled("ghost", true), Err(missing()));
  assert_eq!(scheduler.set_task_priority("ghost", Priority::Low), Err(missing()));
  assert_eq!(scheduler.set_task_retry_policy("ghost", RetryPolicy::none()), Err(missing()));
  assert_eq!(scheduler.set_task_dependency("ghost", Some("other")), Err(missing()));
  assert_eq!(scheduler.remove_task("ghost").unwrap_err(), missing());
}

#[test]
fn test_remove_task_stops_future_runs() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  let counter = Arc::new(AtomicUsize::new(0));

  let id = scheduler.add_custom_task("doomed", Schedule::once_after(StdDuration::ZERO), counting_callback(counter.clone()));
  let removed = scheduler.remove_task("doomed").unwrap();
  assert_eq!(removed.id, id);
  assert!(removed.has_callback);

  assert_eq!(scheduler.run_pending(), 0);
  assert_eq!(counter.load(Ordering::SeqCst), 0);
  assert!(scheduler.tasks().is_empty());
}

#[test]
fn test_dependency_waits_for_running_task() {
  setup_tracing();
  let scheduler = Arc::new(build_scheduler(None));
  let rotated = Arc::new(AtomicBool::new(false));
  let compressions = Arc::new(AtomicUsize::new(0));

  scheduler.add_custom_task(
    "rotate",
    Schedule::every(StdDuration::from_secs(60)),
    flag_callback(rotated.clone(), StdDuration::from_millis(300)),
  );
  scheduler.add_custom_task(
    "compress",
    Schedule::once_after(StdDuration::ZERO),
    counting_callback(compressions.clone()),
  );
  scheduler.set_task_dependency("compress", Some("rotate")).unwrap();
  assert_eq!(scheduler.task("compress").unwrap().depends_on.as_deref(), Some("rotate"));

  let background = {
    let scheduler = scheduler.clone();
    thread::spawn(move || scheduler.run_now(0))
  };
  assert!(wait_until(StdDuration::from_secs(1), || scheduler.running_tasks() == 1));

  assert_eq!(scheduler.run_pending(), 0, "Dependent task must wait while `rotate` runs");
  assert_eq!(compressions.load(Ordering::SeqCst), 0);

  background.join().unwrap().unwrap();
  assert!(rotated.load(Ordering::SeqCst));

  assert_eq!(scheduler.run_pending(), 1, "Dependent task runs once `rotate` is idle");
  assert_eq!(compressions.load(Ordering::SeqCst), 1);
}

#[test]
fn test_clearing_dependency() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  scheduler.add_custom_task("a", Schedule::every(StdDuration::from_secs(60)), |_task| Ok(()));
  scheduler.set_task_dependency("a", Some("b")).unwrap();
  scheduler.set_task_dependency("a", None).unwrap();
  assert_eq!(scheduler.task("a").unwrap().depends_on, None);
}

#[test]
fn test_dependency_on_unknown_name_never_blocks() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  let counter = Arc::new(AtomicUsize::new(0));
  scheduler.add_custom_task("orphan", Schedule::once_after(StdDuration::ZERO), counting_callback(counter.clone()));
  scheduler.set_task_dependency("orphan", Some("nobody")).unwrap();

  assert_eq!(scheduler.run_pending(), 1);
  assert_eq!(counter.load(Ordering::SeqCst), 1);
}
