//! tests/shutdown.rs
//! Tests for scheduler stop, drain timeout and pool shutdown.

mod common;

use crate::common::{build_pool, build_scheduler, counting_callback, flag_callback, setup_tracing, wait_until};
use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc,
};
use std::time::{Duration as StdDuration, Instant};
use tracing::info;
use logkeeper::{Priority, Schedule, Scheduler, ShutdownError, SubmitError, Task};

#[test]
fn test_stop_waits_for_running_task() {
  setup_tracing();
  let pool = build_pool(1);
  let scheduler = build_scheduler(Some(pool.clone()));
  let executed = Arc::new(AtomicBool::new(false));

  scheduler.add_custom_task(
    "Graceful Wait",
    Schedule::once_after(StdDuration::ZERO),
    flag_callback(executed.clone(), StdDuration::from_millis(400)),
  );
  scheduler.start().unwrap();
  assert!(wait_until(StdDuration::from_secs(1), || scheduler.running_tasks() == 1));

  info!("Initiating stop while task running...");
  let stop_start = Instant::now();
  scheduler.stop().expect("stop should drain within the default timeout");
  info!(elapsed = ?stop_start.elapsed(), "Stop returned");

  assert!(executed.load(Ordering::SeqCst), "Running task should finish before stop returns");
  assert_eq!(scheduler.running_tasks(), 0);
  assert!(!scheduler.is_running());

  pool.shutdown();
  assert!(!pool.is_running());
  assert!(pool.is_shutdown_complete());
}

#[test]
fn test_stop_times_out_on_slow_task() {
  setup_tracing();
  let pool = build_pool(1);
  let scheduler = Scheduler::builder()
    .tick_interval(StdDuration::from_millis(20))
    .drain_timeout(StdDuration::from_millis(100))
    .thread_pool(pool.clone())
    .build()
    .unwrap();
  let executed = Arc::new(AtomicBool::new(false));

  scheduler.add_custom_task(
    "Slow",
    Schedule::once_after(StdDuration::ZERO),
    flag_callback(executed.clone(), StdDuration::from_millis(800)),
  );
  scheduler.start().unwrap();
  assert!(wait_until(StdDuration::from_secs(1), || scheduler.running_tasks() == 1));

  let stop_start = Instant::now();
  let result = scheduler.stop();
  assert_eq!(result, Err(ShutdownError::Timeout { still_running: 1 }));
  assert!(stop_start.elapsed() < StdDuration::from_millis(600), "Stop should give up at the drain timeout");
  assert!(!executed.load(Ordering::SeqCst), "Task is never interrupted, only abandoned");

  // Pool shutdown joins the worker, which finishes the task.
  pool.shutdown();
  assert!(executed.load(Ordering::SeqCst));
  assert_eq!(scheduler.running_tasks(), 0);
}

#[test]
fn test_no_scans_after_stop() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  let counter = Arc::new(AtomicUsize::new(0));

  scheduler.add_custom_task("ticking", Schedule::every(StdDuration::from_millis(20)), counting_callback(counter.clone()));
  scheduler.start().unwrap();
  assert!(wait_until(StdDuration::from_secs(2), || counter.load(Ordering::SeqCst) >= 1));
  scheduler.stop().unwrap();

  let after_stop = counter.load(Ordering::SeqCst);
  std::thread::sleep(StdDuration::from_millis(150));
  assert_eq!(counter.load(Ordering::SeqCst), after_stop, "Loop thread must not scan after stop");
}

#[test]
fn test_restart_after_stop() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  let counter = Arc::new(AtomicUsize::new(0));
  scheduler.add_custom_task("again", Schedule::every(StdDuration::from_millis(20)), counting_callback(counter.clone()));

  scheduler.start().unwrap();
  scheduler.stop().unwrap();
  let before = counter.load(Ordering::SeqCst);

  scheduler.start().unwrap();
  assert!(wait_until(StdDuration::from_secs(2), || counter.load(Ordering::SeqCst) > before));
  scheduler.stop().unwrap();
}

#[test]
fn test_pool_shutdown_drains_queued_work() {
  setup_tracing();
  let pool = build_pool(2);
  let counter = Arc::new(AtomicUsize::new(0));

  for _ in 0..20 {
    let ctr = counter.clone();
    pool
      .submit(
        Task::function(move |_| {
          std::thread::sleep(StdDuration::from_millis(5));
          ctr.fetch_add(1, Ordering::SeqCst);
        }),
        Priority::Normal,
      )
      .unwrap();
  }
  pool.shutdown();

  assert_eq!(counter.load(Ordering::SeqCst), 20, "Queued work runs before workers exit");
  assert!(pool.is_shutdown_complete());

  let err = pool.submit(Task::function(|_| {}), Priority::Normal).unwrap_err();
  assert!(matches!(err, SubmitError::NotRunning(_)));
}

#[test]
fn test_drop_stops_scheduler() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  {
    let scheduler = build_scheduler(None);
    scheduler.add_custom_task("dropped", Schedule::every(StdDuration::from_millis(20)), counting_callback(counter.clone()));
    scheduler.start().unwrap();
    assert!(wait_until(StdDuration::from_secs(2), || counter.load(Ordering::SeqCst) >= 1));
  }
  let after_drop = counter.load(Ordering::SeqCst);
  std::thread::sleep(StdDuration::from_millis(100));
  assert_eq!(counter.load(Ordering::SeqCst), after_drop);
}
