//! tests/concurrency.rs
//! Thread pool behavior: submission paths, priorities, back-pressure, stealing.

mod common;

use std::any::Any;
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc, Barrier,
};
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use crate::common::{build_pool, setup_tracing, wait_until};
use parking_lot::Mutex;

use logkeeper::{Priority, ScratchArena, SubmitError, Task, ThreadPool};

fn counting_task(counter: &Arc<AtomicUsize>) -> Task {
  let counter = counter.clone();
  Task::function(move |_scratch| {
    counter.fetch_add(1, Ordering::SeqCst);
  })
}

// Occupies the single worker of `pool` until the returned barrier is released.
fn block_worker(pool: &ThreadPool) -> Arc<Barrier> {
  let started = Arc::new(Barrier::new(2));
  let release = Arc::new(Barrier::new(2));
  let (s, r) = (started.clone(), release.clone());
  pool
    .submit(
      Task::function(move |_| {
        s.wait();
        r.wait();
      }),
      Priority::Critical,
    )
    .unwrap();
  started.wait();
  release
}

#[test]
fn test_many_tasks_all_complete() {
  setup_tracing();
  let pool = build_pool(4);
  let counter = Arc::new(AtomicUsize::new(0));

  for _ in 0..200 {
    pool.submit(counting_task(&counter), Priority::Normal).unwrap();
  }
  pool.wait_all();

  assert_eq!(counter.load(Ordering::SeqCst), 200);
  let stats = pool.stats();
  assert_eq!(stats.tasks_submitted, 200);
  assert_eq!(stats.tasks_completed, 200);
  assert_eq!(stats.tasks_dropped, 0);
  assert_eq!(stats.pending_tasks, 0);
  assert!(stats.mean_exec().is_some());

  pool.shutdown();
}

#[test]
fn test_wait_all_returns_immediately_when_idle() {
  setup_tracing();
  let pool = build_pool(2);
  let start = Instant::now();
  pool.wait_all();
  assert!(start.elapsed() < StdDuration::from_millis(100), "Idle wait_all should not block");
  pool.shutdown();
}

#[test]
fn test_higher_priority_runs_first() {
  setup_tracing();
  let pool = build_pool(1);
  let order = Arc::new(Mutex::new(Vec::new()));

  let release = block_worker(&pool);
  for (label, priority) in [("low", Priority::Low), ("normal", Priority::Normal), ("critical", Priority::Critical), ("high", Priority::High)] {
    let order = order.clone();
    pool
      .submit(Task::function(move |_| order.lock().push(label)), priority)
      .unwrap();
  }
  release.wait();
  pool.wait_all();

  assert_eq!(*order.lock(), vec!["critical", "high", "normal", "low"]);
  pool.shutdown();
}

#[test]
fn test_full_queue_rejects_without_blocking() {
  setup_tracing();
  let pool = ThreadPool::builder()
    .worker_count(1)
    .queue_capacity(2)
    .global_wait(StdDuration::from_millis(20))
    .build()
    .unwrap();
  pool.start().unwrap();
  let counter = Arc::new(AtomicUsize::new(0));

  let release = block_worker(&pool);
  pool.submit(counting_task(&counter), Priority::Normal).unwrap();
  pool.submit(counting_task(&counter), Priority::Normal).unwrap();

  let start = Instant::now();
  let err = pool.submit(counting_task(&counter), Priority::Normal).unwrap_err();
  assert!(start.elapsed() < StdDuration::from_millis(100), "Submit to a full queue must not block");
  assert!(matches!(err, SubmitError::QueueFull(_)));

  // The rejected task is handed back intact.
  err.into_task().run(None);
  assert_eq!(counter.load(Ordering::SeqCst), 1);

  release.wait();
  pool.wait_all();
  assert_eq!(counter.load(Ordering::SeqCst), 3);
  assert_eq!(pool.stats().tasks_dropped, 1);
  pool.shutdown();
}

#[test]
fn test_batch_accepts_up_to_capacity() {
  setup_tracing();
  let pool = ThreadPool::builder()
    .worker_count(1)
    .queue_capacity(3)
    .global_wait(StdDuration::from_millis(20))
    .build()
    .unwrap();
  pool.start().unwrap();
  let counter = Arc::new(AtomicUsize::new(0));

  let release = block_worker(&pool);
  let batch = (0..5).map(|_| counting_task(&counter)).collect();
  let accepted = pool.submit_batch(batch, Priority::Normal);
  assert_eq!(accepted, 3);

  release.wait();
  pool.wait_all();
  assert_eq!(counter.load(Ordering::SeqCst), 3);
  let stats = pool.stats();
  assert_eq!(stats.tasks_dropped, 2);
  assert_eq!(stats.tasks_submitted, 6);
  pool.shutdown();
}

#[test]
fn test_submit_to_worker_runs_on_that_worker() {
  setup_tracing();
  let pool = build_pool(3);
  let counter = Arc::new(AtomicUsize::new(0));

  for _ in 0..5 {
    pool.submit_to_worker(2, counting_task(&counter), Priority::Normal).unwrap();
  }
  pool.wait_all();

  assert_eq!(counter.load(Ordering::SeqCst), 5);
  let processed: usize = (0..3).filter_map(|id| pool.worker_tasks_processed(id)).sum();
  assert_eq!(processed, 5);
  assert_eq!(pool.worker_tasks_processed(3), None);
  pool.shutdown();
}

#[test]
fn test_idle_worker_steals_from_busy_peer() {
  setup_tracing();
  let pool = build_pool(2);
  let counter = Arc::new(AtomicUsize::new(0));

  // Worker 0 gets a long task followed by a backlog in its local queue.
  pool
    .submit_to_worker(0, Task::function(|_| thread::sleep(StdDuration::from_millis(300))), Priority::High)
    .unwrap();
  for _ in 0..4 {
    pool.submit_to_worker(0, counting_task(&counter), Priority::Normal).unwrap();
  }

  let drained = wait_until(StdDuration::from_millis(250), || counter.load(Ordering::SeqCst) == 4);
  assert!(drained, "Backlog should be stolen while worker 0 is busy");
  pool.wait_all();

  let stats = pool.stats();
  assert!(stats.tasks_stolen >= 1, "Expected at least one steal, stats: {stats:?}");
  assert!(pool.worker_tasks_processed(1).unwrap_or(0) >= 1);
  pool.shutdown();
}

#[test]
fn test_utilization_reflects_active_workers() {
  setup_tracing();
  let pool = build_pool(2);
  assert_eq!(pool.utilization(), 0.0);

  let release = block_worker(&pool);
  assert!(wait_until(StdDuration::from_secs(1), || pool.utilization() == 0.5));

  release.wait();
  pool.wait_all();
  assert!(wait_until(StdDuration::from_secs(1), || pool.utilization() == 0.0));
  pool.shutdown();
}

#[test]
fn test_callback_task_receives_context_and_scratch() {
  setup_tracing();
  let pool = build_pool(1);

  fn sum_into(context: &(dyn Any + Send + Sync), scratch: Option<&mut ScratchArena>) {
    let Some(total) = context.downcast_ref::<AtomicUsize>() else {
      return;
    };
    let scratch = scratch.expect("pool workers own a scratch arena by default");
    let buf = scratch.alloc(16);
    buf.fill(1);
    total.fetch_add(buf.iter().map(|b| *b as usize).sum(), Ordering::SeqCst);
  }

  let total = Arc::new(AtomicUsize::new(0));
  pool
    .submit(Task::callback(sum_into, total.clone()), Priority::Normal)
    .unwrap();
  pool.wait_all();

  assert_eq!(total.load(Ordering::SeqCst), 16);
  pool.shutdown();
}

#[test]
fn test_concurrent_submitters() {
  setup_tracing();
  let pool = build_pool(4);
  let counter = Arc::new(AtomicUsize::new(0));

  thread::scope(|scope| {
    for _ in 0..4 {
      let pool = &pool;
      let counter = &counter;
      scope.spawn(move || {
        for _ in 0..50 {
          pool.submit(counting_task(counter), Priority::Normal).unwrap();
        }
      });
    }
  });
  pool.wait_all();

  assert_eq!(counter.load(Ordering::SeqCst), 200);
  pool.shutdown();
}
