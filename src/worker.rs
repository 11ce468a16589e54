use crate::arena::ScratchArena;
use crate::metrics::PoolMetrics;
use crate::queue::WorkQueue;
use crate::task::WorkItem;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace};

/// Type alias for the index of a worker inside its pool.
pub type WorkerId = usize;

/// Per-worker state visible to the rest of the pool (submitters and peers).
#[derive(Debug)]
pub(crate) struct WorkerSlot {
  pub queue: WorkQueue,
  pub tasks_processed: AtomicUsize,
}

impl WorkerSlot {
  pub fn new(local_capacity: usize) -> Self {
    Self {
      queue: WorkQueue::new(local_capacity),
      tasks_processed: AtomicUsize::new(0),
    }
  }
}

/// State shared between a `ThreadPool` handle and all of its worker threads.
#[derive(Debug)]
pub(crate) struct PoolShared {
  pub global: WorkQueue,
  pub slots: Vec<WorkerSlot>,
  pub running: AtomicBool,
  pub metrics: PoolMetrics,
  /// How long an idle worker blocks on the global queue per loop iteration.
  pub global_wait: Duration,
  progress_lock: Mutex<()>,
  progress: Condvar,
}

impl PoolShared {
  pub fn new(global_capacity: usize, local_capacity: usize, workers: usize, global_wait: Duration) -> Self {
    Self {
      global: WorkQueue::new(global_capacity),
      slots: (0..workers).map(|_| WorkerSlot::new(local_capacity)).collect(),
      running: AtomicBool::new(false),
      metrics: PoolMetrics::default(),
      global_wait,
      progress_lock: Mutex::new(()),
      progress: Condvar::new(),
    }
  }

  /// True once every submission has either completed or been dropped.
  pub fn is_quiescent(&self) -> bool {
    let submitted = self.metrics.tasks_submitted.load(AtomicOrdering::SeqCst);
    let completed = self.metrics.tasks_completed.load(AtomicOrdering::SeqCst);
    let dropped = self.metrics.tasks_dropped.load(AtomicOrdering::SeqCst);
    completed + dropped >= submitted
  }

  /// Wakes threads blocked in `wait_for_quiescence`.
  pub fn notify_progress(&self) {
    let _guard = self.progress_lock.lock();
    self.progress.notify_all();
  }

  /// Blocks until `is_quiescent` holds.
  pub fn wait_for_quiescence(&self) {
    let mut guard = self.progress_lock.lock();
    while !self.is_quiescent() {
      // Timed wait so a missed notification only costs one poll interval.
      let _ = self.progress.wait_for(&mut guard, Duration::from_millis(50));
    }
  }

  /// Wakes every worker blocked on any queue of this pool.
  pub fn wake_all(&self) {
    self.global.notify_all();
    for slot in &self.slots {
      slot.queue.notify_all();
    }
    self.notify_progress();
  }

  pub fn pending(&self) -> usize {
    self.global.len() + self.slots.iter().map(|slot| slot.queue.len()).sum::<usize>()
  }
}

/// One OS thread of a `ThreadPool`.
///
/// Dequeues from its own local queue first, then blocks briefly on the pool's
/// global queue, then steals from the first peer (in id order) holding work.
/// Exits once the pool stops running and both its local queue and the global
/// queue are empty.
pub(crate) struct Worker {
  id: WorkerId,
  shared: Arc<PoolShared>,
  arena: Option<ScratchArena>,
}

impl Worker {
  pub fn new(id: WorkerId, shared: Arc<PoolShared>, arena: Option<ScratchArena>) -> Self {
    Self { id, shared, arena }
  }

  /// Runs the worker loop on the current thread until shutdown.
  pub fn run(&mut self) {
    info!(worker_id = self.id, "Worker started. Waiting for tasks...");

    loop {
      if let Some(item) = self.next_item() {
        self.execute(item);
        continue;
      }
      if !self.shared.running.load(AtomicOrdering::Acquire) && self.queues_drained() {
        break;
      }
    }

    info!(
      worker_id = self.id,
      tasks_processed = self.slot().tasks_processed.load(AtomicOrdering::Relaxed),
      "Worker thread shutting down."
    );
  }

  fn slot(&self) -> &WorkerSlot {
    &self.shared.slots[self.id]
  }

  fn queues_drained(&self) -> bool {
    self.slot().queue.is_empty() && self.shared.global.is_empty()
  }

  fn next_item(&self) -> Option<WorkItem> {
    if let Some(item) = self.slot().queue.pop() {
      return Some(item);
    }
    if let Some(item) = self.shared.global.pop_wait(self.shared.global_wait) {
      return Some(item);
    }
    self.steal()
  }

  fn steal(&self) -> Option<WorkItem> {
    for (peer_id, peer) in self.shared.slots.iter().enumerate() {
      if peer_id == self.id {
        continue;
      }
      if let Some(item) = peer.queue.steal() {
        self
          .shared
          .metrics
          .tasks_stolen
          .fetch_add(1, AtomicOrdering::Relaxed);
        trace!(worker_id = self.id, peer_id, "Stole task from peer.");
        return Some(item);
      }
    }
    None
  }

  /// Executes one item inside the scratch arena, catching panics, and records
  /// wait/exec timings.
  fn execute(&mut self, item: WorkItem) {
    let dequeued_at = Instant::now();
    let WorkItem {
      task,
      submitted_at,
      priority,
    } = item;
    let metrics = &self.shared.metrics;
    let wait = dequeued_at.saturating_duration_since(submitted_at);
    metrics.wait_time.record(wait);
    metrics.active_threads.fetch_add(1, AtomicOrdering::Relaxed);
    trace!(worker_id = self.id, ?priority, wait_us = wait.as_micros() as u64, "Executing task.");

    let scratch = self.arena.as_mut();
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(move || task.run(scratch)));
    let exec = started.elapsed();

    if let Some(arena) = self.arena.as_mut() {
      arena.reset();
    }

    metrics.exec_time.record(exec);
    if result.is_err() {
      metrics.tasks_panicked.fetch_add(1, AtomicOrdering::Relaxed);
      error!(worker_id = self.id, ?priority, "Task panicked! Worker continues.");
    } else {
      debug!(worker_id = self.id, exec_us = exec.as_micros() as u64, "Task finished.");
    }

    self
      .slot()
      .tasks_processed
      .fetch_add(1, AtomicOrdering::Relaxed);
    metrics.tasks_completed.fetch_add(1, AtomicOrdering::SeqCst);
    metrics.active_threads.fetch_sub(1, AtomicOrdering::Relaxed);
    self.shared.notify_progress();
  }
}
