use crate::arena::ScratchArena;
use crate::error::{BuildError, StartError, SubmitError};
use crate::metrics::PoolStats;
use crate::queue::TryPushError;
use crate::task::{Priority, Task, WorkItem};
use crate::worker::{PoolShared, Worker, WorkerId};

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

const DEFAULT_QUEUE_CAPACITY: usize = 1024; // Shared global queue
const DEFAULT_LOCAL_QUEUE_CAPACITY: usize = 256; // Per-worker queue
const DEFAULT_GLOBAL_WAIT: Duration = Duration::from_millis(100);
const DEFAULT_SCRATCH_BYTES: usize = 64 * 1024;
const DEFAULT_THREAD_PREFIX: &str = "logkeeper-worker";

/// Builder for [`ThreadPool`].
///
/// # Example
///
/// ```no_run
/// use logkeeper::{Priority, Task, ThreadPool};
///
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ThreadPool::builder()
///     .worker_count(4)
///     .queue_capacity(512)
///     .build()?;
/// pool.start()?;
/// pool.submit(Task::function(|_scratch| println!("hello")), Priority::High)
///     .map_err(|e| e.to_string())?;
/// pool.wait_all();
/// pool.shutdown();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PoolBuilder {
  worker_count: Option<usize>,
  queue_capacity: usize,
  local_queue_capacity: usize,
  global_wait: Duration,
  scratch_bytes: Option<usize>,
  thread_name_prefix: String,
}

impl Default for PoolBuilder {
  fn default() -> Self {
    Self {
      worker_count: None,
      queue_capacity: DEFAULT_QUEUE_CAPACITY,
      local_queue_capacity: DEFAULT_LOCAL_QUEUE_CAPACITY,
      global_wait: DEFAULT_GLOBAL_WAIT,
      scratch_bytes: Some(DEFAULT_SCRATCH_BYTES),
      thread_name_prefix: DEFAULT_THREAD_PREFIX.to_string(),
    }
  }
}

impl PoolBuilder {
  /// Creates a builder with default settings.
  /// - `worker_count`: available parallelism of the host.
  /// - `queue_capacity`: 1024, `local_queue_capacity`: 256.
  /// - `global_wait`: 100 ms, scratch arena: 64 KiB per worker.
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the number of worker threads. Must be greater than 0.
  pub fn worker_count(mut self, count: usize) -> Self {
    self.worker_count = Some(count);
    self
  }

  /// Sets the capacity of the shared global queue.
  pub fn queue_capacity(mut self, capacity: usize) -> Self {
    self.queue_capacity = capacity;
    self
  }

  /// Sets the capacity of each worker's local queue.
  pub fn local_queue_capacity(mut self, capacity: usize) -> Self {
    self.local_queue_capacity = capacity;
    self
  }

  /// Sets how long an idle worker blocks on the global queue before trying
  /// to steal. Also bounds how quickly a worker notices shutdown.
  pub fn global_wait(mut self, wait: Duration) -> Self {
    self.global_wait = wait;
    self
  }

  /// Sets the per-worker scratch arena size. `None` disables the arena and
  /// tasks receive `None` as their scratch argument.
  pub fn scratch_arena(mut self, bytes: Option<usize>) -> Self {
    self.scratch_bytes = bytes;
    self
  }

  /// Sets the name prefix for worker threads (`<prefix>-<id>`).
  pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.thread_name_prefix = prefix.into();
    self
  }

  /// Builds a stopped pool. Call [`ThreadPool::start`] to spawn the workers.
  ///
  /// # Errors
  ///
  /// - [`BuildError::ZeroWorkers`] if `worker_count` is 0.
  /// - [`BuildError::ZeroQueueCapacity`] if either queue capacity is 0.
  pub fn build(self) -> Result<ThreadPool, BuildError> {
    let worker_count = self.worker_count.unwrap_or_else(default_worker_count);
    if worker_count == 0 {
      return Err(BuildError::ZeroWorkers);
    }
    if self.queue_capacity == 0 || self.local_queue_capacity == 0 {
      return Err(BuildError::ZeroQueueCapacity);
    }

    let shared = Arc::new(PoolShared::new(
      self.queue_capacity,
      self.local_queue_capacity,
      worker_count,
      self.global_wait,
    ));

    Ok(ThreadPool {
      shared,
      scratch_bytes: self.scratch_bytes,
      thread_name_prefix: self.thread_name_prefix,
      handles: Mutex::new(Vec::with_capacity(worker_count)),
      shutdown_complete: AtomicBool::new(false),
    })
  }
}

fn default_worker_count() -> usize {
  thread::available_parallelism()
    .map(|p| p.get())
    .unwrap_or(1)
}

/// A fixed-size pool of OS threads with a shared priority queue, per-worker
/// local queues and work stealing.
///
/// Submission never blocks on a full queue: the task is handed back inside a
/// [`SubmitError`] and `tasks_dropped` is incremented. The pool has no notion
/// of task success; a body that returns or panics counts as completed.
#[derive(Debug)]
pub struct ThreadPool {
  shared: Arc<PoolShared>,
  scratch_bytes: Option<usize>,
  thread_name_prefix: String,
  handles: Mutex<Vec<JoinHandle<()>>>,
  shutdown_complete: AtomicBool,
}

impl ThreadPool {
  /// Returns a builder to configure and create a `ThreadPool`.
  pub fn builder() -> PoolBuilder {
    PoolBuilder::new()
  }

  /// Spawns all worker threads. No-op if the pool is already running.
  ///
  /// # Errors
  ///
  /// [`StartError::Spawn`] if the OS refuses a thread; workers spawned so far
  /// are stopped and joined before returning.
  pub fn start(&self) -> Result<(), StartError> {
    let mut handles = self.handles.lock();
    if self.shared.running.swap(true, AtomicOrdering::AcqRel) {
      debug!("Thread pool already running; start ignored.");
      return Ok(());
    }
    self.shutdown_complete.store(false, AtomicOrdering::Release);

    for id in 0..self.shared.slots.len() {
      let name = format!("{}-{}", self.thread_name_prefix, id);
      let shared = self.shared.clone();
      let arena = self.scratch_bytes.map(ScratchArena::new);

      let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
        let mut worker = Worker::new(id, shared, arena);
        worker.run();
      });

      match spawned {
        Ok(handle) => handles.push(handle),
        Err(source) => {
          error!(thread = %name, error = %source, "Failed to spawn worker thread. Rolling back start.");
          self.shared.running.store(false, AtomicOrdering::Release);
          self.shared.wake_all();
          for handle in handles.drain(..) {
            let _ = handle.join();
          }
          self.shutdown_complete.store(true, AtomicOrdering::Release);
          return Err(StartError::Spawn { name, source });
        }
      }
    }

    info!(workers = handles.len(), "Thread pool started.");
    Ok(())
  }

  /// Stops accepting work, lets every worker drain its queues, and joins all
  /// worker threads. In-flight task bodies are never interrupted.
  pub fn shutdown(&self) {
    let handles = {
      let mut guard = self.handles.lock();
      std::mem::take(&mut *guard)
    };
    if handles.is_empty() && !self.shared.running.load(AtomicOrdering::Acquire) {
      self.discard_leftovers();
      self.shutdown_complete.store(true, AtomicOrdering::Release);
      return;
    }

    info!("Initiating thread pool shutdown...");
    self.shared.running.store(false, AtomicOrdering::Release);
    self.shared.wake_all();

    let current = thread::current().id();
    let mut joined_all = true;
    for (worker_id, handle) in handles.into_iter().enumerate() {
      // Dropping the last pool handle on one of its own workers lands here.
      if handle.thread().id() == current {
        warn!(worker_id, "Shutdown called from a pool worker; not joining self.");
        joined_all = false;
        continue;
      }
      if handle.join().is_err() {
        error!(worker_id, "Worker thread panicked during shutdown.");
      }
    }

    // The calling worker still drains whatever is queued.
    if joined_all {
      self.discard_leftovers();
    }
    self.shutdown_complete.store(true, AtomicOrdering::Release);
    info!("All worker threads joined.");
  }

  pub fn is_running(&self) -> bool {
    self.shared.running.load(AtomicOrdering::Acquire)
  }

  /// True once `shutdown` has joined every worker.
  pub fn is_shutdown_complete(&self) -> bool {
    self.shutdown_complete.load(AtomicOrdering::Acquire)
  }

  pub fn worker_count(&self) -> usize {
    self.shared.slots.len()
  }

  /// Submits `task` to the shared global queue.
  ///
  /// # Errors
  ///
  /// - [`SubmitError::NotRunning`]: the pool is not started or shutting down.
  /// - [`SubmitError::QueueFull`]: the global queue is at capacity.
  pub fn submit(&self, task: Task, priority: Priority) -> Result<(), SubmitError> {
    self.record_submission(1);
    if !self.is_running() {
      return Err(self.reject(SubmitError::NotRunning(task)));
    }
    self
      .shared
      .global
      .push(WorkItem::new(task, priority))
      .map_err(|item| self.reject(SubmitError::QueueFull(item.task)))
  }

  /// Like [`ThreadPool::submit`] but never blocks on the queue's lock.
  ///
  /// # Errors
  ///
  /// Additionally returns [`SubmitError::Contended`] if the lock was held.
  pub fn try_submit(&self, task: Task, priority: Priority) -> Result<(), SubmitError> {
    self.record_submission(1);
    if !self.is_running() {
      return Err(self.reject(SubmitError::NotRunning(task)));
    }
    match self.shared.global.try_push(WorkItem::new(task, priority)) {
      Ok(()) => Ok(()),
      Err(TryPushError::Full(item)) => Err(self.reject(SubmitError::QueueFull(item.task))),
      Err(TryPushError::Contended(item)) => Err(self.reject(SubmitError::Contended(item.task))),
    }
  }

  /// Submits `task` directly to one worker's local queue.
  ///
  /// The target worker picks it up ahead of global work; an idle peer may
  /// still steal it. Workers look at their local queue at least once per
  /// global wait interval.
  ///
  /// # Errors
  ///
  /// [`SubmitError::UnknownWorker`] for an out-of-range id, otherwise as `submit`.
  pub fn submit_to_worker(&self, id: WorkerId, task: Task, priority: Priority) -> Result<(), SubmitError> {
    self.record_submission(1);
    if !self.is_running() {
      return Err(self.reject(SubmitError::NotRunning(task)));
    }
    let Some(slot) = self.shared.slots.get(id) else {
      return Err(self.reject(SubmitError::UnknownWorker { id, task }));
    };
    slot
      .queue
      .push(WorkItem::new(task, priority))
      .map_err(|item| self.reject(SubmitError::QueueFull(item.task)))
  }

  /// Submits many tasks under a single lock acquisition on the global queue.
  ///
  /// Tasks that do not fit are dropped and counted in `tasks_dropped`; the
  /// rest of the batch is still accepted. Returns the number accepted.
  pub fn submit_batch(&self, tasks: Vec<Task>, priority: Priority) -> usize {
    let total = tasks.len();
    if total == 0 {
      return 0;
    }
    self.record_submission(total);
    if !self.is_running() {
      self.record_drops(total);
      warn!(dropped = total, "Batch submitted to a stopped thread pool.");
      return 0;
    }

    let accepted = self
      .shared
      .global
      .push_batch(tasks.into_iter().map(|task| WorkItem::new(task, priority)));
    let dropped = total - accepted;
    if dropped > 0 {
      self.record_drops(dropped);
      warn!(accepted, dropped, "Global queue full during batch submit.");
    }
    accepted
  }

  /// Blocks the caller until every submitted task has completed or been
  /// dropped. Returns immediately when nothing is pending.
  pub fn wait_all(&self) {
    self.shared.wait_for_quiescence();
  }

  /// Items queued but not yet picked up by a worker.
  pub fn pending_tasks(&self) -> usize {
    self.shared.pending()
  }

  /// Fraction of workers currently executing a task body, in `[0.0, 1.0]`.
  pub fn utilization(&self) -> f64 {
    let active = self.shared.metrics.active_threads.load(AtomicOrdering::Relaxed);
    active as f64 / self.worker_count() as f64
  }

  /// Number of tasks the given worker has executed, if it exists.
  pub fn worker_tasks_processed(&self, id: WorkerId) -> Option<usize> {
    self
      .shared
      .slots
      .get(id)
      .map(|slot| slot.tasks_processed.load(AtomicOrdering::Relaxed))
  }

  /// Returns a snapshot of the pool statistics.
  pub fn stats(&self) -> PoolStats {
    self
      .shared
      .metrics
      .snapshot(self.worker_count(), self.pending_tasks())
  }

  fn record_submission(&self, count: usize) {
    self
      .shared
      .metrics
      .tasks_submitted
      .fetch_add(count, AtomicOrdering::SeqCst);
  }

  fn record_drops(&self, count: usize) {
    self
      .shared
      .metrics
      .tasks_dropped
      .fetch_add(count, AtomicOrdering::SeqCst);
    self.shared.notify_progress();
  }

  /// Drops work pushed by a `submit` that raced past the running check
  /// after every worker had already exited.
  fn discard_leftovers(&self) {
    let discarded = self.shared.global.clear()
      + self
        .shared
        .slots
        .iter()
        .map(|slot| slot.queue.clear())
        .sum::<usize>();
    if discarded > 0 {
      self.record_drops(discarded);
      warn!(discarded, "Discarded tasks queued after the workers exited.");
    }
  }

  fn reject(&self, err: SubmitError) -> SubmitError {
    self.record_drops(1);
    debug!(reason = %err, "Task submission rejected.");
    err
  }
}

impl Drop for ThreadPool {
  fn drop(&mut self) {
    if self.is_running() {
      self.shutdown();
    }
  }
}
