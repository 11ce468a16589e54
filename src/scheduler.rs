use crate::coordinator::SchedulerInner;
use crate::error::{BuildError, QueryError, ShutdownError, StartError, TaskError};
use crate::job::{RetryPolicy, Schedule, ScheduledTask, TaskCallback, TaskConfig, TaskDetails, TaskId, TaskType};
use crate::maintenance::{Compressor, Filesystem, LocalFilesystem};
use crate::metrics::{MaintenanceSnapshot, SchedulerStats};
use crate::pool::ThreadPool;
use crate::task::Priority;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_THREAD_NAME: &str = "logkeeper-scheduler";

/// Builder for configuring and creating a [`Scheduler`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use logkeeper::{Schedule, Scheduler, TaskConfig, ThreadPool};
///
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = Arc::new(ThreadPool::builder().worker_count(2).build()?);
/// pool.start()?;
///
/// let scheduler = Scheduler::builder()
///     .tick_interval(Duration::from_millis(250))
///     .thread_pool(pool.clone())
///     .build()?;
/// scheduler.add_cleanup_task(
///     "prune-logs",
///     "/var/log/myapp",
///     Schedule::daily(2, 0),
///     TaskConfig { max_files: Some(30), ..TaskConfig::default() },
/// );
/// scheduler.start()?;
/// // ...
/// scheduler.stop()?;
/// pool.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct SchedulerBuilder {
  tick_interval: Duration,
  drain_timeout: Duration,
  pool: Option<Arc<ThreadPool>>,
  filesystem: Option<Arc<dyn Filesystem>>,
  compressor: Option<Arc<dyn Compressor>>,
  thread_name: String,
}

impl Default for SchedulerBuilder {
  fn default() -> Self {
    Self {
      tick_interval: DEFAULT_TICK_INTERVAL,
      drain_timeout: DEFAULT_DRAIN_TIMEOUT,
      pool: None,
      filesystem: None,
      compressor: None,
      thread_name: DEFAULT_THREAD_NAME.to_string(),
    }
  }
}

impl fmt::Debug for SchedulerBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SchedulerBuilder")
      .field("tick_interval", &self.tick_interval)
      .field("drain_timeout", &self.drain_timeout)
      .field("pool", &self.pool.is_some())
      .field("filesystem", &self.filesystem)
      .field("compressor", &self.compressor.is_some())
      .field("thread_name", &self.thread_name)
      .finish()
  }
}

impl SchedulerBuilder {
  /// Creates a new builder with default settings.
  /// - `tick_interval`: 500 ms.
  /// - `drain_timeout`: 5 s.
  /// - No thread pool: tasks run on the loop thread.
  /// - `LocalFilesystem`, no compressor.
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets how long the loop thread sleeps between scans. Must be non-zero.
  pub fn tick_interval(mut self, interval: Duration) -> Self {
    self.tick_interval = interval;
    self
  }

  /// Sets how long `stop` waits for running tasks to finish.
  pub fn drain_timeout(mut self, timeout: Duration) -> Self {
    self.drain_timeout = timeout;
    self
  }

  /// Dispatches ready tasks onto `pool` instead of running them inline.
  pub fn thread_pool(mut self, pool: Arc<ThreadPool>) -> Self {
    self.pool = Some(pool);
    self
  }

  /// Replaces the filesystem used by cleanup, compression and disk gating.
  pub fn filesystem(mut self, filesystem: Arc<dyn Filesystem>) -> Self {
    self.filesystem = Some(filesystem);
    self
  }

  /// Sets the codec used by compression tasks and `compress_before_delete`.
  pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
    self.compressor = Some(compressor);
    self
  }

  /// Sets the loop thread's name.
  pub fn thread_name(mut self, name: impl Into<String>) -> Self {
    self.thread_name = name.into();
    self
  }

  /// Builds a stopped scheduler. Call [`Scheduler::start`] to spawn its loop.
  ///
  /// # Errors
  ///
  /// [`BuildError::ZeroTickInterval`] if `tick_interval` is zero.
  pub fn build(self) -> Result<Scheduler, BuildError> {
    if self.tick_interval.is_zero() {
      return Err(BuildError::ZeroTickInterval);
    }
    Ok(self.build_unchecked())
  }

  fn build_unchecked(self) -> Scheduler {
    let filesystem = self
      .filesystem
      .unwrap_or_else(|| Arc::new(LocalFilesystem) as Arc<dyn Filesystem>);
    let inner = SchedulerInner::new(
      self.pool,
      filesystem,
      self.compressor,
      self.tick_interval,
      self.drain_timeout,
    );
    Scheduler {
      inner: Arc::new(inner),
      loop_handle: Mutex::new(None),
      thread_name: self.thread_name,
    }
  }
}

/// Recurring maintenance task scheduler.
///
/// Owns the task list and a single background loop thread that, every tick,
/// runs each task that is enabled, idle, due, not blocked by its dependency
/// and not held back by its disk gate. Tasks run on the attached
/// [`ThreadPool`] when there is one, otherwise on the loop thread.
///
/// Use [`Scheduler::builder()`] to configure an instance.
pub struct Scheduler {
  inner: Arc<SchedulerInner>,
  loop_handle: Mutex<Option<JoinHandle<()>>>,
  thread_name: String,
}

impl fmt::Debug for Scheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scheduler")
      .field("running", &self.is_running())
      .field("tasks", &self.inner.tasks.lock().len())
      .field("pool", &self.inner.pool.is_some())
      .field("thread_name", &self.thread_name)
      .finish()
  }
}

impl Default for Scheduler {
  fn default() -> Self {
    Self::new()
  }
}

impl Scheduler {
  /// A scheduler with default settings and no thread pool.
  pub fn new() -> Self {
    SchedulerBuilder::default().build_unchecked()
  }

  /// Returns a builder to configure and create a `Scheduler`.
  pub fn builder() -> SchedulerBuilder {
    SchedulerBuilder::new()
  }

  // --- Registration ---

  /// Registers a task whose body is the built-in one for `task_type`.
  ///
  /// Names are not required to be unique; lookups by name resolve to the
  /// first registered match.
  pub fn add_task(&self, name: impl Into<String>, task_type: TaskType, schedule: Schedule, config: TaskConfig) -> TaskId {
    self.register(ScheduledTask::new(name, task_type, schedule, config, Utc::now()))
  }

  /// Registers a task that runs `callback` instead of a built-in body.
  pub fn add_callback_task<F>(
    &self,
    name: impl Into<String>,
    task_type: TaskType,
    schedule: Schedule,
    config: TaskConfig,
    callback: F,
  ) -> TaskId
  where
    F: Fn(&mut ScheduledTask) -> Result<(), TaskError> + Send + Sync + 'static,
  {
    let mut task = ScheduledTask::new(name, task_type, schedule, config, Utc::now());
    task.callback = Some(Arc::new(callback) as TaskCallback);
    self.register(task)
  }

  /// Registers retention enforcement on `path`. `config.path` is replaced.
  pub fn add_cleanup_task(
    &self,
    name: impl Into<String>,
    path: impl Into<PathBuf>,
    schedule: Schedule,
    mut config: TaskConfig,
  ) -> TaskId {
    config.path = Some(path.into());
    self.add_task(name, TaskType::Cleanup, schedule, config)
  }

  /// Registers compression of aged files under `path`. Requires a compressor
  /// on the builder. `config.path` is replaced.
  pub fn add_compression_task(
    &self,
    name: impl Into<String>,
    path: impl Into<PathBuf>,
    schedule: Schedule,
    mut config: TaskConfig,
  ) -> TaskId {
    config.path = Some(path.into());
    self.add_task(name, TaskType::Compression, schedule, config)
  }

  /// Registers arbitrary work.
  pub fn add_custom_task<F>(&self, name: impl Into<String>, schedule: Schedule, callback: F) -> TaskId
  where
    F: Fn(&mut ScheduledTask) -> Result<(), TaskError> + Send + Sync + 'static,
  {
    self.add_callback_task(name, TaskType::Custom, schedule, TaskConfig::default(), callback)
  }

  /// Registers a task running the hook set with [`Scheduler::set_health_check`].
  pub fn add_health_check_task(&self, name: impl Into<String>, schedule: Schedule) -> TaskId {
    self.add_task(name, TaskType::HealthCheck, schedule, TaskConfig::default())
  }

  /// Registers periodic capture of scheduler and pool statistics.
  pub fn add_metrics_snapshot_task(&self, name: impl Into<String>, schedule: Schedule) -> TaskId {
    self.add_task(name, TaskType::MetricsSnapshot, schedule, TaskConfig::default())
  }

  fn register(&self, task: ScheduledTask) -> TaskId {
    let id = task.id;
    info!(
      task_id = %id,
      name = task.name.as_str(),
      task_type = ?task.task_type,
      next_run = %task.next_run,
      "Task registered."
    );
    self.inner.tasks.lock().push(task);
    self.inner.wake();
    id
  }

  /// Removes the first task named `name`. A running instance finishes but
  /// its outcome is discarded.
  pub fn remove_task(&self, name: &str) -> Result<TaskDetails, QueryError> {
    let mut tasks = self.inner.tasks.lock();
    let index = tasks
      .iter()
      .position(|task| task.name == name)
      .ok_or_else(|| QueryError::TaskNotFound(name.to_string()))?;
    let removed = tasks.remove(index);
    drop(tasks);
    info!(task_id = %removed.id, name, "Task removed.");
    Ok(TaskDetails::from(&removed))
  }

  // --- Mutation ---

  pub fn set_task_enabled(&self, name: &str, enabled: bool) -> Result<(), QueryError> {
    self.update_task(name, |task| task.enabled = enabled)?;
    if enabled {
      self.inner.wake();
    }
    Ok(())
  }

  pub fn set_task_priority(&self, name: &str, priority: Priority) -> Result<(), QueryError> {
    self.update_task(name, |task| task.priority = priority)
  }

  /// Replaces the retry policy and refills the task's retries.
  pub fn set_task_retry_policy(&self, name: &str, policy: RetryPolicy) -> Result<(), QueryError> {
    self.update_task(name, |task| task.set_retry_policy(policy))
  }

  /// Makes `name` wait while the first task named `depends_on` is running.
  /// `None` clears the dependency.
  pub fn set_task_dependency(&self, name: &str, depends_on: Option<&str>) -> Result<(), QueryError> {
    self.update_task(name, |task| task.depends_on = depends_on.map(str::to_string))
  }

  fn update_task<R>(&self, name: &str, f: impl FnOnce(&mut ScheduledTask) -> R) -> Result<R, QueryError> {
    let mut tasks = self.inner.tasks.lock();
    let task = tasks
      .iter_mut()
      .find(|task| task.name == name)
      .ok_or_else(|| QueryError::TaskNotFound(name.to_string()))?;
    let result = f(task);
    debug!(task_id = %task.id, name, "Task updated.");
    Ok(result)
  }

  // --- Execution ---

  /// Runs the task at `index` now, on the calling thread, ignoring its
  /// schedule, enabled flag, dependency and disk gate. The outcome is
  /// recorded as for a scheduled run.
  ///
  /// # Errors
  ///
  /// - [`QueryError::IndexOutOfRange`] for a bad index.
  /// - [`QueryError::TaskAlreadyRunning`] if the task is mid-run.
  pub fn run_now(&self, index: usize) -> Result<(), QueryError> {
    self.inner.run_now(index)
  }

  /// Performs one scan on the calling thread, exactly as the loop thread
  /// would. Returns the number of tasks dispatched.
  pub fn run_pending(&self) -> usize {
    self.inner.run_pending()
  }

  // --- Lifecycle ---

  /// Spawns the loop thread. No-op if already running.
  ///
  /// # Errors
  ///
  /// [`StartError::Spawn`] if the thread cannot be created.
  pub fn start(&self) -> Result<(), StartError> {
    let mut handle_slot = self.loop_handle.lock();
    if self.inner.running.swap(true, AtomicOrdering::AcqRel) {
      debug!("Scheduler already running; start ignored.");
      return Ok(());
    }

    let inner = Arc::clone(&self.inner);
    let spawned = thread::Builder::new()
      .name(self.thread_name.clone())
      .spawn(move || inner.run_loop());
    match spawned {
      Ok(handle) => {
        *handle_slot = Some(handle);
        info!("Scheduler started.");
        Ok(())
      }
      Err(source) => {
        self.inner.running.store(false, AtomicOrdering::Release);
        error!(error = %source, "Failed to spawn scheduler loop thread.");
        Err(StartError::Spawn {
          name: self.thread_name.clone(),
          source,
        })
      }
    }
  }

  /// Stops the loop thread and waits up to the drain timeout for running
  /// tasks to finish. Tasks are never interrupted.
  ///
  /// # Errors
  ///
  /// - [`ShutdownError::TaskPanic`]: the loop thread panicked.
  /// - [`ShutdownError::Timeout`]: tasks were still running at the deadline.
  pub fn stop(&self) -> Result<(), ShutdownError> {
    let handle = self.loop_handle.lock().take();
    let was_running = self.inner.running.swap(false, AtomicOrdering::AcqRel);
    if !was_running && handle.is_none() {
      return Ok(());
    }

    info!("Initiating scheduler shutdown...");
    self.inner.wake();

    if let Some(handle) = handle {
      if handle.thread().id() == thread::current().id() {
        warn!("Scheduler stopped from its own loop thread; not joining.");
      } else if handle.join().is_err() {
        error!("Scheduler loop thread panicked.");
        return Err(ShutdownError::TaskPanic);
      }
    }

    self.drain()
  }

  fn drain(&self) -> Result<(), ShutdownError> {
    let deadline = Instant::now() + self.inner.drain_timeout;
    loop {
      let still_running = self.inner.running_tasks();
      if still_running == 0 {
        info!("Scheduler stopped.");
        return Ok(());
      }
      let now = Instant::now();
      if now >= deadline {
        error!(still_running, timeout = ?self.inner.drain_timeout, "Scheduler shutdown timed out.");
        return Err(ShutdownError::Timeout { still_running });
      }
      thread::sleep(DRAIN_POLL_INTERVAL.min(deadline - now));
    }
  }

  pub fn is_running(&self) -> bool {
    self.inner.running.load(AtomicOrdering::Acquire)
  }

  // --- Queries ---

  pub fn stats(&self) -> SchedulerStats {
    self.inner.metrics.snapshot()
  }

  /// Snapshots of every registered task, in registration order.
  pub fn tasks(&self) -> Vec<TaskDetails> {
    self.inner.tasks.lock().iter().map(TaskDetails::from).collect()
  }

  /// The first task named `name`.
  pub fn task(&self, name: &str) -> Option<TaskDetails> {
    self
      .inner
      .tasks
      .lock()
      .iter()
      .find(|task| task.name == name)
      .map(TaskDetails::from)
  }

  pub fn task_by_id(&self, id: TaskId) -> Option<TaskDetails> {
    self
      .inner
      .tasks
      .lock()
      .iter()
      .find(|task| task.id == id)
      .map(TaskDetails::from)
  }

  /// Position of the first task named `name`, for [`Scheduler::run_now`].
  pub fn task_index(&self, name: &str) -> Option<usize> {
    self.inner.tasks.lock().iter().position(|task| task.name == name)
  }

  /// Number of tasks currently executing.
  pub fn running_tasks(&self) -> usize {
    self.inner.running_tasks()
  }

  /// Latest snapshot captured by a `MetricsSnapshot` task.
  pub fn last_metrics_snapshot(&self) -> Option<MaintenanceSnapshot> {
    self.inner.last_snapshot.lock().clone()
  }

  /// Captures a snapshot now, outside any task.
  pub fn take_metrics_snapshot(&self) -> MaintenanceSnapshot {
    self.inner.capture_snapshot()
  }

  pub fn thread_pool(&self) -> Option<&Arc<ThreadPool>> {
    self.inner.pool.as_ref()
  }

  // --- Hooks ---

  /// Called before each task body runs.
  pub fn on_task_started<F>(&self, hook: F)
  where
    F: Fn(&TaskDetails) + Send + Sync + 'static,
  {
    self.inner.hooks.write().on_started = Some(Arc::new(hook));
  }

  /// Called after each successful run.
  pub fn on_task_completed<F>(&self, hook: F)
  where
    F: Fn(&TaskDetails) + Send + Sync + 'static,
  {
    self.inner.hooks.write().on_completed = Some(Arc::new(hook));
  }

  /// Called when a run fails with no retries remaining. Without a hook the
  /// failure is logged at error level.
  pub fn on_task_error<F>(&self, hook: F)
  where
    F: Fn(&TaskDetails, &TaskError) + Send + Sync + 'static,
  {
    self.inner.hooks.write().on_error = Some(Arc::new(hook));
  }

  /// Called by the loop thread after every scan.
  pub fn on_tick<F>(&self, hook: F)
  where
    F: Fn() + Send + Sync + 'static,
  {
    self.inner.hooks.write().on_tick = Some(Arc::new(hook));
  }

  /// Sets the body of `HealthCheck` tasks.
  pub fn set_health_check<F>(&self, check: F)
  where
    F: Fn() -> Result<(), TaskError> + Send + Sync + 'static,
  {
    self.inner.hooks.write().health_check = Some(Arc::new(check));
  }
}

impl Drop for Scheduler {
  fn drop(&mut self) {
    if let Err(e) = self.stop() {
      warn!(error = %e, "Scheduler did not stop cleanly on drop.");
    }
  }
}
