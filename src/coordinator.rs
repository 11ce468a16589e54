use crate::error::{QueryError, TaskError};
use crate::job::{ScheduledTask, TaskDetails, TaskId, TaskType};
use crate::maintenance::{perform_cleanup, perform_compression, Compressor, Filesystem};
use crate::metrics::{MaintenanceSnapshot, SchedulerMetrics};
use crate::pool::ThreadPool;
use crate::task::Task;

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, info_span, trace, warn};

// --- Hook Types ---

/// Called with a snapshot of the task before its body runs, and after a
/// successful run.
pub type TaskHook = Arc<dyn Fn(&TaskDetails) + Send + Sync + 'static>;
/// Called when a run fails and no retries remain.
pub type ErrorHook = Arc<dyn Fn(&TaskDetails, &TaskError) + Send + Sync + 'static>;
/// Called after every scan of the loop thread.
pub type TickHook = Arc<dyn Fn() + Send + Sync + 'static>;
/// Body of `HealthCheck` tasks. `Err` marks the check as failed.
pub type HealthCheckFn = Arc<dyn Fn() -> Result<(), TaskError> + Send + Sync + 'static>;

#[derive(Default, Clone)]
pub(crate) struct Hooks {
  pub on_started: Option<TaskHook>,
  pub on_completed: Option<TaskHook>,
  pub on_error: Option<ErrorHook>,
  pub on_tick: Option<TickHook>,
  pub health_check: Option<HealthCheckFn>,
}

/// A task marked `running` and the working copy its body runs against.
struct Claim {
  id: TaskId,
  snapshot: ScheduledTask,
}

/// Disk conditions a gated task waits for.
struct DiskGate {
  path: Option<std::path::PathBuf>,
  trigger_percent: Option<u8>,
  min_free_bytes: Option<u64>,
}

/// State shared by the `Scheduler` handle, its loop thread and any pool
/// workers running dispatched tasks.
pub(crate) struct SchedulerInner {
  pub tasks: Mutex<Vec<ScheduledTask>>,
  pub pool: Option<Arc<ThreadPool>>,
  pub filesystem: Arc<dyn Filesystem>,
  pub compressor: Option<Arc<dyn Compressor>>,
  pub metrics: SchedulerMetrics,
  pub hooks: RwLock<Hooks>,
  pub last_snapshot: Mutex<Option<MaintenanceSnapshot>>,
  pub running: AtomicBool,
  pub tick_interval: Duration,
  pub drain_timeout: Duration,
  wake_lock: Mutex<()>,
  wake: Condvar,
}

impl SchedulerInner {
  pub fn new(
    pool: Option<Arc<ThreadPool>>,
    filesystem: Arc<dyn Filesystem>,
    compressor: Option<Arc<dyn Compressor>>,
    tick_interval: Duration,
    drain_timeout: Duration,
  ) -> Self {
    Self {
      tasks: Mutex::new(Vec::new()),
      pool,
      filesystem,
      compressor,
      metrics: SchedulerMetrics::default(),
      hooks: RwLock::new(Hooks::default()),
      last_snapshot: Mutex::new(None),
      running: AtomicBool::new(false),
      tick_interval,
      drain_timeout,
      wake_lock: Mutex::new(()),
      wake: Condvar::new(),
    }
  }

  /// Wakes the loop thread so it rescans (or notices shutdown) immediately.
  pub fn wake(&self) {
    let _guard = self.wake_lock.lock();
    self.wake.notify_all();
  }

  /// Number of tasks whose `running` flag is set.
  pub fn running_tasks(&self) -> usize {
    self.tasks.lock().iter().filter(|task| task.running).count()
  }

  // --- Loop ---

  /// Body of the loop thread. Returns once `running` is cleared.
  pub fn run_loop(self: Arc<Self>) {
    info!(tick_ms = self.tick_interval.as_millis() as u64, "Scheduler loop started.");
    while self.running.load(AtomicOrdering::Acquire) {
      let dispatched = self.run_pending();
      if dispatched > 0 {
        trace!(dispatched, "Scheduler tick dispatched tasks.");
      }
      self.fire_tick();

      let mut guard = self.wake_lock.lock();
      if !self.running.load(AtomicOrdering::Acquire) {
        break;
      }
      let _ = self.wake.wait_for(&mut guard, self.tick_interval);
    }
    info!("Scheduler loop stopped.");
  }

  /// Scans every task once and dispatches those that are ready. Returns how
  /// many were dispatched.
  pub fn run_pending(self: &Arc<Self>) -> usize {
    let now = Utc::now();
    let len = self.tasks.lock().len();
    let mut dispatched = 0;
    for index in 0..len {
      if let Some(claim) = self.claim(index, now) {
        dispatched += 1;
        self.dispatch(claim);
      }
    }
    dispatched
  }

  /// Claims the task at `index` if it is due, its dependency is idle and its
  /// disk gate (if any) is open. The disk query runs without the task lock.
  fn claim(&self, index: usize, now: DateTime<Utc>) -> Option<Claim> {
    let (id, gate) = {
      let mut tasks = self.tasks.lock();
      let task = tasks.get(index)?;
      if !task.is_due(now) || blocked_by_dependency(&tasks, task) {
        return None;
      }
      if !task.config.has_disk_gate() {
        return Some(mark_running(&mut tasks[index]));
      }
      let gate = DiskGate {
        path: task.config.path.clone(),
        trigger_percent: task.config.disk_usage_trigger_percent,
        min_free_bytes: task.config.min_free_space_bytes,
      };
      (task.id, gate)
    };

    if !self.disk_gate_open(&gate) {
      trace!(task_id = %id, "Disk gate closed; task not dispatched.");
      return None;
    }

    // Re-validate: the list may have changed while the lock was released.
    let mut tasks = self.tasks.lock();
    let position = tasks.iter().position(|task| task.id == id)?;
    let task = &tasks[position];
    if !task.is_due(now) || blocked_by_dependency(&tasks, task) {
      return None;
    }
    Some(mark_running(&mut tasks[position]))
  }

  fn disk_gate_open(&self, gate: &DiskGate) -> bool {
    let path = gate.path.as_deref().unwrap_or_else(|| Path::new("."));
    let usage = match self.filesystem.disk_usage(path) {
      Ok(usage) => usage,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Disk usage query failed; running gated task anyway.");
        return true;
      }
    };
    if let Some(trigger) = gate.trigger_percent {
      if usage.used_percent() < f64::from(trigger) {
        return false;
      }
    }
    if let Some(min_free) = gate.min_free_bytes {
      if usage.available_bytes >= min_free {
        return false;
      }
    }
    true
  }

  /// Sends a claimed task to the pool, or runs it on this thread when there is
  /// no pool or the pool rejects it.
  fn dispatch(self: &Arc<Self>, claim: Claim) {
    let Some(pool) = &self.pool else {
      self.execute_claim(claim);
      return;
    };

    let priority = claim.snapshot.priority;
    let id = claim.id;
    let inner: Weak<Self> = Arc::downgrade(self);
    let task = Task::function(move |_scratch| match inner.upgrade() {
      Some(inner) => inner.execute_claim(claim),
      None => warn!(task_id = %claim.id, "Scheduler dropped before dispatched task ran."),
    });

    match pool.submit(task, priority) {
      Ok(()) => debug!(task_id = %id, ?priority, "Task dispatched to thread pool."),
      Err(err) => {
        warn!(task_id = %id, reason = %err, "Thread pool rejected task; running inline.");
        err.into_task().run(None);
      }
    }
  }

  // --- Execution ---

  /// Runs the task at `index` on the caller's thread regardless of schedule,
  /// enabled state or gating.
  pub fn run_now(&self, index: usize) -> Result<(), QueryError> {
    let claim = {
      let mut tasks = self.tasks.lock();
      let len = tasks.len();
      let task = tasks
        .get_mut(index)
        .ok_or(QueryError::IndexOutOfRange { index, len })?;
      if task.running {
        return Err(QueryError::TaskAlreadyRunning(task.name.clone()));
      }
      mark_running(task)
    };
    self.execute_claim(claim);
    Ok(())
  }

  fn execute_claim(&self, claim: Claim) {
    let Claim { id, mut snapshot } = claim;
    let span = info_span!(
      "task_exec",
      task_id = %id,
      task_name = snapshot.name.as_str(),
      task_type = ?snapshot.task_type
    );
    let _entered = span.enter();

    info!("Starting task execution.");
    let start = Instant::now();
    let result = self.run_body(&mut snapshot);
    let duration = start.elapsed();
    info!(
      duration_ms = duration.as_millis() as u64,
      outcome = if result.is_ok() { "Success" } else { "Fail" },
      "Finished task execution."
    );

    self.finalize(id, snapshot, result, Utc::now());
  }

  /// Fires the started hook and runs the body with panics caught.
  fn run_body(&self, snapshot: &mut ScheduledTask) -> Result<(), TaskError> {
    let details = TaskDetails::from(&*snapshot);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
      let hook = self.hooks.read().on_started.clone();
      if let Some(hook) = hook {
        hook(&details);
      }
      with_task_context(snapshot, |task| self.execute_body(task))
    }));
    outcome.unwrap_or_else(|_| {
      error!("Task body panicked.");
      Err(TaskError::Panicked)
    })
  }

  fn execute_body(&self, task: &mut ScheduledTask) -> Result<(), TaskError> {
    if let Some(callback) = task.callback.clone() {
      return callback(task);
    }
    match task.task_type {
      TaskType::Cleanup => self.run_cleanup(task),
      TaskType::Compression => self.run_compression(task),
      TaskType::HealthCheck => self.run_health_check(),
      TaskType::MetricsSnapshot => {
        self.capture_snapshot();
        Ok(())
      }
      TaskType::Rotation | TaskType::Flush | TaskType::Custom => Err(TaskError::MissingCallback(task.task_type)),
    }
  }

  fn run_cleanup(&self, task: &ScheduledTask) -> Result<(), TaskError> {
    let path = task.config.path.as_deref().ok_or(TaskError::MissingPath)?;
    let result = perform_cleanup(
      self.filesystem.as_ref(),
      self.compressor.as_deref(),
      path,
      &task.config,
      SystemTime::now(),
    )?;

    let order = AtomicOrdering::Relaxed;
    self.metrics.files_cleaned.fetch_add(result.files_deleted, order);
    self.metrics.files_compressed.fetch_add(result.files_compressed, order);
    self.metrics.bytes_freed.fetch_add(result.bytes_freed, order);
    if result.errors > 0 {
      warn!(errors = result.errors, "Cleanup finished with per-file errors.");
    }
    Ok(())
  }

  fn run_compression(&self, task: &ScheduledTask) -> Result<(), TaskError> {
    let compressor = self.compressor.as_deref().ok_or(TaskError::NoCompressor)?;
    let path = task.config.path.as_deref().ok_or(TaskError::MissingPath)?;
    let result = perform_compression(self.filesystem.as_ref(), compressor, path, &task.config, SystemTime::now())?;

    let order = AtomicOrdering::Relaxed;
    self.metrics.files_compressed.fetch_add(result.files_compressed, order);
    self.metrics.bytes_freed.fetch_add(result.bytes_saved, order);
    if result.errors > 0 {
      warn!(errors = result.errors, "Compression finished with per-file errors.");
    }
    Ok(())
  }

  fn run_health_check(&self) -> Result<(), TaskError> {
    let check = self.hooks.read().health_check.clone();
    match check {
      Some(check) => check(),
      None => {
        debug!("No health check registered; reporting healthy.");
        Ok(())
      }
    }
  }

  /// Records scheduler and pool statistics as the latest snapshot.
  pub fn capture_snapshot(&self) -> MaintenanceSnapshot {
    let snapshot = MaintenanceSnapshot {
      taken_at: Utc::now(),
      scheduler: self.metrics.snapshot(),
      pool: self.pool.as_ref().map(|pool| pool.stats()),
    };
    info!(
      tasks_executed = snapshot.scheduler.tasks_executed,
      tasks_failed = snapshot.scheduler.tasks_failed,
      tasks_retried = snapshot.scheduler.tasks_retried,
      files_cleaned = snapshot.scheduler.files_cleaned,
      files_compressed = snapshot.scheduler.files_compressed,
      bytes_freed = snapshot.scheduler.bytes_freed,
      pool_completed = snapshot.pool.as_ref().map(|p| p.tasks_completed),
      pool_dropped = snapshot.pool.as_ref().map(|p| p.tasks_dropped),
      "Maintenance metrics snapshot."
    );
    *self.last_snapshot.lock() = Some(snapshot.clone());
    snapshot
  }

  // --- Outcome Processing ---

  /// Applies the result of a run to the registered task and fires hooks.
  ///
  /// Success refills retries and schedules the next occurrence. Failure is
  /// retried with backoff while retries remain; otherwise the error hook fires
  /// and the task falls back to its schedule. One-shot tasks are disabled once
  /// they have no further attempt pending.
  pub(crate) fn finalize(&self, id: TaskId, worked: ScheduledTask, result: Result<(), TaskError>, now: DateTime<Utc>) {
    let order = AtomicOrdering::Relaxed;
    self.metrics.tasks_executed.fetch_add(1, order);
    *self.metrics.last_run_time.lock() = Some(now);
    if result.is_err() {
      self.metrics.tasks_failed.fetch_add(1, order);
    }

    let mut tasks = self.tasks.lock();
    let Some(task) = tasks.iter_mut().find(|task| task.id == id) else {
      drop(tasks);
      debug!(task_id = %id, "Task removed while running; discarding outcome.");
      return;
    };

    task.running = false;
    task.last_run = Some(now);
    task.run_count += 1;
    task.config = worked.config;

    match result {
      Ok(()) => {
        task.last_error = None;
        task.retries_remaining = task.retry_policy.max_retries;
        task.next_run = task.schedule.next_run_time(now);
        if task.schedule.is_one_shot() {
          task.enabled = false;
        }
        let details = TaskDetails::from(&*task);
        drop(tasks);

        debug!(next_run = %details.next_run, "Task completed.");
        let hook = self.hooks.read().on_completed.clone();
        if let Some(hook) = hook {
          call_hook("on_task_completed", || hook(&details));
        }
      }
      Err(err) => {
        task.error_count += 1;
        task.last_error = Some(err.to_string());

        if task.retries_remaining > 0 {
          let attempt = task.attempts_so_far();
          task.next_run = task.retry_policy.retry_time(attempt, now);
          task.retries_remaining -= 1;
          self.metrics.tasks_retried.fetch_add(1, order);
          warn!(
            error = %err,
            attempt = attempt + 1,
            retries_remaining = task.retries_remaining,
            retry_at = %task.next_run,
            "Task failed; retry scheduled."
          );
          return;
        }

        task.next_run = task.schedule.next_run_time(now);
        if task.schedule.is_one_shot() {
          task.enabled = false;
        }
        let details = TaskDetails::from(&*task);
        drop(tasks);

        let hook = self.hooks.read().on_error.clone();
        match hook {
          Some(hook) => call_hook("on_task_error", || hook(&details, &err)),
          None => error!(
            error = %err,
            error_count = details.error_count,
            "Task failed with no retries remaining."
          ),
        }
      }
    }
  }

  fn fire_tick(&self) {
    let hook = self.hooks.read().on_tick.clone();
    if let Some(hook) = hook {
      call_hook("on_tick", || hook());
    }
  }
}

fn mark_running(task: &mut ScheduledTask) -> Claim {
  task.running = true;
  Claim {
    id: task.id,
    snapshot: task.clone(),
  }
}

/// True if the first task named by `depends_on` is currently running.
fn blocked_by_dependency(tasks: &[ScheduledTask], task: &ScheduledTask) -> bool {
  let Some(dependency) = task.depends_on.as_deref() else {
    return false;
  };
  tasks
    .iter()
    .find(|candidate| candidate.name == dependency)
    .is_some_and(|candidate| candidate.running)
}

/// Runs a user hook, logging instead of unwinding if it panics.
fn call_hook(name: &str, f: impl FnOnce()) {
  if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
    error!(hook = name, "Scheduler hook panicked.");
  }
}

#[cfg(feature = "task_context")]
fn with_task_context<R>(task: &mut ScheduledTask, f: impl FnOnce(&mut ScheduledTask) -> R) -> R {
  use crate::job::context::{self, TaskContext};

  let ctx = TaskContext {
    task_id: task.id,
    name: task.name.clone(),
    task_type: task.task_type,
    attempt: task.attempts_so_far(),
  };
  context::scope(ctx, || f(task))
}

#[cfg(not(feature = "task_context"))]
fn with_task_context<R>(task: &mut ScheduledTask, f: impl FnOnce(&mut ScheduledTask) -> R) -> R {
  f(task)
}
