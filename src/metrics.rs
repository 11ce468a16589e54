use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

// --- Duration Accumulator ---

/// A concurrent accumulator storing an observation count and a nanosecond sum.
///
/// Suitable for cumulative latency tracking without percentile information.
/// Uses `Relaxed` ordering; counters are independent of each other.
#[derive(Debug, Default)]
pub struct DurationCounter {
  count: AtomicU64,
  sum_nanos: AtomicU64,
}

impl DurationCounter {
  /// Records one duration observation.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_nanos.fetch_add(
      duration.as_nanos().try_into().unwrap_or(u64::MAX),
      Ordering::Relaxed,
    );
  }

  pub fn get_count(&self) -> u64 {
    self.count.load(Ordering::Relaxed)
  }

  pub fn get_sum_nanos(&self) -> u64 {
    self.sum_nanos.load(Ordering::Relaxed)
  }
}

// --- Thread Pool Metrics (Internal State) ---

/// Pool-wide counters, updated by submitters and workers.
#[derive(Debug, Default)]
pub struct PoolMetrics {
  // --- Counters (Monotonically increasing) ---
  /// Every submission attempt, accepted or not.
  pub tasks_submitted: AtomicUsize,
  /// Task bodies that returned (or panicked) on a worker.
  pub tasks_completed: AtomicUsize,
  /// Items a worker took from a peer's local queue.
  pub tasks_stolen: AtomicUsize,
  /// Submissions rejected because a queue was full or the pool was stopped.
  pub tasks_dropped: AtomicUsize,
  /// Task bodies that panicked. Also counted in `tasks_completed`.
  pub tasks_panicked: AtomicUsize,

  // --- Gauges ---
  /// Workers currently executing a task body.
  pub active_threads: AtomicUsize,

  // --- Durations ---
  /// Time between submission and dequeue.
  pub wait_time: DurationCounter,
  /// Time spent inside task bodies.
  pub exec_time: DurationCounter,
}

impl PoolMetrics {
  /// Reads every counter. `worker_count` and `pending_tasks` come from the pool.
  pub(crate) fn snapshot(&self, worker_count: usize, pending_tasks: usize) -> PoolStats {
    let order = Ordering::Relaxed;
    PoolStats {
      tasks_submitted: self.tasks_submitted.load(order),
      tasks_completed: self.tasks_completed.load(order),
      tasks_stolen: self.tasks_stolen.load(order),
      tasks_dropped: self.tasks_dropped.load(order),
      tasks_panicked: self.tasks_panicked.load(order),
      active_threads: self.active_threads.load(order),
      worker_count,
      pending_tasks,
      total_wait_nanos: self.wait_time.get_sum_nanos(),
      total_exec_nanos: self.exec_time.get_sum_nanos(),
    }
  }
}

/// A point-in-time view of thread pool statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolStats {
  // Counters
  pub tasks_submitted: usize,
  pub tasks_completed: usize,
  pub tasks_stolen: usize,
  pub tasks_dropped: usize,
  pub tasks_panicked: usize,
  // Gauges
  pub active_threads: usize,
  pub worker_count: usize,
  pub pending_tasks: usize,
  // Cumulative durations
  pub total_wait_nanos: u64,
  pub total_exec_nanos: u64,
}

impl PoolStats {
  /// Mean queue wait per completed task, or `None` before any completion.
  pub fn mean_wait(&self) -> Option<Duration> {
    mean(self.total_wait_nanos, self.tasks_completed)
  }

  /// Mean execution time per completed task, or `None` before any completion.
  pub fn mean_exec(&self) -> Option<Duration> {
    mean(self.total_exec_nanos, self.tasks_completed)
  }
}

fn mean(sum_nanos: u64, count: usize) -> Option<Duration> {
  if count == 0 {
    None
  } else {
    Some(Duration::from_nanos(sum_nanos / count as u64))
  }
}

// --- Scheduler Metrics (Internal State) ---

/// Aggregate scheduler counters, shared by the loop thread and pool workers
/// running dispatched tasks.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
  /// Task bodies run to completion, successful or not.
  pub tasks_executed: AtomicUsize,
  /// Task bodies that returned an error or panicked.
  pub tasks_failed: AtomicUsize,
  /// Failures rescheduled through the retry policy.
  pub tasks_retried: AtomicUsize,
  /// Files deleted by cleanup tasks.
  pub files_cleaned: AtomicUsize,
  /// Files compressed by cleanup and compression tasks.
  pub files_compressed: AtomicUsize,
  /// Bytes released by cleanup deletions and compression savings.
  pub bytes_freed: AtomicU64,
  /// Completion time of the most recent task body.
  pub last_run_time: Mutex<Option<DateTime<Utc>>>,
}

impl SchedulerMetrics {
  pub(crate) fn snapshot(&self) -> SchedulerStats {
    let order = Ordering::Relaxed;
    SchedulerStats {
      tasks_executed: self.tasks_executed.load(order),
      tasks_failed: self.tasks_failed.load(order),
      tasks_retried: self.tasks_retried.load(order),
      files_cleaned: self.files_cleaned.load(order),
      files_compressed: self.files_compressed.load(order),
      bytes_freed: self.bytes_freed.load(order),
      last_run_time: *self.last_run_time.lock(),
    }
  }
}

/// A point-in-time view of scheduler statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerStats {
  pub tasks_executed: usize,
  pub tasks_failed: usize,
  pub tasks_retried: usize,
  pub files_cleaned: usize,
  pub files_compressed: usize,
  pub bytes_freed: u64,
  pub last_run_time: Option<DateTime<Utc>>,
}

/// Output of a `MetricsSnapshot` task: scheduler and (if attached) pool stats.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MaintenanceSnapshot {
  pub taken_at: DateTime<Utc>,
  pub scheduler: SchedulerStats,
  pub pool: Option<PoolStats>,
}
