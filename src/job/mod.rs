#[cfg(feature = "task_context")]
pub mod context;
pub mod schedule;

pub use schedule::{CronSpec, Schedule};

use crate::error::TaskError;
use crate::task::Priority;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::warn;
use uuid::Uuid;

// --- Public Type Aliases ---

/// Unique identifier of a registered task. Uses UUID v4.
pub type TaskId = Uuid;

/// The body of a scheduled task.
///
/// Receives a working copy of the task (name, type, config). Changes made to
/// `config` are kept after the run; other fields are bookkeeping owned by the
/// scheduler and are ignored. Returning `Err` counts as a failure and is
/// subject to the task's [`RetryPolicy`]. Panics are caught and treated as
/// failures.
pub type TaskCallback = Arc<dyn Fn(&mut ScheduledTask) -> Result<(), TaskError> + Send + Sync + 'static>;

/// The kind of maintenance a task performs. Selects the built-in body when no
/// callback is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TaskType {
  /// Retention enforcement on `config.path`.
  Cleanup,
  /// Log rotation trigger. Callback only.
  Rotation,
  /// Compression of aged files under `config.path`.
  Compression,
  /// Sink flush. Callback only.
  Flush,
  /// Arbitrary user work. Callback only.
  Custom,
  /// Runs the scheduler's health check hook.
  HealthCheck,
  /// Captures scheduler and pool statistics.
  MetricsSnapshot,
}

/// How failed runs are retried before the task falls back to its schedule.
///
/// The delay before retry `n` (0-based) is `interval_ms * backoff_multiplier^n`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub interval_ms: u32,
  pub backoff_multiplier: f32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      interval_ms: 5000,
      backoff_multiplier: 2.0,
    }
  }
}

impl RetryPolicy {
  pub fn new(max_retries: u32, interval_ms: u32, backoff_multiplier: f32) -> Self {
    Self {
      max_retries,
      interval_ms,
      backoff_multiplier,
    }
  }

  /// A policy that never retries; failures go straight to the next occurrence.
  pub fn none() -> Self {
    Self::new(0, 0, 1.0)
  }

  /// Delay before the retry following `attempts_so_far` earlier retries.
  pub fn delay_for_attempt(&self, attempts_so_far: u32) -> StdDuration {
    let exponent = i32::try_from(attempts_so_far).unwrap_or(i32::MAX);
    let millis = f64::from(self.interval_ms) * f64::from(self.backoff_multiplier).powi(exponent);
    if !millis.is_finite() || millis < 0.0 {
      warn!(
        attempts_so_far,
        ?self,
        "Retry backoff is not a finite positive delay; using the base interval."
      );
      return StdDuration::from_millis(u64::from(self.interval_ms));
    }
    // `as` saturates for floats beyond u64::MAX.
    StdDuration::from_millis(millis.round() as u64)
  }

  /// Absolute time of that retry, relative to `now`.
  pub(crate) fn retry_time(&self, attempts_so_far: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let delay = self.delay_for_attempt(attempts_so_far);
    ChronoDuration::from_std(delay)
      .ok()
      .and_then(|delay| now.checked_add_signed(delay))
      .unwrap_or_else(|| {
        warn!(?delay, "Retry delay overflowed; retrying in 60s.");
        now + ChronoDuration::seconds(60)
      })
  }
}

/// Per-task configuration consumed by the built-in bodies and the readiness
/// gate.
///
/// `max_age_seconds == 0` disables the age pass of a cleanup run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TaskConfig {
  /// Directory the task operates on.
  pub path: Option<PathBuf>,
  /// Files older than this are deleted by cleanup.
  pub max_age_seconds: u64,
  /// Keep at most this many matching files.
  pub max_files: Option<usize>,
  /// Keep matching files under this many bytes in total.
  pub max_total_size: Option<u64>,
  /// Compression skips files younger than this.
  pub min_age_seconds: u64,
  /// `*.ext` suffix glob, `*` for everything, otherwise an exact file name.
  pub file_pattern: Option<String>,
  /// Compress aged files before deleting them.
  pub compress_before_delete: bool,
  /// Only run once disk usage reaches this percentage.
  pub disk_usage_trigger_percent: Option<u8>,
  /// Only run while free space is below this many bytes.
  pub min_free_space_bytes: Option<u64>,
}

impl Default for TaskConfig {
  fn default() -> Self {
    Self {
      path: None,
      max_age_seconds: 7 * 24 * 60 * 60,
      max_files: None,
      max_total_size: None,
      min_age_seconds: 0,
      file_pattern: None,
      compress_before_delete: false,
      disk_usage_trigger_percent: None,
      min_free_space_bytes: None,
    }
  }
}

impl TaskConfig {
  /// Default configuration rooted at `path`.
  pub fn for_path(path: impl Into<PathBuf>) -> Self {
    Self {
      path: Some(path.into()),
      ..Self::default()
    }
  }

  /// True if either disk gate is configured.
  pub fn has_disk_gate(&self) -> bool {
    self.disk_usage_trigger_percent.is_some() || self.min_free_space_bytes.is_some()
  }
}

/// A registered recurring unit of work and its runtime bookkeeping.
///
/// Lives in the scheduler's task list. Callers see copies through
/// [`TaskDetails`]; callbacks receive a working copy.
#[derive(Clone)]
pub struct ScheduledTask {
  pub id: TaskId,
  pub name: String,
  pub task_type: TaskType,
  pub schedule: Schedule,
  pub callback: Option<TaskCallback>,
  pub last_run: Option<DateTime<Utc>>,
  pub next_run: DateTime<Utc>,
  pub run_count: u64,
  pub error_count: u64,
  pub retries_remaining: u32,
  pub enabled: bool,
  pub running: bool,
  pub priority: Priority,
  pub retry_policy: RetryPolicy,
  /// Name of a task that must not be running when this one starts.
  pub depends_on: Option<String>,
  pub config: TaskConfig,
  pub last_error: Option<String>,
}

impl ScheduledTask {
  /// A fresh, enabled task whose first run is `schedule.next_run_time(now)`.
  pub(crate) fn new(
    name: impl Into<String>,
    task_type: TaskType,
    schedule: Schedule,
    config: TaskConfig,
    now: DateTime<Utc>,
  ) -> Self {
    let retry_policy = RetryPolicy::default();
    Self {
      id: Uuid::new_v4(),
      name: name.into(),
      task_type,
      next_run: schedule.next_run_time(now),
      schedule,
      callback: None,
      last_run: None,
      run_count: 0,
      error_count: 0,
      retries_remaining: retry_policy.max_retries,
      enabled: true,
      running: false,
      priority: Priority::Normal,
      retry_policy,
      depends_on: None,
      config,
      last_error: None,
    }
  }

  /// Enabled, idle and past its next run time.
  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.enabled && !self.running && self.next_run <= now
  }

  /// Retries already spent in the current failure streak.
  pub fn attempts_so_far(&self) -> u32 {
    self
      .retry_policy
      .max_retries
      .saturating_sub(self.retries_remaining)
  }

  pub(crate) fn set_retry_policy(&mut self, policy: RetryPolicy) {
    self.retry_policy = policy;
    self.retries_remaining = policy.max_retries;
  }
}

// Manual implementation of Debug since the callback is an opaque closure.
impl fmt::Debug for ScheduledTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ScheduledTask")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("task_type", &self.task_type)
      .field("schedule", &self.schedule)
      .field("callback", &self.callback.as_ref().map(|_| "TaskCallback"))
      .field("last_run", &self.last_run)
      .field("next_run", &self.next_run)
      .field("run_count", &self.run_count)
      .field("error_count", &self.error_count)
      .field("retries_remaining", &self.retries_remaining)
      .field("enabled", &self.enabled)
      .field("running", &self.running)
      .field("priority", &self.priority)
      .field("retry_policy", &self.retry_policy)
      .field("depends_on", &self.depends_on)
      .field("config", &self.config)
      .field("last_error", &self.last_error)
      .finish()
  }
}

// --- Public Snapshot Structs for Querying ---

/// A point-in-time copy of a registered task, without its callback.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskDetails {
  pub id: TaskId,
  pub name: String,
  pub task_type: TaskType,
  pub schedule: Schedule,
  pub has_callback: bool,
  pub last_run: Option<DateTime<Utc>>,
  pub next_run: DateTime<Utc>,
  pub run_count: u64,
  pub error_count: u64,
  pub retries_remaining: u32,
  pub enabled: bool,
  pub running: bool,
  pub priority: Priority,
  pub retry_policy: RetryPolicy,
  pub depends_on: Option<String>,
  pub config: TaskConfig,
  pub last_error: Option<String>,
}

impl From<&ScheduledTask> for TaskDetails {
  fn from(task: &ScheduledTask) -> Self {
    Self {
      id: task.id,
      name: task.name.clone(),
      task_type: task.task_type,
      schedule: task.schedule.clone(),
      has_callback: task.callback.is_some(),
      last_run: task.last_run,
      next_run: task.next_run,
      run_count: task.run_count,
      error_count: task.error_count,
      retries_remaining: task.retries_remaining,
      enabled: task.enabled,
      running: task.running,
      priority: task.priority,
      retry_policy: task.retry_policy,
      depends_on: task.depends_on.clone(),
      config: task.config.clone(),
      last_error: task.last_error.clone(),
    }
  }
}
