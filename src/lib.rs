//! logkeeper: Background Task Execution for Log Housekeeping
//!
//! Provides a work-stealing thread pool and a recurring maintenance scheduler
//! that keeps log directories in check (retention cleanup, compression,
//! rotation and flush triggers, health checks and metrics snapshots) with
//! bounded resource use.
//!
//! # Features
//!
//! - [`ThreadPool`]: fixed set of OS threads, a bounded shared priority queue,
//!   per-worker local queues and work stealing.
//!   - Priority, non-blocking, per-worker and batch submission.
//!   - Full queues never block: the task comes back in a [`SubmitError`].
//!   - Panicking tasks are caught and counted; workers survive.
//!   - Per-worker [`ScratchArena`] reset after every task.
//! - [`Scheduler`]: single loop thread scanning registered tasks each tick.
//!   - Schedules: once, fixed interval, daily at `hh:mm`, cron fields, and
//!     cron expressions (requires the `cron_schedule` feature).
//!   - Retry with exponential backoff via [`RetryPolicy`].
//!   - Dependencies between tasks by name and disk-usage gating.
//!   - Dispatch onto an attached `ThreadPool`, falling back to inline.
//!   - Hooks for task start, completion, failure, and every tick.
//! - Built-in maintenance bodies: [`perform_cleanup`] (age, count and size
//!   retention) and [`perform_compression`], through the [`Filesystem`] and
//!   [`Compressor`] contracts.
//! - Optional thread-local [`TaskContext`] inside task bodies (requires the
//!   `task_context` feature, on by default).
//! - Optional Serde support for public data types (requires the `serde` feature).
//!
//! # Usage
//!
//! ```no_run
//! use logkeeper::{Priority, RetryPolicy, Schedule, Scheduler, TaskConfig, TaskError, ThreadPool};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // tracing_subscriber::fmt().with_env_filter("warn,logkeeper=info").init();
//!
//!     let pool = Arc::new(ThreadPool::builder().worker_count(2).build()?);
//!     pool.start()?;
//!
//!     let scheduler = Scheduler::builder()
//!         .thread_pool(pool.clone())
//!         .tick_interval(Duration::from_millis(200))
//!         .build()?;
//!
//!     // Keep at most 10 rotated logs, none older than a day.
//!     scheduler.add_cleanup_task(
//!         "prune",
//!         "/var/log/myapp",
//!         Schedule::every(Duration::from_secs(60)),
//!         TaskConfig {
//!             max_age_seconds: 24 * 60 * 60,
//!             max_files: Some(10),
//!             file_pattern: Some("*.log".to_string()),
//!             ..TaskConfig::default()
//!         },
//!     );
//!
//!     scheduler.add_custom_task("flush-sinks", Schedule::every(Duration::from_secs(5)), |task| {
//!         println!("flushing for {}", task.name);
//!         Ok::<(), TaskError>(())
//!     });
//!     scheduler.set_task_priority("flush-sinks", Priority::High)?;
//!     scheduler.set_task_retry_policy("flush-sinks", RetryPolicy::new(3, 500, 2.0))?;
//!
//!     scheduler.start()?;
//!     std::thread::sleep(Duration::from_secs(30));
//!
//!     scheduler.stop()?;
//!     pool.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Observability
//!
//! - Scheduler counters via [`Scheduler::stats`], pool counters via
//!   [`ThreadPool::stats`]; `MetricsSnapshot` tasks capture both.
//! - Task state via [`Scheduler::tasks`] / [`Scheduler::task`] ([`TaskDetails`]).
//! - Integrate with the `tracing` crate for detailed logs; every scheduled
//!   run is wrapped in a `task_exec` span.

// --- Feature-gated Documentation ---

// This empty module attaches the documentation block below only when
// the `task_context` feature is enabled during doc generation.
#[cfg(all(doc, feature = "task_context"))]
pub mod task_context_docs {
  //! # Accessing Task Context (`task_context` feature)
  //!
  //! While a scheduled task body runs, [`try_get_current_task_context`](crate::try_get_current_task_context)
  //! returns the task's id, name, type and current retry attempt. It returns
  //! `None` on any other thread or outside a body.
  //!
  //! ```no_run
  //! use logkeeper::{try_get_current_task_context, Schedule, Scheduler};
  //! use std::time::Duration;
  //!
  //! let scheduler = Scheduler::new();
  //! scheduler.add_custom_task("ctx-demo", Schedule::every(Duration::from_secs(1)), |_task| {
  //!     if let Some(ctx) = try_get_current_task_context() {
  //!         println!("running {} (attempt {})", ctx.name, ctx.attempt);
  //!     }
  //!     Ok(())
  //! });
  //! ```
}

// Declare modules within the crate
pub mod arena;
mod coordinator;
pub mod error;
pub mod job;
pub mod maintenance;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod task;
mod worker;

// --- Public Re-exports ---

// Thread pool
pub use arena::ScratchArena;
pub use pool::{PoolBuilder, ThreadPool};
pub use queue::WorkQueue;
pub use task::{CallbackContext, CallbackFn, Priority, Task, WorkItem};
pub use worker::WorkerId;

// Scheduler
pub use coordinator::{ErrorHook, HealthCheckFn, TaskHook, TickHook};
pub use scheduler::{Scheduler, SchedulerBuilder};

// Error types
pub use error::{BuildError, QueryError, ShutdownError, StartError, SubmitError, TaskError};

// Task related types
pub use job::{
  CronSpec, RetryPolicy, Schedule, ScheduledTask, TaskCallback, TaskConfig, TaskDetails, TaskId, TaskType,
};
// Conditionally export context items
#[cfg(feature = "task_context")]
pub use job::context::{try_get_current_task_context, TaskContext};

// Maintenance
pub use maintenance::{
  perform_cleanup, perform_compression, CleanupResult, CompressionOutcome, CompressionResult, Compressor, DiskUsage,
  Filesystem, LocalFilesystem,
};

// Metrics related types
pub use metrics::{MaintenanceSnapshot, PoolStats, SchedulerStats};
