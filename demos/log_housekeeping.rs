//! demos/log_housekeeping.rs
//!
//! Drives retention, compression and a flaky flush task against a temporary
//! log directory, then prints the collected statistics.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime};

use anyhow::Context;
use logkeeper::{
  CompressionOutcome, Priority, RetryPolicy, Schedule, Scheduler, TaskConfig, TaskError, ThreadPool,
};
use tracing::{info, warn};

// Stand-in codec: writes `<file>.gz` at a third of the input size.
fn fake_gzip(input: &Path, _output: Option<&Path>) -> CompressionOutcome {
  let size = match std::fs::metadata(input) {
    Ok(metadata) => metadata.len(),
    Err(e) => return CompressionOutcome::failed(e.to_string()),
  };
  let mut output = input.as_os_str().to_owned();
  output.push(".gz");
  let output = PathBuf::from(output);
  match std::fs::write(&output, vec![0u8; (size / 3) as usize]) {
    Ok(()) => CompressionOutcome::succeeded(size, size / 3, output),
    Err(e) => CompressionOutcome::failed(e.to_string()),
  }
}

fn seed_logs(dir: &Path) -> anyhow::Result<()> {
  for day in 0..12u64 {
    let path = dir.join(format!("app-{day:02}.log"));
    std::fs::write(&path, vec![b'x'; 4096]).with_context(|| format!("writing {}", path.display()))?;
    let mtime = SystemTime::now() - StdDuration::from_secs(day * 24 * 3600 + 3600);
    filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(mtime))?;
  }
  Ok(())
}

fn main() -> anyhow::Result<()> {
  // --- Setup Tracing ---
  let filter = tracing_subscriber::EnvFilter::try_new("warn,logkeeper=info,log_housekeeping=info")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  let log_dir = tempfile::tempdir()?;
  seed_logs(log_dir.path())?;
  info!(dir = %log_dir.path().display(), "Seeded 12 daily log files.");

  // --- Build Pool & Scheduler ---
  let pool = Arc::new(ThreadPool::builder().worker_count(2).build()?);
  pool.start()?;
  let scheduler = Scheduler::builder()
    .thread_pool(pool.clone())
    .compressor(Arc::new(fake_gzip))
    .tick_interval(StdDuration::from_millis(100))
    .build()?;

  scheduler.on_task_error(|details, err| warn!(task = details.name.as_str(), %err, "Task gave up."));

  // --- Register Tasks ---
  scheduler.add_compression_task(
    "compress",
    log_dir.path(),
    Schedule::once_after(StdDuration::from_millis(100)),
    TaskConfig {
      min_age_seconds: 2 * 24 * 3600,
      file_pattern: Some("*.log".to_string()),
      ..TaskConfig::default()
    },
  );
  scheduler.add_cleanup_task(
    "prune",
    log_dir.path(),
    Schedule::once_after(StdDuration::from_millis(400)),
    TaskConfig {
      max_age_seconds: 7 * 24 * 3600,
      max_files: Some(6),
      ..TaskConfig::default()
    },
  );
  scheduler.set_task_dependency("prune", Some("compress"))?;

  let flush_attempts = Arc::new(AtomicUsize::new(0));
  let attempts = flush_attempts.clone();
  scheduler.add_custom_task("flush", Schedule::once_after(StdDuration::from_millis(50)), move |task| {
    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
    info!(task = task.name.as_str(), attempt, "Flushing sinks...");
    if attempt < 3 {
      return Err(TaskError::custom("sink busy"));
    }
    Ok(())
  });
  scheduler.set_task_priority("flush", Priority::High)?;
  scheduler.set_task_retry_policy("flush", RetryPolicy::new(3, 200, 2.0))?;
  scheduler.add_metrics_snapshot_task("snapshot", Schedule::every(StdDuration::from_millis(500)));

  // --- Run ---
  scheduler.start()?;
  std::thread::sleep(StdDuration::from_secs(2));
  scheduler.stop()?;
  pool.shutdown();

  // --- Report ---
  let stats = scheduler.stats();
  info!(?stats, "Scheduler stats.");
  if let Some(snapshot) = scheduler.last_metrics_snapshot() {
    info!(taken_at = %snapshot.taken_at, pool = ?snapshot.pool, "Last snapshot.");
  }
  let mut remaining: Vec<_> = std::fs::read_dir(log_dir.path())?
    .filter_map(|entry| entry.ok().map(|e| e.file_name().to_string_lossy().into_owned()))
    .collect();
  remaining.sort();
  info!(?remaining, flush_attempts = flush_attempts.load(Ordering::SeqCst), "Done.");
  Ok(())
}
