//! tests/common.rs
//! Shared helper functions for integration tests.
#![allow(dead_code)]

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant, SystemTime};

use logkeeper::{
  maintenance::{DirEntryInfo, DiskUsage, FileStat, Filesystem, LocalFilesystem},
  CompressionOutcome, ScheduledTask, Scheduler, TaskError, ThreadPool,
};
use parking_lot::Mutex;
use tracing_subscriber::fmt::TestWriter;

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

// Builds and starts a pool with `workers` threads.
pub fn build_pool(workers: usize) -> Arc<ThreadPool> {
  let pool = ThreadPool::builder()
    .worker_count(workers)
    .global_wait(StdDuration::from_millis(20))
    .build()
    .expect("pool should build");
  pool.start().expect("pool should start");
  Arc::new(pool)
}

// Builds a scheduler with a fast tick, optionally dispatching onto `pool`.
pub fn build_scheduler(pool: Option<Arc<ThreadPool>>) -> Scheduler {
  let mut builder = Scheduler::builder().tick_interval(StdDuration::from_millis(20));
  if let Some(pool) = pool {
    builder = builder.thread_pool(pool);
  }
  builder.build().expect("scheduler should build")
}

// Callback that increments a counter and succeeds.
pub fn counting_callback(
  counter: Arc<AtomicUsize>,
) -> impl Fn(&mut ScheduledTask) -> Result<(), TaskError> + Send + Sync + 'static {
  move |task| {
    let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::debug!(task = task.name.as_str(), count, "Counter task executing");
    Ok(())
  }
}

// Callback that increments a counter and always fails.
pub fn failing_callback(
  counter: Arc<AtomicUsize>,
) -> impl Fn(&mut ScheduledTask) -> Result<(), TaskError> + Send + Sync + 'static {
  move |_task| {
    counter.fetch_add(1, Ordering::SeqCst);
    Err(TaskError::custom("forced failure"))
  }
}

// Callback that sets `flag` after sleeping for `delay`.
pub fn flag_callback(
  flag: Arc<AtomicBool>,
  delay: StdDuration,
) -> impl Fn(&mut ScheduledTask) -> Result<(), TaskError> + Send + Sync + 'static {
  move |_task| {
    if delay > StdDuration::ZERO {
      thread::sleep(delay);
    }
    flag.store(true, Ordering::SeqCst);
    Ok(())
  }
}

// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: StdDuration, condition: impl Fn() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    thread::sleep(StdDuration::from_millis(10));
  }
  condition()
}

/// Create a test file with specific size and mtime.
pub fn create_test_file(path: &Path, size: usize, age_secs: u64) {
  std::fs::write(path, vec![0u8; size]).unwrap();
  let mtime = SystemTime::now() - StdDuration::from_secs(age_secs);
  filetime::set_file_mtime(path, filetime::FileTime::from_system_time(mtime)).unwrap();
}

/// Compressor writing `<input>.gz` at half the input size.
pub fn halving_compressor(input: &Path, _output: Option<&Path>) -> CompressionOutcome {
  let size = match std::fs::metadata(input) {
    Ok(metadata) => metadata.len(),
    Err(e) => return CompressionOutcome::failed(e.to_string()),
  };
  let mut output = input.as_os_str().to_owned();
  output.push(".gz");
  let output = PathBuf::from(output);
  match std::fs::write(&output, vec![7u8; (size / 2) as usize]) {
    Ok(()) => CompressionOutcome::succeeded(size, size / 2, output),
    Err(e) => CompressionOutcome::failed(e.to_string()),
  }
}

/// Real filesystem with a scripted volume capacity for disk gating tests.
pub struct ScriptedDisk {
  usage: Mutex<DiskUsage>,
  pub queries: AtomicUsize,
}

impl ScriptedDisk {
  pub fn new(total_bytes: u64, available_bytes: u64) -> Arc<Self> {
    Arc::new(Self {
      usage: Mutex::new(DiskUsage {
        total_bytes,
        available_bytes,
      }),
      queries: AtomicUsize::new(0),
    })
  }

  pub fn set_available(&self, available_bytes: u64) {
    self.usage.lock().available_bytes = available_bytes;
  }
}

impl fmt::Debug for ScriptedDisk {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ScriptedDisk").field("usage", &*self.usage.lock()).finish()
  }
}

impl Filesystem for ScriptedDisk {
  fn read_dir(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>> {
    LocalFilesystem.read_dir(dir)
  }

  fn stat(&self, path: &Path) -> io::Result<FileStat> {
    LocalFilesystem.stat(path)
  }

  fn remove_file(&self, path: &Path) -> io::Result<()> {
    LocalFilesystem.remove_file(path)
  }

  fn disk_usage(&self, _path: &Path) -> io::Result<DiskUsage> {
    self.queries.fetch_add(1, Ordering::SeqCst);
    Ok(*self.usage.lock())
  }
}
