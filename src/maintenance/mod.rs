//! Log housekeeping bodies run by the scheduler: retention enforcement and
//! compression, plus the filesystem and compressor contracts they use.

pub mod cleanup;
pub mod compression;
pub mod fs;

pub use cleanup::{perform_cleanup, CleanupResult};
pub use compression::{perform_compression, CompressionOutcome, CompressionResult, Compressor};
pub use fs::{is_compressed, matches_pattern, DirEntryInfo, DiskUsage, EntryKind, FileStat, Filesystem, LocalFilesystem};

use crate::error::TaskError;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::debug;

/// A regular file that matched the task's pattern, with its stat data.
#[derive(Debug, Clone)]
pub(crate) struct FileCandidate {
  pub path: PathBuf,
  pub name: String,
  pub modified: SystemTime,
  pub size: u64,
}

impl FileCandidate {
  /// Time since last modification. Future mtimes count as age zero.
  pub fn age(&self, now: SystemTime) -> Duration {
    now.duration_since(self.modified).unwrap_or(Duration::ZERO)
  }
}

/// Lists regular files in `dir` matching `pattern` and stats each one.
///
/// Failing to list `dir` is an error; a file that cannot be stat'ed is
/// skipped and counted in `errors`.
pub(crate) fn scan_files(
  fs: &dyn Filesystem,
  dir: &Path,
  pattern: Option<&str>,
  errors: &mut usize,
) -> Result<Vec<FileCandidate>, TaskError> {
  let entries = fs.read_dir(dir).map_err(|e| TaskError::io(dir, e))?;

  let mut files = Vec::with_capacity(entries.len());
  for entry in entries {
    if entry.kind != EntryKind::File || !matches_pattern(&entry.name, pattern) {
      continue;
    }
    let path = dir.join(&entry.name);
    match fs.stat(&path) {
      Ok(stat) => files.push(FileCandidate {
        path,
        name: entry.name,
        modified: stat.modified,
        size: stat.size,
      }),
      Err(e) => {
        *errors += 1;
        debug!(path = %path.display(), error = %e, "Failed to stat file during maintenance scan");
      }
    }
  }
  Ok(files)
}
