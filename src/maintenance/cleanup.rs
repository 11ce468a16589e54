//! Retention enforcement for a log directory.
//!
//! Matching files are sorted oldest first (by mtime) and pruned in three
//! passes: by age, by count, then by total size. Each file is considered by
//! at most one pass.

use super::{is_compressed, scan_files, Compressor, FileCandidate, Filesystem};
use crate::error::TaskError;
use crate::job::TaskConfig;

use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

/// Totals of one cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CleanupResult {
  pub files_deleted: usize,
  pub files_compressed: usize,
  /// Bytes released. A file compressed before deletion contributes its
  /// original size minus the compressed copy.
  pub bytes_freed: u64,
  pub errors: usize,
}

/// Enforces `config`'s retention limits on `dir`.
///
/// 1. Files older than `max_age_seconds` (when non-zero) are deleted, after
///    being compressed first if `compress_before_delete` is set.
/// 2. While more than `max_files` files remain, the oldest is deleted.
/// 3. While the remaining files exceed `max_total_size` bytes, the oldest is
///    deleted.
///
/// Per-file failures are counted in `errors` and never abort the run. A file
/// whose pre-compression fails survives the age pass but remains subject to
/// the count and size passes, which delete it uncompressed.
///
/// # Errors
///
/// [`TaskError::Io`] if `dir` cannot be listed.
pub fn perform_cleanup(
  fs: &dyn Filesystem,
  compressor: Option<&dyn Compressor>,
  dir: &Path,
  config: &TaskConfig,
  now: SystemTime,
) -> Result<CleanupResult, TaskError> {
  let start = Instant::now();
  let mut result = CleanupResult::default();

  let mut files = scan_files(fs, dir, config.file_pattern.as_deref(), &mut result.errors)?;
  files.sort_by_key(|file| file.modified);
  let mut handled = vec![false; files.len()];

  // 1. Age
  if config.max_age_seconds > 0 {
    let max_age = Duration::from_secs(config.max_age_seconds);
    for (index, file) in files.iter().enumerate() {
      if file.age(now) <= max_age {
        continue;
      }

      let mut freed = file.size;
      if config.compress_before_delete && !is_compressed(&file.name) {
        match precompress(compressor, file) {
          Some(compressed_size) => {
            result.files_compressed += 1;
            freed = freed.saturating_sub(compressed_size);
          }
          // Kept files still count toward the count and size limits.
          None => {
            result.errors += 1;
            continue;
          }
        }
      }
      handled[index] = true;
      delete(fs, file, freed, &mut result);
    }
  }

  // 2. Count
  if let Some(max_files) = config.max_files {
    let mut remaining = handled.iter().filter(|done| !**done).count();
    for (index, file) in files.iter().enumerate() {
      if remaining <= max_files {
        break;
      }
      if handled[index] {
        continue;
      }
      handled[index] = true;
      remaining -= 1;
      delete(fs, file, file.size, &mut result);
    }
  }

  // 3. Size
  if let Some(max_total_size) = config.max_total_size {
    let mut total: u64 = files
      .iter()
      .zip(&handled)
      .filter(|(_, done)| !**done)
      .map(|(file, _)| file.size)
      .sum();
    for (index, file) in files.iter().enumerate() {
      if total <= max_total_size {
        break;
      }
      if handled[index] {
        continue;
      }
      handled[index] = true;
      total = total.saturating_sub(file.size);
      delete(fs, file, file.size, &mut result);
    }
  }

  info!(
    dir = %dir.display(),
    files_deleted = result.files_deleted,
    files_compressed = result.files_compressed,
    bytes_freed = result.bytes_freed,
    errors = result.errors,
    duration_ms = start.elapsed().as_millis() as u64,
    "Cleanup run complete"
  );
  Ok(result)
}

/// Returns the compressed size on success.
fn precompress(compressor: Option<&dyn Compressor>, file: &FileCandidate) -> Option<u64> {
  let Some(compressor) = compressor else {
    warn!(path = %file.path.display(), "compress_before_delete set but no compressor configured; keeping file");
    return None;
  };
  let outcome = compressor.compress_file(&file.path, None);
  if outcome.success {
    Some(outcome.compressed_size)
  } else {
    warn!(
      path = %file.path.display(),
      error = outcome.error_message.as_deref().unwrap_or("unknown"),
      "Pre-delete compression failed; keeping file"
    );
    None
  }
}

fn delete(fs: &dyn Filesystem, file: &FileCandidate, freed: u64, result: &mut CleanupResult) {
  match fs.remove_file(&file.path) {
    Ok(()) => {
      result.files_deleted += 1;
      result.bytes_freed += freed;
      debug!(path = %file.path.display(), size = file.size, "Deleted file");
    }
    Err(e) => {
      // Log but continue; another process may have removed it already.
      result.errors += 1;
      debug!(path = %file.path.display(), error = %e, "Failed to delete file during cleanup");
    }
  }
}
