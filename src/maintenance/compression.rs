//! Compression trigger: hands aged files to a [`Compressor`].

use super::{is_compressed, scan_files, Filesystem};
use crate::error::TaskError;
use crate::job::TaskConfig;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

/// Result of a single `compress_file` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressionOutcome {
  pub success: bool,
  pub original_size: u64,
  pub compressed_size: u64,
  pub output_path: Option<PathBuf>,
  pub error_message: Option<String>,
}

impl CompressionOutcome {
  pub fn succeeded(original_size: u64, compressed_size: u64, output_path: impl Into<PathBuf>) -> Self {
    Self {
      success: true,
      original_size,
      compressed_size,
      output_path: Some(output_path.into()),
      error_message: None,
    }
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self {
      success: false,
      error_message: Some(message.into()),
      ..Self::default()
    }
  }
}

/// Byte-level compression codec.
///
/// Implementations write the compressed copy (to `output`, or a path of their
/// choosing when `None`) and leave `input` in place; the caller removes it.
pub trait Compressor: Send + Sync {
  fn compress_file(&self, input: &Path, output: Option<&Path>) -> CompressionOutcome;
}

impl<F> Compressor for F
where
  F: Fn(&Path, Option<&Path>) -> CompressionOutcome + Send + Sync,
{
  fn compress_file(&self, input: &Path, output: Option<&Path>) -> CompressionOutcome {
    self(input, output)
  }
}

/// Totals of one compression run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompressionResult {
  pub files_compressed: usize,
  pub bytes_before: u64,
  pub bytes_after: u64,
  pub bytes_saved: u64,
  pub errors: usize,
}

/// Compresses every uncompressed file in `dir` at least `min_age_seconds` old
/// and removes the originals.
///
/// Files with a compressed extension are skipped, as are files not matching
/// `config.file_pattern`. A failed compression or removal is counted in
/// `errors` and the run moves on.
///
/// # Errors
///
/// [`TaskError::Io`] if `dir` cannot be listed.
pub fn perform_compression(
  fs: &dyn Filesystem,
  compressor: &dyn Compressor,
  dir: &Path,
  config: &TaskConfig,
  now: SystemTime,
) -> Result<CompressionResult, TaskError> {
  let mut result = CompressionResult::default();
  let files = scan_files(fs, dir, config.file_pattern.as_deref(), &mut result.errors)?;
  let min_age = Duration::from_secs(config.min_age_seconds);

  for file in files {
    if is_compressed(&file.name) || file.age(now) < min_age {
      continue;
    }

    let outcome = compressor.compress_file(&file.path, None);
    if !outcome.success {
      result.errors += 1;
      warn!(
        path = %file.path.display(),
        error = outcome.error_message.as_deref().unwrap_or("unknown"),
        "Compression failed"
      );
      continue;
    }

    result.files_compressed += 1;
    result.bytes_before += outcome.original_size;
    result.bytes_after += outcome.compressed_size;
    debug!(
      path = %file.path.display(),
      original = outcome.original_size,
      compressed = outcome.compressed_size,
      "Compressed file"
    );

    if let Err(e) = fs.remove_file(&file.path) {
      result.errors += 1;
      warn!(path = %file.path.display(), error = %e, "Failed to remove original after compression");
    }
  }

  result.bytes_saved = result.bytes_before.saturating_sub(result.bytes_after);
  info!(
    dir = %dir.display(),
    files_compressed = result.files_compressed,
    bytes_saved = result.bytes_saved,
    errors = result.errors,
    "Compression run complete"
  );
  Ok(result)
}
