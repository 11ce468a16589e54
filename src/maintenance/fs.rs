//! Filesystem access used by the maintenance bodies.
//!
//! Everything goes through the [`Filesystem`] trait so the scheduler can be
//! pointed at a fake in tests. [`LocalFilesystem`] is the real thing.

use std::fmt;
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Extensions treated as already compressed.
const COMPRESSED_EXTENSIONS: &[&str] = &["gz", "zst", "lz4", "xz", "bz2", "zip", "lzma"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
  File,
  Directory,
  Other,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
  pub name: String,
  pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
  pub modified: SystemTime,
  pub size: u64,
}

/// Capacity of the volume holding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
  pub total_bytes: u64,
  pub available_bytes: u64,
}

impl DiskUsage {
  /// Percentage of the volume in use, `0.0` for an empty (zero-sized) volume.
  pub fn used_percent(&self) -> f64 {
    if self.total_bytes == 0 {
      return 0.0;
    }
    let used = self.total_bytes.saturating_sub(self.available_bytes);
    used as f64 * 100.0 / self.total_bytes as f64
  }
}

/// The filesystem operations maintenance tasks need.
pub trait Filesystem: Send + Sync + fmt::Debug {
  /// Lists the direct children of `dir`.
  fn read_dir(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>>;
  fn stat(&self, path: &Path) -> io::Result<FileStat>;
  fn remove_file(&self, path: &Path) -> io::Result<()>;
  fn disk_usage(&self, path: &Path) -> io::Result<DiskUsage>;
}

/// [`Filesystem`] backed by `std::fs`, with volume queries through `fs2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl Filesystem for LocalFilesystem {
  fn read_dir(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
      let entry = entry?;
      let kind = match entry.file_type() {
        Ok(ft) if ft.is_file() => EntryKind::File,
        Ok(ft) if ft.is_dir() => EntryKind::Directory,
        _ => EntryKind::Other,
      };
      entries.push(DirEntryInfo {
        name: entry.file_name().to_string_lossy().into_owned(),
        kind,
      });
    }
    Ok(entries)
  }

  fn stat(&self, path: &Path) -> io::Result<FileStat> {
    let metadata = std::fs::metadata(path)?;
    Ok(FileStat {
      modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
      size: metadata.len(),
    })
  }

  fn remove_file(&self, path: &Path) -> io::Result<()> {
    std::fs::remove_file(path)
  }

  fn disk_usage(&self, path: &Path) -> io::Result<DiskUsage> {
    Ok(DiskUsage {
      total_bytes: fs2::total_space(path)?,
      available_bytes: fs2::available_space(path)?,
    })
  }
}

/// Matches a file name against a maintenance pattern.
///
/// `None` and `"*"` match everything, `"*suffix"` matches names ending in
/// `suffix`, anything else must equal the name.
pub fn matches_pattern(name: &str, pattern: Option<&str>) -> bool {
  match pattern {
    None | Some("*") => true,
    Some(pattern) => match pattern.strip_prefix('*') {
      Some(suffix) => name.ends_with(suffix),
      None => name == pattern,
    },
  }
}

/// True if the name carries a known compressed extension.
pub fn is_compressed(name: &str) -> bool {
  Path::new(name)
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      COMPRESSED_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
    .unwrap_or(false)
}
