//! Per-worker scratch storage.
//!
//! Each pool worker owns one `ScratchArena`. Task bodies receive it as
//! `Option<&mut ScratchArena>` and may carve temporary byte slices out of it.
//! The worker calls [`ScratchArena::reset`] after every task, which rewinds the
//! bump offset without freeing the backing buffer, so steady-state tasks run
//! without touching the allocator.
//!
//! A task that needs more than the current capacity grows the buffer. On reset
//! the buffer is shrunk back to `retain_bytes` so one oversized task cannot pin
//! its peak allocation for the lifetime of the worker.

/// A bump-style byte arena that is rewound, not freed, between tasks.
#[derive(Debug)]
pub struct ScratchArena {
  buf: Vec<u8>,
  used: usize,
  retain_bytes: usize,
  high_water: usize,
  resets: u64,
}

impl ScratchArena {
  /// Creates an arena with `capacity` bytes reserved up front. The same value
  /// is used as the retention bound applied on `reset`.
  pub fn new(capacity: usize) -> Self {
    Self {
      buf: vec![0; capacity],
      used: 0,
      retain_bytes: capacity,
      high_water: 0,
      resets: 0,
    }
  }

  /// Hands out `len` zeroed bytes from the arena, growing it if needed.
  ///
  /// The returned slice borrows the arena mutably, so at most one live slice
  /// exists at a time.
  pub fn alloc(&mut self, len: usize) -> &mut [u8] {
    let start = self.used;
    let end = start.saturating_add(len);
    if end > self.buf.len() {
      self.buf.resize(end, 0);
    }
    self.used = end;
    self.high_water = self.high_water.max(end);
    let slice = &mut self.buf[start..end];
    slice.fill(0);
    slice
  }

  /// Rewinds the arena. Capacity above the retention bound is released.
  pub fn reset(&mut self) {
    self.used = 0;
    self.resets += 1;
    if self.buf.len() > self.retain_bytes {
      self.buf.truncate(self.retain_bytes);
      self.buf.shrink_to(self.retain_bytes);
    }
  }

  /// Bytes handed out since the last reset.
  pub fn used(&self) -> usize {
    self.used
  }

  /// Bytes currently backing the arena.
  pub fn capacity(&self) -> usize {
    self.buf.len()
  }

  /// Largest `used()` value ever observed.
  pub fn high_water(&self) -> usize {
    self.high_water
  }

  /// Number of times the arena has been reset.
  pub fn resets(&self) -> u64 {
    self.resets
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_alloc_is_contiguous_until_reset() {
    let mut arena = ScratchArena::new(64);
    arena.alloc(16).copy_from_slice(&[7u8; 16]);
    assert_eq!(arena.used(), 16);
    let second = arena.alloc(8);
    assert!(second.iter().all(|b| *b == 0));
    assert_eq!(arena.used(), 24);

    arena.reset();
    assert_eq!(arena.used(), 0);
    assert_eq!(arena.resets(), 1);
    assert_eq!(arena.capacity(), 64);
  }

  #[test]
  fn test_oversized_task_is_trimmed_on_reset() {
    let mut arena = ScratchArena::new(32);
    let big = arena.alloc(1024);
    assert_eq!(big.len(), 1024);
    assert_eq!(arena.capacity(), 1024);

    arena.reset();
    assert_eq!(arena.capacity(), 32);
    assert_eq!(arena.high_water(), 1024);
  }

  #[test]
  fn test_reused_bytes_are_zeroed() {
    let mut arena = ScratchArena::new(8);
    arena.alloc(8).fill(0xAB);
    arena.reset();
    assert!(arena.alloc(8).iter().all(|b| *b == 0));
  }
}
