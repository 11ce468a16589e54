//! Bounded, priority-aware work queue shared between pool threads.
//!
//! The queue is a plain `Vec` behind a `parking_lot::Mutex`. `pop` scans for
//! the highest priority (first pushed wins a tie), which is O(n) in queue depth;
//! depth is bounded by `capacity` so the scan stays short. `steal` takes from
//! the back, the cheapest removal point, and is only used by peer workers.
//!
//! A full queue never blocks the producer: `push` hands the item back.

use crate::task::WorkItem;

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Why a non-blocking push was rejected. Both variants return the item.
#[derive(Debug)]
pub enum TryPushError {
  Full(WorkItem),
  Contended(WorkItem),
}

#[derive(Debug)]
pub struct WorkQueue {
  items: Mutex<Vec<WorkItem>>,
  available: Condvar,
  capacity: usize,
}

impl WorkQueue {
  pub fn new(capacity: usize) -> Self {
    Self {
      items: Mutex::new(Vec::with_capacity(capacity.min(1024))),
      available: Condvar::new(),
      capacity,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Appends `item` and wakes one waiter. Returns the item if the queue is full.
  pub fn push(&self, item: WorkItem) -> Result<(), WorkItem> {
    let mut items = self.items.lock();
    if items.len() >= self.capacity {
      return Err(item);
    }
    items.push(item);
    drop(items);
    self.available.notify_one();
    Ok(())
  }

  /// Like [`WorkQueue::push`] but gives up immediately if the lock is held.
  pub fn try_push(&self, item: WorkItem) -> Result<(), TryPushError> {
    let Some(mut items) = self.items.try_lock() else {
      return Err(TryPushError::Contended(item));
    };
    if items.len() >= self.capacity {
      return Err(TryPushError::Full(item));
    }
    items.push(item);
    drop(items);
    self.available.notify_one();
    Ok(())
  }

  /// Pushes every item under a single lock acquisition.
  ///
  /// Items that do not fit are dropped. Returns how many were accepted.
  pub fn push_batch<I>(&self, batch: I) -> usize
  where
    I: IntoIterator<Item = WorkItem>,
  {
    let mut accepted = 0;
    let mut items = self.items.lock();
    for item in batch {
      if items.len() >= self.capacity {
        continue;
      }
      items.push(item);
      accepted += 1;
    }
    drop(items);
    if accepted > 0 {
      self.available.notify_all();
    }
    accepted
  }

  /// Removes the highest-priority item; among equals the earliest pushed.
  pub fn pop(&self) -> Option<WorkItem> {
    let mut items = self.items.lock();
    take_highest(&mut items)
  }

  /// Waits up to `timeout` for an item if the queue is empty, then pops.
  pub fn pop_wait(&self, timeout: Duration) -> Option<WorkItem> {
    let mut items = self.items.lock();
    if items.is_empty() {
      let _ = self.available.wait_for(&mut items, timeout);
    }
    take_highest(&mut items)
  }

  /// Removes the most recently pushed item. Used by peer workers only.
  pub fn steal(&self) -> Option<WorkItem> {
    self.items.lock().pop()
  }

  pub fn len(&self) -> usize {
    self.items.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.lock().is_empty()
  }

  /// Drops every queued item, returning how many were discarded.
  pub fn clear(&self) -> usize {
    let mut items = self.items.lock();
    let discarded = items.len();
    items.clear();
    discarded
  }

  /// Wakes every thread blocked in `pop_wait`.
  pub fn notify_all(&self) {
    self.available.notify_all();
  }
}

fn take_highest(items: &mut Vec<WorkItem>) -> Option<WorkItem> {
  let mut best: Option<usize> = None;
  for (index, item) in items.iter().enumerate() {
    match best {
      Some(current) if items[current].priority >= item.priority => {}
      _ => best = Some(index),
    }
  }
  // `remove` keeps insertion order for the remaining items, which the
  // first-pushed tie-break depends on.
  best.map(|index| items.remove(index))
}
