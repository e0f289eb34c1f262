//! Word buffers moved between the FIFO worker and the readers
//!
//! The [`Pool`] owns a fixed number of buffers of a fixed capacity.
//! A buffer taken from the pool is a [`Handle`] which puts the
//! buffer back when it is dropped, so a buffer is always either
//! free, held by the worker or sitting in the [`Queue`].

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref,
               DerefMut};
use std::sync::atomic::{AtomicUsize,
                        Ordering};
use std::sync::{Arc,
                Mutex,
                MutexGuard};

use crate::errors::{ErrorCode,
                    PixieError};

fn locked<T>(lock : &Mutex<T>) -> MutexGuard<'_, T> {
  match lock.lock() {
    Ok(g)         => g,
    Err(poisoned) => poisoned.into_inner(),
  }
}

struct PoolInner {
  free   : Mutex<Vec<Vec<u32>>>,
  count  : AtomicUsize,
  number : AtomicUsize,
  size   : AtomicUsize,
}

impl PoolInner {
  fn release(&self, mut buf : Vec<u32>) {
    buf.clear();
    let mut free = locked(&self.free);
    free.push(buf);
    self.count.store(free.len(), Ordering::SeqCst);
  }
}

/// A fixed set of equally sized word buffers
#[derive(Clone)]
pub struct Pool {
  inner : Arc<PoolInner>,
}

impl Pool {
  pub fn new() -> Self {
    Self {
      inner : Arc::new(PoolInner {
        free   : Mutex::new(Vec::new()),
        count  : AtomicUsize::new(0),
        number : AtomicUsize::new(0),
        size   : AtomicUsize::new(0),
      })
    }
  }

  /// Allocate `number` buffers which hold `size` words each
  pub fn create(&self, number : usize, size : usize) -> Result<(), PixieError> {
    let mut free = locked(&self.inner.free);
    if self.inner.number.load(Ordering::SeqCst) != 0 {
      return Err(PixieError::new(ErrorCode::InternalFailure, "pool: already created"));
    }
    for _ in 0..number {
      free.push(Vec::with_capacity(size));
    }
    self.inner.number.store(number, Ordering::SeqCst);
    self.inner.size.store(size, Ordering::SeqCst);
    self.inner.count.store(free.len(), Ordering::SeqCst);
    debug!("Created buffer pool with {} buffers of {} words", number, size);
    Ok(())
  }

  /// Free the buffers, every buffer has to be back in the pool
  pub fn destroy(&self) -> Result<(), PixieError> {
    let mut free = locked(&self.inner.free);
    if free.len() != self.inner.number.load(Ordering::SeqCst) {
      return Err(PixieError::new(ErrorCode::InternalFailure, "pool: destroy: buffers in use"));
    }
    free.clear();
    self.inner.number.store(0, Ordering::SeqCst);
    self.inner.size.store(0, Ordering::SeqCst);
    self.inner.count.store(0, Ordering::SeqCst);
    Ok(())
  }

  /// Take a free buffer, never blocks
  pub fn request(&self) -> Option<Handle> {
    let mut free = locked(&self.inner.free);
    let buf = free.pop()?;
    self.inner.count.store(free.len(), Ordering::SeqCst);
    Some(Handle {
      buffer : buf,
      size   : self.inner.size.load(Ordering::SeqCst),
      pool   : Arc::clone(&self.inner),
    })
  }

  pub fn valid(&self) -> bool {
    self.number() != 0
  }

  pub fn empty(&self) -> bool {
    self.count() == 0
  }

  pub fn full(&self) -> bool {
    self.number() != 0 && self.count() == self.number()
  }

  /// Number of free buffers
  pub fn count(&self) -> usize {
    self.inner.count.load(Ordering::SeqCst)
  }

  /// Number of buffers the pool was created with
  pub fn number(&self) -> usize {
    self.inner.number.load(Ordering::SeqCst)
  }

  /// Capacity of a buffer in words
  pub fn size(&self) -> usize {
    self.inner.size.load(Ordering::SeqCst)
  }
}

impl Default for Pool {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for Pool {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<Pool: number={} size={} count={}>", self.number(), self.size(), self.count())
  }
}

/// A buffer on loan from a [`Pool`]
pub struct Handle {
  buffer : Vec<u32>,
  size   : usize,
  pool   : Arc<PoolInner>,
}

impl Handle {
  /// Most words the buffer can hold
  pub fn capacity_words(&self) -> usize {
    self.size
  }

  /// Free space left in the buffer
  pub fn space(&self) -> usize {
    self.size.saturating_sub(self.len())
  }
}

impl Deref for Handle {
  type Target = Vec<u32>;

  fn deref(&self) -> &Vec<u32> {
    &self.buffer
  }
}

impl DerefMut for Handle {
  fn deref_mut(&mut self) -> &mut Vec<u32> {
    &mut self.buffer
  }
}

impl Drop for Handle {
  fn drop(&mut self) {
    let buf = std::mem::take(&mut self.buffer);
    self.pool.release(buf);
  }
}

struct QueueInner {
  buffers : VecDeque<Handle>,
  size    : usize,
}

/// Filled buffers in arrival order
pub struct Queue {
  inner : Mutex<QueueInner>,
  size  : AtomicUsize,
}

impl Queue {
  pub fn new() -> Self {
    Self {
      inner : Mutex::new(QueueInner {
        buffers : VecDeque::new(),
        size    : 0,
      }),
      size  : AtomicUsize::new(0),
    }
  }

  pub fn push(&self, buf : Handle) {
    let mut inner = locked(&self.inner);
    inner.size += buf.len();
    inner.buffers.push_back(buf);
    self.size.store(inner.size, Ordering::SeqCst);
  }

  pub fn pop(&self) -> Option<Handle> {
    let mut inner = locked(&self.inner);
    let buf = inner.buffers.pop_front()?;
    inner.size -= buf.len();
    self.size.store(inner.size, Ordering::SeqCst);
    Some(buf)
  }

  /// Move words into `to` in arrival order. Returns the number of
  /// words moved, which is less than `to.len()` if the queue runs
  /// dry. A partly consumed buffer stays at the head.
  pub fn copy(&self, to : &mut [u32]) -> usize {
    let mut inner = locked(&self.inner);
    let mut moved = 0usize;
    while moved < to.len() {
      let front = match inner.buffers.front_mut() {
        None        => break,
        Some(front) => front,
      };
      let n = std::cmp::min(to.len() - moved, front.len());
      to[moved..moved + n].copy_from_slice(&front[..n]);
      moved += n;
      if n == front.len() {
        // the handle returns the buffer to its pool
        inner.buffers.pop_front();
      } else {
        front.drain(..n);
      }
    }
    inner.size -= moved;
    self.size.store(inner.size, Ordering::SeqCst);
    moved
  }

  /// Merge the data of partly filled buffers into fewer buffers
  /// and hand the emptied ones back to the pool
  pub fn compact(&self) {
    let mut inner = locked(&self.inner);
    let mut compacted = VecDeque::<Handle>::with_capacity(inner.buffers.len());
    while let Some(mut buf) = inner.buffers.pop_front() {
      if let Some(last) = compacted.back_mut() {
        let n = std::cmp::min(last.space(), buf.len());
        if n > 0 {
          last.extend_from_slice(&buf[..n]);
          buf.drain(..n);
        }
      }
      if !buf.is_empty() {
        compacted.push_back(buf);
      }
    }
    inner.buffers = compacted;
  }

  pub fn empty(&self) -> bool {
    self.size() == 0
  }

  /// Number of words queued
  pub fn size(&self) -> usize {
    self.size.load(Ordering::SeqCst)
  }

  /// Number of buffers queued
  pub fn count(&self) -> usize {
    locked(&self.inner).buffers.len()
  }

  /// Drop all queued data, the buffers go back to the pool
  pub fn flush(&self) {
    let mut inner = locked(&self.inner);
    inner.buffers.clear();
    inner.size = 0;
    self.size.store(0, Ordering::SeqCst);
  }
}

impl Default for Queue {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for Queue {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<Queue: size={} count={}>", self.size(), self.count())
  }
}

#[cfg(test)]
mod test_buffer {
  use super::*;

  fn filled(pool : &Pool, words : &[u32]) -> Handle {
    let mut buf = pool.request().unwrap();
    buf.extend_from_slice(words);
    buf
  }

  #[test]
  fn pool_create_destroy() {
    let pool = Pool::new();
    assert!(pool.empty());
    assert!(!pool.full());
    pool.create(100, 8 * 1024).unwrap();
    assert!(pool.full());
    assert_eq!(pool.count(), 100);
    assert_eq!(pool.size(), 8 * 1024);
    assert!(pool.create(1, 1).is_err());
    {
      let _held = pool.request().unwrap();
      assert!(pool.destroy().is_err());
    }
    pool.destroy().unwrap();
    assert_eq!(pool.number(), 0);
    assert!(pool.empty());
  }

  #[test]
  fn pool_request_release() {
    let pool = Pool::new();
    pool.create(3, 16).unwrap();
    let a = pool.request().unwrap();
    assert_eq!(a.len(), 0);
    assert_eq!(a.capacity_words(), 16);
    let b = pool.request().unwrap();
    let c = pool.request().unwrap();
    assert!(pool.request().is_none());
    assert!(pool.empty());
    drop(a);
    assert_eq!(pool.count(), 1);
    drop(b);
    drop(c);
    assert!(pool.full());
  }

  #[test]
  fn queue_copy_keeps_order() {
    let pool = Pool::new();
    pool.create(4, 8).unwrap();
    let queue = Queue::new();
    queue.push(filled(&pool, &[1, 2, 3]));
    queue.push(filled(&pool, &[4, 5, 6, 7]));
    assert_eq!(queue.size(), 7);
    assert_eq!(queue.count(), 2);
    let mut out = [0u32; 4];
    assert_eq!(queue.copy(&mut out), 4);
    assert_eq!(out, [1, 2, 3, 4]);
    assert_eq!(queue.size(), 3);
    assert_eq!(pool.count(), 3);
    let mut out = [0u32; 10];
    assert_eq!(queue.copy(&mut out), 3);
    assert_eq!(&out[..3], &[5, 6, 7]);
    assert!(queue.empty());
    assert!(pool.full());
  }

  #[test]
  fn queue_compact_and_flush() {
    let pool = Pool::new();
    pool.create(4, 8).unwrap();
    let queue = Queue::new();
    queue.push(filled(&pool, &[1, 2, 3]));
    queue.push(filled(&pool, &[4, 5, 6]));
    queue.push(filled(&pool, &[7, 8, 9]));
    assert_eq!(pool.count(), 1);
    queue.compact();
    assert_eq!(queue.count(), 2);
    assert_eq!(queue.size(), 9);
    assert_eq!(pool.count(), 2);
    let mut out = [0u32; 9];
    assert_eq!(queue.copy(&mut out), 9);
    assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8, 9]);
    queue.push(filled(&pool, &[1]));
    queue.flush();
    assert!(queue.empty());
    assert!(pool.full());
  }
}
