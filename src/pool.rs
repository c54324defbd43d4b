//! Typed free-list of reusable buffers
//!
//! Batches are large and created at a high rate, so they are recycled rather
//! than freed. [`BufferPool::acquire`] pops a spare buffer or allocates a new
//! one; dropping the returned [`Pooled`] handle pushes the buffer back, from
//! whichever thread it ends up on. The pool never shrinks.

use crate::error::{DecodeError, Result};
use parking_lot::Mutex;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Buffers that can be reset for reuse
pub trait Recycle {
    /// Return to the empty state without releasing storage
    fn recycle(&mut self);
}

struct PoolInner<T> {
    free: Mutex<Vec<Box<T>>>,
    allocated: AtomicUsize,
    limit: Option<usize>,
}

/// Shared pool of `T` buffers
///
/// Cloning the pool shares the same free-list.
pub struct BufferPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        BufferPool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Recycle + Default> BufferPool<T> {
    /// Create an unbounded pool
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// Create a pool that refuses to hold more than `limit` buffers at once
    pub fn with_limit(limit: Option<usize>) -> Self {
        BufferPool {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                allocated: AtomicUsize::new(0),
                limit,
            }),
        }
    }

    /// Take a spare buffer or allocate a fresh one
    pub fn acquire(&self) -> Result<Pooled<T>> {
        let spare = self.inner.free.lock().pop();
        let value = match spare {
            Some(value) => value,
            None => self.allocate()?,
        };
        Ok(Pooled {
            value: ManuallyDrop::new(value),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Allocate buffers up front so the first batches avoid the allocator
    pub fn prefill(&self, count: usize) -> Result<()> {
        for _ in 0..count {
            let value = self.allocate()?;
            self.inner.free.lock().push(value);
        }
        Ok(())
    }

    fn allocate(&self) -> Result<Box<T>> {
        let allocated = self.inner.allocated.fetch_add(1, Ordering::AcqRel);
        if let Some(limit) = self.inner.limit {
            if allocated >= limit {
                self.inner.allocated.fetch_sub(1, Ordering::AcqRel);
                warn!(limit, "buffer pool exhausted");
                return Err(DecodeError::PoolExhausted(allocated));
            }
        }
        Ok(Box::default())
    }
}

impl<T: Recycle + Default> Default for BufferPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BufferPool<T> {
    /// Buffers allocated so far, in use or spare
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Acquire)
    }

    /// Buffers waiting in the free-list
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }
}

/// A buffer on loan from a [`BufferPool`]
///
/// Dereferences to the buffer; dropping it recycles the buffer into the pool.
pub struct Pooled<T: Recycle> {
    value: ManuallyDrop<Box<T>>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        // SAFETY: `value` is never touched again after this
        let mut value = unsafe { ManuallyDrop::take(&mut self.value) };
        value.recycle();
        self.pool.free.lock().push(value);
    }
}

impl<T: Recycle + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pooled").field(&**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Chunk;
    use std::thread;

    type Batch = Chunk<u64, 16>;

    #[test]
    fn test_release_returns_buffer() -> Result<()> {
        let pool = BufferPool::<Batch>::new();
        {
            let mut batch = pool.acquire()?;
            batch.push(42).unwrap();
        }
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.available(), 1);

        let batch = pool.acquire()?;
        assert!(batch.is_empty());
        assert_eq!(pool.allocated(), 1);
        Ok(())
    }

    #[test]
    fn test_limit_escalates_exhaustion() -> Result<()> {
        let pool = BufferPool::<Batch>::with_limit(Some(2));
        let a = pool.acquire()?;
        let _b = pool.acquire()?;
        assert_eq!(pool.acquire().unwrap_err(), DecodeError::PoolExhausted(2));

        drop(a);
        assert!(pool.acquire().is_ok());
        Ok(())
    }

    #[test]
    fn test_prefill() -> Result<()> {
        let pool = BufferPool::<Batch>::new();
        pool.prefill(3)?;
        assert_eq!(pool.available(), 3);
        let _batch = pool.acquire()?;
        assert_eq!(pool.allocated(), 3);
        assert_eq!(pool.available(), 2);
        Ok(())
    }

    #[test]
    fn test_release_from_other_thread() -> Result<()> {
        let pool = BufferPool::<Batch>::new();
        let batch = pool.acquire()?;
        thread::spawn(move || drop(batch)).join().unwrap();
        assert_eq!(pool.available(), 1);
        Ok(())
    }
}
