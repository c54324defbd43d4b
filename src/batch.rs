//! Fixed-capacity record batches moved between pipeline stages
//!
//! A [`Chunk`] is filled in place: [`Chunk::push_back`] hands out the next
//! preallocated slot, the caller decodes straight into it and calls
//! [`Chunk::pop_back`] if decoding failed. Records are never removed from the
//! middle. Slots keep their previous contents, so whoever fills a slot must
//! overwrite every field it relies on.

use crate::pool::Recycle;

/// Append-only array of `N` records of one kind
pub struct Chunk<T, const N: usize> {
    items: Box<[T]>,
    len: usize,
    processed: usize,
}

impl<T: Default, const N: usize> Chunk<T, N> {
    /// Allocate a chunk with every slot default-initialised
    pub fn new() -> Self {
        Chunk {
            items: (0..N).map(|_| T::default()).collect(),
            len: 0,
            processed: 0,
        }
    }
}

impl<T: Default, const N: usize> Default for Chunk<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Chunk<T, N> {
    /// Claim the next slot, or `None` if the chunk is full
    pub fn push_back(&mut self) -> Option<&mut T> {
        let slot = self.items.get_mut(self.len)?;
        self.len += 1;
        Some(slot)
    }

    /// Append `value`, handing it back if the chunk is full
    pub fn push(&mut self, value: T) -> Result<(), T> {
        match self.push_back() {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(value),
        }
    }

    /// Give back the most recently claimed slot
    pub fn pop_back(&mut self) {
        self.len = self.len.saturating_sub(1);
        self.processed = self.processed.min(self.len);
    }

    /// The last filled record
    pub fn back(&self) -> Option<&T> {
        self.as_slice().last()
    }

    /// Forget all records, keeping the storage
    pub fn clear(&mut self) {
        self.len = 0;
        self.processed = 0;
    }

    /// Number of filled records
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no record is filled
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if every slot is filled
    pub fn is_full(&self) -> bool {
        self.len >= N
    }

    /// Maximum number of records
    pub const fn capacity(&self) -> usize {
        N
    }

    /// The filled records, in insertion order
    pub fn as_slice(&self) -> &[T] {
        &self.items[..self.len]
    }

    /// Iterate the filled records
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Number of leading records a consumer has already handled
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Record that `n` more records were handled
    pub fn mark_processed(&mut self, n: usize) {
        self.processed = (self.processed + n).min(self.len);
    }

    /// Records not yet handled
    pub fn unprocessed(&self) -> &[T] {
        &self.as_slice()[self.processed..]
    }

    /// Check if every filled record has been handled
    pub fn is_drained(&self) -> bool {
        self.processed >= self.len
    }
}

impl<'a, T, const N: usize> IntoIterator for &'a Chunk<T, N> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T, const N: usize> Recycle for Chunk<T, N> {
    fn recycle(&mut self) {
        self.clear();
    }
}

impl<T: std::fmt::Debug, const N: usize> std::fmt::Debug for Chunk<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("len", &self.len)
            .field("capacity", &N)
            .field("processed", &self.processed)
            .finish()
    }
}
