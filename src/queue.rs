//! Bounded batch queues connecting the pipeline stages
//!
//! Two flavours share one contract: a push never overwrites an unconsumed
//! slot and a pop never yields a slot that was not pushed.
//!
//! - [`spsc`] creates a lock-free single-producer/single-consumer ring. The
//!   handles are `Send` but not `Sync`, so the one-producer/one-consumer rule
//!   is enforced by the type system. A full ring rejects the push.
//! - [`BlockingQueue`] is a mutex/condvar ring for any number of threads.
//!   `push` blocks for space, `pop_timeout` blocks for an item up to a
//!   deadline and tells a timeout apart from a closed queue.
//!
//! Both capacities must be powers of two; occupancy is `back - front` on
//! monotonically increasing counters wrapped with a mask.

use crate::error::{DecodeError, Result};
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default wait of [`BlockingQueue::pop`]
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_secs(5);

/// A rejected push; the value is handed back
#[derive(PartialEq, Eq)]
pub enum PushError<T> {
    /// Every slot is occupied
    Full(T),
    /// The receiving side is gone
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the value that was not pushed
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(v) | PushError::Closed(v) => v,
        }
    }

    /// Check if the push may succeed later
    pub fn is_full(&self) -> bool {
        matches!(self, PushError::Full(_))
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full(_) => f.write_str("Full(..)"),
            PushError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full(_) => f.write_str("queue full"),
            PushError::Closed(_) => f.write_str("queue closed"),
        }
    }
}

impl<T> std::error::Error for PushError<T> {}

/// Why a pop returned nothing
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// Nothing queued right now
    #[error("queue empty")]
    Empty,
    /// Nothing arrived before the deadline
    #[error("timed out waiting for an item")]
    Timeout,
    /// Nothing queued and nothing ever will be
    #[error("queue closed")]
    Closed,
}

/// Producer side of a stage connection
pub trait BatchSink<T> {
    /// Check if a push would be rejected for lack of space
    fn is_full(&self) -> bool;

    /// Check if the consuming side is gone and pushes can never succeed
    fn is_closed(&self) -> bool;

    /// Push without blocking
    fn send(&self, value: T) -> std::result::Result<(), PushError<T>>;
}

/// Consumer side of a stage connection
pub trait BatchSource<T> {
    /// Pop without blocking
    fn recv(&self) -> std::result::Result<T, PopError>;

    /// Check if nothing is queued
    fn is_empty(&self) -> bool;

    /// Check if the producing side has finished
    fn is_closed(&self) -> bool;
}

fn check_capacity(capacity: usize) -> Result<()> {
    if !capacity.is_power_of_two() {
        return Err(DecodeError::invalid_config(format!(
            "queue capacity {} is not a power of two",
            capacity
        )));
    }
    Ok(())
}

struct Ring<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    front: CachePadded<AtomicUsize>,
    back: CachePadded<AtomicUsize>,
    closed: AtomicBool,
}

// SAFETY: a slot is written only by the producer before `back` is published
// and read only by the consumer before `front` is published.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        let front = self.front.load(Ordering::Acquire);
        let back = self.back.load(Ordering::Acquire);
        back.wrapping_sub(front)
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let back = *self.back.get_mut();
        let mut i = *self.front.get_mut();
        while i != back {
            // SAFETY: slots between front and back hold pushed, unpopped values
            unsafe { self.slots[i & self.mask].get_mut().assume_init_drop() };
            i = i.wrapping_add(1);
        }
    }
}

/// Create a lock-free single-producer/single-consumer ring
///
/// Fails with [`DecodeError::InvalidConfig`] unless `capacity` is a power of
/// two. Dropping either handle closes the ring.
pub fn spsc<T>(capacity: usize) -> Result<(SpscProducer<T>, SpscConsumer<T>)> {
    check_capacity(capacity)?;
    let ring = Arc::new(Ring {
        slots: (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect(),
        mask: capacity - 1,
        front: CachePadded::new(AtomicUsize::new(0)),
        back: CachePadded::new(AtomicUsize::new(0)),
        closed: AtomicBool::new(false),
    });
    Ok((
        SpscProducer {
            ring: Arc::clone(&ring),
            _not_sync: PhantomData,
        },
        SpscConsumer {
            ring,
            _not_sync: PhantomData,
        },
    ))
}

/// Writing half of an SPSC ring
pub struct SpscProducer<T> {
    ring: Arc<Ring<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> SpscProducer<T> {
    /// Push `value`, handing it back if the ring is full or closed
    pub fn push(&self, value: T) -> std::result::Result<(), PushError<T>> {
        let ring = &*self.ring;
        if ring.closed.load(Ordering::Acquire) {
            return Err(PushError::Closed(value));
        }
        let back = ring.back.load(Ordering::Relaxed);
        let front = ring.front.load(Ordering::Acquire);
        if back.wrapping_sub(front) >= ring.capacity() {
            return Err(PushError::Full(value));
        }
        // SAFETY: the slot at `back` is free and the consumer will not read it
        // until the store below publishes it
        unsafe { (*ring.slots[back & ring.mask].get()).write(value) };
        ring.back.store(back.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Close the ring; the consumer drains what is left
    pub fn close(&self) {
        self.ring.closed.store(true, Ordering::Release);
    }

    /// Check if either side has closed the ring
    pub fn is_closed(&self) -> bool {
        self.ring.closed.load(Ordering::Acquire)
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if every slot is occupied
    pub fn is_full(&self) -> bool {
        self.len() >= self.ring.capacity()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T> Drop for SpscProducer<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> fmt::Debug for SpscProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpscProducer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Reading half of an SPSC ring
pub struct SpscConsumer<T> {
    ring: Arc<Ring<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> SpscConsumer<T> {
    /// Pop the oldest item
    ///
    /// Returns [`PopError::Closed`] only once the producer is gone and every
    /// item it pushed has been popped.
    pub fn pop(&self) -> std::result::Result<T, PopError> {
        let ring = &*self.ring;
        let front = ring.front.load(Ordering::Relaxed);
        let closed = ring.closed.load(Ordering::Acquire);
        let back = ring.back.load(Ordering::Acquire);
        if front == back {
            return Err(if closed {
                PopError::Closed
            } else {
                PopError::Empty
            });
        }
        // SAFETY: `front != back`, so the producer published this slot and
        // will not touch it again until `front` moves past it
        let value = unsafe { (*ring.slots[front & ring.mask].get()).assume_init_read() };
        ring.front.store(front.wrapping_add(1), Ordering::Release);
        Ok(value)
    }

    /// Check if the producer has closed the ring
    pub fn is_closed(&self) -> bool {
        self.ring.closed.load(Ordering::Acquire)
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T> Drop for SpscConsumer<T> {
    fn drop(&mut self) {
        self.ring.closed.store(true, Ordering::Release);
    }
}

impl<T> fmt::Debug for SpscConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpscConsumer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T> BatchSink<T> for SpscProducer<T> {
    fn is_full(&self) -> bool {
        SpscProducer::is_full(self)
    }

    fn is_closed(&self) -> bool {
        SpscProducer::is_closed(self)
    }

    fn send(&self, value: T) -> std::result::Result<(), PushError<T>> {
        self.push(value)
    }
}

impl<T> BatchSource<T> for SpscConsumer<T> {
    fn recv(&self) -> std::result::Result<T, PopError> {
        self.pop()
    }

    fn is_empty(&self) -> bool {
        SpscConsumer::is_empty(self)
    }

    fn is_closed(&self) -> bool {
        SpscConsumer::is_closed(self)
    }
}

struct State<T> {
    slots: Box<[Option<T>]>,
    front: usize,
    back: usize,
    closed: bool,
}

impl<T> State<T> {
    fn len(&self) -> usize {
        self.back.wrapping_sub(self.front)
    }

    fn is_full(&self) -> bool {
        self.len() >= self.slots.len()
    }

    fn put(&mut self, mask: usize, value: T) {
        self.slots[self.back & mask] = Some(value);
        self.back = self.back.wrapping_add(1);
    }

    fn take(&mut self, mask: usize) -> Option<T> {
        if self.front == self.back {
            return None;
        }
        let value = self.slots[self.front & mask].take();
        self.front = self.front.wrapping_add(1);
        value
    }
}

/// Blocking multi-producer/multi-consumer ring
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    mask: usize,
    pop_timeout: Duration,
}

impl<T> BlockingQueue<T> {
    /// Create a queue of `capacity` slots whose [`pop`](Self::pop) waits up
    /// to `pop_timeout`
    pub fn new(capacity: usize, pop_timeout: Duration) -> Result<Self> {
        check_capacity(capacity)?;
        Ok(BlockingQueue {
            state: Mutex::new(State {
                slots: (0..capacity).map(|_| None).collect(),
                front: 0,
                back: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            mask: capacity - 1,
            pop_timeout,
        })
    }

    /// Create a queue with the default pop timeout
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::new(capacity, DEFAULT_POP_TIMEOUT)
    }

    /// Push `value`, waiting for a free slot
    ///
    /// Fails only if the queue is closed before space frees up.
    pub fn push(&self, value: T) -> std::result::Result<(), PushError<T>> {
        let mut state = self.state.lock();
        while state.is_full() && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(PushError::Closed(value));
        }
        state.put(self.mask, value);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Push `value` only if a slot is free right now
    pub fn try_push(&self, value: T) -> std::result::Result<(), PushError<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PushError::Closed(value));
        }
        if state.is_full() {
            return Err(PushError::Full(value));
        }
        state.put(self.mask, value);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop the oldest item, waiting up to the configured timeout
    pub fn pop(&self) -> std::result::Result<T, PopError> {
        self.pop_timeout(self.pop_timeout)
    }

    /// Pop the oldest item, waiting up to `timeout`
    ///
    /// Items pushed before [`close`](Self::close) are still delivered;
    /// [`PopError::Closed`] means the queue is closed and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> std::result::Result<T, PopError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.take(self.mask) {
                drop(state);
                self.not_full.notify_one();
                return Ok(value);
            }
            if state.closed {
                return Err(PopError::Closed);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                if let Some(value) = state.take(self.mask) {
                    drop(state);
                    self.not_full.notify_one();
                    return Ok(value);
                }
                return Err(if state.closed {
                    PopError::Closed
                } else {
                    PopError::Timeout
                });
            }
        }
    }

    /// Pop the oldest item without waiting
    pub fn try_pop(&self) -> std::result::Result<T, PopError> {
        let mut state = self.state.lock();
        match state.take(self.mask) {
            Some(value) => {
                drop(state);
                self.not_full.notify_one();
                Ok(value)
            }
            None if state.closed => Err(PopError::Closed),
            None => Err(PopError::Empty),
        }
    }

    /// Refuse further pushes and wake every waiter
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Check if [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if every slot is occupied
    pub fn is_full(&self) -> bool {
        self.state.lock().is_full()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BlockingQueue")
            .field("len", &state.len())
            .field("capacity", &self.capacity())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> BatchSink<T> for BlockingQueue<T> {
    fn is_full(&self) -> bool {
        BlockingQueue::is_full(self)
    }

    fn is_closed(&self) -> bool {
        BlockingQueue::is_closed(self)
    }

    fn send(&self, value: T) -> std::result::Result<(), PushError<T>> {
        self.try_push(value)
    }
}

impl<T> BatchSource<T> for BlockingQueue<T> {
    fn recv(&self) -> std::result::Result<T, PopError> {
        self.try_pop()
    }

    fn is_empty(&self) -> bool {
        BlockingQueue::is_empty(self)
    }

    fn is_closed(&self) -> bool {
        BlockingQueue::is_closed(self)
    }
}

impl<T, Q: BatchSink<T>> BatchSink<T> for Arc<Q> {
    fn is_full(&self) -> bool {
        (**self).is_full()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn send(&self, value: T) -> std::result::Result<(), PushError<T>> {
        (**self).send(value)
    }
}

impl<T, Q: BatchSource<T>> BatchSource<T> for Arc<Q> {
    fn recv(&self) -> std::result::Result<T, PopError> {
        (**self).recv()
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_capacity_must_be_power_of_two() {
        assert!(matches!(spsc::<u32>(0), Err(DecodeError::InvalidConfig(_))));
        assert!(matches!(spsc::<u32>(6), Err(DecodeError::InvalidConfig(_))));
        assert!(BlockingQueue::<u32>::with_capacity(12).is_err());
        assert!(BlockingQueue::<u32>::with_capacity(16).is_ok());
    }

    #[test]
    fn test_spsc_full_push_keeps_slots() -> Result<()> {
        let (tx, rx) = spsc(4)?;
        for i in 0..4 {
            tx.push(i).unwrap();
        }
        assert!(tx.is_full());
        assert_eq!(tx.push(99), Err(PushError::Full(99)));

        for i in 0..4 {
            assert_eq!(rx.pop(), Ok(i));
        }
        assert_eq!(rx.pop(), Err(PopError::Empty));
        Ok(())
    }

    #[test]
    fn test_spsc_wraps_around() -> Result<()> {
        let (tx, rx) = spsc(2)?;
        for i in 0..100 {
            tx.push(i).unwrap();
            assert_eq!(rx.pop(), Ok(i));
        }
        assert!(rx.is_empty());
        Ok(())
    }

    #[test]
    fn test_spsc_close_drains_first() -> Result<()> {
        let (tx, rx) = spsc(4)?;
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        drop(tx);
        assert!(rx.is_closed());
        assert_eq!(rx.pop(), Ok(1));
        assert_eq!(rx.pop(), Ok(2));
        assert_eq!(rx.pop(), Err(PopError::Closed));
        Ok(())
    }

    #[test]
    fn test_spsc_push_after_consumer_drop() -> Result<()> {
        let (tx, rx) = spsc(4)?;
        drop(rx);
        assert_eq!(tx.push(7), Err(PushError::Closed(7)));
        Ok(())
    }

    #[test]
    fn test_spsc_drops_unpopped_items() -> Result<()> {
        let item = Arc::new(());
        let (tx, rx) = spsc(4)?;
        tx.push(Arc::clone(&item)).unwrap();
        tx.push(Arc::clone(&item)).unwrap();
        assert_eq!(Arc::strong_count(&item), 3);
        drop(tx);
        drop(rx);
        assert_eq!(Arc::strong_count(&item), 1);
        Ok(())
    }

    #[test]
    fn test_spsc_threaded_order() -> Result<()> {
        const N: u64 = 100_000;
        let (tx, rx) = spsc(64)?;
        let producer = thread::spawn(move || {
            for i in 0..N {
                let mut value = i;
                loop {
                    match tx.push(value) {
                        Ok(()) => break,
                        Err(PushError::Full(v)) => {
                            value = v;
                            thread::yield_now();
                        }
                        Err(PushError::Closed(_)) => panic!("consumer vanished"),
                    }
                }
            }
        });

        let mut expected = 0;
        loop {
            match rx.pop() {
                Ok(v) => {
                    assert_eq!(v, expected);
                    expected += 1;
                }
                Err(PopError::Empty) => thread::yield_now(),
                Err(PopError::Closed) => break,
                Err(PopError::Timeout) => unreachable!(),
            }
        }
        producer.join().unwrap();
        assert_eq!(expected, N);
        Ok(())
    }

    #[test]
    fn test_blocking_pop_times_out() -> Result<()> {
        let q = BlockingQueue::<u32>::new(4, Duration::from_millis(20))?;
        assert_eq!(q.pop(), Err(PopError::Timeout));
        assert_eq!(q.try_pop(), Err(PopError::Empty));
        Ok(())
    }

    #[test]
    fn test_blocking_try_push_full() -> Result<()> {
        let q = BlockingQueue::with_capacity(2)?;
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        assert!(q.is_full());
        assert_eq!(q.try_push(3), Err(PushError::Full(3)));
        assert_eq!(q.try_pop(), Ok(1));
        assert_eq!(q.try_pop(), Ok(2));
        Ok(())
    }

    #[test]
    fn test_blocking_close_wakes_waiter() -> Result<()> {
        let q = Arc::new(BlockingQueue::<u32>::with_capacity(4)?);
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop_timeout(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(waiter.join().unwrap(), Err(PopError::Closed));
        assert_eq!(q.push(1), Err(PushError::Closed(1)));
        Ok(())
    }

    #[test]
    fn test_blocking_close_still_delivers_queued() -> Result<()> {
        let q = BlockingQueue::with_capacity(4)?;
        q.push(5).unwrap();
        q.close();
        assert_eq!(q.pop(), Ok(5));
        assert_eq!(q.pop(), Err(PopError::Closed));
        Ok(())
    }

    #[test]
    fn test_blocking_push_waits_for_space() -> Result<()> {
        let q = Arc::new(BlockingQueue::with_capacity(1)?);
        q.push(1).unwrap();
        let pusher = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push(2))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(), Ok(1));
        assert!(pusher.join().unwrap().is_ok());
        assert_eq!(q.pop(), Ok(2));
        Ok(())
    }

    #[test]
    fn test_blocking_many_producers_and_consumers() -> Result<()> {
        const PER_PRODUCER: u64 = 10_000;
        let q = Arc::new(BlockingQueue::with_capacity(16)?);

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        q.push(p * PER_PRODUCER + i).unwrap();
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    let mut sum = 0u64;
                    while let Ok(v) = q.pop() {
                        sum += v;
                    }
                    sum
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        q.close();
        let total: u64 = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        let n = 4 * PER_PRODUCER;
        assert_eq!(total, n * (n - 1) / 2);
        Ok(())
    }
}
