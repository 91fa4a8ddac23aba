//! Wait-free queues for realtime / non-realtime communication.
//!
//! Two flavours, both fixed-capacity rings over trivially copyable slots:
//!
//! - [`SpscFifo`]: single producer, single consumer. Head and tail are plain
//!   atomic indices with acquire/release pairing. Used for control → audio
//!   traffic, where exactly one thread pushes and the audio thread pops.
//! - [`MpmcFifo`]: per-slot sequence stamps, so any number of producers and
//!   consumers may touch it concurrently. Used for audio → control
//!   notifications where several non-realtime threads drain completions, and
//!   for the performance timer ring fed from worker threads.
//!
//! Neither blocks or allocates after construction. A full queue rejects the
//! push; the producer treats that as backpressure and retries on its next
//! tick or surfaces an error to the originating caller. The audio thread
//! never waits.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Default capacity of the realtime event queues.
pub const MAX_EVENTS_IN_QUEUE: usize = 100;

/// Single-producer single-consumer wait-free ring.
pub struct SpscFifo<T: Copy, const N: usize = MAX_EVENTS_IN_QUEUE> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    /// Read index, written only by the consumer.
    head: CachePadded<AtomicUsize>,
    /// Write index, written only by the producer.
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Copy + Send, const N: usize> Sync for SpscFifo<T, N> {}
unsafe impl<T: Copy + Send, const N: usize> Send for SpscFifo<T, N> {}

impl<T: Copy, const N: usize> SpscFifo<T, N> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Returns false iff the queue is full. Producer side only.
    #[inline]
    pub fn push(&self, item: T) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) == N {
            return false;
        }
        unsafe {
            (*self.slots[tail % N].get()).write(item);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Consumer side only.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let item = unsafe { (*self.slots[head % N].get()).assume_init_read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    #[inline]
    pub fn empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        N
    }
}

impl<T: Copy, const N: usize> Default for SpscFifo<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

struct StampedSlot<T> {
    stamp: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Multi-producer multi-consumer lock-free ring with per-slot sequence
/// stamps. Push and pop are a single CAS on the uncontended path.
pub struct MpmcFifo<T: Copy, const N: usize = MAX_EVENTS_IN_QUEUE> {
    slots: [StampedSlot<T>; N],
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Copy + Send, const N: usize> Sync for MpmcFifo<T, N> {}
unsafe impl<T: Copy + Send, const N: usize> Send for MpmcFifo<T, N> {}

impl<T: Copy, const N: usize> MpmcFifo<T, N> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|i| StampedSlot {
                stamp: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            }),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Returns false iff the queue is full.
    #[inline]
    pub fn push(&self, item: T) -> bool {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[tail % N];
            let stamp = slot.stamp.load(Ordering::Acquire);
            let diff = (stamp as isize).wrapping_sub(tail as isize);
            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe {
                            (*slot.value.get()).write(item);
                        }
                        slot.stamp.store(tail.wrapping_add(1), Ordering::Release);
                        return true;
                    }
                    Err(current) => tail = current,
                }
            } else if diff < 0 {
                return false;
            } else {
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    #[inline]
    pub fn pop(&self) -> Option<T> {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[head % N];
            let stamp = slot.stamp.load(Ordering::Acquire);
            let diff = (stamp as isize).wrapping_sub(head.wrapping_add(1) as isize);
            if diff == 0 {
                match self.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let item = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.stamp.store(head.wrapping_add(N), Ordering::Release);
                        return Some(item);
                    }
                    Err(current) => head = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    #[inline]
    pub fn empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        N
    }
}

impl<T: Copy, const N: usize> Default for MpmcFifo<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_spsc_push_pop_order() {
        let fifo: SpscFifo<u32, 4> = SpscFifo::new();
        assert!(fifo.empty());
        assert!(fifo.push(1));
        assert!(fifo.push(2));
        assert!(!fifo.empty());
        assert_eq!(fifo.pop(), Some(1));
        assert_eq!(fifo.pop(), Some(2));
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn test_spsc_full_rejects_push() {
        let fifo: SpscFifo<u32, 4> = SpscFifo::new();
        for i in 0..4 {
            assert!(fifo.push(i));
        }
        assert!(!fifo.push(99));
        assert_eq!(fifo.pop(), Some(0));
        assert!(fifo.push(99));
    }

    #[test]
    fn test_spsc_wraparound() {
        let fifo: SpscFifo<usize, 4> = SpscFifo::new();
        for i in 0..100 {
            assert!(fifo.push(i));
            assert_eq!(fifo.pop(), Some(i));
        }
        assert!(fifo.empty());
    }

    #[test]
    fn test_spsc_cross_thread() {
        let fifo: Arc<SpscFifo<u64, 16>> = Arc::new(SpscFifo::new());
        let producer_fifo = fifo.clone();
        let producer = std::thread::spawn(move || {
            let mut sent = 0u64;
            while sent < 10_000 {
                if producer_fifo.push(sent) {
                    sent += 1;
                }
            }
        });
        let mut expected = 0u64;
        while expected < 10_000 {
            if let Some(value) = fifo.pop() {
                assert_eq!(value, expected);
                expected += 1;
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_mpmc_basic() {
        let fifo: MpmcFifo<u32, 4> = MpmcFifo::new();
        assert!(fifo.push(7));
        assert!(fifo.push(8));
        assert_eq!(fifo.pop(), Some(7));
        assert_eq!(fifo.pop(), Some(8));
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn test_mpmc_full_rejects_push() {
        let fifo: MpmcFifo<u32, 4> = MpmcFifo::new();
        for i in 0..4 {
            assert!(fifo.push(i));
        }
        assert!(!fifo.push(99));
    }

    #[test]
    fn test_mpmc_multiple_consumers() {
        let fifo: Arc<MpmcFifo<u64, 128>> = Arc::new(MpmcFifo::new());
        for i in 0..100 {
            assert!(fifo.push(i));
        }
        let mut handles = Vec::new();
        for _ in 0..4 {
            let fifo = fifo.clone();
            handles.push(std::thread::spawn(move || {
                let mut drained = Vec::new();
                while let Some(value) = fifo.pop() {
                    drained.push(value);
                }
                drained
            }));
        }
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}
