//! Bounded hand-off of task handles from the producer to the I/O context.

use core::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use crate::sync::SpinLock;

/// Ring of task handles.
///
/// One consumer. Producers serialize on a short lock so that emitting from
/// more than one place stays correct; the consumer never takes it.
pub struct TaskQueue<const Q: usize> {
    slots: [AtomicU16; Q],
    write_idx: AtomicU32,
    read_idx: AtomicU32,
    producer: SpinLock<()>,
}

impl<const Q: usize> TaskQueue<Q> {
    const MASK: usize = Q - 1;

    pub const fn new() -> Self {
        assert!(Q.is_power_of_two(), "Task queue size must be power of 2");

        Self {
            slots: [const { AtomicU16::new(0) }; Q],
            write_idx: AtomicU32::new(0),
            read_idx: AtomicU32::new(0),
            producer: SpinLock::new(()),
        }
    }

    /// Append `handle`, or give it back if the ring is full.
    pub fn push(&self, handle: u16) -> Result<(), u16> {
        let _producer = self.producer.lock();

        let write = self.write_idx.load(Ordering::Relaxed);
        let read = self.read_idx.load(Ordering::Acquire);
        if write.wrapping_sub(read) >= Q as u32 {
            return Err(handle);
        }

        self.slots[(write as usize) & Self::MASK].store(handle, Ordering::Relaxed);
        self.write_idx
            .store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Oldest handle.
    pub fn pop(&self) -> Option<u16> {
        let read = self.read_idx.load(Ordering::Relaxed);
        let write = self.write_idx.load(Ordering::Acquire);
        if read == write {
            return None;
        }

        let handle = self.slots[(read as usize) & Self::MASK].load(Ordering::Relaxed);
        self.read_idx.store(read.wrapping_add(1), Ordering::Release);
        Some(handle)
    }

    pub fn len(&self) -> usize {
        let read = self.read_idx.load(Ordering::Relaxed);
        let write = self.write_idx.load(Ordering::Acquire);
        write.wrapping_sub(read) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const Q: usize> Default for TaskQueue<Q> {
    fn default() -> Self {
        Self::new()
    }
}
