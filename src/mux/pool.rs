//! Fixed pool of message buffers shared by every sink.
//!
//! Each buffer carries one permit bit per sink. Leasing sets all of them,
//! each sink clears its own bit when it is done, and the buffer goes back
//! to the pool when the last bit clears. A pool-wide semaphore counts free
//! buffers so the producer can wait without scanning.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use crate::sync::Semaphore;

/// Output destination of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SinkId {
    Console = 0,
    Wifi = 1,
}

impl SinkId {
    pub const ALL: [SinkId; 2] = [SinkId::Console, SinkId::Wifi];

    /// Permit bit of this sink.
    #[inline]
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SinkId::Console => "console",
            SinkId::Wifi => "wifi",
        }
    }
}

/// Permit bits of a freshly leased buffer.
const ALL_PERMITS: u8 = SinkId::Console.bit() | SinkId::Wifi.bit();

/// A buffer just filled by [`BufferPool::try_lease`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Leased {
    pub index: u16,
    /// Bytes stored.
    pub len: usize,
    /// The message was longer than the buffer.
    pub truncated: bool,
}

struct Slot<const L: usize> {
    data: UnsafeCell<[u8; L]>,
    len: AtomicUsize,
    truncated: AtomicBool,
    permits: AtomicU8,
}

impl<const L: usize> Slot<L> {
    const fn new() -> Self {
        Self {
            data: UnsafeCell::new([0; L]),
            len: AtomicUsize::new(0),
            truncated: AtomicBool::new(false),
            permits: AtomicU8::new(0),
        }
    }
}

/// `B` buffers of `L` bytes.
pub struct BufferPool<const B: usize, const L: usize> {
    slots: [Slot<L>; B],
    free: Semaphore,
}

// SAFETY: a slot's bytes are written only by the producer that moved its
// permits from 0 to ALL_PERMITS, and read only by holders of a permit bit.
unsafe impl<const B: usize, const L: usize> Sync for BufferPool<B, L> {}

impl<const B: usize, const L: usize> BufferPool<B, L> {
    pub const fn new() -> Self {
        const {
            assert!(B > 0 && B < u16::MAX as usize, "pool needs 1..65535 buffers");
            assert!(L > 0, "buffers cannot be empty");
        }

        Self {
            slots: [const { Slot::new() }; B],
            free: Semaphore::new(B),
        }
    }

    /// Copy `message` into a free buffer, or `None` if all are leased.
    pub fn try_lease(&self, message: &[u8]) -> Option<Leased> {
        if !self.free.try_acquire() {
            return None;
        }
        Some(self.claim(message))
    }

    /// Like [`try_lease`](Self::try_lease) but waits, calling `relax`
    /// between attempts.
    pub fn lease_with(&self, message: &[u8], relax: impl FnMut()) -> Leased {
        self.free.acquire_with(relax);
        self.claim(message)
    }

    /// Holding a pool permit guarantees at least one slot with no permits.
    fn claim(&self, message: &[u8]) -> Leased {
        loop {
            for (index, slot) in self.slots.iter().enumerate() {
                if slot
                    .permits
                    .compare_exchange(0, ALL_PERMITS, Ordering::AcqRel, Ordering::Relaxed)
                    .is_err()
                {
                    continue;
                }

                let len = message.len().min(L);
                // SAFETY: the CAS above made this producer the only owner and
                // no task references the slot yet.
                unsafe {
                    (&mut *slot.data.get())[..len].copy_from_slice(&message[..len]);
                }
                slot.len.store(len, Ordering::Release);
                let truncated = len < message.len();
                slot.truncated.store(truncated, Ordering::Release);

                return Leased {
                    index: index as u16,
                    len,
                    truncated,
                };
            }
            // A release raced ahead of its permit clear; rescan
            core::hint::spin_loop();
        }
    }

    /// Run `f` on the buffer contents if `sink` still holds its permit.
    pub fn with_payload<R>(&self, index: u16, sink: SinkId, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let slot = self.slots.get(index as usize)?;
        if slot.permits.load(Ordering::Acquire) & sink.bit() == 0 {
            return None;
        }
        let len = slot.len.load(Ordering::Acquire);
        // SAFETY: the permit bit keeps the slot from being re-leased, and
        // nobody writes a leased slot.
        let bytes = unsafe { &(&*slot.data.get())[..len] };
        Some(f(bytes))
    }

    /// Give back `sink`'s permit. Returns `true` when this returned the
    /// buffer to the pool. Releasing a permit twice is ignored.
    pub fn release(&self, index: u16, sink: SinkId) -> bool {
        let Some(slot) = self.slots.get(index as usize) else {
            return false;
        };

        let before = slot.permits.fetch_and(!sink.bit(), Ordering::AcqRel);
        if before & sink.bit() == 0 {
            return false;
        }
        if before == sink.bit() {
            self.free.release();
            return true;
        }
        false
    }

    /// Buffers currently free.
    pub fn available(&self) -> usize {
        self.free.available()
    }

    /// Permit bits still outstanding on a buffer.
    pub fn permits(&self, index: u16) -> u8 {
        self.slots
            .get(index as usize)
            .map_or(0, |s| s.permits.load(Ordering::Acquire))
    }

    pub const fn capacity(&self) -> usize {
        B
    }

    pub const fn buffer_len(&self) -> usize {
        L
    }
}

impl<const B: usize, const L: usize> Default for BufferPool<B, L> {
    fn default() -> Self {
        Self::new()
    }
}
