//! Synchronization primitives shared by the sampler and I/O contexts.
//!
//! Both contexts run on their own core, so waiting is a spin with an
//! optional caller-supplied relax hook (typically a short delay that lets
//! the FreeRTOS idle task feed the watchdog).

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Short-held exclusive lock.
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `locked`.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire, spinning until free.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock_with(core::hint::spin_loop)
    }

    /// Acquire, calling `relax` between failed attempts.
    pub fn lock_with(&self, mut relax: impl FnMut()) -> SpinLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            while self.locked.load(Ordering::Relaxed) {
                relax();
            }
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

/// Released on drop, on every exit path.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves exclusive access.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive access.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Counting semaphore.
pub struct Semaphore {
    permits: AtomicUsize,
}

impl Semaphore {
    pub const fn new(permits: usize) -> Self {
        Self {
            permits: AtomicUsize::new(permits),
        }
    }

    /// Take one permit if any is available.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.permits
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |p| p.checked_sub(1))
            .is_ok()
    }

    /// Take one permit, calling `relax` while none is available.
    pub fn acquire_with(&self, mut relax: impl FnMut()) {
        while !self.try_acquire() {
            relax();
        }
    }

    #[inline]
    pub fn release(&self) {
        self.permits.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.permits.load(Ordering::Acquire)
    }
}
