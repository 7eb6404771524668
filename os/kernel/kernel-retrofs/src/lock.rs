//! A fair (FIFO) ticket lock guarding one mounted volume.

#![allow(unsafe_code)]

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Serializes every find-then-mark sequence on a volume.
///
/// Waiters are served in arrival order, so a thread allocating in a loop
/// cannot starve another one.
pub struct VolumeLock<T> {
    next_ticket: AtomicUsize,
    now_serving: AtomicUsize,
    cell: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for VolumeLock<T> {}
unsafe impl<T: Send> Send for VolumeLock<T> {}

impl<T> VolumeLock<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            next_ticket: AtomicUsize::new(0),
            now_serving: AtomicUsize::new(0),
            cell: UnsafeCell::new(value),
        }
    }

    /// Take a ticket and spin until it is called.
    #[inline]
    pub fn lock(&self) -> VolumeGuard<'_, T> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        // Acquire pairs with the Release in `VolumeGuard::drop`
        while self.now_serving.load(Ordering::Acquire) != ticket {
            spin_loop();
        }
        VolumeGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<VolumeGuard<'_, T>> {
        let serving = self.now_serving.load(Ordering::Relaxed);
        if self.next_ticket.load(Ordering::Relaxed) != serving {
            return None;
        }
        self.next_ticket
            .compare_exchange(
                serving,
                serving.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .ok()
            .map(|_| VolumeGuard {
                lock: self,
                _not_send: PhantomData,
            })
    }

    /// Exclusive access without locking; `&mut self` already proves it.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }

    #[inline]
    #[must_use]
    pub fn into_inner(self) -> T {
        self.cell.into_inner()
    }
}

impl<T: Default> Default for VolumeLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> core::fmt::Debug for VolumeLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VolumeLock")
            .field("next_ticket", &self.next_ticket.load(Ordering::Relaxed))
            .field("now_serving", &self.now_serving.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// RAII guard; the lock is handed to the next ticket when it drops.
pub struct VolumeGuard<'a, T> {
    lock: &'a VolumeLock<T>,
    // the release must happen on the thread that took the ticket
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: Sync> Sync for VolumeGuard<'_, T> {}

impl<T> Deref for VolumeGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: holding the guard means holding the lock.
        unsafe { &*self.lock.cell.get() }
    }
}

impl<T> DerefMut for VolumeGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard means holding the lock exclusively.
        unsafe { &mut *self.lock.cell.get() }
    }
}

impl<T> Drop for VolumeGuard<'_, T> {
    fn drop(&mut self) {
        let serving = self.lock.now_serving.load(Ordering::Relaxed);
        self.lock
            .now_serving
            .store(serving.wrapping_add(1), Ordering::Release);
    }
}
