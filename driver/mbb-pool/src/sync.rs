//! Spin-lock based synchronization for pool bookkeeping.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A lock implementation a mutex can be built on.
pub trait LockBackend: Sized {
    fn new() -> Self;

    /// Tries to take the lock, without blocking.
    fn try_lock(&self) -> bool;

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The lock must currently be held by the caller.
    unsafe fn unlock(&self);

    fn lock(&self) {
        while !self.try_lock() {
            core::hint::spin_loop();
        }
    }
}

/// A test-and-set spin lock.
pub struct SpinLock {
    locked: AtomicBool,
}

impl LockBackend for SpinLock {
    fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// A spin-lock based mutex protecting some data.
///
/// Pool bookkeeping critical sections are a few pointer writes long, so
/// spinning is the appropriate wait strategy.
pub struct SpinMutex<T> {
    lock: SpinLock,
    data: UnsafeCell<T>,
}

impl<T> SpinMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            lock: SpinLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the mutex, spinning until it is available.
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.lock.lock();
        SpinMutexGuard { mutex: self }
    }

    /// Gets the protected data without locking.
    ///
    /// Having a `&mut self` proves no guard is live.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

// SAFETY: The spin lock serializes every access to the protected data, so
// sharing the mutex between threads cannot produce unsynchronized access.
unsafe impl<T: Send> Sync for SpinMutex<T> {}
// SAFETY: Sending the mutex moves the protected data with it.
unsafe impl<T: Send> Send for SpinMutex<T> {}

/// Guard providing access to the data protected by a [`SpinMutex`].
pub struct SpinMutexGuard<'a, T> {
    mutex: &'a SpinMutex<T>,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: Constructing a guard requires holding the lock, so the
        // data cannot be aliased by another guard.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: Constructing a guard requires holding the lock, so the
        // data cannot be aliased by another guard.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: A live guard means the lock is held by us.
        unsafe { self.mutex.lock.unlock() }
    }
}
