use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// A binary mutual-exclusion lock with blocking, non-blocking and
/// cancellation-bounded acquisition.
///
/// Acquisition is a single-slot handoff: taking the lock withdraws the one
/// permit, releasing it (by dropping the guard) deposits it back. The lock is
/// not reentrant; a holder awaiting [`lock`](TimedMutex::lock) again deadlocks,
/// matching standard mutual-exclusion semantics.
pub struct TimedMutex<T: ?Sized> {
    slot: Semaphore,
    data: UnsafeCell<T>,
}

// Safety: the single permit guarantees at most one live guard, so access to
// the data is exclusive.
unsafe impl<T: Send + ?Sized> Send for TimedMutex<T> {}
unsafe impl<T: Send + ?Sized> Sync for TimedMutex<T> {}

impl<T> TimedMutex<T> {
    /// Creates an unlocked mutex owning `data`.
    pub fn new(data: T) -> Self {
        Self {
            slot: Semaphore::new(1),
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes the mutex and returns the protected data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Acquires the lock, waiting as long as it takes.
    pub async fn lock(&self) -> TimedMutexGuard<'_, T> {
        match self.slot.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => unreachable!("the lock semaphore is never closed"),
        }
        TimedMutexGuard { mutex: self }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<TimedMutexGuard<'_, T>> {
        self.slot.try_acquire().ok()?.forget();
        Some(TimedMutexGuard { mutex: self })
    }

    /// Acquires the lock, waiting until it is available or `token` fires.
    pub async fn lock_with_token(&self, token: &CancellationToken) -> Option<TimedMutexGuard<'_, T>> {
        tokio::select! {
            permit = self.slot.acquire() => {
                match permit {
                    Ok(permit) => permit.forget(),
                    Err(_) => unreachable!("the lock semaphore is never closed"),
                }
                Some(TimedMutexGuard { mutex: self })
            }
            _ = token.cancelled() => None,
        }
    }
}

/// RAII guard for [`TimedMutex`]; the lock is released on drop.
pub struct TimedMutexGuard<'a, T: ?Sized> {
    mutex: &'a TimedMutex<T>,
}

impl<T: ?Sized> Deref for TimedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: holding the guard means holding the single permit.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TimedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: holding the guard means holding the single permit.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for TimedMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.slot.add_permits(1);
    }
}
