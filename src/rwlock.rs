use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;

/// State sentinel for an exclusively held lock.
const WRITE_LOCKED: i32 = -1;
/// State value for an unheld lock; positive values count readers.
const UNLOCKED: i32 = 0;

/// A reader-writer lock with blocking, non-blocking and cancellation-bounded
/// acquisition on both sides.
///
/// The lock state is a single atomic counter: `-1` while write-locked, `0`
/// while unlocked, `n >= 1` while `n` readers hold it. Transitions happen via
/// compare-and-swap, so the uncontended path takes no internal lock and does
/// not allocate. Waiters park on a broadcast channel that is replaced on every
/// state change; a waiter subscribes before attempting its transition, which
/// closes the lost-wakeup window between snapshot and block.
///
/// A one-permit admission gate serializes acquisition *attempts*. The
/// exclusive path holds it for the whole retry loop, the shared path releases
/// it before retrying; the gate never blocks lock holders, only other
/// acquirers.
///
/// Fairness: none. Readers and the writer compete on the same
/// compare-and-swap, so a continuous stream of readers can starve a waiting
/// writer. Callers that need writer progress must arrange for reader backoff
/// themselves.
pub struct TimedRwLock<T: ?Sized> {
    gate: Semaphore,
    state: AtomicI32,
    change: Mutex<watch::Sender<()>>,
    data: UnsafeCell<T>,
}

// Safety: read guards hand out `&T` to several tasks at once, so `T` must be
// `Sync`; guards may release on another thread, so `T` must be `Send`.
unsafe impl<T: Send + ?Sized> Send for TimedRwLock<T> {}
unsafe impl<T: Send + Sync + ?Sized> Sync for TimedRwLock<T> {}

impl<T> TimedRwLock<T> {
    /// Creates an unlocked lock owning `data`.
    pub fn new(data: T) -> Self {
        let (tx, _rx) = watch::channel(());
        Self {
            gate: Semaphore::new(1),
            state: AtomicI32::new(UNLOCKED),
            change: Mutex::new(tx),
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes the lock and returns the protected data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> TimedRwLock<T> {
    /// Acquires the exclusive side, waiting as long as it takes.
    pub async fn write(&self) -> TimedRwLockWriteGuard<'_, T> {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("the admission gate is never closed"),
        };
        self.lock_exclusive(None).await;
        TimedRwLockWriteGuard { lock: self }
    }

    /// Acquires the exclusive side, waiting until it is available or `token`
    /// fires.
    pub async fn write_with_token(
        &self,
        token: &CancellationToken,
    ) -> Option<TimedRwLockWriteGuard<'_, T>> {
        let _permit = tokio::select! {
            permit = self.gate.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => unreachable!("the admission gate is never closed"),
            },
            _ = token.cancelled() => return None,
        };
        self.lock_exclusive(Some(token))
            .await
            .then(|| TimedRwLockWriteGuard { lock: self })
    }

    /// Attempts to acquire the exclusive side without blocking.
    pub fn try_write(&self) -> Option<TimedRwLockWriteGuard<'_, T>> {
        let _permit = self.gate.try_acquire().ok()?;
        self.try_transition_exclusive()
            .then(|| TimedRwLockWriteGuard { lock: self })
    }

    /// Acquires the shared side, waiting as long as it takes.
    pub async fn read(&self) -> TimedRwLockReadGuard<'_, T> {
        match self.gate.acquire().await {
            Ok(permit) => drop(permit),
            Err(_) => unreachable!("the admission gate is never closed"),
        }
        self.lock_shared(None).await;
        TimedRwLockReadGuard { lock: self }
    }

    /// Acquires the shared side, waiting until it is available or `token`
    /// fires.
    pub async fn read_with_token(
        &self,
        token: &CancellationToken,
    ) -> Option<TimedRwLockReadGuard<'_, T>> {
        tokio::select! {
            permit = self.gate.acquire() => match permit {
                Ok(permit) => drop(permit),
                Err(_) => unreachable!("the admission gate is never closed"),
            },
            _ = token.cancelled() => return None,
        }
        self.lock_shared(Some(token))
            .await
            .then(|| TimedRwLockReadGuard { lock: self })
    }

    /// Attempts to acquire the shared side without blocking.
    pub fn try_read(&self) -> Option<TimedRwLockReadGuard<'_, T>> {
        drop(self.gate.try_acquire().ok()?);
        self.try_transition_shared()
            .then(|| TimedRwLockReadGuard { lock: self })
    }

    /// Exclusive-acquire retry loop. With `token: None` this waits forever and
    /// always returns true.
    async fn lock_exclusive(&self, token: Option<&CancellationToken>) -> bool {
        loop {
            let mut change = self.subscribe();
            if self.try_transition_exclusive() {
                return true;
            }
            match token {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return false,
                    _ = change.changed() => {}
                },
                // Both a send and a sender replacement count as a change.
                None => {
                    let _ = change.changed().await;
                }
            }
        }
    }

    /// Shared-acquire retry loop, same shape as the exclusive one except that
    /// losing the compare-and-swap race to another reader retries immediately
    /// instead of parking.
    async fn lock_shared(&self, token: Option<&CancellationToken>) -> bool {
        loop {
            let mut change = self.subscribe();
            let n = self.state.load(Ordering::Acquire);
            if n >= UNLOCKED {
                if self
                    .state
                    .compare_exchange(n, n + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return true;
                }
                continue;
            }
            match token {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return false,
                    _ = change.changed() => {}
                },
                None => {
                    let _ = change.changed().await;
                }
            }
        }
    }

    fn try_transition_exclusive(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, WRITE_LOCKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn try_transition_shared(&self) -> bool {
        let n = self.state.load(Ordering::Acquire);
        n >= UNLOCKED
            && self
                .state
                .compare_exchange(n, n + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Snapshots the current broadcast channel. Must be taken before the
    /// transition attempt so a release happening in between is still observed.
    fn subscribe(&self) -> watch::Receiver<()> {
        self.change.lock().subscribe()
    }

    /// Replaces the broadcast channel, waking every waiter subscribed to the
    /// previous one. Called after every successful state change.
    fn broadcast_state_change(&self) {
        let (tx, _rx) = watch::channel(());
        let old = std::mem::replace(&mut *self.change.lock(), tx);
        // Dropping the old sender closes its channel, which wakes all of its
        // subscribers exactly once.
        drop(old);
    }

    fn release_exclusive(&self) {
        if self
            .state
            .compare_exchange(WRITE_LOCKED, UNLOCKED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            panic!("write guard released while the lock was not write-held");
        }
        self.broadcast_state_change();
    }

    fn release_shared(&self) {
        let n = self.state.fetch_sub(1, Ordering::AcqRel) - 1;
        if n < UNLOCKED {
            panic!("read guard released while the lock was not read-held");
        }
        self.broadcast_state_change();
    }
}

/// RAII guard for the shared side of [`TimedRwLock`].
pub struct TimedRwLockReadGuard<'a, T: ?Sized> {
    lock: &'a TimedRwLock<T>,
}

impl<T: ?Sized> Deref for TimedRwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: a positive state excludes the writer for the guard's
        // lifetime.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for TimedRwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_shared();
    }
}

/// RAII guard for the exclusive side of [`TimedRwLock`].
pub struct TimedRwLockWriteGuard<'a, T: ?Sized> {
    lock: &'a TimedRwLock<T>,
}

impl<T: ?Sized> Deref for TimedRwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the write-locked sentinel excludes every other holder.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TimedRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the write-locked sentinel excludes every other holder.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for TimedRwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_exclusive();
    }
}
