//! A small concurrency toolkit centered on a memoizing cache with
//! single-flight request coalescing and time-based expiration.
//!
//! The [`Manager`] guarantees that concurrent requests for the same key
//! observe at most one in-flight production of that value, reuses a produced
//! value until it expires, and can delegate storage to an arbitrary,
//! not-necessarily-thread-safe [`Store`] without ever exposing it to
//! concurrent access.
//!
//! The primitives it is built from are exported as well: a one-shot
//! broadcasting [`Promise`]/[`SharedFuture`] cell, and the
//! cancellation-bounded [`TimedMutex`] and [`TimedRwLock`] locks.

pub mod error;
pub mod manager;
pub mod mutex;
pub mod promise;
pub mod rwlock;
pub mod store;

pub use error::{BoxError, CacheError};
pub use manager::{FetchFuture, Manager};
pub use mutex::{TimedMutex, TimedMutexGuard};
pub use promise::{Promise, SharedFuture};
pub use rwlock::{TimedRwLock, TimedRwLockReadGuard, TimedRwLockWriteGuard};
pub use store::{CacheEntry, Store, Ttl};
