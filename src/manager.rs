use std::collections::HashMap;
use std::hash::Hash;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, CacheError};
use crate::promise::{Promise, SharedFuture};
use crate::rwlock::TimedRwLock;
use crate::store::{Store, Table, Ttl};

/// Boxed future returned by a fetch function.
pub type FetchFuture<V> = BoxFuture<'static, Result<V, BoxError>>;

type FetchFn<K, V> = Box<dyn Fn(CancellationToken, K) -> FetchFuture<V> + Send + Sync>;

/// Where produced values live.
enum Backend<K, V> {
    /// The built-in TTL table.
    Table(Table<K, V>),
    /// A user-supplied store; the manager serializes every access to it.
    Custom(Box<dyn Store<K, V>>),
}

impl<K, V> Backend<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn lookup(&self, key: &K) -> Option<V> {
        match self {
            Backend::Table(table) => table.lookup(key),
            Backend::Custom(store) => store.get(key),
        }
    }

    fn store(&mut self, key: K, value: V) {
        match self {
            Backend::Table(table) => table.store(key, value),
            Backend::Custom(store) => store.set(key, value),
        }
    }

    fn remove(&mut self, key: &K) {
        match self {
            Backend::Table(table) => table.remove(key),
            Backend::Custom(store) => store.remove(key),
        }
    }

    fn clear(&mut self) {
        match self {
            Backend::Table(table) => table.clear(),
            Backend::Custom(store) => store.clear(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Backend::Table(table) => table.len(),
            Backend::Custom(store) => store.len(),
        }
    }
}

/// Everything the guarding lock protects: the value backend and the table of
/// in-flight productions.
struct ManagerState<K, V> {
    backend: Backend<K, V>,
    pending: HashMap<K, SharedFuture<Result<V, CacheError>>>,
}

/// What a caller turned out to be for a given key.
enum Role<V> {
    /// Another caller is already producing; wait on its future.
    Waiter(SharedFuture<Result<V, CacheError>>),
    /// This caller runs the fetch and resolves the promise.
    Producer(Promise<Result<V, CacheError>>),
}

/// A concurrency-safe memoizing cache with single-flight request coalescing.
///
/// Concurrent calls for the same key observe at most one in-flight run of the
/// fetch function; a successfully produced value is reused by every caller
/// until it expires. Values may live in the built-in TTL table
/// ([`Manager::new`]) or in a user-supplied [`Store`]
/// ([`Manager::with_store`]), which the manager never exposes to concurrent
/// access.
///
/// Managers are fully independent of each other and are usually shared via
/// `Arc` across tasks.
pub struct Manager<K, V> {
    fetch: FetchFn<K, V>,
    state: TimedRwLock<ManagerState<K, V>>,
}

impl<K, V> Manager<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a manager with the built-in value table and the given
    /// expiration policy.
    ///
    /// The fetch closure receives the calling task's cancellation token and
    /// the requested key; it is always invoked outside the manager's lock.
    pub fn new<F, T>(fetch: F, ttl: T) -> Self
    where
        F: Fn(CancellationToken, K) -> FetchFuture<V> + Send + Sync + 'static,
        T: Into<Ttl>,
    {
        Self::build(Box::new(fetch), Backend::Table(Table::new(ttl.into())))
    }

    /// Creates a manager whose values live in `store`.
    ///
    /// The store is treated as the sole source of truth: anything its `get`
    /// returns is served as fresh, and the manager only ever touches it while
    /// holding its guarding lock, so the store needs no synchronization of its
    /// own. A plain [`HashMap`] works.
    pub fn with_store<F, S>(fetch: F, store: S) -> Self
    where
        F: Fn(CancellationToken, K) -> FetchFuture<V> + Send + Sync + 'static,
        S: Store<K, V> + 'static,
    {
        Self::build(Box::new(fetch), Backend::Custom(Box::new(store)))
    }

    fn build(fetch: FetchFn<K, V>, backend: Backend<K, V>) -> Self {
        Self {
            fetch,
            state: TimedRwLock::new(ManagerState {
                backend,
                pending: HashMap::new(),
            }),
        }
    }

    /// Returns the value for `key`, producing it at most once per expiry
    /// window no matter how many callers ask concurrently.
    ///
    /// The caller that triggers production runs the fetch with its own token;
    /// every other concurrent caller for the same key attaches to that run and
    /// receives the identical outcome. A caller whose token fires while
    /// waiting gets [`CacheError::Cancelled`] without disturbing the
    /// production or any other waiter. Fetch failures are surfaced verbatim
    /// and never cached.
    ///
    /// A producer whose `get_result` future is dropped mid-fetch (a timeout
    /// around the call, a task abort) leaves its promise unresolved; the next
    /// caller for the key, waiter or newcomer, reclaims the key and
    /// re-triggers production rather than failing.
    pub async fn get_result(&self, token: &CancellationToken, key: K) -> Result<V, CacheError> {
        loop {
            // Fast path: a fresh value under the shared side of the lock.
            {
                let Some(state) = self.state.read_with_token(token).await else {
                    return Err(CacheError::Cancelled);
                };
                if let Some(value) = state.backend.lookup(&key) {
                    tracing::trace!("serving cached value");
                    return Ok(value);
                }
            }

            let role = {
                let Some(mut state) = self.state.write_with_token(token).await else {
                    return Err(CacheError::Cancelled);
                };
                // Re-check: production may have finished while we waited for
                // the exclusive side.
                if let Some(value) = state.backend.lookup(&key) {
                    return Ok(value);
                }
                match state.pending.get(&key).cloned() {
                    Some(future) if !future.is_abandoned() => {
                        tracing::trace!("attaching to in-flight production");
                        Role::Waiter(future)
                    }
                    stale => {
                        if stale.is_some() {
                            tracing::debug!("reclaiming key from a dropped producer");
                        }
                        let promise = Promise::new();
                        state.pending.insert(key.clone(), promise.shared_future());
                        Role::Producer(promise)
                    }
                }
            };

            match role {
                Role::Waiter(mut future) => {
                    if future.wait_with_token(token).await {
                        return future.get().await;
                    }
                    if token.is_cancelled() {
                        return Err(CacheError::Cancelled);
                    }
                    // The producer was dropped without resolving; go around
                    // and re-enter the lookup so production restarts.
                }
                Role::Producer(promise) => return self.produce(token, key, promise).await,
            }
        }
    }

    /// Runs the fetch for `key` and publishes its outcome.
    ///
    /// Once the write lock below is acquired there are no further suspension
    /// points, so cleanup and resolution happen together. If this future is
    /// dropped before that, the stale pending entry is reclaimed by the next
    /// caller in [`Manager::get_result`].
    async fn produce(
        &self,
        token: &CancellationToken,
        key: K,
        promise: Promise<Result<V, CacheError>>,
    ) -> Result<V, CacheError> {
        tracing::debug!("producing value");
        let outcome = (self.fetch)(token.clone(), key.clone())
            .await
            .map_err(CacheError::fetch);

        // The pending entry must come out and the promise must resolve even
        // if the producer's own token has fired, or attached waiters would
        // block forever. Hence the uncancellable acquisition.
        let mut state = self.state.write().await;
        state.pending.remove(&key);
        match &outcome {
            Ok(value) => state.backend.store(key, value.clone()),
            Err(error) => tracing::debug!("production failed: {error}"),
        }
        drop(state);

        promise.set_value(outcome.clone());
        outcome
    }

    /// Drops the cached value for `key`, if any. In-flight productions are
    /// unaffected.
    pub async fn delete(&self, key: &K) {
        self.state.write().await.backend.remove(key);
    }

    /// Drops every cached value.
    pub async fn delete_all(&self) {
        self.state.write().await.backend.clear();
    }

    /// Number of stored values, expired entries included.
    pub async fn size(&self) -> usize {
        self.state.read().await.backend.len()
    }
}
