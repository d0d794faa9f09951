use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::time::{Duration, Instant};

/// Expiration policy for values produced through a
/// [`Manager`](crate::Manager).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Entries become stale this long after production. A zero duration means
    /// entries are always stale, so every call re-runs the fetch.
    After(Duration),
    /// Entries never expire; each key is produced at most once per process
    /// lifetime.
    Forever,
}

impl Ttl {
    pub(crate) fn expires_at(&self, now: Instant) -> Option<Instant> {
        match self {
            Ttl::After(duration) => Some(now + *duration),
            Ttl::Forever => None,
        }
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        Ttl::After(duration)
    }
}

/// A cached value together with its expiry instant, if any.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    /// Creates an entry expiring at the given instant (`None` never expires).
    pub fn new(value: V, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    /// Checks whether this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// A pluggable value store for custom-backend managers.
///
/// Implementations do not need any internal synchronization: the manager is
/// the sole caller and only ever touches the store while holding its guarding
/// lock, reads under the shared side and writes under the exclusive side. A
/// plain [`HashMap`] is a valid store.
///
/// The store is the sole source of truth for values; anything `get` returns
/// is served as fresh, so expiry (if wanted) is the store's business.
pub trait Store<K, V>: Send + Sync {
    /// Looks up the value for `key`.
    fn get(&self, key: &K) -> Option<V>;

    /// Records `value` for `key`, replacing any previous value.
    fn set(&mut self, key: K, value: V);

    /// Drops the value for `key`, if any.
    fn remove(&mut self, key: &K);

    /// Drops every value.
    fn clear(&mut self);

    /// Number of stored values.
    fn len(&self) -> usize;

    /// Whether the store holds no values.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, S> Store<K, V> for HashMap<K, V, S>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
    S: BuildHasher + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        HashMap::get(self, key).cloned()
    }

    fn set(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn remove(&mut self, key: &K) {
        HashMap::remove(self, key);
    }

    fn clear(&mut self) {
        HashMap::clear(self);
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }
}

/// The built-in key -> [`CacheEntry`] table used by default-backend managers.
pub(crate) struct Table<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    ttl: Ttl,
}

impl<K, V> Table<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub(crate) fn new(ttl: Ttl) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Returns the value for `key` if present and not expired. Expired
    /// entries are left in place; production overwrites them.
    pub(crate) fn lookup(&self, key: &K) -> Option<V> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    pub(crate) fn store(&mut self, key: K, value: V) {
        let expires_at = self.ttl.expires_at(Instant::now());
        self.entries.insert(key, CacheEntry::new(value, expires_at));
    }

    pub(crate) fn remove(&mut self, key: &K) {
        self.entries.remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
