use std::sync::Arc;

/// Boxed error type returned by user-supplied fetch functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by [`Manager::get_result`](crate::Manager::get_result).
///
/// A single production outcome is broadcast to every caller attached to the
/// same in-flight fetch, so the error is cheaply cloneable: all waiters of one
/// round share the same underlying fetch error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The user-supplied fetch function returned an error. Surfaced verbatim
    /// to every attached waiter and never cached.
    #[error("fetch failed: {0}")]
    Fetch(Arc<dyn std::error::Error + Send + Sync>),

    /// The caller's cancellation token fired before a value was produced.
    #[error("cancelled before a value was produced")]
    Cancelled,
}

impl CacheError {
    pub(crate) fn fetch(source: BoxError) -> Self {
        CacheError::Fetch(Arc::from(source))
    }

    /// Returns true if this error came from the fetch function rather than
    /// from cancellation.
    pub fn is_fetch_error(&self) -> bool {
        matches!(self, CacheError::Fetch(_))
    }
}
