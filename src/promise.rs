use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The producing side of a one-shot broadcast cell.
///
/// A `Promise` is resolved exactly once via [`set_value`](Promise::set_value),
/// which consumes it; any number of [`SharedFuture`]s handed out beforehand
/// (or cloned afterwards) observe the same value.
pub struct Promise<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> Promise<T> {
    /// Creates a new, unresolved promise.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Returns a future observing this promise.
    ///
    /// Every call returns an independent waiter; futures can also be cloned
    /// freely. Futures obtained after resolution observe the value without
    /// blocking.
    pub fn shared_future(&self) -> SharedFuture<T> {
        SharedFuture {
            rx: self.tx.subscribe(),
        }
    }

    /// Resolves the promise, waking every current waiter.
    ///
    /// Consumes the promise, so a second resolution is rejected at compile
    /// time.
    pub fn set_value(self, value: T) {
        // Waiters may all have detached already; that is not an error.
        let _ = self.tx.send(Some(value));
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The observing side of a [`Promise`].
#[derive(Clone)]
pub struct SharedFuture<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T> SharedFuture<T> {
    /// Waits until the promise is resolved, without any cancellation bound.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|slot| slot.is_some()).await;
    }

    /// Waits until the promise is resolved or `token` fires.
    ///
    /// Returns whether resolution was observed; `false` also covers a promise
    /// dropped without resolving (see [`is_abandoned`](Self::is_abandoned)).
    /// Cancelling one waiter never affects the promise or any other waiter.
    pub async fn wait_with_token(&mut self, token: &CancellationToken) -> bool {
        tokio::select! {
            resolved = self.rx.wait_for(|slot| slot.is_some()) => resolved.is_ok(),
            _ = token.cancelled() => false,
        }
    }

    /// Returns whether the promise has already been resolved.
    pub fn is_resolved(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Returns whether the promise was dropped without ever resolving.
    ///
    /// Such a future will never produce a value; observers can use this to
    /// tell a vanished producer apart from one that is still running.
    pub fn is_abandoned(&self) -> bool {
        self.rx.has_changed().is_err() && self.rx.borrow().is_none()
    }
}

impl<T: Clone> SharedFuture<T> {
    /// Waits uncancellably, then returns a clone of the resolved value.
    ///
    /// # Panics
    ///
    /// Panics if the promise was dropped without ever resolving; waiting on
    /// such a future is a usage fault and fails loudly rather than blocking
    /// forever.
    pub async fn get(&mut self) -> T {
        let Ok(slot) = self.rx.wait_for(|slot| slot.is_some()).await else {
            panic!("promise dropped without resolving");
        };
        match slot.as_ref() {
            Some(value) => value.clone(),
            None => unreachable!("wait_for only returns once the slot is filled"),
        }
    }

    /// Waits until resolved or `token` fires; returns the value if resolution
    /// was observed.
    pub async fn get_with_token(&mut self, token: &CancellationToken) -> Option<T> {
        if !self.wait_with_token(token).await {
            return None;
        }
        self.rx.borrow().clone()
    }
}
