//! Cooperative cancellation for pending waits.
//!
//! A [`CancellationSource`] owns the right to request cancellation and hands
//! out linked [`CancellationToken`]s. Tokens can be queried for the current
//! state or subscribed to; subscriptions run exactly once, on the thread
//! that calls [`CancellationSource::cancel`], and can be removed again
//! through the returned [`Registration`] while they have not yet run.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

type CancelCallback = Box<dyn FnOnce() + Send>;

struct CancelState {
    cancelled: AtomicBool,
    callbacks: Mutex<HashMap<u64, CancelCallback>>,
    next_id: AtomicU64,
}

/// Owner side of a cancellation signal.
pub struct CancellationSource {
    state: Arc<CancelState>,
}

impl CancellationSource {
    pub fn new() -> Self {
        CancellationSource {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                callbacks: Mutex::new(HashMap::new()),
                // Ids start at 1; 0 marks the inert registration handed out
                // for callbacks that already ran.
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Returns a token linked to this source.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            state: Arc::clone(&self.state),
        }
    }

    /// Requests cancellation and runs all subscribed callbacks.
    ///
    /// Only the first call has any effect. Callbacks run outside the
    /// internal lock, so they may subscribe further tokens or re-enter
    /// structures that themselves consult the token.
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let callbacks: Vec<CancelCallback> = {
            let mut registered = self.state.callbacks.lock().unwrap();
            registered.drain().map(|(_, callback)| callback).collect()
        };
        for callback in callbacks {
            callback();
        }
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Query/subscribe side of a cancellation signal.
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<CancelState>,
}

impl CancellationToken {
    /// Returns `true` once the linked source has requested cancellation.
    pub fn is_cancellation_requested(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Subscribes `callback` to run when cancellation is requested.
    ///
    /// If the token is already cancelled the callback runs immediately on
    /// the calling thread and the returned registration is inert.
    pub fn subscribe(&self, callback: impl FnOnce() + Send + 'static) -> Registration {
        if self.state.cancelled.load(Ordering::SeqCst) {
            callback();
            return Registration::empty();
        }

        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut registered = self.state.callbacks.lock().unwrap();
            // Re-check under the lock; a cancel that raced in would otherwise
            // never see this callback.
            if self.state.cancelled.load(Ordering::SeqCst) {
                drop(registered);
                callback();
                return Registration::empty();
            }
            registered.insert(id, Box::new(callback));
        }
        Registration {
            state: Arc::downgrade(&self.state),
            id,
        }
    }
}

/// Handle to an active cancellation subscription.
///
/// Dropping the handle keeps the subscription alive; call
/// [`unregister`](Registration::unregister) to remove it before it runs.
pub struct Registration {
    state: Weak<CancelState>,
    id: u64,
}

impl Registration {
    fn empty() -> Self {
        Registration {
            state: Weak::new(),
            id: 0,
        }
    }

    /// Removes the subscription if it has not run yet. Removing a
    /// registration whose callback already ran is a no-op.
    pub fn unregister(self) {
        if let Some(state) = self.state.upgrade() {
            state.callbacks.lock().unwrap().remove(&self.id);
        }
    }
}
