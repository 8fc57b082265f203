//! An asynchronous auto-reset event.
//!
//! The event releases exactly one waiter per signal, in the order the waits
//! arrived, and resets to unsignaled as soon as a waiter is released. When
//! no waiter is pending a single signal is banked; signals never
//! accumulate. Waiting never blocks a thread: `wait_async` returns a
//! [`Promise`] that settles when a signal is handed to the waiter.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    cancel::CancellationToken,
    promise::{ContinuationPolicy, Promise},
};

struct Waiter {
    id: u64,
    promise: Promise<()>,
}

struct EventState {
    // Never true while `waiters` is non-empty: a signal is handed straight
    // to the head waiter instead of being banked.
    signaled: bool,
    waiters: VecDeque<Waiter>,
}

/// A non-blocking auto-reset event with FIFO waiter release.
///
/// Multiple threads may call [`wait_async`](AsyncAutoResetEvent::wait_async),
/// [`set`](AsyncAutoResetEvent::set) and cancellation concurrently; all
/// state transitions for one event instance happen under a single internal
/// lock, and waiter release happens outside it.
pub struct AsyncAutoResetEvent {
    state: Arc<Mutex<EventState>>,
    allow_inlining: bool,
    next_waiter_id: AtomicU64,
}

impl AsyncAutoResetEvent {
    /// Creates an event whose released waiters have their continuations
    /// deferred to the work pool.
    pub fn new() -> Self {
        Self::with_inlining(false)
    }

    /// Creates an event with an explicit inlining policy.
    ///
    /// With `allow_inlining` set, continuations attached to a released
    /// waiter's promise run synchronously on the thread that calls `set`,
    /// before `set` returns.
    pub fn with_inlining(allow_inlining: bool) -> Self {
        AsyncAutoResetEvent {
            state: Arc::new(Mutex::new(EventState {
                signaled: false,
                waiters: VecDeque::new(),
            })),
            allow_inlining,
            next_waiter_id: AtomicU64::new(1),
        }
    }

    fn waiter_promise(&self) -> Promise<()> {
        let policy = if self.allow_inlining {
            ContinuationPolicy::Inline
        } else {
            ContinuationPolicy::Deferred
        };
        Promise::with_policy(policy)
    }

    /// Returns a promise that resolves when this waiter receives a signal.
    ///
    /// A banked signal is consumed immediately and an already-resolved
    /// promise is returned; otherwise the waiter joins the tail of the
    /// queue.
    pub fn wait_async(&self) -> Promise<()> {
        let mut state = self.state.lock().unwrap();
        if state.signaled {
            state.signaled = false;
            return Promise::resolved(());
        }
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let promise = self.waiter_promise();
        state.waiters.push_back(Waiter {
            id,
            promise: promise.clone(),
        });
        promise
    }

    /// Like [`wait_async`](AsyncAutoResetEvent::wait_async), but the wait is
    /// abandoned if `token` is cancelled first.
    ///
    /// Cancellation removes the waiter from the queue and cancels its
    /// promise; it never consumes a banked signal and never disturbs the
    /// relative order of the remaining waiters. A token that is already
    /// cancelled short-circuits to a cancelled promise without joining the
    /// queue or touching the signal.
    pub fn wait_async_cancellable(&self, token: &CancellationToken) -> Promise<()> {
        if token.is_cancellation_requested() {
            return Promise::cancelled();
        }

        let (promise, id) = {
            let mut state = self.state.lock().unwrap();
            if state.signaled {
                state.signaled = false;
                return Promise::resolved(());
            }
            let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
            let promise = self.waiter_promise();
            state.waiters.push_back(Waiter {
                id,
                promise: promise.clone(),
            });
            (promise, id)
        };

        let event_state = Arc::clone(&self.state);
        let waiter = promise.clone();
        let registration = token.subscribe(move || {
            // Cancellation and release-by-set race through queue removal;
            // whichever takes the waiter out wins and the loser finds it
            // already gone.
            let removed = {
                let mut state = event_state.lock().unwrap();
                match state.waiters.iter().position(|w| w.id == id) {
                    Some(index) => state.waiters.remove(index),
                    None => None,
                }
            };
            if removed.is_some() {
                waiter.cancel();
            }
        });
        // Release the subscription once the wait settles either way.
        promise.on_settled(move |_| registration.unregister());
        promise
    }

    /// Releases the head waiter, or banks a single signal when no waiter is
    /// pending.
    ///
    /// A waiter whose promise was already settled by its holder no longer
    /// counts; the signal goes to the next live waiter instead. `set`
    /// resolves the released promise outside the event lock, so an inlined
    /// continuation may call back into the event; beyond that resolution
    /// call, `set` never waits for consumer work.
    pub fn set(&self) {
        loop {
            let released = {
                let mut state = self.state.lock().unwrap();
                match state.waiters.pop_front() {
                    Some(waiter) => Some(waiter),
                    None => {
                        state.signaled = true;
                        None
                    }
                }
            };
            match released {
                Some(waiter) => {
                    if waiter.promise.resolve(()) {
                        return;
                    }
                }
                None => return,
            }
        }
    }
}

impl Default for AsyncAutoResetEvent {
    fn default() -> Self {
        Self::new()
    }
}
