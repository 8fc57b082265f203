//! Defines the `Promise` deferred value and its settled `Outcome`.
//!
//! A `Promise` represents a single outstanding operation. It is created
//! pending and settles exactly once to a value, an error, or cancellation;
//! once settled it is immutable. Continuations can be attached at any time:
//! those attached before settlement run at settlement time, dispatched
//! according to the promise's [`ContinuationPolicy`], while those attached
//! after settlement run immediately with the already-known outcome.
//!
//! `Promise` also implements `Future`, so promise pipelines can be awaited
//! from ordinary async code. The [`Fulfill`] wrapper bridges the other
//! direction, resolving a promise from an arbitrary future's output.

use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll, Waker},
};

use pin_project_lite::pin_project;

use crate::pool;

/// Shared representation of a failed operation.
///
/// Errors are reference counted so that every continuation attached to a
/// promise can observe the same failure.
pub type Failure = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Wraps a concrete error into the shared [`Failure`] representation.
pub fn failure(error: impl std::error::Error + Send + Sync + 'static) -> Failure {
    Arc::new(error)
}

/// The settled result of a [`Promise`].
///
/// Cancellation is a distinct variant rather than a kind of error, so
/// combinators match on it explicitly instead of inspecting error types.
#[derive(Clone, Debug)]
pub enum Outcome<T> {
    /// The operation completed with a value.
    Value(T),
    /// The operation failed.
    Error(Failure),
    /// The operation was cancelled before completion.
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// Returns the contained value, discarding the failure or cancellation
    /// states.
    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// How a promise dispatches continuations attached before settlement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContinuationPolicy {
    /// Run continuations synchronously on the thread that settles the
    /// promise, before the settling call returns.
    Inline,
    /// Schedule continuations onto the shared work pool.
    Deferred,
}

type Callback<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

enum State<T> {
    Pending {
        callbacks: Vec<Callback<T>>,
        wakers: Vec<Waker>,
    },
    Settled(Outcome<T>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    policy: ContinuationPolicy,
}

/// A single-assignment deferred value.
///
/// Cloning a `Promise` produces another handle to the same operation; any
/// handle may settle it, and all handles observe the same outcome. Settling
/// is first-writer-wins: the transition methods return `false` when the
/// promise was already settled, and the losing outcome is discarded.
#[must_use]
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates a pending promise whose continuations are deferred to the
    /// shared work pool when it settles.
    pub fn new() -> Self {
        Self::with_policy(ContinuationPolicy::Deferred)
    }

    /// Creates a pending promise with an explicit continuation policy.
    pub fn with_policy(policy: ContinuationPolicy) -> Self {
        Promise {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending {
                    callbacks: Vec::new(),
                    wakers: Vec::new(),
                }),
                policy,
            }),
        }
    }

    /// Creates a promise already settled with `value`.
    pub fn resolved(value: T) -> Self {
        Self::settled_with(Outcome::Value(value))
    }

    /// Creates a promise already settled with a failure.
    pub fn failed(error: impl Into<Failure>) -> Self {
        Self::settled_with(Outcome::Error(error.into()))
    }

    /// Creates a promise already cancelled.
    pub fn cancelled() -> Self {
        Self::settled_with(Outcome::Cancelled)
    }

    fn settled_with(outcome: Outcome<T>) -> Self {
        Promise {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Settled(outcome)),
                policy: ContinuationPolicy::Inline,
            }),
        }
    }

    /// Returns `true` once the promise has settled, whatever the outcome.
    pub fn is_done(&self) -> bool {
        matches!(*self.inner.state.lock().unwrap(), State::Settled(_))
    }

    /// Returns a copy of the settled outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Outcome<T>> {
        match &*self.inner.state.lock().unwrap() {
            State::Settled(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Settles the promise with a value. Returns `false` if it had already
    /// settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Outcome::Value(value))
    }

    /// Settles the promise with a failure. Returns `false` if it had already
    /// settled.
    pub fn fail(&self, error: impl Into<Failure>) -> bool {
        self.settle(Outcome::Error(error.into()))
    }

    /// Cancels the promise. Returns `false` if it had already settled.
    pub fn cancel(&self) -> bool {
        self.settle(Outcome::Cancelled)
    }

    /// Transitions the promise from pending to settled, waking any awaiting
    /// tasks and dispatching attached continuations per the promise's
    /// [`ContinuationPolicy`]. Returns `false` if another settle won.
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        let previous = {
            let mut state = self.inner.state.lock().unwrap();
            if let State::Settled(_) = *state {
                return false;
            }
            std::mem::replace(&mut *state, State::Settled(outcome.clone()))
        };
        let State::Pending { callbacks, wakers } = previous else {
            return false;
        };

        for waker in wakers {
            waker.wake();
        }
        match self.inner.policy {
            ContinuationPolicy::Inline => {
                for callback in callbacks {
                    callback(outcome.clone());
                }
            }
            ContinuationPolicy::Deferred => {
                for callback in callbacks {
                    let outcome = outcome.clone();
                    pool::shared().spawn_ok(async move { callback(outcome) });
                }
            }
        }
        true
    }

    /// Attaches a continuation to run when the promise settles.
    ///
    /// If the promise is still pending the continuation is stored and later
    /// dispatched per the continuation policy. If it has already settled the
    /// continuation runs immediately, on the attaching thread, with the
    /// known outcome.
    pub fn on_settled(&self, callback: impl FnOnce(Outcome<T>) + Send + 'static) {
        let outcome = {
            let mut state = self.inner.state.lock().unwrap();
            match &mut *state {
                State::Pending { callbacks, .. } => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        callback(outcome);
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Future for Promise<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock().unwrap();
        match &mut *state {
            State::Settled(outcome) => Poll::Ready(outcome.clone()),
            State::Pending { wakers, .. } => {
                let waker = cx.waker();
                if !wakers.iter().any(|w| w.will_wake(waker)) {
                    wakers.push(waker.clone());
                }
                Poll::Pending
            }
        }
    }
}

pin_project! {
    /// A future that publishes its inner future's output through a
    /// [`Promise`].
    ///
    /// When the inner future completes, the associated promise resolves with
    /// a clone of the output before the value is yielded to the caller. This
    /// bridges async/await code into promise pipelines: hand out
    /// [`promise`](Fulfill::promise) to combinators and drive the `Fulfill`
    /// on whichever executor runs the rest of the task.
    ///
    /// Dropping a `Fulfill` before completion leaves the promise pending.
    #[must_use = "futures do nothing unless polled or .awaited"]
    pub struct Fulfill<F, T> {
        #[pin]
        future: F,
        promise: Promise<T>,
    }
}

impl<F, T> Fulfill<F, T>
where
    F: Future<Output = T>,
    T: Clone + Send + 'static,
{
    pub fn new(future: F) -> Self {
        Fulfill {
            future,
            promise: Promise::new(),
        }
    }

    /// Returns a handle to the promise resolved by this future.
    pub fn promise(&self) -> Promise<T> {
        self.promise.clone()
    }

    /// Consumes the `Fulfill` and returns the inner future.
    pub fn inner(self) -> F {
        self.future
    }
}

impl<F, T> Future for Fulfill<F, T>
where
    F: Future<Output = T>,
    T: Clone + Send + 'static,
{
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.future.poll(cx) {
            Poll::Ready(value) => {
                this.promise.resolve(value.clone());
                Poll::Ready(value)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
