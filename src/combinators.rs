//! Combinators for sequencing deferred computations without blocking a
//! thread.
//!
//! Every combinator takes and returns [`Promise`] values; continuations are
//! scheduled through the promise's attachment mechanism, never by blocking.
//! Sequencing ([`await_async`]), delaying ([`delay_async`]), cleanup with
//! exact precedence ([`finally_async`]) and stack-safe looping
//! ([`while_async`]) cover the control flow that `async`/`await` expresses
//! with suspension points, for code that composes promises directly.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use futures::task::{Spawn, SpawnExt};

use crate::{
    context::ContextRef,
    pool,
    promise::{Failure, Outcome, Promise, failure},
    timer,
};

// Settles `target` with whatever `source` settles to.
fn forward<T: Clone + Send + 'static>(source: Promise<T>, target: Promise<T>) {
    source.on_settled(move |outcome| {
        target.settle(outcome);
    });
}

/// Sequences `continuation` to run after `awaiter` resolves, producing a
/// promise for the continuation's result.
///
/// An already-settled awaiter is folded inline: the continuation runs
/// synchronously on the calling thread and its promise is returned directly,
/// with no extra suspension. A pending awaiter has the continuation
/// dispatched to the work pool when it settles. If the awaiter fails or is
/// cancelled the continuation never runs and the returned promise settles
/// with the same failure or cancellation.
pub fn await_async<T, U, C>(awaiter: &Promise<T>, continuation: C) -> Promise<U>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
    C: FnOnce(T) -> Promise<U> + Send + 'static,
{
    await_async_in(awaiter, continuation, None)
}

/// Variant of [`await_async`] that ignores the awaited value.
///
/// Failure and cancellation still propagate without running `continuation`.
pub fn await_then<T, U, C>(awaiter: &Promise<T>, continuation: C) -> Promise<U>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
    C: FnOnce() -> Promise<U> + Send + 'static,
{
    await_async_in(awaiter, move |_| continuation(), None)
}

/// Full form of [`await_async`] taking an optional resumption context.
///
/// With `Some(context)` the continuation is posted into that context when
/// the pending awaiter settles, so it resumes wherever the caller captured.
/// With `None` it is dispatched to the work pool. The inline fast path for
/// an already-settled awaiter applies either way; no context round-trip is
/// inserted when there is nothing to resume from.
pub fn await_async_in<T, U, C>(
    awaiter: &Promise<T>,
    continuation: C,
    context: Option<ContextRef>,
) -> Promise<U>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
    C: FnOnce(T) -> Promise<U> + Send + 'static,
{
    if let Some(outcome) = awaiter.outcome() {
        return match outcome {
            Outcome::Value(value) => continuation(value),
            Outcome::Error(error) => Promise::failed(error),
            Outcome::Cancelled => Promise::cancelled(),
        };
    }

    let result = Promise::new();
    let target = result.clone();
    awaiter.on_settled(move |outcome| match outcome {
        Outcome::Value(value) => {
            let run = move || {
                let produced = continuation(value);
                forward(produced, target);
            };
            match context {
                Some(context) => context.post(Box::new(run)),
                None => pool::shared().spawn_ok(async move { run() }),
            }
        }
        Outcome::Error(error) => {
            target.fail(error);
        }
        Outcome::Cancelled => {
            target.cancel();
        }
    });
    result
}

/// Suspends until scheduled onto `executor`, then runs `continuation` there.
///
/// The returned promise carries the continuation's result. If the executor
/// refuses the job the promise fails with the spawn error.
pub fn await_scheduled<S, U, C>(executor: &S, continuation: C) -> Promise<U>
where
    S: Spawn,
    U: Clone + Send + 'static,
    C: FnOnce() -> Promise<U> + Send + 'static,
{
    let result = Promise::new();
    let target = result.clone();
    let job = async move {
        let produced = continuation();
        forward(produced, target);
    };
    if let Err(error) = executor.spawn(job) {
        result.fail(failure(error));
    }
    result
}

/// Returns a promise that resolves with no value once `duration` elapses.
///
/// Expiry is tracked by the shared timer facility; resolution is handed to
/// the work pool so timer bookkeeping is never delayed by continuation
/// work. Cancelling the returned promise before expiry removes the timer
/// entry.
pub fn delay_async(duration: Duration) -> Promise<()> {
    let promise = Promise::new();
    let deadline = Instant::now() + duration;

    let resolve = promise.clone();
    let id = timer::shared().schedule(deadline, move || {
        pool::shared().spawn_ok(async move {
            resolve.resolve(());
        });
    });

    // Unschedule if cancelled before expiry.
    promise.on_settled(move |outcome| {
        if outcome.is_cancelled() {
            timer::shared().unschedule(id);
        }
    });
    promise
}

/// Runs `cleanup` unconditionally after `future` settles, passing the
/// original outcome through with finally-block precedence adjusted for
/// failures.
///
/// If `future` failed, that failure wins even when `cleanup` also fails; a
/// cleanup failure only surfaces when `future` succeeded. Cancellation of
/// `future` likewise passes through untouched. When both succeed the value
/// is forwarded unchanged.
pub fn finally_async<T, C>(future: &Promise<T>, cleanup: C) -> Promise<T>
where
    T: Clone + Send + 'static,
    C: FnOnce() -> Result<(), Failure> + Send + 'static,
{
    let result = Promise::new();
    let target = result.clone();
    future.on_settled(move |outcome| {
        let cleaned = cleanup();
        match (outcome, cleaned) {
            // The settled future's failure takes precedence over a failing
            // cleanup.
            (Outcome::Error(error), _) => {
                target.fail(error);
            }
            (Outcome::Cancelled, _) => {
                target.cancel();
            }
            (Outcome::Value(_), Err(error)) => {
                target.fail(error);
            }
            (Outcome::Value(value), Ok(())) => {
                target.resolve(value);
            }
        }
    });
    result
}

type LoopStep = Arc<dyn Fn() -> Promise<()> + Send + Sync>;

/// Asynchronously repeats: while `predicate` returns `true`, run one
/// execution of `body` and await it, then re-check `predicate`.
///
/// The loop is trampolined: iterations whose body promise is already
/// settled are consumed in a plain loop on the current thread, and the
/// driver re-enters as a continuation only when an iteration is still
/// pending. Stack depth therefore stays bounded no matter how many
/// iterations run. The first failure or cancellation from a body promise
/// terminates the loop and settles the returned promise with it.
pub fn while_async<P, B, U>(predicate: P, body: B) -> Promise<()>
where
    P: FnMut() -> bool + Send + 'static,
    B: FnMut() -> Promise<U> + Send + 'static,
    U: Clone + Send + 'static,
{
    let predicate = Arc::new(Mutex::new(predicate));
    let body = Arc::new(Mutex::new(body));

    if !(*predicate.lock().unwrap())() {
        return Promise::resolved(());
    }

    let steps: Arc<Mutex<VecDeque<LoopStep>>> = Arc::new(Mutex::new(VecDeque::new()));
    // Holds the step thunk so it can re-queue itself after each iteration.
    let evaluate_body: Arc<Mutex<Option<LoopStep>>> = Arc::new(Mutex::new(None));

    let step: LoopStep = {
        let predicate = Arc::clone(&predicate);
        let steps = Arc::clone(&steps);
        let evaluate_body = Arc::clone(&evaluate_body);
        Arc::new(move || {
            let iteration = (*body.lock().unwrap())();
            let after = Promise::new();
            let target = after.clone();
            let predicate = Arc::clone(&predicate);
            let steps = Arc::clone(&steps);
            let evaluate_body = Arc::clone(&evaluate_body);
            iteration.on_settled(move |outcome| match outcome {
                Outcome::Value(_) => {
                    if (*predicate.lock().unwrap())() {
                        let next = evaluate_body.lock().unwrap().clone();
                        if let Some(next) = next {
                            steps.lock().unwrap().push_back(next);
                        }
                    }
                    target.resolve(());
                }
                Outcome::Error(error) => {
                    target.fail(error);
                }
                Outcome::Cancelled => {
                    target.cancel();
                }
            });
            after
        })
    };
    *evaluate_body.lock().unwrap() = Some(Arc::clone(&step));
    steps.lock().unwrap().push_back(step);

    let result = Promise::new();
    drive(steps, result.clone());
    result
}

// Trampoline driver: pops and runs queued steps, looping synchronously
// while each step's promise is already settled and re-entering as a
// continuation when one is still pending. An empty queue means the
// predicate turned false and the loop is complete.
fn drive(steps: Arc<Mutex<VecDeque<LoopStep>>>, result: Promise<()>) {
    loop {
        let next = steps.lock().unwrap().pop_front();
        let Some(next) = next else {
            result.resolve(());
            return;
        };

        let step_result = next();
        match step_result.outcome() {
            Some(Outcome::Value(())) => continue,
            Some(Outcome::Error(error)) => {
                result.fail(error);
                return;
            }
            Some(Outcome::Cancelled) => {
                result.cancel();
                return;
            }
            None => {
                step_result.on_settled(move |outcome| match outcome {
                    Outcome::Value(()) => drive(steps, result),
                    Outcome::Error(error) => {
                        result.fail(error);
                    }
                    Outcome::Cancelled => {
                        result.cancel();
                    }
                });
                return;
            }
        }
    }
}
