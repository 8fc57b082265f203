//! Primitives for structured and composable asynchronous coordination.
//!
//! `asyncoord` provides lightweight building blocks for composing deferred
//! computations without blocking a thread, and for signaling between
//! producers and non-blocking waiters. It includes a single-assignment
//! promise, continuation combinators, and an asynchronous auto-reset event.
//!
//! The crate is designed to work independently of any specific async
//! runtime, making it flexible and adaptable to various execution
//! environments.
//!
//! Features include:
//! - A `Promise` deferred value that settles exactly once to a value, an
//!   error, or cancellation, with a configurable continuation dispatch
//!   policy
//! - Combinators for sequencing (`await_async`), delaying (`delay_async`),
//!   cleanup with exact failure precedence (`finally_async`), and
//!   stack-safe asynchronous looping (`while_async`)
//! - An `AsyncAutoResetEvent` that releases exactly one waiter per signal,
//!   in strict arrival order, with optional cancellation
//! - Cooperative cancellation through `CancellationSource` and
//!   `CancellationToken`
//!
//! All components are modular and designed for composability, making it
//! easier to build expressive and maintainable async systems.

pub mod cancel;
pub mod combinators;
pub mod context;
pub mod event;
pub mod promise;

mod pool;
mod timer;

pub use cancel::{CancellationSource, CancellationToken, Registration};
pub use combinators::{
    await_async, await_async_in, await_scheduled, await_then, delay_async, finally_async,
    while_async,
};
pub use context::{ContextRef, ResumeContext};
pub use event::AsyncAutoResetEvent;
pub use promise::{ContinuationPolicy, Failure, Fulfill, Outcome, Promise, failure};
