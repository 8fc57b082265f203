//! Explicit resumption contexts for continuations.
//!
//! There is no ambient, thread-local context in this crate. A caller that
//! wants a continuation to resume somewhere specific captures that place as
//! a [`ContextRef`] and passes it to the combinator; the combinator posts
//! the continuation into the context when the awaited promise settles.

use std::sync::Arc;

use futures::executor::ThreadPool;

/// A place continuations can be posted to run in.
pub trait ResumeContext: Send + Sync {
    /// Runs `job` inside this context.
    fn post(&self, job: Box<dyn FnOnce() + Send>);
}

/// Shared handle to a resumption context.
pub type ContextRef = Arc<dyn ResumeContext>;

impl ResumeContext for ThreadPool {
    fn post(&self, job: Box<dyn FnOnce() + Send>) {
        self.spawn_ok(async move { job() });
    }
}
