use std::sync::OnceLock;

use futures::executor::{ThreadPool, ThreadPoolBuilder};

static WORK_POOL: OnceLock<ThreadPool> = OnceLock::new();

// Process wide pool for deferred continuation dispatch and delay resolution.
// Created on first use and reused for the lifetime of the process.
pub(crate) fn shared() -> &'static ThreadPool {
    WORK_POOL.get_or_init(|| {
        ThreadPoolBuilder::new()
            .pool_size(8)
            .create()
            .expect("Thread pool creation failed")
    })
}
