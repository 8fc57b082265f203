//! Single shared timer facility backing `delay_async`.
//!
//! One dedicated thread sleeps until the earliest scheduled deadline and
//! runs the callbacks of expired entries. Callbacks registered here must be
//! cheap; `delay_async` only uses them to push resolution work onto the
//! work pool, so the timer thread is never blocked by continuation work.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    sync::{Condvar, Mutex, OnceLock},
    thread,
    time::Instant,
};

type TimerCallback = Box<dyn FnOnce() + Send>;

struct TimerState {
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    callbacks: HashMap<u64, TimerCallback>,
    next_id: u64,
}

pub(crate) struct Timer {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

static TIMER: OnceLock<Timer> = OnceLock::new();

// Shared timer instance with process-wide lifecycle; the worker thread is
// started alongside it on first use.
pub(crate) fn shared() -> &'static Timer {
    TIMER.get_or_init(|| {
        thread::Builder::new()
            .name("asyncoord-timer".into())
            .spawn(run_timer)
            .expect("Timer thread creation failed");
        Timer {
            state: Mutex::new(TimerState {
                deadlines: BinaryHeap::new(),
                callbacks: HashMap::new(),
                next_id: 1,
            }),
            wakeup: Condvar::new(),
        }
    })
}

impl Timer {
    /// Registers `callback` to run once `deadline` is reached. The returned
    /// id can be passed to [`unschedule`](Timer::unschedule) to drop the
    /// entry before it fires.
    pub(crate) fn schedule(
        &self,
        deadline: Instant,
        callback: impl FnOnce() + Send + 'static,
    ) -> u64 {
        let id = {
            let mut state = self.state.lock().unwrap();
            let id = state.next_id;
            state.next_id += 1;
            state.deadlines.push(Reverse((deadline, id)));
            state.callbacks.insert(id, Box::new(callback));
            id
        };
        self.wakeup.notify_one();
        id
    }

    /// Removes a scheduled entry before it fires. Expired or unknown ids
    /// are ignored; the stale heap slot is discarded when its deadline
    /// passes.
    pub(crate) fn unschedule(&self, id: u64) {
        self.state.lock().unwrap().callbacks.remove(&id);
    }
}

fn run_timer() {
    // The OnceLock initializer that spawned this thread finishes before
    // `shared` returns here.
    let timer = shared();
    let mut state = timer.state.lock().unwrap();
    loop {
        let now = Instant::now();
        let mut due: Vec<TimerCallback> = Vec::new();
        while let Some(&Reverse((deadline, id))) = state.deadlines.peek() {
            if deadline > now {
                break;
            }
            state.deadlines.pop();
            if let Some(callback) = state.callbacks.remove(&id) {
                due.push(callback);
            }
        }

        if !due.is_empty() {
            drop(state);
            for callback in due {
                callback();
            }
            state = timer.state.lock().unwrap();
            continue;
        }

        state = match state.deadlines.peek() {
            Some(&Reverse((deadline, _))) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                timer.wakeup.wait_timeout(state, timeout).unwrap().0
            }
            None => timer.wakeup.wait(state).unwrap(),
        };
    }
}
