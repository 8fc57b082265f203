use std::{
    fmt,
    sync::{
        Arc, Mutex, mpsc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use asyncoord::{
    ContextRef, Outcome, Promise, ResumeContext, await_async, await_async_in, await_scheduled,
    await_then, delay_async, failure, finally_async, while_async,
};
use futures::executor::ThreadPool;

#[derive(Debug)]
struct TestError(&'static str);

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TestError {}

#[test]
fn await_async_folds_a_settled_awaiter_inline() {
    let awaiter = Promise::resolved(20);
    let ran_inline = Arc::new(AtomicBool::new(false));
    let ran_cl = Arc::clone(&ran_inline);
    let result = await_async(&awaiter, move |value| {
        ran_cl.store(true, Ordering::SeqCst);
        Promise::resolved(value + 1)
    });
    assert!(
        ran_inline.load(Ordering::SeqCst),
        "Continuation should run before await_async returns"
    );
    match result.outcome() {
        Some(Outcome::Value(value)) => assert_eq!(value, 21, "Result should fold the continuation"),
        other => panic!("Expected an inline value, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn await_async_runs_after_a_pending_awaiter_settles() {
    let awaiter: Promise<i32> = Promise::new();
    let result = await_async(&awaiter, |value| Promise::resolved(value * 2));
    assert!(!result.is_done(), "Result should wait for the awaiter");

    let resolver = awaiter.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        resolver.resolve(21);
    });
    match result.await {
        Outcome::Value(value) => assert_eq!(value, 42, "Continuation should see the settled value"),
        other => panic!("Expected a value outcome, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn await_async_propagates_failure_without_running_the_continuation() {
    let awaiter: Promise<i32> = Promise::new();
    let ran = Arc::new(AtomicBool::new(false));
    let ran_cl = Arc::clone(&ran);
    let result = await_async(&awaiter, move |_| {
        ran_cl.store(true, Ordering::SeqCst);
        Promise::resolved(0)
    });

    awaiter.fail(failure(TestError("boom")));
    match result.await {
        Outcome::Error(error) => assert_eq!(error.to_string(), "boom", "The awaiter failure should pass through"),
        other => panic!("Expected the awaiter failure, got {:?}", other),
    }
    assert!(
        !ran.load(Ordering::SeqCst),
        "Continuation should not run when the awaiter fails"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn await_async_propagates_cancellation_without_running_the_continuation() {
    let awaiter: Promise<i32> = Promise::new();
    let ran = Arc::new(AtomicBool::new(false));
    let ran_cl = Arc::clone(&ran);
    let result = await_async(&awaiter, move |_| {
        ran_cl.store(true, Ordering::SeqCst);
        Promise::resolved(0)
    });

    awaiter.cancel();
    assert!(
        result.await.is_cancelled(),
        "Cancellation of the awaiter should pass through"
    );
    assert!(
        !ran.load(Ordering::SeqCst),
        "Continuation should not run when the awaiter is cancelled"
    );
}

#[test]
fn await_then_ignores_the_awaited_value() {
    let awaiter = Promise::resolved("ignored");
    let result = await_then(&awaiter, || Promise::resolved(5));
    match result.outcome() {
        Some(Outcome::Value(value)) => assert_eq!(value, 5),
        other => panic!("Expected a value outcome, got {:?}", other),
    }
}

struct QueueContext {
    jobs: Mutex<mpsc::Sender<Box<dyn FnOnce() + Send>>>,
}

impl ResumeContext for QueueContext {
    fn post(&self, job: Box<dyn FnOnce() + Send>) {
        self.jobs.lock().unwrap().send(job).unwrap();
    }
}

#[test]
fn await_async_in_resumes_the_continuation_inside_the_context() {
    let (tx, rx) = mpsc::channel::<Box<dyn FnOnce() + Send>>();
    let context: ContextRef = Arc::new(QueueContext {
        jobs: Mutex::new(tx),
    });
    let awaiter: Promise<i32> = Promise::new();
    let observed = Arc::new(Mutex::new(None));
    let observed_cl = Arc::clone(&observed);
    let result = await_async_in(
        &awaiter,
        move |value| {
            *observed_cl.lock().unwrap() = Some((thread::current().id(), value));
            Promise::resolved(())
        },
        Some(context),
    );

    awaiter.resolve(11);

    // Drain the context on a dedicated thread and record its identity.
    let context_thread = thread::spawn(move || {
        let job = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("Continuation should be posted to the context");
        job();
        thread::current().id()
    })
    .join()
    .unwrap();

    let (resumed_on, value) = observed
        .lock()
        .unwrap()
        .take()
        .expect("Continuation should have run");
    assert_eq!(
        resumed_on, context_thread,
        "Continuation should resume inside the supplied context"
    );
    assert_eq!(value, 11, "Continuation should see the settled value");
    assert!(result.is_done(), "Result should settle once the context ran");
}

#[tokio::test(flavor = "multi_thread")]
async fn await_scheduled_suspends_until_the_executor_runs_it() {
    let executor = ThreadPool::new().expect("Thread pool creation failed");
    let result = await_scheduled(&executor, || Promise::resolved(7));
    match result.await {
        Outcome::Value(value) => assert_eq!(value, 7, "Continuation should run on the executor"),
        other => panic!("Expected a value outcome, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn delay_async_completes_after_the_requested_duration() {
    let started = Instant::now();
    let outcome = delay_async(Duration::from_millis(100)).await;
    assert!(outcome.is_value(), "Delay should resolve with no value");
    assert!(
        started.elapsed() >= Duration::from_millis(100),
        "Delay should not complete early"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn delay_async_can_be_cancelled_before_expiry() {
    let delay = delay_async(Duration::from_secs(60));
    assert!(delay.cancel(), "Cancel should win while the timer is pending");
    assert!(
        delay.clone().await.is_cancelled(),
        "A cancelled delay should settle as cancelled, not resolve"
    );
}

#[test]
fn finally_async_passes_a_value_through_successful_cleanup() {
    let future = Promise::resolved(9);
    let ran = Arc::new(AtomicBool::new(false));
    let ran_cl = Arc::clone(&ran);
    let result = finally_async(&future, move || {
        ran_cl.store(true, Ordering::SeqCst);
        Ok(())
    });
    assert!(ran.load(Ordering::SeqCst), "Cleanup should run");
    match result.outcome() {
        Some(Outcome::Value(value)) => assert_eq!(value, 9, "Value should pass through unchanged"),
        other => panic!("Expected a value outcome, got {:?}", other),
    }
}

#[test]
fn finally_async_surfaces_cleanup_failure_after_success() {
    let future = Promise::resolved(9);
    let result = finally_async(&future, || Err(failure(TestError("cleanup"))));
    match result.outcome() {
        Some(Outcome::Error(error)) => assert_eq!(
            error.to_string(),
            "cleanup",
            "Cleanup failure should surface when the future succeeded"
        ),
        other => panic!("Expected the cleanup failure, got {:?}", other),
    }
}

#[test]
fn finally_async_keeps_the_original_failure_when_cleanup_succeeds() {
    let future: Promise<i32> = Promise::failed(failure(TestError("primary")));
    let ran = Arc::new(AtomicBool::new(false));
    let ran_cl = Arc::clone(&ran);
    let result = finally_async(&future, move || {
        ran_cl.store(true, Ordering::SeqCst);
        Ok(())
    });
    assert!(ran.load(Ordering::SeqCst), "Cleanup should run on failure too");
    match result.outcome() {
        Some(Outcome::Error(error)) => assert_eq!(error.to_string(), "primary"),
        other => panic!("Expected the original failure, got {:?}", other),
    }
}

#[test]
fn finally_async_prefers_the_original_failure_over_a_failing_cleanup() {
    let future: Promise<i32> = Promise::failed(failure(TestError("primary")));
    let result = finally_async(&future, || Err(failure(TestError("cleanup"))));
    match result.outcome() {
        Some(Outcome::Error(error)) => assert_eq!(
            error.to_string(),
            "primary",
            "The settled future's failure must win over the cleanup failure"
        ),
        other => panic!("Expected the original failure, got {:?}", other),
    }
}

#[test]
fn finally_async_runs_cleanup_after_cancellation() {
    let future: Promise<i32> = Promise::cancelled();
    let ran = Arc::new(AtomicBool::new(false));
    let ran_cl = Arc::clone(&ran);
    let result = finally_async(&future, move || {
        ran_cl.store(true, Ordering::SeqCst);
        Ok(())
    });
    assert!(ran.load(Ordering::SeqCst), "Cleanup should run on cancellation");
    assert!(
        matches!(result.outcome(), Some(Outcome::Cancelled)),
        "Cancellation should pass through the cleanup"
    );
}

#[test]
fn while_async_runs_the_body_once_per_true_predicate() {
    let i = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));
    let i_predicate = Arc::clone(&i);
    let i_body = Arc::clone(&i);
    let runs_cl = Arc::clone(&runs);
    let result = while_async(
        move || i_predicate.load(Ordering::SeqCst) < 5,
        move || {
            runs_cl.fetch_add(1, Ordering::SeqCst);
            i_body.fetch_add(1, Ordering::SeqCst);
            Promise::resolved(())
        },
    );
    assert!(
        matches!(result.outcome(), Some(Outcome::Value(()))),
        "A loop over settled bodies should complete synchronously"
    );
    assert_eq!(
        runs.load(Ordering::SeqCst),
        5,
        "Body should run exactly five times"
    );
}

#[test]
fn while_async_with_a_false_predicate_never_runs_the_body() {
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_cl = Arc::clone(&runs);
    let result = while_async(
        || false,
        move || {
            runs_cl.fetch_add(1, Ordering::SeqCst);
            Promise::resolved(())
        },
    );
    assert!(matches!(result.outcome(), Some(Outcome::Value(()))));
    assert_eq!(runs.load(Ordering::SeqCst), 0, "Body should never run");
}

#[test]
fn while_async_keeps_stack_depth_bounded_over_many_iterations() {
    let remaining = Arc::new(AtomicUsize::new(100_000));
    let remaining_predicate = Arc::clone(&remaining);
    let remaining_body = Arc::clone(&remaining);
    let result = while_async(
        move || remaining_predicate.load(Ordering::SeqCst) > 0,
        move || {
            remaining_body.fetch_sub(1, Ordering::SeqCst);
            Promise::resolved(())
        },
    );
    assert!(
        matches!(result.outcome(), Some(Outcome::Value(()))),
        "A hundred thousand settled iterations should finish without exhausting the stack"
    );
    assert_eq!(remaining.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn while_async_loops_across_pending_bodies() {
    let remaining = Arc::new(AtomicUsize::new(20));
    let runs = Arc::new(AtomicUsize::new(0));
    let remaining_predicate = Arc::clone(&remaining);
    let remaining_body = Arc::clone(&remaining);
    let runs_cl = Arc::clone(&runs);
    let result = while_async(
        move || remaining_predicate.load(Ordering::SeqCst) > 0,
        move || {
            remaining_body.fetch_sub(1, Ordering::SeqCst);
            runs_cl.fetch_add(1, Ordering::SeqCst);
            delay_async(Duration::from_millis(1))
        },
    );
    assert!(
        result.await.is_value(),
        "The loop should complete across suspensions"
    );
    assert_eq!(
        runs.load(Ordering::SeqCst),
        20,
        "Every iteration should have run exactly once"
    );
}

#[test]
fn while_async_stops_at_the_first_body_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cl = Arc::clone(&calls);
    let result = while_async(
        || true,
        move || {
            let call = calls_cl.fetch_add(1, Ordering::SeqCst);
            if call == 2 {
                Promise::failed(failure(TestError("third iteration")))
            } else {
                Promise::resolved(())
            }
        },
    );
    match result.outcome() {
        Some(Outcome::Error(error)) => assert_eq!(error.to_string(), "third iteration"),
        other => panic!("Expected the body failure, got {:?}", other),
    }
    assert_eq!(
        calls.load(Ordering::SeqCst),
        3,
        "The loop should stop at the failing iteration"
    );
}

#[test]
fn while_async_stops_when_a_body_is_cancelled() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cl = Arc::clone(&calls);
    let result = while_async(
        || true,
        move || {
            if calls_cl.fetch_add(1, Ordering::SeqCst) == 0 {
                Promise::resolved(())
            } else {
                Promise::cancelled()
            }
        },
    );
    assert!(
        matches!(result.outcome(), Some(Outcome::Cancelled)),
        "Cancellation of a body should terminate and propagate"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
