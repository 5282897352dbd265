// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Whole-crate scenario tests (spec §8): each exercises the public API
//! across module boundaries rather than one module's internals, so they
//! live here rather than in a `#[cfg(test)]` block.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use corex::all;
use corex::executor::{CooperativeSerialExecutor, ThreadedSerialExecutor};
use corex::sync::{Latch, Pipe};
use corex::task::Task;
use corex::time::sleep;
use corex::{StopError, StopSource};

/// E1: `sync_wait(simple())` where `simple` composes `1 / (1 + 1)` via two
/// awaited tasks.
#[test]
fn e1_linear_chain_computes_one_half() {
    let exec = ThreadedSerialExecutor::new();

    let add: Task<i32> = Task::new(async { Ok(1 + 1) });
    let simple = Task::new(async move {
        let denom: i32 = add.await?;
        Ok(1.0 / denom as f64)
    });

    let result = exec.sync_wait(simple).unwrap();
    assert_eq!(result, 0.5);
}

/// E2: three int tasks returning 10/20/30, `all(...)` joins them in order.
#[test]
fn e2_all_joins_int_tasks_in_order() {
    let exec = ThreadedSerialExecutor::new();
    let tasks: Vec<Task<i32>> = vec![
        Task::new(async { Ok(10) }),
        Task::new(async { Ok(20) }),
        Task::new(async { Ok(30) }),
    ];
    let combined = Task::new(all(tasks));
    assert_eq!(exec.sync_wait(combined).unwrap(), vec![10, 20, 30]);
}

/// E3: mixed void/int/void `all(...)`, type-erased, int slot holds 123.
///
/// Rust has no variadic generics, so the original's heterogeneous
/// `all(Task<Args>...)` overload is expressed the same way its own
/// `all(Task<Args>...) -> Task<std::vector<std::any>>` overload is: a
/// homogeneous vector of a type-erased payload.
#[test]
fn e3_all_joins_heterogeneous_tasks_type_erased() {
    let exec = ThreadedSerialExecutor::new();
    let tasks: Vec<Task<Box<dyn Any + Send>>> = vec![
        Task::new(async { Ok(Box::new(()) as Box<dyn Any + Send>) }),
        Task::new(async { Ok(Box::new(123i32) as Box<dyn Any + Send>) }),
        Task::new(async { Ok(Box::new(()) as Box<dyn Any + Send>) }),
    ];
    let combined = Task::new(all(tasks));
    let results = exec.sync_wait(combined).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(*results[1].downcast_ref::<i32>().unwrap(), 123);
}

/// E4: a worker sleeps 100ms and returns 42; a producer on a different
/// executor counts down a latch after 50ms; the consumer awaits the latch
/// then awaits the (still-unscheduled) worker → 42 in ≈150ms.
#[test]
fn e4_latch_then_worker_across_executors() {
    let consumer_exec = ThreadedSerialExecutor::new();
    let producer_exec = ThreadedSerialExecutor::new();

    let latch = Arc::new(Latch::new(1));

    let worker: Task<i32> = Task::new(async {
        sleep(Duration::from_millis(100)).await;
        Ok(42)
    });

    let producer_latch = latch.clone();
    producer_exec.schedule(Task::new(async move {
        sleep(Duration::from_millis(50)).await;
        producer_latch.count_down(1);
        Ok(())
    }));

    let consumer = Task::new(async move {
        latch.wait().await?;
        let value: i32 = worker.await?;
        Ok(value)
    });

    let start = Instant::now();
    let result = consumer_exec.sync_wait(consumer).unwrap();
    assert_eq!(result, 42);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(130), "elapsed: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "elapsed: {elapsed:?}");
}

/// E5: a pipe fed 11 and 22, a consumer reading twice and summing → 33.
#[test]
fn e5_pipe_sums_two_reads() {
    let exec = ThreadedSerialExecutor::new();
    let pipe = Pipe::new();
    pipe.write(11);
    pipe.write(22);

    let task = Task::new(async move {
        let a = pipe.read().await?;
        let b = pipe.read().await?;
        Ok(a + b)
    });
    assert_eq!(exec.sync_wait(task).unwrap(), 33);
}

/// E6: a task cancelled 70ms into a 100ms sleep rethrows `StopError`; a
/// second, unstopped task completes normally with 0.5.
#[test]
fn e6_cancellation_rethrows_stop_error_unstopped_task_unaffected() {
    let exec = ThreadedSerialExecutor::new();

    let source = StopSource::new();
    let cancelled = Task::new(async {
        sleep(Duration::from_millis(100)).await;
        Ok(())
    });
    cancelled.set_stop_token(source.token());
    let cancelled = exec.schedule(cancelled);

    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(70));
        source.request_stop();
    });

    let err = exec.sync_wait(cancelled).unwrap_err();
    assert!(err.downcast_ref::<StopError>().is_some());

    let add: Task<i32> = Task::new(async { Ok(1 + 1) });
    let unstopped = Task::new(async move {
        let denom: i32 = add.await?;
        Ok(1.0 / denom as f64)
    });
    assert_eq!(exec.sync_wait(unstopped).unwrap(), 0.5);
}

/// Property #1: a linear chain resolves the innermost value identically on
/// both executor flavours.
#[test]
fn property_linear_chain_identical_across_executors() {
    fn chain(n: i32) -> Task<i32> {
        Task::new(async move {
            if n == 0 {
                Ok(0)
            } else {
                let inner: i32 = chain(n - 1).await?;
                Ok(inner + 1)
            }
        })
    }

    let threaded = ThreadedSerialExecutor::new();
    assert_eq!(threaded.sync_wait(chain(50)).unwrap(), 50);

    let cooperative = CooperativeSerialExecutor::new();
    let rx = cooperative.promise(chain(50));
    while cooperative.run_until_stalled() {}
    assert_eq!(rx.recv().unwrap().unwrap(), 50);
}

/// Property #2: cancelling a token while a task sleeps resumes it promptly
/// with the token's exception, well before the sleep's own deadline.
#[test]
fn property_cancellation_resumes_promptly() {
    let exec = ThreadedSerialExecutor::new();
    let source = StopSource::new();
    let task = Task::new(async {
        sleep(Duration::from_secs(60)).await;
        Ok(())
    });
    task.set_stop_token(source.token());
    let task = exec.schedule(task);

    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        source.request_stop();
    });

    let start = Instant::now();
    let err = exec.sync_wait(task).unwrap_err();
    assert!(err.downcast_ref::<StopError>().is_some());
    assert!(start.elapsed() < Duration::from_secs(5));
}

/// Property #3: scheduling a task and dropping the caller's handle still
/// drives it to completion.
#[test]
fn property_fire_and_forget_task_still_completes() {
    let exec = ThreadedSerialExecutor::new();
    let observed = Arc::new(AtomicUsize::new(0));

    let latch = Arc::new(Latch::new(1));
    let signal = latch.clone();
    let worker = observed.clone();
    let mut fire_and_forget = exec.schedule(Task::new(async move {
        worker.fetch_add(1, Ordering::SeqCst);
        signal.count_down(1);
        Ok(())
    }));
    fire_and_forget.reset();
    drop(fire_and_forget);

    let waiter = Task::new({
        let latch = latch.clone();
        async move {
            latch.wait().await?;
            Ok(())
        }
    });
    exec.sync_wait(waiter).unwrap();
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

/// Property #5: a task on executor A awaits a task already running on
/// executor B; both executors make progress concurrently and the awaiter
/// sees B's result.
#[test]
fn property_cross_executor_await_sees_remote_result() {
    let exec_a = ThreadedSerialExecutor::new();
    let exec_b = ThreadedSerialExecutor::new();

    let on_b = exec_b.schedule(Task::new(async {
        sleep(Duration::from_millis(30)).await;
        Ok(99)
    }));

    let on_a = Task::new(async move {
        let value: i32 = on_b.await?;
        Ok(value)
    });

    assert_eq!(exec_a.sync_wait(on_a).unwrap(), 99);
}
