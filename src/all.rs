// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! §4.8: fan a vector of tasks out onto the current executor, join on a
//! latch, and surface the first exception among them (if any).
//!
//! Grounded on `examples/original_source/include/coro/helpers/all.hpp`'s
//! `all(std::vector<Task<T>>)` overload — this port keeps only the
//! homogeneous-vector shape; the original's variadic-template overloads for
//! heterogeneous argument lists have no equivalent in a language without
//! variadic generics, so callers build a type-erased vector (e.g. of
//! `Task<Box<dyn Any + Send>>`) the same way they would reach for
//! `std::any` in the original's `all(Task<Args>...)` overload.

use std::sync::{Arc, Mutex};

use crate::context::CurrentContext;
use crate::stop::StopSource;
use crate::sync::Latch;
use crate::task::{self, Task};

/// Run every task in `tasks` concurrently on the current executor, wait for
/// all of them to finish, and return their results in the same order.
///
/// If any child task returns an error, `all` still waits for every other
/// child to finish running (so no child is ever left orphaned mid-flight)
/// before rethrowing the *first* error observed, in task order — matching
/// the original's "first-wins" `exception_ptr` slot.
///
/// While draining, `all`'s own stop token is replaced with a fresh,
/// unrelated one (§4.5): a cancellation requested through the parent must
/// not tear down the `all` task itself before its still-running children
/// have had a chance to observe the same stop and wind down.
pub async fn all<T: Send + 'static>(tasks: Vec<Task<T>>) -> anyhow::Result<Vec<T>> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let parent_context = CurrentContext.await;
    let executor = parent_context
        .executor()
        .expect("all() awaited by a task not yet bound to an executor");

    // §4.5: reset this task's own stop token while its children drain, so a
    // cancellation requested through the parent doesn't tear down `all`
    // itself — and orphan still-running children — before the latch
    // releases. Children below still inherit the *original* parent context,
    // so they remain cancellable exactly as if `all` were never in between.
    let local_stop = StopSource::new();
    task::with_current(|t| {
        let mut ctx = t.context();
        ctx.stop_token = local_stop.token();
        t.set_context(ctx);
    });

    let count = tasks.len();
    let latch = Arc::new(Latch::new(count as isize));
    let results = Arc::new(Mutex::new((0..count).map(|_| None).collect::<Vec<Option<T>>>()));
    let first_error: Arc<Mutex<Option<anyhow::Error>>> = Arc::new(Mutex::new(None));

    for (idx, child) in tasks.into_iter().enumerate() {
        let results = results.clone();
        let first_error = first_error.clone();
        let latch = latch.clone();
        let wrapper: Task<()> = Task::new(async move {
            match child.await {
                Ok(value) => results.lock().unwrap()[idx] = Some(value),
                Err(err) => {
                    let mut slot = first_error.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                }
            }
            latch.count_down(1);
            Ok(())
        });
        wrapper.set_context(parent_context.clone());
        executor.next_handle(wrapper.into_task_ref());
    }

    latch.wait().await?;

    if let Some(err) = first_error.lock().unwrap().take() {
        return Err(err);
    }
    Ok(std::mem::take(&mut *results.lock().unwrap())
        .into_iter()
        .map(|v| v.expect("all(): every slot is filled before the latch releases"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ThreadedSerialExecutor;
    use crate::time::sleep;
    use std::time::Duration;

    #[test]
    fn fans_out_and_preserves_order() {
        let exec = ThreadedSerialExecutor::new();
        let tasks: Vec<Task<i32>> = vec![
            Task::new(async { Ok(10) }),
            Task::new(async { Ok(20) }),
            Task::new(async { Ok(30) }),
        ];
        let combined = Task::new(all(tasks));
        assert_eq!(exec.sync_wait(combined).unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn runs_children_concurrently_not_sequentially() {
        let exec = ThreadedSerialExecutor::new();
        let tasks: Vec<Task<i32>> = (0..4)
            .map(|i| {
                Task::new(async move {
                    sleep(Duration::from_millis(100)).await;
                    Ok(i)
                })
            })
            .collect();
        let combined = Task::new(all(tasks));
        let start = std::time::Instant::now();
        let result = exec.sync_wait(combined).unwrap();
        assert_eq!(result, vec![0, 1, 2, 3]);
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[test]
    fn first_error_surfaces_after_every_child_completes() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let exec = ThreadedSerialExecutor::new();
        let completed = std::sync::Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Task<i32>> = (0..3)
            .map(|i| {
                let completed = completed.clone();
                Task::new(async move {
                    sleep(Duration::from_millis(20)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    if i == 1 {
                        anyhow::bail!("child {i} failed");
                    }
                    Ok(i)
                })
            })
            .collect();
        let combined = Task::new(all(tasks));
        let err = exec.sync_wait(combined).unwrap_err();
        assert!(err.to_string().contains("child 1 failed"));
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn empty_vector_returns_immediately() {
        let exec = ThreadedSerialExecutor::new();
        let combined: Task<Vec<i32>> = Task::new(all(Vec::new()));
        assert_eq!(exec.sync_wait(combined).unwrap(), Vec::<i32>::new());
    }
}
