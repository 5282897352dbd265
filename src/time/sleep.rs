// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `sleep(duration)`: suspend the current task, park it externally on its
//! own executor, and resume it once [`TimedScheduler`] fires its deadline.
//!
//! Grounded on `examples/original_source/include/coro/detail/sleep.hpp`'s
//! `SleepAwaitable`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::callback::{Callback, CallbackRef};
use crate::task;

use super::timer::TimedScheduler;

/// Suspend the currently running task for `duration`.
///
/// Must be awaited from within a task that has already been bound to an
/// executor (i.e. not before the task's first scheduling).
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        duration,
        started: false,
        _callback: None,
    }
}

#[must_use = "futures do nothing unless awaited"]
pub struct Sleep {
    duration: Duration,
    started: bool,
    // Kept alive only so the weak registration in `TimedScheduler` stays
    // live until we fire (or this future is dropped, e.g. by cancellation).
    _callback: Option<CallbackRef>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.started {
            self._callback = None;
            return Poll::Ready(());
        }
        self.started = true;

        let current = task::with_current(Clone::clone);
        let executor = current
            .executor()
            .expect("sleep awaited by a task not yet bound to an executor");
        executor.external_handle(current.clone());

        let deadline = Instant::now() + self.duration;
        let woken = current.clone();
        let callback = Callback::new(move || {
            if let Some(executor) = woken.executor() {
                executor.next_handle(woken.clone());
            }
        });
        TimedScheduler::global().schedule(deadline, Arc::downgrade(&callback));
        self._callback = Some(callback);

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ThreadedSerialExecutor;
    use crate::task::Task;

    #[test]
    fn sleep_resumes_after_roughly_the_requested_duration() {
        let exec = ThreadedSerialExecutor::new();
        let task = Task::new(async {
            let start = Instant::now();
            sleep(Duration::from_millis(50)).await;
            Ok(start.elapsed())
        });
        let elapsed = exec.sync_wait(task).unwrap();
        assert!(elapsed >= Duration::from_millis(45));
        assert!(elapsed < Duration::from_millis(500));
    }
}
