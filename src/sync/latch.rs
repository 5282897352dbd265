// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A countdown latch: any number of tasks may await it, and all of them are
//! released together once the count reaches zero.
//!
//! Grounded on `examples/original_source/include/coro/sync/latch.hpp`'s
//! `Latch`/`LatchAwaitable`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use crate::callback::{Callback, CallbackRef, WeakCallbackRef};
use crate::task;

struct Inner {
    count: isize,
    waiters: VecDeque<WeakCallbackRef>,
}

/// A synchronisation primitive that releases every waiting task once its
/// counter reaches zero or below.
///
/// ```
/// # use corex::executor::ThreadedSerialExecutor;
/// # use corex::sync::Latch;
/// # use corex::task::Task;
/// # use std::sync::Arc;
/// let exec = ThreadedSerialExecutor::new();
/// let latch = Arc::new(Latch::new(1));
/// let signaller = latch.clone();
/// exec.schedule(Task::new(async move {
///     signaller.count_down(1);
///     Ok(())
/// }));
/// let waiter = Task::new(async move {
///     latch.wait().await?;
///     Ok(())
/// });
/// exec.sync_wait(waiter).unwrap();
/// ```
pub struct Latch {
    inner: Mutex<Inner>,
}

impl Latch {
    /// Create a latch that releases its waiters once `count` counted-down
    /// units have been applied.
    pub fn new(count: isize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                count,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Decrement the counter by `n`; if it drops to zero or below, release
    /// every currently-queued waiter. Re-entering after the latch has
    /// already signalled is a no-op — the counter is not decremented below
    /// its first non-positive value.
    pub fn count_down(&self, n: isize) {
        let waiters = {
            let mut inner = self.inner.lock().unwrap();
            if inner.count <= 0 {
                return;
            }
            inner.count -= n;
            if inner.count > 0 {
                return;
            }
            std::mem::take(&mut inner.waiters)
        };
        for waiter in waiters {
            if let Some(cb) = waiter.upgrade() {
                cb.invoke();
            }
        }
    }

    fn signaled(&self) -> bool {
        self.inner.lock().unwrap().count <= 0
    }

    /// Suspend the current task until the latch's counter reaches zero.
    /// Returns immediately, without suspending, if it already has.
    pub fn wait(&self) -> LatchWait<'_> {
        LatchWait {
            latch: self,
            callback: None,
        }
    }
}

#[must_use = "futures do nothing unless awaited"]
pub struct LatchWait<'a> {
    latch: &'a Latch,
    callback: Option<CallbackRef>,
}

impl Future for LatchWait<'_> {
    type Output = anyhow::Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.callback.is_some() {
            this.callback = None;
            return Poll::Ready(Ok(()));
        }
        if this.latch.signaled() {
            return Poll::Ready(Ok(()));
        }

        let current = task::with_current(Clone::clone);
        let executor = current
            .executor()
            .expect("Latch awaited by a task not yet bound to an executor");
        executor.external_handle(current.clone());

        let woken = current.clone();
        let callback = Callback::new(move || {
            if let Some(executor) = woken.executor() {
                executor.next_handle(woken.clone());
            }
        });
        {
            let mut inner = this.latch.inner.lock().unwrap();
            if inner.count <= 0 {
                // Signalled between our check above and taking the lock;
                // don't bother enqueuing, just fall through to ready below.
                drop(inner);
                return Poll::Ready(Ok(()));
            }
            inner.waiters.push_back(std::sync::Arc::downgrade(&callback));
        }
        this.callback = Some(callback);
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ThreadedSerialExecutor;
    use crate::task::Task;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn releases_all_waiters_once_count_reaches_zero() {
        let exec = ThreadedSerialExecutor::new();
        let latch = Arc::new(Latch::new(3));
        let released = Arc::new(AtomicUsize::new(0));

        let mut waiters = Vec::new();
        for _ in 0..5 {
            let latch = latch.clone();
            let released = released.clone();
            waiters.push(exec.schedule(Task::new(async move {
                latch.wait().await?;
                released.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })));
        }

        for _ in 0..3 {
            latch.count_down(1);
        }

        for waiter in waiters {
            exec.sync_wait(waiter).unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn already_signalled_latch_does_not_suspend() {
        let exec = ThreadedSerialExecutor::new();
        let latch = Latch::new(0);
        let task = Task::new(async move {
            latch.wait().await?;
            Ok(())
        });
        exec.sync_wait(task).unwrap();
    }

    #[test]
    fn repeated_count_down_after_signal_is_a_no_op() {
        let latch = Latch::new(1);
        latch.count_down(1);
        latch.count_down(5);
        assert!(latch.signaled());
    }
}
