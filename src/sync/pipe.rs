// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! An unbounded multi-producer, multi-consumer value channel.
//!
//! Grounded on `examples/original_source/include/coro/sync/pipe.hpp`'s
//! `Pipe`/`PipeDataReader`/`PipeDataAwaitable`: `write` either hands the
//! value straight to the first parked reader or buffers it; `read` either
//! drains a buffered value immediately or parks.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use crate::callback::{Callback, CallbackRef, WeakCallbackRef};
use crate::task;

/// A parked reader: the slot `write` fills with the handed-off value, plus
/// the weakly-held wake callback that reschedules the reader's task once
/// that slot is filled. Storing only the slot here (as an earlier version of
/// this pipe did) left the reader with a value but no way to be resumed —
/// `write` must invoke the callback, not just fill the slot, for a park then
/// signal to actually wake the parked task (§4.7).
struct Reader<T> {
    slot: Arc<Mutex<Option<T>>>,
    wake: WeakCallbackRef,
}

struct Inner<T> {
    data: VecDeque<T>,
    readers: VecDeque<Reader<T>>,
}

/// An unbounded MPMC channel of `T` values. `write` never blocks; `read`
/// returns a future that suspends only while no value is buffered.
pub struct Pipe<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Send + 'static> Pipe<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: VecDeque::new(),
                readers: VecDeque::new(),
            }),
        }
    }

    /// Hand `value` to the first parked reader, if any; otherwise buffer it
    /// for a future `read()`.
    pub fn write(&self, value: T) {
        let reader = {
            let mut inner = self.inner.lock().unwrap();
            match inner.readers.pop_front() {
                Some(reader) => Some(reader),
                None => {
                    inner.data.push_back(value);
                    None
                }
            }
        };
        if let Some(reader) = reader {
            *reader.slot.lock().unwrap() = Some(value);
            if let Some(cb) = reader.wake.upgrade() {
                cb.invoke();
            }
        }
    }

    /// Suspend the current task until a value is available, then return it.
    pub fn read(&self) -> PipeRead<'_, T> {
        PipeRead {
            pipe: self,
            callback: None,
        }
    }
}

impl<T: Send + 'static> Default for Pipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use = "futures do nothing unless awaited"]
pub struct PipeRead<'a, T> {
    pipe: &'a Pipe<T>,
    // Kept alive only so the reader slot registered below stays reachable
    // until `write` fills it in, or this future is dropped by cancellation.
    callback: Option<(CallbackRef, Arc<Mutex<Option<T>>>)>,
}

impl<T: Send + 'static> Future for PipeRead<'_, T> {
    type Output = anyhow::Result<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some((_, slot)) = this.callback.take() {
            let value = slot
                .lock()
                .unwrap()
                .take()
                .expect("pipe reader resumed without a value in its slot");
            return Poll::Ready(Ok(value));
        }

        {
            let mut inner = this.pipe.inner.lock().unwrap();
            if let Some(value) = inner.data.pop_front() {
                return Poll::Ready(Ok(value));
            }
        }

        let current = task::with_current(Clone::clone);
        let executor = current
            .executor()
            .expect("Pipe awaited by a task not yet bound to an executor");
        executor.external_handle(current.clone());

        let slot: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let woken = current.clone();
        let callback = Callback::new(move || {
            if let Some(executor) = woken.executor() {
                executor.next_handle(woken.clone());
            }
        });
        {
            let mut inner = this.pipe.inner.lock().unwrap();
            // A writer may have raced us between the check above and
            // taking this lock.
            if let Some(value) = inner.data.pop_front() {
                drop(inner);
                return Poll::Ready(Ok(value));
            }
            inner.readers.push_back(Reader {
                slot: slot.clone(),
                wake: Arc::downgrade(&callback),
            });
        }
        this.callback = Some((callback, slot));
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ThreadedSerialExecutor;
    use crate::task::Task;

    #[test]
    fn reads_buffered_values_in_fifo_order() {
        let pipe = Pipe::new();
        pipe.write(11);
        pipe.write(22);

        let exec = ThreadedSerialExecutor::new();
        let task = Task::new(async move {
            let a = pipe.read().await?;
            let b = pipe.read().await?;
            Ok(a + b)
        });
        assert_eq!(exec.sync_wait(task).unwrap(), 33);
    }

    #[test]
    fn reader_parked_before_write_still_receives_value() {
        let exec = ThreadedSerialExecutor::new();
        let pipe = Arc::new(Pipe::new());
        let reader_pipe = pipe.clone();
        let reader = exec.schedule(Task::new(async move { reader_pipe.read().await }));
        std::thread::sleep(std::time::Duration::from_millis(20));
        pipe.write(7);
        assert_eq!(exec.sync_wait(reader).unwrap(), 7);
    }
}
