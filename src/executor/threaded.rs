// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A serial executor backed by one owned worker thread.
//!
//! Grounded on `examples/original_source/include/coro/executors/serial_executor.hpp`'s
//! `SerialExecutor::runScheduled`: a mutex + condvar guarded deque, popped
//! from one end and admitted from either end depending on FIFO/LIFO intent,
//! unlocked again before the popped task is actually resumed so producers
//! never block behind a running task.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;

use crate::callback::{Callback, CallbackRef};
use crate::executor::DynExecutor;
use crate::task::{Task, TaskRef};

struct State {
    /// Consumed from the back (`pop_back`); `schedule_handle` pushes to the
    /// front (FIFO relative to other scheduled work), `next_handle` pushes
    /// to the back (LIFO — runs next, ahead of anything already queued).
    ready: VecDeque<TaskRef>,
    external: HashMap<TaskRef, CallbackRef>,
    terminating: bool,
}

struct Shared {
    self_weak: Weak<Shared>,
    mutex: Mutex<State>,
    condvar: Condvar,
}

impl Shared {
    fn wake_external(&self, task: TaskRef) {
        let mut state = self.mutex.lock().unwrap();
        if state.external.remove(&task).is_some() {
            state.ready.push_back(task);
            drop(state);
            self.condvar.notify_one();
        }
    }
}

impl DynExecutor for Shared {
    fn schedule_handle(&self, task: TaskRef) {
        let mut state = self.mutex.lock().unwrap();
        state.external.remove(&task);
        state.ready.push_front(task);
        drop(state);
        self.condvar.notify_one();
    }

    fn next_handle(&self, task: TaskRef) {
        let mut state = self.mutex.lock().unwrap();
        state.external.remove(&task);
        state.ready.push_back(task);
        drop(state);
        self.condvar.notify_one();
    }

    fn external_handle(&self, task: TaskRef) {
        {
            let mut state = self.mutex.lock().unwrap();
            state.external.insert(task.clone(), Callback::noop());
        }
        let weak_self = self.self_weak.clone();
        let woken = task.clone();
        let callback = task.stop_token().add_callback(move || {
            if let Some(shared) = weak_self.upgrade() {
                shared.wake_external(woken);
            }
        });
        let mut state = self.mutex.lock().unwrap();
        if let Some(slot) = state.external.get_mut(&task) {
            *slot = callback;
        }
    }
}

/// A serial executor that owns a dedicated worker thread; `sync_wait` and
/// `future` block the calling thread on task completion.
pub struct ThreadedSerialExecutor {
    shared: Arc<Shared>,
    _worker: thread::JoinHandle<()>,
}

impl ThreadedSerialExecutor {
    pub fn new() -> Arc<Self> {
        let shared = Arc::new_cyclic(|weak| Shared {
            self_weak: weak.clone(),
            mutex: Mutex::new(State {
                ready: VecDeque::new(),
                external: HashMap::new(),
                terminating: false,
            }),
            condvar: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("corex-threaded-executor".into())
            .spawn(move || Self::run(&worker_shared))
            .expect("failed to spawn executor worker thread");

        Arc::new(Self {
            shared,
            _worker: worker,
        })
    }

    fn run(shared: &Arc<Shared>) {
        let span = tracing::debug_span!("threaded_executor_worker");
        let _enter = span.enter();
        loop {
            let task = {
                let mut state = shared.mutex.lock().unwrap();
                loop {
                    if let Some(task) = state.ready.pop_back() {
                        break Some(task);
                    }
                    if state.terminating && state.external.is_empty() {
                        break None;
                    }
                    state = shared.condvar.wait(state).unwrap();
                }
            };
            match task {
                Some(task) => task.resume(),
                None => break,
            }
        }
        tracing::debug!("threaded executor worker exiting");
    }

    fn bind<T: Send + 'static>(&self, task: Task<T>) -> Task<T> {
        task.task_ref().set_executor(self.as_dyn());
        task
    }

    fn as_dyn(&self) -> Arc<dyn DynExecutor> {
        self.shared.clone()
    }

    /// Bind `task` to this executor and admit it FIFO.
    pub fn schedule<T: Send + 'static>(&self, task: Task<T>) -> Task<T> {
        let task = self.bind(task);
        self.shared.schedule_handle(task.task_ref().clone());
        task
    }

    /// Bind `task` to this executor and admit it LIFO.
    pub fn next<T: Send + 'static>(&self, task: Task<T>) -> Task<T> {
        let task = self.bind(task);
        self.shared.next_handle(task.task_ref().clone());
        task
    }

    /// Schedule `task` and return a channel that yields its result once it
    /// completes; the closest idiomatic-Rust analogue to the original's
    /// `std::future<R>` bridge.
    pub fn future<T: Send + 'static>(&self, task: Task<T>) -> mpsc::Receiver<anyhow::Result<T>> {
        let (tx, rx) = mpsc::channel();
        let wrapper: Task<()> = Task::new(async move {
            let result = task.await;
            let _ = tx.send(result);
            Ok(())
        });
        wrapper.enable_context_inheritance(false);
        self.schedule(wrapper);
        rx
    }

    /// Schedule `task` and block the calling thread until it completes.
    pub fn sync_wait<T: Send + 'static>(&self, task: Task<T>) -> anyhow::Result<T> {
        self.future(task)
            .recv()
            .expect("sync_wait: executor was dropped before the task completed")
    }
}

impl Drop for ThreadedSerialExecutor {
    fn drop(&mut self) {
        let mut state = self.shared.mutex.lock().unwrap();
        state.terminating = true;
        drop(state);
        self.shared.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::all::all;
    use crate::sync::Latch;
    use crate::time::sleep;
    use std::time::Duration;
    use tracing_subscriber::util::SubscriberInitExt;

    #[test]
    fn sync_wait_returns_value() {
        let _trace = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_thread_names(true)
            .set_default();
        let exec = ThreadedSerialExecutor::new();
        let task = Task::new(async { Ok(7) });
        assert_eq!(exec.sync_wait(task).unwrap(), 7);
    }

    #[test]
    fn scheduled_but_not_awaited_task_still_completes() {
        let exec = ThreadedSerialExecutor::new();
        let latch = Arc::new(Latch::new(1));
        let observer = latch.clone();
        let task: Task<()> = Task::new(async move {
            observer.count_down(1);
            Ok(())
        });
        let mut task = exec.schedule(task);
        task.reset();
        let wait_task = Task::new({
            let latch = latch.clone();
            async move {
                latch.wait().await?;
                Ok(())
            }
        });
        exec.sync_wait(wait_task).unwrap();
    }

    #[test]
    fn all_fans_out_concurrently() {
        let exec = ThreadedSerialExecutor::new();
        let tasks: Vec<Task<i32>> = (0..4)
            .map(|i| {
                Task::new(async move {
                    sleep(Duration::from_millis(50)).await;
                    Ok(i)
                })
            })
            .collect();
        let combined = Task::new(async move { all(tasks).await });
        let start = std::time::Instant::now();
        let result = exec.sync_wait(combined).unwrap();
        assert_eq!(result, vec![0, 1, 2, 3]);
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
