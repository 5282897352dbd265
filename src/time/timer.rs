// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A single process-wide timer thread, matching
//! `examples/original_source/include/coro/detail/sleep.hpp`'s
//! `static detail::TimedScheduler scheduler` — one thread serves every
//! [`crate::time::sleep`] call from any executor, rather than one timer
//! thread per executor.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::Instant;

use crate::callback::WeakCallbackRef;

struct Inner {
    state: Mutex<BTreeMap<Instant, Vec<WeakCallbackRef>>>,
    condvar: Condvar,
}

pub(crate) struct TimedScheduler {
    inner: Arc<Inner>,
}

impl TimedScheduler {
    pub(crate) fn global() -> &'static TimedScheduler {
        static INSTANCE: OnceLock<TimedScheduler> = OnceLock::new();
        INSTANCE.get_or_init(|| {
            let inner = Arc::new(Inner {
                state: Mutex::new(BTreeMap::new()),
                condvar: Condvar::new(),
            });
            let worker_inner = inner.clone();
            thread::Builder::new()
                .name("corex-timed-scheduler".into())
                .spawn(move || Self::run(&worker_inner))
                .expect("failed to spawn timer thread");
            TimedScheduler { inner }
        })
    }

    /// Register `callback` to fire (at most once, weakly) once `deadline` passes.
    pub(crate) fn schedule(&self, deadline: Instant, callback: WeakCallbackRef) {
        let mut state = self.inner.state.lock().unwrap();
        state.entry(deadline).or_default().push(callback);
        drop(state);
        // A new, possibly-sooner deadline may have just been added; wake the
        // worker so it recomputes how long to wait.
        self.inner.condvar.notify_all();
    }

    fn run(inner: &Arc<Inner>) {
        let span = tracing::debug_span!("timed_scheduler_worker");
        let _enter = span.enter();
        let mut state = inner.state.lock().unwrap();
        loop {
            let now = Instant::now();
            let due: Vec<Instant> = state.range(..=now).map(|(deadline, _)| *deadline).collect();
            for deadline in due {
                if let Some(callbacks) = state.remove(&deadline) {
                    drop(state);
                    for callback in callbacks {
                        if let Some(callback) = callback.upgrade() {
                            callback.invoke();
                        }
                    }
                    state = inner.state.lock().unwrap();
                }
            }

            match state.keys().next().copied() {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        let (guard, _timeout) =
                            inner.condvar.wait_timeout(state, deadline - now).unwrap();
                        state = guard;
                    }
                    // else: already due, loop around and drain it above.
                }
                None => {
                    state = inner.condvar.wait(state).unwrap();
                }
            }
        }
    }
}
