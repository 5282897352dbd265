// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cooperative cancellation: a [`StopSource`] hands out [`StopToken`]s that
//! tasks consult at suspension points.
//!
//! Grounded on `examples/original_source/include/coro/core/stop.hpp`: a
//! monotonic "stop requested" flag with a list of weakly-held callbacks that
//! fire, in registration order, exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::callback::{Callback, CallbackRef};
use crate::error::StopError;

/// Shared cancellation state. Never exposed directly; always accessed through
/// a [`StopSource`] (to request stop) or [`StopToken`] (to observe it).
struct StopState {
    requested: AtomicBool,
    exception: Box<dyn Fn() -> anyhow::Error + Send + Sync>,
    callbacks: Mutex<Vec<crate::callback::WeakCallbackRef>>,
}

impl StopState {
    fn new(exception: Box<dyn Fn() -> anyhow::Error + Send + Sync>) -> Self {
        Self {
            requested: AtomicBool::new(false),
            exception,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    fn request_stop(&self) {
        if self.requested.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.callbacks.lock().unwrap());
        for weak in callbacks {
            if let Some(cb) = weak.upgrade() {
                cb.invoke();
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    fn add_callback(self: &Arc<Self>, f: impl FnOnce() + Send + 'static) -> CallbackRef {
        if self.stop_requested() {
            let cb = Callback::new(f);
            cb.invoke();
            return cb;
        }
        let cb = Callback::new(f);
        let mut callbacks = self.callbacks.lock().unwrap();
        // Stop may have been requested while we were constructing `cb`; check
        // again under the lock so we never leak a registration that will
        // never fire.
        if self.requested.load(Ordering::Acquire) {
            drop(callbacks);
            cb.invoke();
            return cb;
        }
        callbacks.push(Arc::downgrade(&cb));
        cb
    }
}

/// The producer half of a cancellation signal.
///
/// Dropping a `StopSource` does not request stop; it merely releases this
/// handle's reference to the shared state (other [`StopToken`]s may still
/// hold it alive).
#[derive(Clone)]
pub struct StopSource {
    state: Arc<StopState>,
}

impl StopSource {
    /// A fresh source whose token throws [`StopError`] when stop fires.
    pub fn new() -> Self {
        Self {
            state: Arc::new(StopState::new(Box::new(|| anyhow::Error::new(StopError)))),
        }
    }

    /// A fresh source whose token throws the exception produced by `make_exception`.
    pub fn with_exception<F>(make_exception: F) -> Self
    where
        F: Fn() -> anyhow::Error + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(StopState::new(Box::new(make_exception))),
        }
    }

    /// Request cancellation. Idempotent: only the first call fires callbacks.
    pub fn request_stop(&self) {
        self.state.request_stop();
    }

    pub fn stop_requested(&self) -> bool {
        self.state.stop_requested()
    }

    pub fn token(&self) -> StopToken {
        StopToken {
            state: Some(self.state.clone()),
        }
    }
}

impl Default for StopSource {
    fn default() -> Self {
        Self::new()
    }
}

/// The consumer half of a cancellation signal.
///
/// A default-constructed token has no backing state: every query returns
/// `false`/never-fires, matching a task that was never given a cancellation
/// scope.
#[derive(Clone, Default)]
pub struct StopToken {
    state: Option<Arc<StopState>>,
}

impl StopToken {
    /// A token that can never be cancelled.
    pub fn none() -> Self {
        Self { state: None }
    }

    pub fn stop_requested(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.stop_requested())
    }

    /// Raise this token's exception if stop has been requested.
    pub fn throw_if_stopped(&self) -> anyhow::Result<()> {
        if let Some(state) = &self.state {
            if state.stop_requested() {
                return Err((state.exception)());
            }
        }
        Ok(())
    }

    /// The exception this token would throw, regardless of whether stop was
    /// actually requested.
    pub fn exception(&self) -> anyhow::Error {
        match &self.state {
            Some(state) => (state.exception)(),
            None => anyhow::Error::new(StopError),
        }
    }

    /// Register `f` to run when stop fires. If stop already fired, `f` runs
    /// inline before this call returns. The returned [`CallbackRef`] must be
    /// kept alive for as long as the registration should remain active —
    /// dropping it unregisters (the owner only ever holds a weak reference).
    pub(crate) fn add_callback(&self, f: impl FnOnce() + Send + 'static) -> CallbackRef {
        match &self.state {
            Some(state) => state.add_callback(f),
            None => Callback::noop(),
        }
    }

    /// Whether this token shares state with `other`.
    pub fn is_same(&self, other: &StopToken) -> bool {
        match (&self.state, &other.state) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn default_token_never_fires() {
        let token = StopToken::default();
        assert!(!token.stop_requested());
        assert!(token.throw_if_stopped().is_ok());
    }

    #[test]
    fn request_stop_runs_callbacks_in_order() {
        let source = StopSource::new();
        let token = source.token();
        let order = Arc::new(Mutex::new(Vec::new()));

        let _c1 = {
            let order = order.clone();
            token.add_callback(move || order.lock().unwrap().push(1))
        };
        let _c2 = {
            let order = order.clone();
            token.add_callback(move || order.lock().unwrap().push(2))
        };

        source.request_stop();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn request_stop_is_idempotent() {
        let source = StopSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _c = {
            let count = count.clone();
            source
                .token()
                .add_callback(move || { count.fetch_add(1, Ordering::SeqCst); })
        };
        source.request_stop();
        source.request_stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_registration_fires_inline() {
        let source = StopSource::new();
        source.request_stop();
        let fired = Arc::new(AtomicBool::new(false));
        let _c = {
            let fired = fired.clone();
            source
                .token()
                .add_callback(move || fired.store(true, Ordering::SeqCst))
        };
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn throw_if_stopped_yields_stop_error() {
        let source = StopSource::new();
        source.request_stop();
        let err = source.token().throw_if_stopped().unwrap_err();
        assert!(err.downcast_ref::<StopError>().is_some());
    }
}
