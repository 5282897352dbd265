// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A reference-counted, one-shot closure shared by [`crate::StopState`] and
//! [`crate::time::TimedScheduler`] subscribers.
//!
//! Both subscribers follow the same shape: register a weak reference with
//! some owner, keep a strong reference alive for as long as the subscriber
//! cares about being notified, and let the owner invoke (and consume) the
//! closure at most once.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

pub(crate) type CallbackRef = Arc<Callback>;
pub(crate) type WeakCallbackRef = Weak<Callback>;

pub(crate) struct Callback {
    inner: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Callback {
    pub(crate) fn new(f: impl FnOnce() + Send + 'static) -> CallbackRef {
        Arc::new(Self {
            inner: Mutex::new(Some(Box::new(f))),
        })
    }

    /// A callback that never fires; used when a [`crate::StopToken`] has no
    /// backing state and registration is therefore a no-op.
    pub(crate) fn noop() -> CallbackRef {
        Arc::new(Self {
            inner: Mutex::new(None),
        })
    }

    /// Fire the callback, if it has not already fired. Panics inside the
    /// closure are caught and discarded, matching the original `invoke()`
    /// contract of swallowing exceptions from subscriber code.
    pub(crate) fn invoke(&self) {
        let f = self.inner.lock().unwrap().take();
        if let Some(f) = f {
            let _ = panic::catch_unwind(AssertUnwindSafe(f));
        }
    }
}
