// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-task context (`{executor, stop_token, user_data}`) and the zero-sized
//! marker futures that read it without suspending.
//!
//! Grounded on `examples/original_source/include/coro/core/task_context.hpp`:
//! `co_await coro::currentExecutor` (etc.) are awaited, never called, and
//! resolve synchronously off the enclosing task frame.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskCx, Poll};

use crate::executor::DynExecutor;
use crate::stop::StopToken;
use crate::task;

/// The data every task frame carries: which executor is driving it, its
/// cancellation scope, and an opaque user payload.
#[derive(Clone, Default)]
pub struct TaskContext {
    pub(crate) executor: Option<Arc<dyn DynExecutor>>,
    pub(crate) stop_token: StopToken,
    pub(crate) user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl TaskContext {
    pub fn executor(&self) -> Option<Arc<dyn DynExecutor>> {
        self.executor.clone()
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop_token.clone()
    }

    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.user_data.clone()
    }
}

macro_rules! context_marker {
    ($(#[$meta:meta])* $name:ident, $out:ty, $field:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl Future for $name {
            type Output = $out;

            fn poll(self: Pin<&mut Self>, _cx: &mut TaskCx<'_>) -> Poll<Self::Output> {
                Poll::Ready(task::with_current(|t| t.context().$field.clone()))
            }
        }
    };
}

context_marker!(
    /// Awaiting this returns the executor driving the currently running task.
    CurrentExecutor,
    Option<Arc<dyn DynExecutor>>,
    executor
);

context_marker!(
    /// Awaiting this returns the stop token of the currently running task.
    CurrentStopToken,
    StopToken,
    stop_token
);

context_marker!(
    /// Awaiting this returns the user data of the currently running task.
    CurrentUserData,
    Option<Arc<dyn Any + Send + Sync>>,
    user_data
);

/// Awaiting this returns the full [`TaskContext`] of the currently running task.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentContext;

impl Future for CurrentContext {
    type Output = TaskContext;

    fn poll(self: Pin<&mut Self>, _cx: &mut TaskCx<'_>) -> Poll<Self::Output> {
        Poll::Ready(task::with_current(|t| t.context()))
    }
}

/// Awaiting this returns the task id of the currently running task, mostly
/// useful for logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentTaskId;

impl Future for CurrentTaskId {
    type Output = u64;

    fn poll(self: Pin<&mut Self>, _cx: &mut TaskCx<'_>) -> Poll<Self::Output> {
        Poll::Ready(task::with_current(|t| t.id()))
    }
}
