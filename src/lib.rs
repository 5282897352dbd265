// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A lightweight asynchronous coroutine runtime with explicit suspension
//! points, cooperative cancellation, and pluggable serial executors.
//!
//! A [`Task<T>`] wraps an ordinary `async fn` body as a lazily-started,
//! reference-counted frame; it never runs until it is [`ThreadedSerialExecutor::schedule`]d
//! (or awaited from inside another running task, which implicitly schedules
//! it on the awaiter's executor). Two executors are provided: a
//! [`ThreadedSerialExecutor`] backed by an owned worker thread, for ordinary
//! multi-threaded programs, and a [`CooperativeSerialExecutor`] meant to be
//! driven from inside a host's own event loop.
//!
//! ```
//! use corex::executor::ThreadedSerialExecutor;
//! use corex::task::Task;
//!
//! let exec = ThreadedSerialExecutor::new();
//! let inner: Task<i32> = Task::new(async { Ok(41) });
//! let outer = Task::new(async move {
//!     let value: i32 = inner.await?;
//!     Ok(value + 1)
//! });
//! let result = exec.sync_wait(outer);
//! assert_eq!(result.unwrap(), 42);
//! ```

mod callback;
pub mod context;
mod error;
pub mod executor;
pub mod stop;
pub mod sync;
pub mod task;
pub mod time;

mod all;

pub use all::all;
pub use error::{Consumed, StopError, Uninitialized};
pub use stop::{StopSource, StopToken};
pub use task::Task;
