// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;

/// The exception a [`crate::StopToken`] throws when no other reason was given.
///
/// Any task that observes its own stop token requested (or whose awaited
/// child observed it) surfaces this as the task's `anyhow::Error` unless the
/// owning [`crate::StopSource`] was constructed with a different exception.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct StopError;

impl fmt::Display for StopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stop requested")
    }
}

impl std::error::Error for StopError {}

/// Returned when a task's result slot is read before the task has completed.
///
/// Observing this indicates a bug in the runtime or in a caller that bypassed
/// the normal await protocol (e.g. calling `take_result` on a task that is
/// still `Pending`); it is never produced by ordinary use of this crate.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Uninitialized;

impl fmt::Display for Uninitialized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("task result read before completion")
    }
}

impl std::error::Error for Uninitialized {}

/// A task's result was already taken by a previous reader.
///
/// Every task frame yields its result to exactly one reader (the awaiting
/// continuation, or a `sync_wait`/`future`/`promise` wrapper); reading it
/// twice is a caller bug.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Consumed;

impl fmt::Display for Consumed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("task result already consumed")
    }
}

impl std::error::Error for Consumed {}
