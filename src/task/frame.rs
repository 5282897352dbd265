// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The concrete, generic task frame and the vtable that erases it.
//!
//! Mirrors `examples/JonasKruckenberg-k23/libs/kasync/src/task.rs`'s
//! `Schedulable<S>` / `Stage<F>` split: [`Header`] must be the first field so
//! a `*mut TaskFrame<Fut>` and a `*mut Header` share an address.

use std::cell::UnsafeCell;
use std::future::Future;
use std::marker::PhantomData;
use std::mem;
use std::pin::Pin;
use std::ptr::NonNull;
use std::task::Poll;

use super::{Header, PollOutcome, TaskRef, VTable};

/// The lifecycle stage of a frame's future: either the future itself, its
/// completed (and not yet taken) output, or already-taken.
enum Stage<Fut: Future> {
    Pending(Fut),
    Ready(Fut::Output),
    Consumed,
}

#[repr(C)]
pub(crate) struct TaskFrame<Fut: Future> {
    pub(crate) header: Header,
    stage: UnsafeCell<Stage<Fut>>,
}

/// Box up `fut` as a lazily-started frame and return a type-erased handle to it.
pub(crate) fn spawn<Fut, T>(fut: Fut) -> TaskRef
where
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let vtable = &Vt::<Fut, T>::VTABLE;
    let frame = Box::new(TaskFrame {
        header: Header::new(vtable),
        stage: UnsafeCell::new(Stage::Pending(fut)),
    });
    let ptr = Box::into_raw(frame).cast::<Header>();
    // SAFETY: `Box::into_raw` never returns null, and `Header` is the first
    // `#[repr(C)]` field of `TaskFrame`, so this cast preserves the address.
    let header = unsafe { NonNull::new_unchecked(ptr) };
    TaskRef::from_header(header)
}

unsafe fn poll<Fut, T>(header: NonNull<Header>) -> PollOutcome
where
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let frame = header.cast::<TaskFrame<Fut>>();
    // SAFETY: called by `TaskRef::resume`, which guarantees exclusive,
    // non-reentrant access to this frame's stage for the duration.
    let stage = unsafe { &mut *frame.as_ref().stage.get() };
    match stage {
        Stage::Pending(fut) => {
            // SAFETY: the frame is heap-allocated via `Box` and never
            // moved after `spawn`, so its future is effectively pinned.
            let fut = unsafe { Pin::new_unchecked(fut) };
            let waker = futures::task::noop_waker_ref();
            let mut cx = std::task::Context::from_waker(waker);
            match fut.poll(&mut cx) {
                Poll::Ready(output) => {
                    *stage = Stage::Ready(output);
                    PollOutcome::Finished
                }
                Poll::Pending => PollOutcome::Pending,
            }
        }
        _ => unreachable!("poll called on an already-finished task frame"),
    }
}

unsafe fn take_result<Fut, T>(header: NonNull<Header>, out: NonNull<()>)
where
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let frame = header.cast::<TaskFrame<Fut>>();
    let stage = unsafe { &mut *frame.as_ref().stage.get() };
    let result = match mem::replace(stage, Stage::Consumed) {
        Stage::Ready(result) => result,
        Stage::Pending(_) => panic!("{}", crate::error::Uninitialized),
        Stage::Consumed => panic!("{}", crate::error::Consumed),
    };
    // SAFETY: caller guarantees `out` points at a valid, appropriately
    // aligned `anyhow::Result<T>` slot, per `TaskRef::take_result`.
    unsafe { out.cast::<anyhow::Result<T>>().write(result) };
}

unsafe fn force_stop<Fut, T>(header: NonNull<Header>, exception: anyhow::Error)
where
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let frame = header.cast::<TaskFrame<Fut>>();
    let stage = unsafe { &mut *frame.as_ref().stage.get() };
    *stage = Stage::Ready(Err(exception));
}

unsafe fn deallocate<Fut, T>(header: NonNull<Header>)
where
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    // SAFETY: refcount reached zero; no other `TaskRef` can observe this
    // frame again.
    unsafe {
        drop(Box::from_raw(header.cast::<TaskFrame<Fut>>().as_ptr()));
    }
}

/// A generic-parameter carrier for `TaskFrame<Fut>`'s vtable.
///
/// An associated const on a generic `impl` is monomorphized once per
/// instantiation and *can* name the impl's generic parameters — unlike a
/// `static`/`const` item nested in a generic function, which is a distinct
/// item that cannot capture the enclosing function's generics. Mirrors
/// `examples/JonasKruckenberg-k23/libs/kasync/src/task.rs`'s
/// `impl<F, S> Task<F, S> { const TASK_VTABLE: VTable = …; }`.
struct Vt<Fut, T>(PhantomData<fn() -> (Fut, T)>);

impl<Fut, T> Vt<Fut, T>
where
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    const VTABLE: VTable = VTable {
        poll: poll::<Fut, T>,
        take_result: take_result::<Fut, T>,
        force_stop: force_stop::<Fut, T>,
        deallocate: deallocate::<Fut, T>,
    };
}
