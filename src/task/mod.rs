// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The task frame: a type-erased, reference-counted, lazily-started unit of
//! work, plus the awaitable protocol connecting a child task to its awaiter.
//!
//! Grounded on `examples/JonasKruckenberg-k23/libs/kasync/src/task.rs`'s
//! `Header` + `&'static VTable` type-erasure scheme (so heterogeneous
//! `Task<T>` values can share one executor queue), simplified for this
//! crate's single-queue, mutex-guarded, non-`no_std` execution model: one
//! [`Header`] per frame carries the shared, generic-free lifecycle state
//! (completion, executor binding, continuation, context), while only the
//! vtable-dispatched `poll`/`take_result`/`force_stop`/`deallocate` functions
//! know the frame's concrete future type.
//!
//! None of this crate's awaitables ever call `cx.waker().wake()`: every
//! suspension is resolved by directly calling `schedule`/`next` on a
//! recorded continuation, so every vtable poll is driven with
//! [`futures::task::noop_waker_ref`] rather than a real [`Waker`].

mod frame;
mod id;

use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskCx, Poll};

use pin_project::pin_project;

use crate::context::TaskContext;
use crate::executor::DynExecutor;
use crate::stop::StopToken;

pub(crate) use frame::TaskFrame;
pub(crate) use id::Id;

/// What the vtable's `poll` function found after driving the future once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Pending,
    Finished,
}

#[derive(Debug)]
pub(crate) struct VTable {
    pub(crate) poll: unsafe fn(NonNull<Header>) -> PollOutcome,
    pub(crate) take_result: unsafe fn(NonNull<Header>, NonNull<()>),
    pub(crate) force_stop: unsafe fn(NonNull<Header>, anyhow::Error),
    pub(crate) deallocate: unsafe fn(NonNull<Header>),
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub(crate) enum FrameState {
    Normal,
    Cancelling,
    Finished,
}

pub(crate) struct Inner {
    pub(crate) state: FrameState,
    pub(crate) context: TaskContext,
    pub(crate) continuation: Option<TaskRef>,
    pub(crate) inherit_context: bool,
}

/// The generic-free part of a task frame: everything the executor and the
/// await protocol need to touch regardless of the frame's concrete future
/// type. This must be the first field of any concrete frame struct.
pub(crate) struct Header {
    pub(crate) id: Id,
    pub(crate) vtable: &'static VTable,
    pub(crate) refcount: AtomicUsize,
    pub(crate) span: tracing::Span,
    pub(crate) inner: Mutex<Inner>,
}

impl Header {
    pub(crate) fn new(vtable: &'static VTable) -> Self {
        let id = Id::next();
        Self {
            id,
            vtable,
            refcount: AtomicUsize::new(1),
            span: tracing::trace_span!("task", id = id.as_u64()),
            inner: Mutex::new(Inner {
                state: FrameState::Normal,
                context: TaskContext::default(),
                continuation: None,
                inherit_context: true,
            }),
        }
    }
}

/// A type-erased, reference-counted pointer to a task frame.
///
/// `TaskRef` is the currency every executor and awaitable deals in: it knows
/// how to resume the frame, query and mutate its lifecycle state, and drop
/// its storage, all without knowing the frame's concrete future type.
pub(crate) struct TaskRef(NonNull<Header>);

unsafe impl Send for TaskRef {}
unsafe impl Sync for TaskRef {}

impl TaskRef {
    pub(crate) fn from_header(ptr: NonNull<Header>) -> Self {
        Self(ptr)
    }

    fn header(&self) -> &Header {
        unsafe { self.0.as_ref() }
    }

    pub(crate) fn id(&self) -> u64 {
        self.header().id.as_u64()
    }

    pub(crate) fn ready(&self) -> bool {
        self.header().inner.lock().unwrap().state == FrameState::Finished
    }

    pub(crate) fn executor(&self) -> Option<Arc<dyn DynExecutor>> {
        self.header().inner.lock().unwrap().context.executor.clone()
    }

    pub(crate) fn context(&self) -> TaskContext {
        self.header().inner.lock().unwrap().context.clone()
    }

    pub(crate) fn set_context(&self, ctx: TaskContext) {
        self.header().inner.lock().unwrap().context = ctx;
    }

    pub(crate) fn set_executor(&self, executor: Arc<dyn DynExecutor>) {
        self.header().inner.lock().unwrap().context.executor = Some(executor);
    }

    pub(crate) fn stop_token(&self) -> StopToken {
        self.header().inner.lock().unwrap().context.stop_token.clone()
    }

    pub(crate) fn set_stop_token(&self, token: StopToken) {
        self.header().inner.lock().unwrap().context.stop_token = token;
    }

    pub(crate) fn enable_context_inheritance(&self, enabled: bool) {
        self.header().inner.lock().unwrap().inherit_context = enabled;
    }

    fn inherits_context(&self) -> bool {
        self.header().inner.lock().unwrap().inherit_context
    }

    /// §4.2: link `cont` as this frame's continuation. If this frame already
    /// finished, schedule `cont` immediately instead of storing it.
    pub(crate) fn set_continuation(&self, cont: TaskRef) {
        let already_finished = {
            let mut inner = self.header().inner.lock().unwrap();
            if inner.state == FrameState::Finished {
                true
            } else {
                inner.continuation = Some(cont.clone());
                false
            }
        };
        if already_finished {
            self.schedule_continuation(cont);
        }
    }

    /// LIFO ("next") if `cont` shares this frame's executor (call-stack
    /// precedence), FIFO ("schedule") otherwise.
    fn schedule_continuation(&self, cont: TaskRef) {
        let my_exec = self.executor();
        let cont_exec = cont
            .executor()
            .expect("a continuation must be bound to an executor before being linked");
        match my_exec {
            Some(my_exec) if Arc::ptr_eq(&my_exec, &cont_exec) => cont_exec.next_handle(cont),
            _ => cont_exec.schedule_handle(cont),
        }
    }

    /// §4.2 `on_finished`: record completion and wake the continuation, if any.
    fn on_finished(&self) {
        let continuation = {
            let mut inner = self.header().inner.lock().unwrap();
            inner.state = FrameState::Finished;
            inner.continuation.take()
        };
        tracing::trace!(task = self.id(), "task finished");
        if let Some(cont) = continuation {
            self.schedule_continuation(cont);
        }
    }

    /// §4.2 `stop_if_necessary`: if this frame is still running and its stop
    /// token fired, force the result slot to the stop exception and finish
    /// the frame without ever polling its future again. Returns whether
    /// cancellation actually fired here.
    pub(crate) fn stop_if_necessary(&self) -> bool {
        let exception = {
            let mut inner = self.header().inner.lock().unwrap();
            if inner.state != FrameState::Normal || !inner.context.stop_token.stop_requested() {
                None
            } else {
                inner.state = FrameState::Cancelling;
                Some(inner.context.stop_token.exception())
            }
        };
        let Some(exception) = exception else {
            return false;
        };
        unsafe { (self.header().vtable.force_stop)(self.0, exception) };
        self.on_finished();
        true
    }

    /// Resume this frame: poll its future once (unless cancellation
    /// short-circuits it), and run the finished-hook if it completes.
    pub(crate) fn resume(&self) {
        if self.stop_if_necessary() {
            return;
        }
        let _span = self.header().span.enter();
        push_current(self.clone());
        let outcome = unsafe { (self.header().vtable.poll)(self.0) };
        pop_current();
        if outcome == PollOutcome::Finished {
            self.on_finished();
        }
    }

    /// Move this frame's result out. Must only be called once, after the
    /// frame has finished.
    pub(crate) unsafe fn take_result<T>(&self) -> anyhow::Result<T> {
        let mut out = MaybeUninit::<anyhow::Result<T>>::uninit();
        unsafe {
            (self.header().vtable.take_result)(
                self.0,
                NonNull::new_unchecked(out.as_mut_ptr()).cast(),
            );
            out.assume_init()
        }
    }
}

impl Clone for TaskRef {
    fn clone(&self) -> Self {
        self.header().refcount.fetch_add(1, Ordering::Relaxed);
        Self(self.0)
    }
}

impl Drop for TaskRef {
    fn drop(&mut self) {
        if self.header().refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            unsafe { (self.header().vtable.deallocate)(self.0) };
        }
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for TaskRef {}

impl std::hash::Hash for TaskRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialOrd for TaskRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TaskRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

thread_local! {
    static CURRENT: RefCell<Vec<TaskRef>> = const { RefCell::new(Vec::new()) };
}

fn push_current(task: TaskRef) {
    CURRENT.with(|c| c.borrow_mut().push(task));
}

fn pop_current() {
    CURRENT.with(|c| {
        c.borrow_mut().pop();
    });
}

/// Access the currently-resuming task frame, if any. Used by `TaskAwaitable`
/// and the context marker futures; panics outside of a task's `poll`.
pub(crate) fn with_current<R>(f: impl FnOnce(&TaskRef) -> R) -> R {
    CURRENT.with(|c| {
        let stack = c.borrow();
        let current = stack
            .last()
            .expect("context marker awaited outside of a running task");
        f(current)
    })
}

fn try_current() -> Option<TaskRef> {
    CURRENT.with(|c| c.borrow().last().cloned())
}

/// A lazily-started, move-only handle to a unit of asynchronous work.
///
/// A `Task<T>` is never polled directly; scheduling it on an
/// [`crate::Executor`] or awaiting it (via [`IntoFuture`]) is what drives it.
/// Dropping a `Task<T>` drops this handle's reference to the frame — if the
/// frame is already scheduled on an executor, the executor's own reference
/// keeps it alive and it still runs to completion.
pub struct Task<T> {
    task_ref: Option<TaskRef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Task<T> {
    /// Wrap a future as a lazy task. The future is not polled until the task
    /// is scheduled on an executor or awaited from within another task.
    pub fn new<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let task_ref = frame::spawn::<Fut, T>(fut);
        Self {
            task_ref: Some(task_ref),
            _marker: PhantomData,
        }
    }

    pub fn ready(&self) -> bool {
        self.task_ref().ready()
    }

    pub fn context(&self) -> TaskContext {
        self.task_ref().context()
    }

    pub fn set_context(&self, ctx: TaskContext) {
        self.task_ref().set_context(ctx);
    }

    pub fn stop_token(&self) -> StopToken {
        self.task_ref().stop_token()
    }

    pub fn set_stop_token(&self, token: StopToken) {
        self.task_ref().set_stop_token(token);
    }

    pub fn user_data(&self) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        self.task_ref().context().user_data
    }

    pub fn set_user_data(&self, data: Arc<dyn std::any::Any + Send + Sync>) {
        let mut ctx = self.task_ref().context();
        ctx.user_data = Some(data);
        self.task_ref().set_context(ctx);
    }

    /// Disable inheriting the spawning task's context when this task is
    /// first bound to an executor. Used for "root" tasks, such as the
    /// wrapper `future`/`sync_wait`/`promise` spawn.
    pub fn enable_context_inheritance(&self, enabled: bool) {
        self.task_ref().enable_context_inheritance(enabled);
    }

    /// Drop this handle's reference to the frame.
    pub fn reset(&mut self) {
        self.task_ref = None;
    }

    pub(crate) fn task_ref(&self) -> &TaskRef {
        self.task_ref
            .as_ref()
            .expect("use of a Task after it was reset")
    }

    pub(crate) fn into_task_ref(mut self) -> TaskRef {
        self.task_ref.take().expect("use of a Task after it was reset")
    }
}

/// §4.3: the awaitable connecting an awaiting task to a child [`Task<T>`].
#[pin_project]
pub struct TaskAwaitable<T> {
    task: Option<Task<T>>,
    bound: bool,
}

impl<T: Send + 'static> IntoFuture for Task<T> {
    type Output = anyhow::Result<T>;
    type IntoFuture = TaskAwaitable<T>;

    fn into_future(self) -> Self::IntoFuture {
        TaskAwaitable {
            task: Some(self),
            bound: false,
        }
    }
}

impl<T: Send + 'static> Future for TaskAwaitable<T> {
    type Output = anyhow::Result<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut TaskCx<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if !*this.bound {
            *this.bound = true;
            let child = this
                .task
                .as_ref()
                .expect("TaskAwaitable polled after completion")
                .task_ref();
            let parent = try_current();
            let parent_exec = parent.as_ref().and_then(TaskRef::executor);

            if child.executor().is_none() {
                if let Some(parent) = &parent {
                    if child.inherits_context() {
                        child.set_context(parent.context());
                    }
                }
                if let Some(exec) = &parent_exec {
                    child.set_executor(exec.clone());
                    exec.next_handle(child.clone());
                }
            } else if let (Some(parent_exec), Some(child_exec)) = (&parent_exec, &child.executor())
            {
                if !Arc::ptr_eq(parent_exec, child_exec) {
                    if let Some(parent) = &parent {
                        parent_exec.external_handle(parent.clone());
                    }
                }
            }

            if let Some(parent) = &parent {
                child.set_continuation(parent.clone());
            }
        }

        let child = this
            .task
            .as_ref()
            .expect("TaskAwaitable polled after completion")
            .task_ref();
        if !child.ready() {
            return Poll::Pending;
        }

        let task = this.task.take().expect("TaskAwaitable polled after completion");
        let task_ref = task.into_task_ref();
        // Extract the result before dropping our reference so a concurrent
        // deallocation race can never observe a half-consumed frame.
        let result = unsafe { task_ref.take_result::<T>() };
        drop(task_ref);

        if let Some(parent) = try_current() {
            if let Err(stop_err) = parent.stop_token().throw_if_stopped() {
                return Poll::Ready(Err(stop_err));
            }
        }

        Poll::Ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ThreadedSerialExecutor;

    #[test]
    fn linear_chain_resolves_innermost_value() {
        let exec = ThreadedSerialExecutor::new();
        let inner: Task<i32> = Task::new(async { Ok(41) });
        let outer = exec.schedule(Task::new(async move {
            let v: i32 = inner.await?;
            Ok(v + 1)
        }));
        let result = exec.sync_wait(outer);
        assert_eq!(result.unwrap(), 42);
    }
}
