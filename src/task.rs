//! Lazily-started, single-owner tasks.
//!
//! A [`Task`] owns one deferred computation (any [`Future`]) together with a
//! result slot. Nothing runs at construction: the computation is first polled
//! when the task is driven, either by [`Task::get`], by awaiting the task
//! from another computation, or by the [`block_on`] driver. Each time the
//! computation suspends, control returns to whoever drove it; resuming the
//! recorded continuation (from any thread) picks execution back up there.
//!
//! When the computation reaches its end — producing a value, or panicking —
//! the outcome is staged in the result slot exactly once and the continuation
//! registered for the task's own completion, if any, is resumed. A panic
//! raised by the body is captured, not propagated to the driving thread, and
//! re-raised for the task's one consumer.
//!
//! [`block_on`]: crate::block_on::block_on
use crate::{
    loom::cell::UnsafeCell,
    protocol::{Await, Awaitable, Awaiter, Continuation, Suspend},
    util::fmt,
};
use core::{
    any::Any,
    future::{Future, IntoFuture},
    mem, ops,
    pin::Pin,
    task::{Context, Poll, Waker},
};
// The frame is shared with every continuation handed out for it, and `Waker`
// construction requires the real `Arc` even under loom.
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    task::Wake,
};

use crate::loom::sync::atomic::{AtomicUsize, Ordering::*};

/// A lazily-started asynchronous computation that produces exactly one value
/// or captures exactly one failure.
///
/// A `Task` is move-only and has a single owner; dropping it releases the
/// computation frame, without executing the remainder of the body if the
/// computation never ran to completion. A completed task keeps its produced
/// value alive until the value is extracted or the task is dropped.
///
/// A task suspended on a [`ManualResetEvent`] holds a reference to that event
/// while the event holds the task's continuation; abandoning such a task
/// without ever resuming it leaks the frame. Drive tasks to completion.
///
/// [`ManualResetEvent`]: crate::event::ManualResetEvent
#[must_use = "a `Task` does nothing until it is driven"]
pub struct Task<T> {
    frame: Arc<Frame<T>>,
}

/// The [`Awaiter`] for a [`Task`], used when one computation awaits another.
///
/// Suspending on it registers the awaiting computation as the task's
/// completion continuation and transfers execution directly to the task,
/// starting it on the spot.
#[must_use = "a `TaskAwaiter` does nothing until it is awaited"]
pub struct TaskAwaiter<T> {
    task: Task<T>,
}

/// A captured failure: the payload of a panic raised by a task's body.
type Failure = Box<dyn Any + Send + 'static>;

/// The shared computation frame a [`Task`] (and every [`Continuation`] handed
/// out for it) points to.
struct Frame<T> {
    /// Lifecycle bits; see [`State`].
    state: AtomicUsize,

    /// The computation itself and its result slot.
    ///
    /// Exclusive access follows the `state` machine: only the party that
    /// transitioned `IDLE` to `RUNNING` (or the single owner, while the frame
    /// has never been driven / after it completed) may touch this.
    core: UnsafeCell<Core<T>>,

    /// Continuation resumed when this frame completes.
    ///
    /// Written only by the single owner before the frame is first driven;
    /// taken by the completing driver.
    completion: UnsafeCell<Option<Continuation>>,
}

struct Core<T> {
    /// `Some` until the computation completes; dropping a never-completed
    /// frame cancels the body by dropping the future here.
    future: Option<Pin<Box<dyn Future<Output = T> + Send>>>,
    outcome: Outcome<T>,
}

/// The result slot: a tagged variant whose construction and destruction
/// follow the active tag.
enum Outcome<T> {
    /// The computation has not reached its end.
    Empty,
    /// A produced value, alive until extracted or until the frame is dropped.
    Value(T),
    /// A captured failure, re-raised on extraction.
    Failed(Failure),
    /// The value or failure was handed to the consumer.
    Consumed,
}

#[derive(Copy, Clone, Eq, PartialEq)]
struct State(usize);

// === impl Task ===

impl<T: Send + 'static> Task<T> {
    /// Returns a new `Task` over `future`.
    ///
    /// Nothing runs until the task is driven: pass it to
    /// [`block_on`](crate::block_on::block_on), await it from another
    /// computation, or call [`get`](Self::get).
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            frame: Arc::new(Frame {
                state: AtomicUsize::new(State::IDLE.0),
                core: UnsafeCell::new(Core {
                    future: Some(Box::pin(future)),
                    outcome: Outcome::Empty,
                }),
                completion: UnsafeCell::new(None),
            }),
        }
    }

    /// Returns `true` if the computation has run to its end (with a value or
    /// a captured failure).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        State(self.frame.state.load(Acquire)).contains(State::COMPLETED)
    }

    /// Extracts the task's result, driving the computation first if it was
    /// never driven.
    ///
    /// Returns the produced value by move, or re-raises the captured failure.
    /// The result can be extracted exactly once.
    ///
    /// # Panics
    ///
    /// - re-raising the computation's failure, if it failed;
    /// - if the computation suspends rather than completing synchronously — a
    ///   suspended task must be driven with
    ///   [`block_on`](crate::block_on::block_on), which can block the calling
    ///   thread until the task is resumed;
    /// - if the result was already extracted.
    pub fn get(&mut self) -> T {
        if !self.is_complete() {
            Frame::drive(&self.frame);
            assert!(
                self.is_complete(),
                "`get()` called on a task that suspended; drive it with `block_on` instead",
            );
        }
        self.take_output()
    }

    /// Registers the continuation resumed when this task completes.
    ///
    /// Only legal while the frame has never been driven: the completion slot
    /// is owned by the task's single owner until then.
    pub(crate) fn set_completion(&self, continuation: Continuation) {
        self.frame
            .completion
            .with_mut(|slot| unsafe { *slot = Some(continuation) });
    }

    /// Drives the computation on the calling thread until it first suspends
    /// or completes.
    pub(crate) fn start(&self) {
        Frame::drive(&self.frame);
    }

    /// Returns a continuation that resumes this task's frame.
    pub(crate) fn continuation(&self) -> Continuation {
        Continuation::from_waker(Waker::from(self.frame.clone()))
    }

    fn take_output(&mut self) -> T {
        debug_assert!(self.is_complete());
        // Safety: the frame is COMPLETED, so no driver touches the core
        // anymore, and `&mut self` means no other consumer does either.
        self.frame
            .core
            .with_mut(|core| unsafe { (*core).outcome.take() })
    }
}

impl<T: Send + 'static> Awaitable for Task<T> {
    type Awaiter = TaskAwaiter<T>;

    fn into_awaiter(self) -> Self::Awaiter {
        TaskAwaiter { task: self }
    }
}

/// Awaiting a `Task` inside an `async` body starts it (if not yet started)
/// and completes with the task's result once it finishes.
impl<T: Send + 'static> IntoFuture for Task<T> {
    type Output = T;
    type IntoFuture = Await<TaskAwaiter<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.into_await()
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("state", &State(self.frame.state.load(Relaxed)))
            .finish()
    }
}

// === impl TaskAwaiter ===

impl<T: Send + 'static> Awaiter for TaskAwaiter<T> {
    type Output = T;

    fn ready(&self) -> bool {
        self.task.is_complete()
    }

    fn suspend(&mut self, continuation: Continuation) -> Suspend {
        self.task.set_completion(continuation);
        // Start the child computation directly instead of bouncing control
        // back through the driver.
        Suspend::Transfer(self.task.continuation())
    }

    fn resume(&mut self) -> T {
        self.task.take_output()
    }
}

impl<T: Send + 'static> Awaitable for TaskAwaiter<T> {
    type Awaiter = Self;

    fn into_awaiter(self) -> Self {
        self
    }
}

impl<T> fmt::Debug for TaskAwaiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskAwaiter")
            .field("task", &self.task)
            .finish()
    }
}

// === impl Frame ===

impl<T: Send + 'static> Frame<T> {
    /// Drives the frame on the calling thread until the computation next
    /// suspends or completes.
    ///
    /// This is both how a task is started and how a continuation resumes it;
    /// resuming an already-completed frame is a no-op, and resuming a frame
    /// that is mid-poll on another thread folds into a re-poll by that
    /// driver.
    fn drive(self: &Arc<Self>) {
        enter_test_debug_span!("Frame::drive", frame = ?fmt::ptr(Arc::as_ptr(self)));

        // Claim the frame.
        let mut state = State(self.state.load(Acquire));
        loop {
            if state.contains(State::COMPLETED) {
                // a late resume of a finished computation; nothing to do.
                return;
            }
            if state.contains(State::RUNNING) {
                // Another (or an outer) drive is mid-poll. Leave a note so
                // that driver polls again before releasing the frame, which
                // hands our resume over to it.
                match self.compare_exchange(state, state | State::WOKEN) {
                    Ok(_) => return,
                    Err(actual) => {
                        state = actual;
                        continue;
                    }
                }
            }
            match test_dbg!(self.compare_exchange(state, State::RUNNING)) {
                Ok(_) => break,
                Err(actual) => state = actual,
            }
        }

        // We are now the frame's exclusive driver.
        loop {
            let waker = Waker::from(self.clone());
            let mut cx = Context::from_waker(&waker);

            // A panic from the body ends the computation: it is captured here
            // and staged as the task's failure, superseding any value the
            // body had produced before its cleanup failed.
            let poll = panic::catch_unwind(AssertUnwindSafe(|| {
                self.core.with_mut(|core| {
                    let core = unsafe { &mut *core };
                    let future = core
                        .future
                        .as_mut()
                        .expect("a frame is never polled after completing");
                    future.as_mut().poll(&mut cx)
                })
            }));

            match poll {
                Ok(Poll::Ready(value)) => return self.complete(Ok(value)),
                Err(failure) => return self.complete(Err(failure)),
                Ok(Poll::Pending) => {
                    // The computation suspended. Release the frame, unless a
                    // resume arrived while we were polling; then the wakeup
                    // is ours to deliver, by polling again.
                    match test_dbg!(self.compare_exchange(State::RUNNING, State::IDLE)) {
                        Ok(_) => return,
                        Err(_) => {
                            let prev = State(self.state.swap(State::RUNNING.0, AcqRel));
                            debug_assert_eq!(
                                prev,
                                State::RUNNING | State::WOKEN,
                                "state changed unexpectedly while polling!",
                            );
                        }
                    }
                }
            }
        }
    }

    /// Stages the computation's outcome and publishes completion.
    fn complete(self: &Arc<Self>, result: Result<T, Failure>) {
        trace!(frame = ?fmt::ptr(Arc::as_ptr(self)), failed = result.is_err(), "Frame::complete");

        // Still RUNNING here, so core access is exclusive.
        self.core.with_mut(|core| {
            let core = unsafe { &mut *core };
            core.future = None;
            match result {
                Ok(value) => core.outcome.produce(value),
                Err(failure) => core.outcome.fail(failure),
            }
        });
        let completion = self.completion.with_mut(|slot| unsafe { (*slot).take() });

        // Release: whoever observes COMPLETED (the consumer's acquire load,
        // or the resumed completion continuation) sees the staged outcome.
        self.state.store(State::COMPLETED.0, Release);

        if let Some(continuation) = completion {
            continuation.resume();
        }
    }

    #[inline(always)]
    fn compare_exchange(&self, State(curr): State, State(new): State) -> Result<State, State> {
        self.state
            .compare_exchange(curr, new, AcqRel, Acquire)
            .map(State)
            .map_err(State)
    }
}

impl<T: Send + 'static> Wake for Frame<T> {
    fn wake(self: Arc<Self>) {
        Self::drive(&self);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        Self::drive(self);
    }
}

/// Safety: the `core` and `completion` cells are only touched by the frame's
/// exclusive driver (the party that transitioned `IDLE -> RUNNING`), by the
/// single owner before the frame was ever driven, or by the single consumer
/// after `COMPLETED` was published; the acquire/release pairing on `state`
/// orders the handoffs.
unsafe impl<T: Send> Send for Frame<T> {}
unsafe impl<T: Send> Sync for Frame<T> {}

// === impl Outcome ===

impl<T> Outcome<T> {
    /// Stages the produced value.
    fn produce(&mut self, value: T) {
        debug_assert!(matches!(self, Self::Empty), "a task completes only once");
        *self = Self::Value(value);
    }

    /// Stages a captured failure.
    ///
    /// A failure raised during cleanup supersedes a value the body had
    /// already produced: the staged value is dropped here, unobserved.
    fn fail(&mut self, failure: Failure) {
        *self = Self::Failed(failure);
    }

    /// Hands the outcome to the consumer: returns the value by move, or
    /// re-raises the captured failure.
    fn take(&mut self) -> T {
        match mem::replace(self, Self::Consumed) {
            Self::Value(value) => value,
            Self::Failed(failure) => panic::resume_unwind(failure),
            Self::Empty => unreachable!("task result extracted before the computation completed"),
            Self::Consumed => panic!("task result extracted more than once"),
        }
    }
}

// === impl State ===

impl State {
    /// The frame is not running: either never started, or suspended.
    const IDLE: Self = Self(0b000);
    /// Some thread is mid-poll on the frame.
    const RUNNING: Self = Self(0b001);
    /// The frame was resumed while `RUNNING`; the current driver re-polls.
    const WOKEN: Self = Self(0b010);
    /// The computation reached its end; the result slot is staged.
    const COMPLETED: Self = Self(0b100);

    fn contains(self, Self(state): Self) -> bool {
        self.0 & state > 0
    }
}

impl ops::BitOr for State {
    type Output = Self;

    fn bitor(self, Self(rhs): Self) -> Self::Output {
        Self(self.0 | rhs)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut has_states = false;

        fmt_bits!(self, f, has_states, RUNNING, WOKEN, COMPLETED);

        if !has_states {
            if *self == Self::IDLE {
                return f.write_str("IDLE");
            }

            f.debug_tuple("UnknownState")
                .field(&format_args!("{:#b}", self.0))
                .finish()?;
        }

        Ok(())
    }
}
