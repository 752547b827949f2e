//! The suspension protocol: the capability contract a value must satisfy in
//! order to be awaited.
//!
//! A value participates in suspension either directly (it is its own
//! [`Awaiter`]) or through exactly one adaptation step (it implements
//! [`Awaitable`], whose [`into_awaiter`] conversion is performed once per
//! awaited expression, before the await begins). The awaiter then exposes the
//! three protocol operations:
//!
//! - [`ready`]: a pure check; if it reports `true`, the computation must not
//!   suspend, and [`resume`] is invoked immediately.
//! - [`suspend`]: the point where a suspending computation records how it
//!   will later be resumed. Before this operation returns, the recorded
//!   [`Continuation`] must be safely resumable from any thread.
//! - [`resume`]: invoked exactly once, after readiness or after the recorded
//!   continuation was resumed, to produce the awaited value.
//!
//! Suspension is modeled as an explicit three-way result ([`Suspend`])
//! returned from [`suspend`], rather than as a callback registration, so the
//! state machine stays explicit and testable.
//!
//! [`into_awaiter`]: Awaitable::into_awaiter
//! [`ready`]: Awaiter::ready
//! [`suspend`]: Awaiter::suspend
//! [`resume`]: Awaiter::resume
use crate::util::fmt;
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};

/// An opaque handle representing "where to resume execution later".
///
/// A `Continuation` refers to a suspended computation frame. [Resuming] it
/// drives that frame until it next suspends or completes, on the calling
/// thread. A continuation may be sent to, and resumed from, a different
/// thread than the one that created it; this is the only point at which
/// execution crosses threads in this crate.
///
/// A `Continuation` is a one-time-use handle: resuming consumes it, and there
/// is no way to resume the same suspension twice.
///
/// [Resuming]: Continuation::resume
pub struct Continuation {
    waker: Waker,
}

/// The result of [`Awaiter::suspend`].
#[derive(Debug)]
#[must_use = "a `Suspend` tells the caller whether the computation suspended"]
pub enum Suspend {
    /// The continuation was recorded; the computation is suspended and
    /// control returns to whoever drove it.
    Yes,

    /// Do not suspend: the awaited resource became ready while the
    /// continuation was being recorded. The caller should invoke
    /// [`Awaiter::resume`] immediately.
    No,

    /// Transfer execution directly to this continuation instead of returning
    /// control to the driver.
    ///
    /// This is how one computation starts another without bouncing through a
    /// scheduler: the suspending side hands back the frame that should run
    /// next, and the adapter resumes it on the spot.
    Transfer(Continuation),
}

/// The concrete object implementing the suspension protocol for one awaited
/// expression.
pub trait Awaiter {
    /// The type produced by [`resume`](Self::resume).
    type Output;

    /// Returns `true` if the awaited value is already available.
    ///
    /// This is a pure check with no side effects. If it returns `true`,
    /// [`suspend`](Self::suspend) must not be invoked.
    fn ready(&self) -> bool;

    /// Records `continuation` to be resumed when the awaited value becomes
    /// available, and reports whether the computation actually suspended.
    ///
    /// Before returning [`Suspend::Yes`], this operation must guarantee that
    /// a concurrent signal of the awaited resource can safely resume the
    /// recorded continuation, including from another thread.
    fn suspend(&mut self, continuation: Continuation) -> Suspend;

    /// Produces the awaited value.
    ///
    /// Called exactly once, either immediately (after [`ready`] reported
    /// `true` or [`suspend`] returned [`Suspend::No`]) or after the recorded
    /// continuation was resumed. If a failure was captured while suspended,
    /// this is where it is re-raised.
    ///
    /// [`ready`]: Self::ready
    /// [`suspend`]: Self::suspend
    fn resume(&mut self) -> Self::Output;
}

/// A value that can be awaited, directly or via one adaptation step.
///
/// The conversion to an [`Awaiter`] happens exactly once per awaited
/// expression, before the await begins; it does not affect the protocol's
/// semantics.
pub trait Awaitable {
    /// The awaiter this value converts into.
    type Awaiter: Awaiter;

    /// Converts this value into its awaiter.
    fn into_awaiter(self) -> Self::Awaiter;

    /// Converts this value into a [`Future`] that drives one full
    /// ready/suspend/resume cycle of its awaiter.
    fn into_await(self) -> Await<Self::Awaiter>
    where
        Self: Sized,
    {
        Await::new(self.into_awaiter())
    }
}

/// The type produced by awaiting `A`.
pub type AwaitOutput<A> = <<A as Awaitable>::Awaiter as Awaiter>::Output;

/// A [`Future`] adapter that drives an [`Awaiter`] through the suspension
/// protocol.
///
/// The first poll performs the [`ready`] check and, if necessary, the
/// [`suspend`]; a later poll only happens once the recorded continuation has
/// been resumed, at which point the awaiter's [`resume`] produces the output.
/// Polling after completion is a contract violation and panics.
///
/// [`ready`]: Awaiter::ready
/// [`suspend`]: Awaiter::suspend
/// [`resume`]: Awaiter::resume
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Await<A> {
    awaiter: A,
    state: State,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    /// Not yet suspended; the next poll performs the readiness check.
    Start,
    /// The awaiter recorded a continuation; the next poll means it was
    /// resumed.
    Suspended,
    /// `resume` has produced the output.
    Complete,
}

// === impl Continuation ===

impl Continuation {
    /// Returns a continuation that resumes the computation `waker` belongs to.
    #[must_use]
    pub fn from_waker(waker: Waker) -> Self {
        Self { waker }
    }

    /// Resumes the referenced computation on the calling thread, driving it
    /// until it next suspends or completes.
    pub fn resume(self) {
        trace!(continuation = ?self, "Continuation::resume");
        self.waker.wake();
    }
}

impl From<Waker> for Continuation {
    fn from(waker: Waker) -> Self {
        Self::from_waker(waker)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("waker", &self.waker)
            .finish()
    }
}

// === impl Await ===

impl<A: Awaiter> Await<A> {
    /// Returns a new `Await` driving `awaiter`.
    pub fn new(awaiter: A) -> Self {
        Self {
            awaiter,
            state: State::Start,
        }
    }
}

impl<A: Awaiter + Unpin> Future for Await<A> {
    type Output = A::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.state {
            State::Complete => panic!("`Await` polled again after it completed"),

            // Our recorded continuation was resumed; the awaited value is now
            // available (or a captured failure is ready to be re-raised).
            State::Suspended => {
                this.state = State::Complete;
                Poll::Ready(this.awaiter.resume())
            }

            State::Start => {
                if this.awaiter.ready() {
                    this.state = State::Complete;
                    return Poll::Ready(this.awaiter.resume());
                }

                let continuation = Continuation::from_waker(cx.waker().clone());
                match this.awaiter.suspend(continuation) {
                    Suspend::Yes => {
                        this.state = State::Suspended;
                        Poll::Pending
                    }
                    Suspend::No => {
                        this.state = State::Complete;
                        Poll::Ready(this.awaiter.resume())
                    }
                    Suspend::Transfer(next) => {
                        // The transferred-to frame may complete synchronously
                        // and resume *us* before `resume` returns; the frame
                        // state machine folds that into a re-poll.
                        this.state = State::Suspended;
                        next.resume();
                        Poll::Pending
                    }
                }
            }
        }
    }
}

impl<A> fmt::Debug for Await<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Await")
            .field("state", &self.state)
            .field("awaiter", &fmt::display(".."))
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    /// An awaiter with scripted `ready`/`suspend` behavior.
    struct Scripted {
        ready: bool,
        on_suspend: fn(Continuation) -> Suspend,
        resumed: usize,
    }

    impl Awaiter for Scripted {
        type Output = usize;

        fn ready(&self) -> bool {
            self.ready
        }

        fn suspend(&mut self, continuation: Continuation) -> Suspend {
            (self.on_suspend)(continuation)
        }

        fn resume(&mut self) -> usize {
            self.resumed += 1;
            assert_eq!(self.resumed, 1, "resume must be invoked exactly once");
            self.resumed
        }
    }

    impl Awaitable for Scripted {
        type Awaiter = Self;

        fn into_awaiter(self) -> Self {
            self
        }
    }

    #[test]
    fn ready_skips_suspend() {
        let _trace = crate::util::test::trace_init();
        let awaiter = Scripted {
            ready: true,
            on_suspend: |_| unreachable!("`suspend` must not be invoked when `ready` is true"),
            resumed: 0,
        };
        let out = futures::executor::block_on(awaiter.into_await());
        assert_eq!(out, 1);
    }

    #[test]
    fn suspend_refusal_resumes_immediately() {
        let _trace = crate::util::test::trace_init();
        let awaiter = Scripted {
            ready: false,
            on_suspend: |_| Suspend::No,
            resumed: 0,
        };
        let mut task = tokio_test::task::spawn(awaiter.into_await());
        let out = tokio_test::assert_ready!(task.poll());
        assert_eq!(out, 1);
    }

    #[test]
    fn suspension_waits_for_resume() {
        let _trace = crate::util::test::trace_init();
        let awaiter = Scripted {
            ready: false,
            on_suspend: |continuation| {
                continuation.resume();
                Suspend::Yes
            },
            resumed: 0,
        };
        let mut task = tokio_test::task::spawn(awaiter.into_await());
        tokio_test::assert_pending!(task.poll());
        // the continuation was resumed during `suspend`, so the task was
        // woken and the next poll produces the output.
        assert!(task.is_woken());
        let out = tokio_test::assert_ready!(task.poll());
        assert_eq!(out, 1);
    }

    #[test]
    fn transfer_runs_the_target() {
        use std::sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        };
        use std::task::Wake;

        let _trace = crate::util::test::trace_init();

        struct Flag(AtomicBool);
        impl Wake for Flag {
            fn wake(self: Arc<Self>) {
                self.0.store(true, Ordering::Release);
            }
        }

        static TARGET: std::sync::OnceLock<Arc<Flag>> = std::sync::OnceLock::new();
        let target = TARGET
            .get_or_init(|| Arc::new(Flag(AtomicBool::new(false))))
            .clone();

        let awaiter = Scripted {
            ready: false,
            on_suspend: |_| {
                let target = TARGET.get().unwrap().clone();
                Suspend::Transfer(Continuation::from_waker(Waker::from(target)))
            },
            resumed: 0,
        };
        let mut task = tokio_test::task::spawn(awaiter.into_await());
        tokio_test::assert_pending!(task.poll());
        // control was transferred to the target continuation rather than the
        // polling task's own waker.
        assert!(target.0.load(Ordering::Acquire));
        assert!(!task.is_woken());
    }

    #[test]
    #[should_panic(expected = "polled again after it completed")]
    fn poll_after_completion_fails_fast() {
        let awaiter = Scripted {
            ready: true,
            on_suspend: |_| Suspend::No,
            resumed: 0,
        };
        let mut task = tokio_test::task::spawn(awaiter.into_await());
        let _ = tokio_test::assert_ready!(task.poll());
        let _ = task.poll();
    }
}
