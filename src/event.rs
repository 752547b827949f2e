//! A manually reset event for suspended computations.
//!
//! See the documentation for the [`ManualResetEvent`] type for details.
use crate::{
    loom::{
        cell::UnsafeCell,
        sync::atomic::{
            AtomicUsize,
            Ordering::{self, *},
        },
    },
    protocol::{Await, Awaitable, Awaiter, Continuation, Suspend},
    util::{fmt, CachePadded},
};
use core::ops::Deref;
use std::sync::Arc;

/// A synchronization tool that allows one computation to await the event. If
/// the event is in the set state, the computation continues without
/// suspending; otherwise it suspends until some thread calls [`set`] on the
/// event.
///
/// At most one computation may be waiting on a given event at a time;
/// registering a second waiter while one is pending is a programming error
/// and fails fast. Unlike the [`OneshotEvent`](crate::blocking::OneshotEvent),
/// awaiting this event never blocks a thread: a computation that suspends
/// returns control to whoever was driving it.
///
/// The event must outlive every computation suspended on it.
///
/// [`set`]: Self::set
pub struct ManualResetEvent {
    state: CachePadded<AtomicUsize>,
    waiter: UnsafeCell<Option<Continuation>>,
}

/// The [`Awaiter`] for a [`ManualResetEvent`].
///
/// `E` is any handle that dereferences to the event (`&ManualResetEvent`,
/// [`Arc<ManualResetEvent>`], ...), so the awaiter can either borrow an event
/// or share ownership of one across threads.
#[derive(Debug)]
pub struct EventWaiter<E> {
    event: E,
}

/// Future returned from [`ManualResetEvent::wait()`].
pub type Wait<'a> = Await<EventWaiter<&'a ManualResetEvent>>;

#[derive(Copy, Clone, Eq, PartialEq)]
struct State(usize);

// === impl ManualResetEvent ===

impl ManualResetEvent {
    loom_const_fn! {
        /// Returns a new `ManualResetEvent` in the unset state.
        #[must_use]
        pub fn new() -> Self {
            Self {
                state: CachePadded::new(AtomicUsize::new(State::UNSET.0)),
                waiter: UnsafeCell::new(None),
            }
        }
    }

    loom_const_fn! {
        /// Returns a new `ManualResetEvent` that is already set.
        ///
        /// Awaiting it completes without suspending until [`reset`] is
        /// called.
        ///
        /// [`reset`]: Self::reset
        #[must_use]
        pub fn new_set() -> Self {
            Self {
                state: CachePadded::new(AtomicUsize::new(State::SET.0)),
                waiter: UnsafeCell::new(None),
            }
        }
    }

    /// Returns `true` if the event is in the set state.
    #[must_use]
    pub fn is_set(&self) -> bool {
        State(self.state.load(Acquire)) == State::SET
    }

    /// Transitions the event to the set state, resuming the waiting
    /// computation if one is registered.
    ///
    /// The resumed computation runs on the calling thread, until it next
    /// suspends or completes.
    pub fn set(&self) {
        enter_test_debug_span!("ManualResetEvent::set", event = ?fmt::ptr(self));

        // Needs to be 'acquire' in case the old value was a waiting
        // computation, so that this thread sees the writes the waiter made to
        // its frame before suspending. Also needs to be 'release' so that the
        // resumed computation (and any later awaiter observing SET) sees
        // everything this thread wrote before setting the event.
        let prev = State(self.state.swap(State::SET.0, AcqRel));
        trace!(event = ?fmt::ptr(self), ?prev, "ManualResetEvent::set");
        if test_dbg!(prev) == State::WAITING {
            let continuation = self
                .waiter
                .with_mut(|waiter| unsafe { (*waiter).take() })
                .expect("an event in the WAITING state must hold a continuation");
            continuation.resume();
        }
    }

    /// Returns the event to the unset state.
    ///
    /// # Panics
    ///
    /// If a computation is currently waiting on the event. Calling `reset()`
    /// concurrently with [`set`] or with an await of this event is a data
    /// race and is excluded from this type's guarantees.
    ///
    /// [`set`]: Self::set
    pub fn reset(&self) {
        assert!(
            State(self.state.load(Relaxed)) != State::WAITING,
            "illegal to `reset()` a ManualResetEvent while a computation is waiting on it",
        );

        // Relaxed: resetting is not synchronized against concurrent set/await
        // (see above), so a stronger ordering here buys nothing.
        self.state.store(State::UNSET.0, Relaxed);
    }

    /// Wait for the event to be [`set`].
    ///
    /// # Returns
    ///
    /// A future that completes once the event is set: immediately on its
    /// first poll if the event was already set, and otherwise after some
    /// thread sets the event. While the future is suspended, it occupies the
    /// event's single waiter slot.
    ///
    /// [`set`]: Self::set
    pub fn wait(&self) -> Wait<'_> {
        Await::new(EventWaiter { event: self })
    }

    #[inline(always)]
    fn compare_exchange(
        &self,
        State(curr): State,
        State(new): State,
        success: Ordering,
    ) -> Result<State, State> {
        self.state
            .compare_exchange(curr, new, success, Acquire)
            .map(State)
            .map_err(State)
    }
}

impl Default for ManualResetEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// Safety: the `waiter` slot is only written on the `UNSET -> WAITING`
/// transition and only taken on the `WAITING -> SET` transition, and the
/// single-waiter contract means at most one party is on each side; the
/// release/acquire pairing on `state` orders the two.
unsafe impl Send for ManualResetEvent {}
unsafe impl Sync for ManualResetEvent {}

impl fmt::Debug for ManualResetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualResetEvent")
            .field("state", &State(self.state.load(Relaxed)))
            .field("waiter", &fmt::display(".."))
            .finish()
    }
}

// === impl EventWaiter ===

impl<E> Awaiter for EventWaiter<E>
where
    E: Deref<Target = ManualResetEvent>,
{
    type Output = ();

    fn ready(&self) -> bool {
        self.event.is_set()
    }

    fn suspend(&mut self, continuation: Continuation) -> Suspend {
        let event = &*self.event;
        assert!(
            State(event.state.load(Relaxed)) != State::WAITING,
            "this ManualResetEvent already has a waiting computation; \
             only one waiter is supported",
        );

        trace!(event = ?fmt::ptr(event), "registering waiter");
        event
            .waiter
            .with_mut(|waiter| unsafe { *waiter = Some(continuation) });

        // If the compare-exchange fails, the event was concurrently set and
        // the computation should not suspend; the failure ordering is
        // 'acquire' so this side sees the writes made before `set()`. On
        // success a later `set()` must observe the continuation recorded
        // above after reading our state write, which needs 'release'; acq-rel
        // is the strictest ordering that is correct here, and we take the
        // strict end rather than split hairs over the acquire half.
        match event.compare_exchange(State::UNSET, State::WAITING, AcqRel) {
            Ok(_) => Suspend::Yes,
            Err(actual) => {
                debug_assert_eq!(actual, State::SET);
                // take the recorded continuation back out so a later
                // reset/await cycle can't resume it spuriously.
                let _ = event.waiter.with_mut(|waiter| unsafe { (*waiter).take() });
                Suspend::No
            }
        }
    }

    fn resume(&mut self) {
        // pure rendezvous; the event carries no value.
    }
}

impl<E> Awaitable for EventWaiter<E>
where
    E: Deref<Target = ManualResetEvent>,
{
    type Awaiter = Self;

    fn into_awaiter(self) -> Self {
        self
    }
}

impl<'a> Awaitable for &'a ManualResetEvent {
    type Awaiter = EventWaiter<&'a ManualResetEvent>;

    fn into_awaiter(self) -> Self::Awaiter {
        EventWaiter { event: self }
    }
}

impl Awaitable for Arc<ManualResetEvent> {
    type Awaiter = EventWaiter<Arc<ManualResetEvent>>;

    fn into_awaiter(self) -> Self::Awaiter {
        EventWaiter { event: self }
    }
}

// === impl State ===

impl State {
    const UNSET: Self = Self(0);
    const WAITING: Self = Self(1);
    const SET: Self = Self(2);
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::UNSET => "UNSET",
            Self::WAITING => "WAITING",
            Self::SET => "SET",
            _ => "UnknownState",
        })
    }
}


#[cfg(all(loom, test))]
mod loom {
    use super::*;
    use crate::{
        block_on::block_on,
        loom::{self, thread},
    };
    use std::sync::Arc;

    #[test]
    fn set_wait_race() {
        loom::model(|| {
            let event = Arc::new(ManualResetEvent::new());

            let setter = thread::spawn({
                let event = event.clone();
                move || {
                    event.set();
                }
            });

            // exactly one of two things happens: the suspend wins the race
            // and `set()` resumes it, or `set()` wins and the suspend is
            // refused; either way this returns, and never resumes twice.
            block_on(event.clone());

            setter.join().unwrap();
            assert!(event.is_set());
        });
    }
}
