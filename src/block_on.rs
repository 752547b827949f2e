//! Driving a computation to completion while blocking the calling thread.
use crate::{
    blocking::OneshotEvent,
    protocol::{AwaitOutput, Awaitable, Awaiter, Continuation},
    task::Task,
};
use core::task::Waker;
use std::{sync::Arc, task::Wake};

/// Runs `awaitable` to completion, blocking the calling thread until it
/// finishes, and returns the produced value.
///
/// The awaitable is converted to its awaiter once, up front, and wrapped in a
/// private [`Task`] frame whose completion signals a private
/// [`OneshotEvent`]. The frame is started on the calling thread; if the
/// computation never truly suspends it completes right there, and the thread
/// never blocks. If it does suspend, this thread blocks on the event until
/// whichever thread resumes the computation drives it to completion.
///
/// This never returns before the wrapped computation has fully completed. If
/// the computation failed, the captured failure is re-raised here, on the
/// calling thread, with its payload intact.
///
/// # Examples
///
/// ```
/// use enoki::{block_on, Task};
///
/// let task = Task::new(async { 6 * 7 });
/// assert_eq!(block_on(task), 42);
/// ```
pub fn block_on<A>(awaitable: A) -> AwaitOutput<A>
where
    A: Awaitable,
    A::Awaiter: Send + Unpin + 'static,
    <A::Awaiter as Awaiter>::Output: Send + 'static,
{
    let completed = Arc::new(OneshotEvent::new());

    let mut task = Task::new(awaitable.into_await());
    task.set_completion(Continuation::from_waker(Waker::from(Arc::new(
        SignalCompletion {
            completed: completed.clone(),
        },
    ))));

    // Start the frame on this thread, then block until its completion
    // signals the event (immediately, if it never suspended).
    task.start();
    completed.wait();

    task.get()
}

/// Completion continuation for the driver's private frame: wakes the blocked
/// driver thread.
struct SignalCompletion {
    completed: Arc<OneshotEvent>,
}

impl Wake for SignalCompletion {
    fn wake(self: Arc<Self>) {
        self.completed.set();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.completed.set();
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::event::ManualResetEvent;
    use std::{thread, time::Duration};

    #[test]
    fn synchronous_completion() {
        let _trace = crate::util::test::trace_init();
        assert_eq!(block_on(Task::new(async { "done" })), "done");
    }

    #[test]
    fn resumed_from_another_thread() {
        let _trace = crate::util::test::trace_init();

        let event = Arc::new(ManualResetEvent::new());
        let signaler = thread::spawn({
            let event = event.clone();
            move || {
                thread::sleep(Duration::from_millis(10));
                event.set();
            }
        });

        let task = Task::new({
            let event = event.clone();
            async move {
                event.wait().await;
                6 * 7
            }
        });
        assert_eq!(block_on(task), 42);
        signaler.join().unwrap();
    }

    #[test]
    fn awaits_a_bare_event() {
        let _trace = crate::util::test::trace_init();

        let event = Arc::new(ManualResetEvent::new());
        event.set();
        // an already-set event completes without suspending at all.
        block_on(event.clone());
    }

    #[test]
    #[should_panic(expected = "computation failed")]
    fn failure_is_rethrown_on_the_calling_thread() {
        block_on(Task::new(async { panic!("computation failed"); }));
    }
}

#[cfg(all(loom, test))]
mod loom {
    use super::*;
    use crate::{
        event::ManualResetEvent,
        loom::{self, thread},
    };

    #[test]
    fn driver_handoff() {
        loom::model(|| {
            let event = Arc::new(ManualResetEvent::new());
            let setter = thread::spawn({
                let event = event.clone();
                move || event.set()
            });

            let task = Task::new({
                let event = event.clone();
                async move {
                    event.wait().await;
                    1
                }
            });
            assert_eq!(block_on(task), 1);
            setter.join().unwrap();
        });
    }
}
