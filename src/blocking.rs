//! Thread-blocking synchronization.
//!
//! The [`OneshotEvent`] is the only primitive in this crate that actually
//! blocks a thread; everything else suspends a *computation* and returns
//! control to its caller. It exists so that the [sync-wait driver] can park
//! the calling thread while a suspended computation is resumed (and finished)
//! elsewhere.
//!
//! [sync-wait driver]: crate::block_on::block_on
use crate::{
    loom::sync::{Condvar, Mutex, MutexGuard},
    util::fmt,
};

/// A one-way blocking event.
///
/// One or more threads may block in [`wait`] until some thread calls [`set`].
/// Once set, the event stays set: later waits return immediately, and setting
/// it again is harmless.
///
/// [`wait`]: Self::wait
/// [`set`]: Self::set
pub struct OneshotEvent {
    set: Mutex<bool>,
    cv: Condvar,
}

// === impl OneshotEvent ===

impl OneshotEvent {
    loom_const_fn! {
        /// Returns a new, unsignaled `OneshotEvent`.
        #[must_use]
        pub fn new() -> Self {
            Self {
                set: Mutex::new(false),
                cv: Condvar::new(),
            }
        }
    }

    /// Signals the event, waking every thread blocked in [`wait`].
    ///
    /// [`wait`]: Self::wait
    pub fn set(&self) {
        let mut set = self.lock();
        *set = true;
        self.cv.notify_all();
    }

    /// Blocks the calling thread until the event is [`set`], returning
    /// immediately if it already was.
    ///
    /// [`set`]: Self::set
    pub fn wait(&self) {
        let mut set = self.lock();
        while !*set {
            set = self.cv.wait(set).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        // the lock is only held for flag flips, so a poisoned mutex still
        // guards a coherent flag.
        self.set.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for OneshotEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OneshotEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneshotEvent")
            .field("set", &*self.lock())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn set_before_wait() {
        let event = OneshotEvent::new();
        event.set();
        // must not block.
        event.wait();
    }

    #[test]
    fn set_is_idempotent() {
        let event = OneshotEvent::new();
        event.set();
        event.set();
        event.wait();
        event.wait();
    }

    #[test]
    fn wakes_all_waiters() {
        let event = Arc::new(OneshotEvent::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let event = event.clone();
                thread::spawn(move || event.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(10));
        event.set();

        for waiter in waiters {
            waiter.join().unwrap();
        }
    }
}

#[cfg(all(loom, test))]
mod loom {
    use super::*;
    use crate::loom::{self, sync::Arc, thread};

    #[test]
    fn set_wait_race() {
        loom::model(|| {
            let event = Arc::new(OneshotEvent::new());
            let setter = thread::spawn({
                let event = event.clone();
                move || event.set()
            });

            event.wait();
            setter.join().unwrap();
        });
    }
}
