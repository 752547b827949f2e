//! Re-exports of either [`loom`] types or their `core`/`std` equivalents,
//! depending on whether the crate is compiled with `--cfg loom`.
//!
//! Concurrency-sensitive code in this crate goes through this module so that
//! the same source can be model-checked by loom and compiled normally.
#[allow(unused_imports)]
pub(crate) use self::inner::*;

#[cfg(loom)]
mod inner {
    #![allow(dead_code, unused_imports)]

    #[cfg(test)]
    pub(crate) use loom::{model, thread};

    pub(crate) use loom::cell;

    pub(crate) mod sync {
        pub(crate) use loom::sync::*;
    }
}

#[cfg(not(loom))]
mod inner {
    #![allow(dead_code, unused_imports)]

    #[cfg(test)]
    pub(crate) mod thread {
        pub(crate) use std::thread::*;
    }

    /// Mock version of `loom::model` so that tests which are not
    /// loom-specific can share a body with their model-checked versions.
    #[cfg(test)]
    pub(crate) fn model(f: impl FnOnce()) {
        let _trace = crate::util::test::trace_init();
        f()
    }

    pub(crate) mod sync {
        pub(crate) use std::sync::{Arc, Condvar, Mutex, MutexGuard};

        pub(crate) mod atomic {
            pub(crate) use core::sync::atomic::*;
        }
    }

    pub(crate) mod cell {
        /// `core::cell::UnsafeCell`, with loom's checked access API.
        #[derive(Debug)]
        pub(crate) struct UnsafeCell<T: ?Sized>(core::cell::UnsafeCell<T>);

        impl<T> UnsafeCell<T> {
            pub(crate) const fn new(data: T) -> UnsafeCell<T> {
                UnsafeCell(core::cell::UnsafeCell::new(data))
            }
        }

        impl<T: ?Sized> UnsafeCell<T> {
            #[inline(always)]
            pub(crate) fn with<F, R>(&self, f: F) -> R
            where
                F: FnOnce(*const T) -> R,
            {
                f(self.0.get())
            }

            #[inline(always)]
            pub(crate) fn with_mut<F, R>(&self, f: F) -> R
            where
                F: FnOnce(*mut T) -> R,
            {
                f(self.0.get())
            }
        }
    }
}
