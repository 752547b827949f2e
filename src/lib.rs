#![doc = include_str!("../README.md")]
#![warn(missing_docs, missing_debug_implementations)]

pub(crate) mod loom;

#[macro_use]
pub(crate) mod util;

pub mod block_on;
pub mod blocking;
pub mod event;
pub mod protocol;
pub mod task;

#[doc(inline)]
pub use self::block_on::block_on;
#[doc(inline)]
pub use self::blocking::OneshotEvent;
#[doc(inline)]
pub use self::event::ManualResetEvent;
#[doc(inline)]
pub use self::protocol::{Await, AwaitOutput, Awaitable, Awaiter, Continuation, Suspend};
#[doc(inline)]
pub use self::task::Task;
