//! Reusable utilities for the suspension primitives.
//!
//! Mostly diagnostic macro shims: `tracing` instrumentation compiles away
//! entirely unless the `tracing` feature is enabled (or the crate is built
//! for tests), so the primitives stay free of logging overhead by default.

#[cfg(any(test, feature = "tracing"))]
macro_rules! trace {
    ($($t:tt)*) => { tracing::trace!($($t)*) }
}

#[cfg(not(any(test, feature = "tracing")))]
macro_rules! trace {
    ($($t:tt)*) => {};
}

#[cfg(not(test))]
macro_rules! test_dbg {
    ($e:expr) => {
        $e
    };
}

#[cfg(test)]
macro_rules! test_dbg {
    ($e:expr) => {
        match $e {
            e => {
                tracing::debug!(
                    location = %core::panic::Location::caller(),
                    "{} = {:?}",
                    stringify!($e),
                    &e
                );
                e
            }
        }
    };
}

#[cfg(not(test))]
macro_rules! enter_test_debug_span {
    ($($args:tt)+) => {};
}

#[cfg(test)]
macro_rules! enter_test_debug_span {
    ($($args:tt)+) => {
        let _span = tracing::debug_span!($($args)+).entered();
    };
}

macro_rules! fmt_bits {
    ($self: expr, $f: expr, $has_states: ident, $($name: ident),+) => {
        $(
            if $self.contains(Self::$name) {
                if $has_states {
                    $f.write_str(" | ")?;
                }
                $f.write_str(stringify!($name))?;
                $has_states = true;
            }
        )+

    };
}

macro_rules! loom_const_fn {
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident($($arg:ident: $T:ty),*) -> $Ret:ty $body:block
    ) => {
        $(#[$meta])*
        #[cfg(not(loom))]
        $vis const fn $name($($arg: $T),*) -> $Ret $body

        $(#[$meta])*
        #[cfg(loom)]
        $vis fn $name($($arg: $T),*) -> $Ret $body
    };
}

pub(crate) mod fmt {
    pub(crate) use core::fmt::*;

    /// A wrapper type that formats the wrapped value using a provided function.
    pub(crate) struct FormatWith<T, F = fn(&T, &mut Formatter<'_>) -> Result>
    where
        F: Fn(&T, &mut Formatter<'_>) -> Result,
    {
        value: T,
        fmt: F,
    }

    #[cfg(any(test, feature = "tracing"))]
    #[inline]
    #[must_use]
    pub(crate) fn ptr<T: Pointer>(value: T) -> FormatWith<T> {
        FormatWith {
            value,
            fmt: Pointer::fmt,
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn display<T: Display>(value: T) -> FormatWith<T> {
        FormatWith {
            value,
            fmt: Display::fmt,
        }
    }

    impl<T, F> Debug for FormatWith<T, F>
    where
        F: Fn(&T, &mut Formatter<'_>) -> Result,
    {
        #[inline]
        fn fmt(&self, f: &mut Formatter<'_>) -> Result {
            (self.fmt)(&self.value, f)
        }
    }
}

/// Pads and aligns a value to the size of a cache line, so that false sharing
/// with neighboring data doesn't slow down contended atomic state words.
//
// Alignments are per-architecture: 128 on x86_64 and aarch64 (adjacent-line
// prefetchers pull pairs of 64-byte lines), 32 on some smaller embedded
// targets, 64 everywhere else.
#[cfg_attr(
    any(target_arch = "x86_64", target_arch = "aarch64"),
    repr(align(128))
)]
#[cfg_attr(
    any(target_arch = "arm", target_arch = "mips", target_arch = "riscv32"),
    repr(align(32))
)]
#[cfg_attr(
    not(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "arm",
        target_arch = "mips",
        target_arch = "riscv32",
    )),
    repr(align(64))
)]
#[derive(Debug, Default)]
pub(crate) struct CachePadded<T>(T);

impl<T> CachePadded<T> {
    loom_const_fn! {
        pub(crate) fn new(value: T) -> Self {
            Self(value)
        }
    }
}

impl<T> core::ops::Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> core::ops::DerefMut for CachePadded<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

#[cfg(test)]
pub(crate) mod test {
    /// A guard that represents the tracing default subscriber guard
    ///
    /// *should* be held until the end of the test, to ensure that tracing
    /// messages actually make it to the fmt subscriber for the entire test.
    #[must_use]
    pub struct TestGuard {
        _x1: tracing::subscriber::DefaultGuard,
    }

    /// Initialize tracing with a default filter directive
    ///
    /// Returns a [TestGuard] that must be held for the duration of test to
    /// ensure tracing messages are correctly output
    pub(crate) fn trace_init() -> TestGuard {
        use tracing_subscriber::{
            filter::{EnvFilter, LevelFilter},
            util::SubscriberInitExt,
        };
        const ENV: &str = if cfg!(loom) { "LOOM_LOG" } else { "RUST_LOG" };

        let env = std::env::var(ENV).unwrap_or_default();
        let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
        let filter = if env.is_empty() {
            builder
                .parse("enoki=debug")
                .unwrap()
                // enable "loom=info" if using the default, so that we get
                // loom's thread number and iteration count traces.
                .add_directive("loom=info".parse().unwrap())
        } else {
            builder.parse_lossy(env)
        };
        let collector = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .without_time()
            .finish();

        TestGuard {
            _x1: collector.set_default(),
        }
    }
}
