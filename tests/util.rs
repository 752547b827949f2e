//! Shared test support.
#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering::SeqCst},
    Arc,
};

pub fn trace_init() {
    use tracing_subscriber::filter::LevelFilter;
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .try_init();
}

/// Instance-count state for one test: how many [`Counted`] values were
/// default-constructed, cloned, and dropped in this context.
///
/// Each test creates its own `Counters`, so counting is independent and
/// parallel-safe across tests; a fresh context starts from zero.
#[derive(Debug, Default)]
pub struct Counters {
    constructed: AtomicUsize,
    cloned: AtomicUsize,
    dropped: AtomicUsize,
    next_id: AtomicUsize,
}

/// A value that reports its construction, cloning, and destruction to the
/// [`Counters`] context it was created from.
///
/// Ids start at 1 and are assigned in construction order; clones share their
/// source's id.
#[derive(Debug)]
pub struct Counted {
    counters: Arc<Counters>,
    id: usize,
}

impl Counters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Default-constructs a new [`Counted`] instance in this context.
    pub fn make(self: &Arc<Self>) -> Counted {
        self.constructed.fetch_add(1, SeqCst);
        let id = self.next_id.fetch_add(1, SeqCst) + 1;
        Counted {
            counters: self.clone(),
            id,
        }
    }

    pub fn constructed(&self) -> usize {
        self.constructed.load(SeqCst)
    }

    pub fn cloned(&self) -> usize {
        self.cloned.load(SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(SeqCst)
    }

    /// The number of instances currently alive in this context.
    pub fn live(&self) -> usize {
        self.constructed() + self.cloned() - self.dropped()
    }
}

impl Counted {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Clone for Counted {
    fn clone(&self) -> Self {
        self.counters.cloned.fetch_add(1, SeqCst);
        Self {
            counters: self.counters.clone(),
            id: self.id,
        }
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.counters.dropped.fetch_add(1, SeqCst);
    }
}
