//! Plumbing shared by every query element.
//!
//! Elements form a DAG connected by answer queues. Producers run in their
//! own threads and pace themselves by sleeping between polls; there is no
//! async scheduling anywhere in the pipeline. A queue carries two marker
//! flags besides its FIFO content: `finished`, set by the producer when no
//! more answers will come, and `aborted`, set from the consumer side to
//! request cooperative cancellation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::answer::QueryAnswer;

/// How long an element sleeps when it has nothing to do.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// FIFO of query answers connecting two pipeline elements.
#[derive(Debug, Default)]
pub struct QueryAnswerQueue {
    queue: Mutex<VecDeque<QueryAnswer>>,
    finished: AtomicBool,
    aborted: AtomicBool,
}

impl QueryAnswerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, answer: QueryAnswer) {
        self.queue.lock().push_back(answer);
    }

    pub fn pop(&self) -> Option<QueryAnswer> {
        self.queue.lock().pop_front()
    }

    pub fn empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Producer-side marker: no more answers will be added.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// True when the producer finished and everything has been popped.
    pub fn drained(&self) -> bool {
        self.finished() && self.empty()
    }

    /// Consumer-side marker requesting cooperative cancellation.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    pub fn aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}
