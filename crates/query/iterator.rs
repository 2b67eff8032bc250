//! Sinks: the roots of a query tree.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::answer::QueryAnswer;
use crate::element::{QueryAnswerQueue, POLL_INTERVAL};
use crate::error::QueryError;

/// Sink exposing query answers through a polling iterator.
///
/// `pop` returning `None` does not mean the answers are over; it means
/// none are available right now. Callers poll until [`QueryIterator::finished`]
/// turns true.
pub struct QueryIterator {
    input: Arc<QueryAnswerQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    deadline: Option<Instant>,
    error: Mutex<Option<QueryError>>,
}

impl QueryIterator {
    pub fn new(input: Arc<QueryAnswerQueue>, workers: Vec<JoinHandle<()>>) -> Self {
        Self {
            input,
            workers: Mutex::new(workers),
            deadline: None,
            error: Mutex::new(None),
        }
    }

    /// Enforces a wall-clock budget, checked at iteration points. An
    /// expired iterator cancels the pipeline and reports
    /// [`QueryError::Cancelled`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    fn check_deadline(&self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                let mut error = self.error.lock();
                if error.is_none() {
                    *error = Some(QueryError::Cancelled);
                    self.input.abort();
                }
                return true;
            }
        }
        false
    }

    /// The next query answer, or `None` if none is available right now.
    pub fn pop(&self) -> Option<QueryAnswer> {
        if self.check_deadline() {
            return None;
        }
        self.input.pop()
    }

    /// True once every upstream element finished and the queue drained.
    pub fn finished(&self) -> bool {
        if self.check_deadline() {
            return true;
        }
        self.input.drained()
    }

    /// The error that terminated the query, if any.
    pub fn take_error(&self) -> Option<QueryError> {
        self.error.lock().take()
    }

    /// Drains the iterator into a vector, polling until finished.
    pub fn collect_all(&self) -> Vec<QueryAnswer> {
        let mut answers = Vec::new();
        while !self.finished() {
            match self.pop() {
                Some(answer) => answers.push(answer),
                None => thread::sleep(POLL_INTERVAL),
            }
        }
        while let Some(answer) = self.pop() {
            answers.push(answer);
        }
        answers
    }

    /// Cancels the pipeline and joins every worker thread.
    pub fn graceful_shutdown(&self) {
        self.input.abort();
        let mut workers = self.workers.lock();
        for worker in workers.drain(..) {
            if worker.join().is_err() {
                warn!("query pipeline worker panicked");
            }
        }
    }
}

impl Drop for QueryIterator {
    fn drop(&mut self) {
        self.graceful_shutdown();
    }
}

/// Sink that discards answers, exposing only their final count.
pub struct CountSink {
    count: Arc<AtomicUsize>,
    done: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CountSink {
    /// Counts everything flowing out of `input`, together with the
    /// upstream workers to join on shutdown.
    pub fn spawn(input: Arc<QueryAnswerQueue>, mut workers: Vec<JoinHandle<()>>) -> Self {
        let count = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));
        let counter = Arc::clone(&count);
        let flag = Arc::clone(&done);
        workers.push(thread::spawn(move || {
            loop {
                while input.pop().is_some() {
                    counter.fetch_add(1, Ordering::AcqRel);
                }
                if input.drained() {
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }
            flag.store(true, Ordering::Release);
        }));
        Self {
            count,
            done,
            workers: Mutex::new(workers),
        }
    }

    pub fn finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// The final count, available once the stream finished.
    pub fn count(&self) -> Option<usize> {
        self.finished().then(|| self.count.load(Ordering::Acquire))
    }

    /// Blocks until the stream finishes and returns the count.
    pub fn wait(&self) -> usize {
        while !self.finished() {
            thread::sleep(POLL_INTERVAL);
        }
        let mut workers = self.workers.lock();
        for worker in workers.drain(..) {
            if worker.join().is_err() {
                warn!("count sink worker panicked");
            }
        }
        self.count.load(Ordering::Acquire)
    }
}
