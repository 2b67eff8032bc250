use std::collections::VecDeque;

use parking_lot::Mutex;

/// Synchronized FIFO for asynchronous requests.
///
/// `dequeue` never blocks; consumers are expected to poll and pace
/// themselves. The backing ring buffer grows as needed starting from the
/// initial capacity.
#[derive(Debug)]
pub struct SharedQueue<T> {
    requests: Mutex<VecDeque<T>>,
}

impl<T> SharedQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(initial_size: usize) -> Self {
        Self {
            requests: Mutex::new(VecDeque::with_capacity(initial_size)),
        }
    }

    pub fn enqueue(&self, request: T) {
        self.requests.lock().push_back(request);
    }

    pub fn dequeue(&self) -> Option<T> {
        self.requests.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }
}

impl<T> Default for SharedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
