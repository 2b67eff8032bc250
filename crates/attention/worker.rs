//! Fixed worker pool draining the attention request queues.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::error;

use crate::network::HebbianNetwork;
use crate::selector::RequestSelector;
use crate::spreader::{HandleCount, TokenSpreader};
use crate::updater::ExactCountUpdater;

const IDLE_WAIT: Duration = Duration::from_millis(100);

/// A request routed to the worker pool, already bound to its network.
pub enum AttentionRequest {
    Stimulus {
        network: Arc<HebbianNetwork>,
        request: HandleCount,
    },
    Correlation {
        network: Arc<HebbianNetwork>,
        handles: Vec<das_common::Handle>,
    },
}

/// Builds one selector per worker thread.
pub type SelectorFactory = Box<dyn Fn(usize) -> Box<dyn RequestSelector> + Send + Sync>;

pub struct WorkerPool {
    threads: Mutex<Vec<JoinHandle<()>>>,
    stop_flag: Arc<AtomicBool>,
    busy: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn start(threads_count: usize, spreader: TokenSpreader, factory: SelectorFactory) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let busy = Arc::new(AtomicUsize::new(0));
        let spreader = Arc::new(spreader);
        let factory = Arc::new(factory);
        let mut threads = Vec::with_capacity(threads_count);
        for thread_id in 0..threads_count {
            let stop_flag = Arc::clone(&stop_flag);
            let busy = Arc::clone(&busy);
            let spreader = Arc::clone(&spreader);
            let factory = Arc::clone(&factory);
            threads.push(thread::spawn(move || {
                worker_thread(thread_id, &stop_flag, &busy, &spreader, &factory);
            }));
        }
        Self {
            threads: Mutex::new(threads),
            stop_flag,
            busy,
        }
    }

    /// True iff no worker currently holds a request.
    pub fn is_idle(&self) -> bool {
        self.busy.load(Ordering::Acquire) == 0
    }

    /// Signals every worker to stop and joins them.
    pub fn graceful_stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                error!("attention worker thread panicked");
            }
        }
    }
}

fn worker_thread(
    thread_id: usize,
    stop_flag: &AtomicBool,
    busy: &AtomicUsize,
    spreader: &TokenSpreader,
    factory: &SelectorFactory,
) {
    let updater = ExactCountUpdater::new();
    let mut selector = factory(thread_id);
    loop {
        busy.fetch_add(1, Ordering::AcqRel);
        let request = selector.next();
        match request {
            Some(AttentionRequest::Stimulus { network, request }) => {
                if let Err(err) = spreader.spread_stimuli(&request, &network) {
                    error!(%err, "stimulate request failed");
                }
                busy.fetch_sub(1, Ordering::AcqRel);
            }
            Some(AttentionRequest::Correlation { network, handles }) => {
                if let Err(err) = updater.correlation(&network, &handles) {
                    error!(%err, "correlate request failed");
                }
                busy.fetch_sub(1, Ordering::AcqRel);
            }
            None => {
                busy.fetch_sub(1, Ordering::AcqRel);
                if stop_flag.load(Ordering::Acquire) {
                    break;
                }
                thread::sleep(IDLE_WAIT);
            }
        }
    }
}
