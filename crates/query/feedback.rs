//! Feedback path from query answers to the attention subsystem.
//!
//! A post-processor on the sink side converts each answer into attention
//! updates: the answer's handles plus their recursive target closure form
//! a correlation set and a joint-count map. Updates are flushed in bulk
//! and failures are logged and dropped; the query engine never depends on
//! the broker being reachable.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use das_attention::{AttentionBroker, HandleCount};
use das_common::{Handle, SharedQueue};
use das_storage::AtomStore;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::answer::QueryAnswer;
use crate::element::POLL_INTERVAL;

/// Correlation-set size that triggers a flush.
pub const MAX_CORRELATIONS_WITHOUT_STIMULATE: usize = 1000;

/// Stimulations allowed per query.
pub const MAX_STIMULATE_PER_CYCLE: usize = 1;

/// Consumes answers on the sink side of a pipeline.
pub trait QueryAnswerProcessor: Send + Sync {
    fn process_answer(&self, answer: QueryAnswer);
    fn query_answers_finished(&self);
}

pub struct AttentionFeedback {
    queue: Arc<SharedQueue<QueryAnswer>>,
    flow_finished: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AttentionFeedback {
    pub fn new(
        store: Arc<dyn AtomStore>,
        broker: Arc<dyn AttentionBroker>,
        context: impl Into<String>,
    ) -> Self {
        let queue: Arc<SharedQueue<QueryAnswer>> = Arc::new(SharedQueue::new());
        let flow_finished = Arc::new(AtomicBool::new(false));
        let worker_queue = Arc::clone(&queue);
        let worker_finished = Arc::clone(&flow_finished);
        let context = context.into();
        let worker = thread::spawn(move || {
            process_queue(&worker_queue, &worker_finished, &store, &broker, &context);
        });
        Self {
            queue,
            flow_finished,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn graceful_shutdown(&self) {
        self.flow_finished.store(true, Ordering::Release);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("attention feedback worker panicked");
            }
        }
    }
}

impl QueryAnswerProcessor for AttentionFeedback {
    fn process_answer(&self, answer: QueryAnswer) {
        self.queue.enqueue(answer);
    }

    fn query_answers_finished(&self) {
        self.flow_finished.store(true, Ordering::Release);
    }
}

impl Drop for AttentionFeedback {
    fn drop(&mut self) {
        self.graceful_shutdown();
    }
}

fn process_queue(
    queue: &SharedQueue<QueryAnswer>,
    flow_finished: &AtomicBool,
    store: &Arc<dyn AtomStore>,
    broker: &Arc<dyn AttentionBroker>,
    context: &str,
) {
    let mut correlation_set: BTreeSet<Handle> = BTreeSet::new();
    let mut joint_count: FxHashMap<Handle, u32> = FxHashMap::default();
    let mut stimulated = 0usize;

    loop {
        let mut idle = true;
        while let Some(answer) = queue.dequeue() {
            idle = false;
            if stimulated >= MAX_STIMULATE_PER_CYCLE {
                continue;
            }
            // Accumulate the answer's handles and their recursive target
            // closure.
            let mut execution_stack: Vec<Handle> = answer.handles.clone();
            while let Some(handle) = execution_stack.pop() {
                correlation_set.insert(handle);
                *joint_count.entry(handle).or_insert(0) += 1;
                if let Some(targets) = store.query_for_targets(&handle) {
                    execution_stack.extend(targets);
                }
            }
            if correlation_set.len() >= MAX_CORRELATIONS_WITHOUT_STIMULATE {
                flush(
                    broker,
                    context,
                    &mut correlation_set,
                    &mut joint_count,
                    &mut stimulated,
                );
            }
        }
        if flow_finished.load(Ordering::Acquire) && queue.is_empty() {
            break;
        }
        if idle {
            thread::sleep(POLL_INTERVAL);
        }
    }

    if !correlation_set.is_empty() {
        flush(
            broker,
            context,
            &mut correlation_set,
            &mut joint_count,
            &mut stimulated,
        );
    }
}

/// Sends one correlate call with the accumulated set, then one stimulate
/// call with the joint counts, then clears both. Broker failures are
/// logged and dropped.
fn flush(
    broker: &Arc<dyn AttentionBroker>,
    context: &str,
    correlation_set: &mut BTreeSet<Handle>,
    joint_count: &mut FxHashMap<Handle, u32>,
    stimulated: &mut usize,
) {
    let handles: Vec<Handle> = correlation_set.iter().copied().collect();
    debug!(count = handles.len(), "flushing correlation set");
    if let Err(err) = broker.correlate(context, handles) {
        warn!(error = %err, "dropping correlate request");
    }
    correlation_set.clear();

    if *stimulated < MAX_STIMULATE_PER_CYCLE && !joint_count.is_empty() {
        let request = HandleCount::from_entries(joint_count.drain());
        if let Err(err) = broker.stimulate(context, request) {
            warn!(error = %err, "dropping stimulate request");
        }
        *stimulated += 1;
    }
    joint_count.clear();
}
