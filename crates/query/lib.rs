pub mod and;
pub mod answer;
pub mod element;
pub mod error;
pub mod feedback;
pub mod iterator;
pub mod link_template;
pub mod or;
pub mod parser;
pub mod terminal;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub use and::AndOperator;
pub use answer::{QueryAnswer, QueryAnswerElement};
pub use element::{QueryAnswerQueue, POLL_INTERVAL};
pub use error::QueryError;
pub use feedback::{AttentionFeedback, QueryAnswerProcessor};
pub use iterator::{CountSink, QueryIterator};
pub use link_template::{LinkTemplate, TemplateTarget, MAX_GET_IMPORTANCE_BUNDLE_SIZE};
pub use or::OrOperator;
pub use parser::{parse_query, QueryOperation};
pub use terminal::Terminal;

use das_attention::AttentionBroker;
use das_storage::AtomStore;

/// Wires and starts the pipeline for a parsed query, returning the sink
/// iterator. Every element runs on its own worker thread; dropping the
/// iterator cancels and joins them.
pub fn execute_query(
    operation: QueryOperation,
    store: Arc<dyn AtomStore>,
    broker: Arc<dyn AttentionBroker>,
) -> QueryIterator {
    let output = Arc::new(QueryAnswerQueue::new());
    let workers = spawn_operation(operation, &store, &broker, Arc::clone(&output));
    QueryIterator::new(output, workers)
}

/// Variant sink that only counts the answers.
pub fn count_query(
    operation: QueryOperation,
    store: Arc<dyn AtomStore>,
    broker: Arc<dyn AttentionBroker>,
) -> CountSink {
    let output = Arc::new(QueryAnswerQueue::new());
    let workers = spawn_operation(operation, &store, &broker, Arc::clone(&output));
    CountSink::spawn(output, workers)
}

/// Like [`execute_query`], additionally teeing every answer through the
/// given sink-side processors (attention feedback, typically) before it
/// reaches the iterator.
pub fn execute_query_with_processors(
    operation: QueryOperation,
    store: Arc<dyn AtomStore>,
    broker: Arc<dyn AttentionBroker>,
    processors: Vec<Arc<dyn QueryAnswerProcessor>>,
) -> QueryIterator {
    let upstream = Arc::new(QueryAnswerQueue::new());
    let mut workers = spawn_operation(operation, &store, &broker, Arc::clone(&upstream));
    let output = Arc::new(QueryAnswerQueue::new());
    let sink_queue = Arc::clone(&output);
    workers.push(thread::spawn(move || {
        loop {
            if sink_queue.aborted() {
                upstream.abort();
            }
            let mut idle = true;
            while let Some(answer) = upstream.pop() {
                idle = false;
                for processor in &processors {
                    processor.process_answer(answer.clone());
                }
                sink_queue.add(answer);
            }
            if upstream.drained() {
                break;
            }
            if idle {
                thread::sleep(POLL_INTERVAL);
            }
        }
        for processor in &processors {
            processor.query_answers_finished();
        }
        sink_queue.finish();
    }));
    QueryIterator::new(output, workers)
}

fn spawn_operation(
    operation: QueryOperation,
    store: &Arc<dyn AtomStore>,
    broker: &Arc<dyn AttentionBroker>,
    output: Arc<QueryAnswerQueue>,
) -> Vec<JoinHandle<()>> {
    match operation {
        QueryOperation::Template(template) => {
            vec![template.spawn(Arc::clone(store), Arc::clone(broker), output)]
        }
        QueryOperation::Terminal(terminal) => {
            vec![thread::spawn(move || {
                match terminal {
                    Terminal::Node { handle, .. } | Terminal::Atom { handle } => {
                        output.add(QueryAnswer::with_handle(handle, 0.0));
                    }
                    Terminal::Variable { .. } => {}
                }
                output.finish();
            })]
        }
        QueryOperation::And(clauses) => {
            spawn_operator(clauses, store, broker, output, AndOperator::spawn)
        }
        QueryOperation::Or(clauses) => {
            spawn_operator(clauses, store, broker, output, OrOperator::spawn)
        }
    }
}

fn spawn_operator(
    clauses: Vec<QueryOperation>,
    store: &Arc<dyn AtomStore>,
    broker: &Arc<dyn AttentionBroker>,
    output: Arc<QueryAnswerQueue>,
    operator: fn(Vec<Arc<QueryAnswerQueue>>, Arc<QueryAnswerQueue>) -> JoinHandle<()>,
) -> Vec<JoinHandle<()>> {
    let mut workers = Vec::new();
    let mut inputs = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let queue = Arc::new(QueryAnswerQueue::new());
        workers.extend(spawn_operation(clause, store, broker, Arc::clone(&queue)));
        inputs.push(queue);
    }
    workers.push(operator(inputs, output));
    workers
}
