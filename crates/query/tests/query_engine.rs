//! End-to-end pipeline tests against the in-memory store.

use std::sync::Arc;

use das_attention::{
    AttentionBroker, AttentionConfig, AttentionError, AttentionService, HandleCount,
};
use das_common::Handle;
use das_query::{count_query, execute_query, parse_query, AttentionFeedback, QueryAnswer,
    QueryAnswerProcessor};
use das_storage::{AtomStore, InMemoryStore, Link, Node};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Broker with scripted importances that records every update.
#[derive(Default)]
struct TestBroker {
    importances: Mutex<FxHashMap<Handle, f64>>,
    correlations: Mutex<Vec<Vec<Handle>>>,
    stimulations: Mutex<Vec<HandleCount>>,
}

impl TestBroker {
    fn set_importance(&self, handle: Handle, importance: f64) {
        self.importances.lock().insert(handle, importance);
    }
}

impl AttentionBroker for TestBroker {
    fn ping(&self) -> Result<(), AttentionError> {
        Ok(())
    }

    fn stimulate(&self, _context: &str, request: HandleCount) -> Result<(), AttentionError> {
        self.stimulations.lock().push(request);
        Ok(())
    }

    fn correlate(&self, _context: &str, handles: Vec<Handle>) -> Result<(), AttentionError> {
        self.correlations.lock().push(handles);
        Ok(())
    }

    fn get_importance(
        &self,
        _context: &str,
        handles: &[Handle],
    ) -> Result<Vec<f64>, AttentionError> {
        let importances = self.importances.lock();
        Ok(handles
            .iter()
            .map(|handle| importances.get(handle).copied().unwrap_or(0.0))
            .collect())
    }

    fn set_determiners(
        &self,
        _context: &str,
        _determiners: Vec<Vec<Handle>>,
    ) -> Result<(), AttentionError> {
        Ok(())
    }
}

fn symbol(store: &InMemoryStore, name: &str) -> Handle {
    store
        .add_node(Node::new("Symbol", name).expect("node"), false)
        .expect("add node")
}

fn expression(store: &InMemoryStore, targets: Vec<Handle>) -> Handle {
    store
        .add_link(Link::new("Expression", targets).expect("link"), false)
        .expect("add link")
}

fn tokens(stream: &str) -> Vec<&str> {
    stream.split(' ').collect()
}

fn run(store: Arc<InMemoryStore>, broker: Arc<dyn AttentionBroker>, query: &str) -> Vec<QueryAnswer> {
    let operation = parse_query(&tokens(query), "").expect("parse");
    let iterator = execute_query(operation, store, broker);
    iterator.collect_all()
}

#[test]
fn insert_and_query_binds_the_variable() {
    let store = Arc::new(InMemoryStore::new("test"));
    let sim = symbol(&store, "Similarity");
    let human = symbol(&store, "\"human\"");
    let monkey = symbol(&store, "\"monkey\"");
    let link = expression(&store, vec![sim, human, monkey]);

    let answers = run(
        Arc::clone(&store),
        Arc::new(TestBroker::default()),
        "LINK_TEMPLATE Expression 3 NODE Symbol Similarity NODE Symbol \"human\" VARIABLE v1",
    );
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].handles, vec![link]);
    assert_eq!(answers[0].assignment.get("v1"), Some(monkey));
}

#[test]
fn queries_matching_nothing_return_empty() {
    let store = Arc::new(InMemoryStore::new("test"));
    symbol(&store, "Similarity");
    let answers = run(
        store,
        Arc::new(TestBroker::default()),
        "LINK_TEMPLATE Expression 2 NODE Symbol Similarity VARIABLE v1",
    );
    assert!(answers.is_empty());
}

#[test]
fn and_join_keeps_consistent_bindings() {
    let store = Arc::new(InMemoryStore::new("test"));
    let sim = symbol(&store, "Similarity");
    let inh = symbol(&store, "Inheritance");
    let human = symbol(&store, "\"human\"");
    let plant = symbol(&store, "\"plant\"");
    let ent = symbol(&store, "\"ent\"");
    let monkey = symbol(&store, "\"monkey\"");
    let vine = symbol(&store, "\"vine\"");
    let sim_ent = expression(&store, vec![sim, ent, human]);
    expression(&store, vec![sim, monkey, human]);
    let inh_ent = expression(&store, vec![inh, ent, plant]);
    expression(&store, vec![inh, vine, plant]);

    let answers = run(
        store,
        Arc::new(TestBroker::default()),
        "AND 2 \
         LINK_TEMPLATE Expression 3 NODE Symbol Similarity VARIABLE v1 NODE Symbol \"human\" \
         LINK_TEMPLATE Expression 3 NODE Symbol Inheritance VARIABLE v1 NODE Symbol \"plant\"",
    );
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].assignment.get("v1"), Some(ent));
    assert!(answers[0].handles.contains(&sim_ent));
    assert!(answers[0].handles.contains(&inh_ent));
}

#[test]
fn or_union_merges_by_importance() {
    let store = Arc::new(InMemoryStore::new("test"));
    let broker = Arc::new(TestBroker::default());
    let sim = symbol(&store, "Similarity");
    let human = symbol(&store, "\"human\"");
    let snake = symbol(&store, "\"snake\"");
    let monkey = symbol(&store, "\"monkey\"");
    let ent = symbol(&store, "\"ent\"");
    let earthworm = symbol(&store, "\"earthworm\"");
    let vine = symbol(&store, "\"vine\"");
    let a1 = expression(&store, vec![sim, monkey, human]);
    let a2 = expression(&store, vec![sim, ent, human]);
    let b1 = expression(&store, vec![sim, earthworm, snake]);
    let b2 = expression(&store, vec![sim, vine, snake]);
    broker.set_importance(a1, 0.9);
    broker.set_importance(a2, 0.7);
    broker.set_importance(b1, 0.8);
    broker.set_importance(b2, 0.1);

    let answers = run(
        store,
        broker,
        "OR 2 \
         LINK_TEMPLATE Expression 3 NODE Symbol Similarity VARIABLE v1 NODE Symbol \"human\" \
         LINK_TEMPLATE Expression 3 NODE Symbol Similarity VARIABLE v1 NODE Symbol \"snake\"",
    );
    assert_eq!(answers.len(), 4);
    let importances: Vec<f64> = answers.iter().map(|a| a.importance).collect();
    assert_eq!(importances, vec![0.9, 0.8, 0.7, 0.1]);
}

#[test]
fn nested_template_joins_the_inner_pipeline() {
    let store = Arc::new(InMemoryStore::new("test"));
    let odd = symbol(&store, "OddLink");
    let sim = symbol(&store, "Similarity");
    let human = symbol(&store, "\"human\"");
    let monkey = symbol(&store, "\"monkey\"");
    let snake = symbol(&store, "\"snake\"");
    let earthworm = symbol(&store, "\"earthworm\"");
    let inner_matched = expression(&store, vec![sim, human, monkey]);
    expression(&store, vec![sim, snake, earthworm]);
    let outer = expression(&store, vec![odd, inner_matched]);

    let answers = run(
        store,
        Arc::new(TestBroker::default()),
        "LINK_TEMPLATE Expression 2 NODE Symbol OddLink \
         LINK_TEMPLATE Expression 3 NODE Symbol Similarity VARIABLE v1 VARIABLE v2",
    );
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].handles, vec![outer]);
    assert_eq!(answers[0].assignment.get("v1"), Some(human));
    assert_eq!(answers[0].assignment.get("v2"), Some(monkey));
}

#[test]
fn template_emits_in_non_increasing_importance_order() {
    let store = Arc::new(InMemoryStore::new("test"));
    let broker = Arc::new(TestBroker::default());
    let sim = symbol(&store, "Similarity");
    let human = symbol(&store, "\"human\"");
    let importances = [0.3, 0.9, 0.1, 0.7, 0.5];
    for (i, importance) in importances.iter().enumerate() {
        let other = symbol(&store, &format!("\"other{i}\""));
        let link = expression(&store, vec![sim, other, human]);
        broker.set_importance(link, *importance);
    }

    let answers = run(
        store,
        broker,
        "LINK_TEMPLATE Expression 3 NODE Symbol Similarity VARIABLE v1 NODE Symbol \"human\"",
    );
    assert_eq!(answers.len(), importances.len());
    let emitted: Vec<f64> = answers.iter().map(|a| a.importance).collect();
    assert_eq!(emitted, vec![0.9, 0.7, 0.5, 0.3, 0.1]);
}

#[test]
fn count_sink_reports_the_final_count() {
    let store = Arc::new(InMemoryStore::new("test"));
    let sim = symbol(&store, "Similarity");
    let human = symbol(&store, "\"human\"");
    for i in 0..7 {
        let other = symbol(&store, &format!("\"other{i}\""));
        expression(&store, vec![sim, other, human]);
    }
    let operation = parse_query(
        &tokens("LINK_TEMPLATE Expression 3 NODE Symbol Similarity VARIABLE v1 NODE Symbol \"human\""),
        "",
    )
    .expect("parse");
    let sink = count_query(operation, store, Arc::new(TestBroker::default()));
    assert_eq!(sink.wait(), 7);
}

#[test]
fn feedback_correlates_the_target_closure() {
    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new("test"));
    let sim = symbol(&store, "Similarity");
    let human = symbol(&store, "\"human\"");
    let monkey = symbol(&store, "\"monkey\"");
    let link = expression(&store, vec![sim, human, monkey]);

    let broker = Arc::new(TestBroker::default());
    let feedback = AttentionFeedback::new(
        Arc::clone(&store) as Arc<dyn AtomStore>,
        Arc::clone(&broker) as Arc<dyn AttentionBroker>,
        "",
    );
    feedback.process_answer(QueryAnswer::with_handle(link, 0.5));
    feedback.query_answers_finished();
    feedback.graceful_shutdown();

    let correlations = broker.correlations.lock();
    assert_eq!(correlations.len(), 1);
    let mut expected = vec![link, sim, human, monkey];
    expected.sort();
    let mut observed = correlations[0].clone();
    observed.sort();
    assert_eq!(observed, expected);

    let stimulations = broker.stimulations.lock();
    assert_eq!(stimulations.len(), 1);
    assert_eq!(stimulations[0].sum().expect("sum"), 4);
}

#[test]
fn processors_see_every_answer_on_the_sink_side() {
    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new("test"));
    let sim = symbol(&store, "Similarity");
    let human = symbol(&store, "\"human\"");
    let monkey = symbol(&store, "\"monkey\"");
    let link = expression(&store, vec![sim, human, monkey]);

    let broker = Arc::new(TestBroker::default());
    let feedback = Arc::new(AttentionFeedback::new(
        Arc::clone(&store) as Arc<dyn AtomStore>,
        Arc::clone(&broker) as Arc<dyn AttentionBroker>,
        "",
    ));
    let operation = parse_query(
        &tokens("LINK_TEMPLATE Expression 3 NODE Symbol Similarity NODE Symbol \"human\" VARIABLE v1"),
        "",
    )
    .expect("parse");
    let iterator = das_query::execute_query_with_processors(
        operation,
        Arc::clone(&store) as Arc<dyn AtomStore>,
        Arc::clone(&broker) as Arc<dyn AttentionBroker>,
        vec![Arc::clone(&feedback) as Arc<dyn QueryAnswerProcessor>],
    );
    let answers = iterator.collect_all();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].handles, vec![link]);
    feedback.graceful_shutdown();

    // The feedback processor correlated the answer's target closure.
    let correlations = broker.correlations.lock();
    assert_eq!(correlations.len(), 1);
    assert!(correlations[0].contains(&link));
    assert!(correlations[0].contains(&monkey));
}

#[test]
fn timed_out_queries_cancel_cooperatively() {
    let store = Arc::new(InMemoryStore::new("test"));
    let sim = symbol(&store, "Similarity");
    let human = symbol(&store, "\"human\"");
    for i in 0..4 {
        let other = symbol(&store, &format!("\"other{i}\""));
        expression(&store, vec![sim, other, human]);
    }
    let operation = parse_query(
        &tokens("LINK_TEMPLATE Expression 3 NODE Symbol Similarity VARIABLE v1 NODE Symbol \"human\""),
        "",
    )
    .expect("parse");
    let iterator = execute_query(operation, store, Arc::new(TestBroker::default()))
        .with_timeout(std::time::Duration::from_secs(0));
    assert!(iterator.finished());
    assert!(matches!(
        iterator.take_error(),
        Some(das_query::QueryError::Cancelled)
    ));
}

#[test]
fn answers_render_metta_expressions_on_demand() {
    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new("test"));
    let sim = symbol(&store, "Similarity");
    let human = symbol(&store, "\"human\"");
    let monkey = symbol(&store, "\"monkey\"");
    expression(&store, vec![sim, human, monkey]);

    let mut answers = run(
        Arc::clone(&store),
        Arc::new(TestBroker::default()),
        "LINK_TEMPLATE Expression 3 NODE Symbol Similarity NODE Symbol \"human\" VARIABLE v1",
    );
    assert_eq!(answers.len(), 1);
    answers[0].render_metta_expressions(store.as_ref());
    let rendered: Vec<&str> = answers[0]
        .metta_expression
        .values()
        .map(String::as_str)
        .collect();
    assert_eq!(rendered, vec!["(Similarity \"human\" \"monkey\")"]);
    // Rendered answers still round-trip through the token format.
    let parsed =
        das_query::QueryAnswer::untokenize(&answers[0].tokenize()).expect("round trip");
    assert_eq!(parsed, answers[0]);
}

#[test]
fn attention_service_ranks_live_queries() {
    let store = Arc::new(InMemoryStore::new("test"));
    let service = Arc::new(AttentionService::new(AttentionConfig {
        worker_threads_count: 2,
        ..AttentionConfig::default()
    }));
    let sim = symbol(&store, "Similarity");
    let human = symbol(&store, "\"human\"");
    let monkey = symbol(&store, "\"monkey\"");
    let snake = symbol(&store, "\"snake\"");
    let boosted = expression(&store, vec![sim, monkey, human]);
    let plain = expression(&store, vec![sim, snake, human]);

    service
        .correlate_now("", &[boosted, sim, monkey, human])
        .expect("correlate");
    service
        .stimulate_now("", &HandleCount::from_entries([(boosted, 1)]))
        .expect("stimulate");

    let answers = run(
        store,
        Arc::clone(&service) as Arc<dyn AttentionBroker>,
        "LINK_TEMPLATE Expression 3 NODE Symbol Similarity VARIABLE v1 NODE Symbol \"human\"",
    );
    assert_eq!(answers.len(), 2);
    assert_eq!(answers[0].handles, vec![boosted]);
    assert!(answers[0].importance > answers[1].importance);
    assert_eq!(answers[1].handles, vec![plain]);
    service.graceful_shutdown();
}
