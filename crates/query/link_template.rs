//! Link-template source elements.
//!
//! A link template describes a family of links by type and targets, where
//! each target is a terminal or a nested template. The source fetches the
//! candidate links from the atom store, ranks them by importance through
//! the attention broker and feeds them downstream in non-increasing
//! importance order, joining nested-template positions against an inner
//! pipeline.

use std::cmp::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use das_common::Handle;
use das_storage::{AtomStore, LinkSchema, SchemaTarget};
use das_attention::AttentionBroker;
use tracing::{debug, info, warn};

use crate::and::AndOperator;
use crate::answer::QueryAnswer;
use crate::element::{QueryAnswerQueue, POLL_INTERVAL};
use crate::error::QueryError;
use crate::terminal::Terminal;

/// Importance requests are paginated to avoid oversized calls.
pub const MAX_GET_IMPORTANCE_BUNDLE_SIZE: usize = 100_000;

/// Practical bound on nested templates joined per inner layer.
const MAX_INNER_TEMPLATES: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateTarget {
    Terminal(Terminal),
    Template(LinkTemplate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkTemplate {
    named_type: String,
    targets: Vec<TemplateTarget>,
    context: String,
}

impl LinkTemplate {
    /// Builds a template. The type may be the wildcard string; at most
    /// four targets may be nested templates.
    pub fn new(
        named_type: impl Into<String>,
        targets: Vec<TemplateTarget>,
        context: impl Into<String>,
    ) -> Result<Self, QueryError> {
        let named_type = named_type.into();
        if targets.is_empty() {
            return Err(QueryError::InvalidInput(
                "Link template must have at least 1 target".to_owned(),
            ));
        }
        let inner_count = targets
            .iter()
            .filter(|target| matches!(target, TemplateTarget::Template(_)))
            .count();
        if inner_count > MAX_INNER_TEMPLATES {
            return Err(QueryError::InvalidInput(
                "Invalid number of inner templates (> 4) in link template".to_owned(),
            ));
        }
        Ok(Self {
            named_type,
            targets,
            context: context.into(),
        })
    }

    pub fn named_type(&self) -> &str {
        &self.named_type
    }

    pub fn targets(&self) -> &[TemplateTarget] {
        &self.targets
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// The equivalent link schema, recursing into nested templates.
    pub fn schema(&self) -> Result<LinkSchema, QueryError> {
        let targets = self
            .targets
            .iter()
            .map(|target| match target {
                TemplateTarget::Terminal(terminal) => terminal.schema_target(),
                TemplateTarget::Template(template) => {
                    Ok(SchemaTarget::Schema(template.schema()?))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        LinkSchema::new(&self.named_type, targets, Default::default()).map_err(Into::into)
    }

    /// Runs the source on a dedicated thread, closing `output` when the
    /// candidate set is drained or the request is cancelled.
    pub fn spawn(
        self,
        store: Arc<dyn AtomStore>,
        broker: Arc<dyn AttentionBroker>,
        output: Arc<QueryAnswerQueue>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            match self.run(&store, &broker, &output) {
                Ok(()) => {}
                Err(QueryError::Cancelled) => debug!("link template cancelled"),
                Err(err) => warn!(error = %err, "link template source terminated"),
            }
            output.finish();
        })
    }

    fn run(
        &self,
        store: &Arc<dyn AtomStore>,
        broker: &Arc<dyn AttentionBroker>,
        output: &Arc<QueryAnswerQueue>,
    ) -> Result<(), QueryError> {
        let schema = self.schema()?;
        let candidates: Vec<Handle> = store.query_for_pattern(&schema).into_iter().collect();
        info!(
            count = candidates.len(),
            template = %schema.handle(),
            "fetched links for link template"
        );
        if candidates.is_empty() {
            return Ok(());
        }

        let importances = self.rank(broker.as_ref(), &candidates);
        let mut fetched: Vec<(QueryAnswer, Vec<Handle>)> = Vec::with_capacity(candidates.len());
        for (candidate, importance) in candidates.into_iter().zip(importances) {
            // Candidates deleted between the index read and now are
            // silently skipped.
            let Some(targets) = store.query_for_targets(&candidate) else {
                continue;
            };
            if targets.len() != self.targets.len() {
                continue;
            }
            let mut answer = QueryAnswer::with_handle(candidate, importance);
            let mut bound = true;
            for (position, target) in self.targets.iter().enumerate() {
                if let TemplateTarget::Terminal(Terminal::Variable { name }) = target {
                    if !answer.assignment.assign(name, targets[position]) {
                        bound = false;
                        break;
                    }
                }
            }
            if bound {
                fetched.push((answer, targets));
            }
        }
        fetched.sort_by(|a, b| {
            b.0.importance
                .partial_cmp(&a.0.importance)
                .unwrap_or(Ordering::Equal)
        });

        let inner_templates: Vec<LinkTemplate> = self
            .targets
            .iter()
            .filter_map(|target| match target {
                TemplateTarget::Template(template) => Some(template.clone()),
                TemplateTarget::Terminal(_) => None,
            })
            .collect();

        if inner_templates.is_empty() {
            for (answer, _) in fetched {
                if output.aborted() {
                    return Err(QueryError::Cancelled);
                }
                output.add(answer);
            }
            return Ok(());
        }
        self.join_inner(store, broker, output, &schema, fetched, inner_templates)
    }

    /// Importance of each candidate, batched. A missing or failing broker
    /// degrades to zero importance; the query itself stays functional.
    fn rank(&self, broker: &dyn AttentionBroker, handles: &[Handle]) -> Vec<f64> {
        let mut importances = Vec::with_capacity(handles.len());
        for chunk in handles.chunks(MAX_GET_IMPORTANCE_BUNDLE_SIZE) {
            match broker.get_importance(&self.context, chunk) {
                Ok(list) if list.len() == chunk.len() => importances.extend(list),
                Ok(list) => {
                    warn!(
                        got = list.len(),
                        expected = chunk.len(),
                        "invalid attention broker answer size"
                    );
                    importances.extend(std::iter::repeat(0.0).take(chunk.len()));
                }
                Err(err) => {
                    warn!(error = %err, "attention broker unavailable, ranking without importance");
                    importances.extend(std::iter::repeat(0.0).take(chunk.len()));
                }
            }
        }
        importances
    }

    fn join_inner(
        &self,
        store: &Arc<dyn AtomStore>,
        broker: &Arc<dyn AttentionBroker>,
        output: &Arc<QueryAnswerQueue>,
        schema: &LinkSchema,
        fetched: Vec<(QueryAnswer, Vec<Handle>)>,
        mut inner_templates: Vec<LinkTemplate>,
    ) -> Result<(), QueryError> {
        let wildcard_positions: Vec<usize> = schema
            .elements()
            .iter()
            .enumerate()
            .filter(|(_, element)| element.is_wildcard())
            .map(|(position, _)| position)
            .collect();

        let inner_queue = Arc::new(QueryAnswerQueue::new());
        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        if inner_templates.len() == 1 {
            let template = inner_templates.remove(0);
            workers.push(template.spawn(
                Arc::clone(store),
                Arc::clone(broker),
                Arc::clone(&inner_queue),
            ));
        } else {
            let mut child_queues = Vec::with_capacity(inner_templates.len());
            for template in inner_templates {
                let queue = Arc::new(QueryAnswerQueue::new());
                workers.push(template.spawn(
                    Arc::clone(store),
                    Arc::clone(broker),
                    Arc::clone(&queue),
                ));
                child_queues.push(queue);
            }
            workers.push(AndOperator::spawn(child_queues, Arc::clone(&inner_queue)));
        }

        let mut local: Vec<Option<(QueryAnswer, Vec<Handle>)>> =
            fetched.into_iter().map(Some).collect();
        let mut next_inner: Vec<usize> = vec![0; local.len()];
        let mut inner_answers: Vec<Option<QueryAnswer>> = Vec::new();

        let result = loop {
            if output.aborted() {
                break Err(QueryError::Cancelled);
            }
            let mut got_new = false;
            while let Some(answer) = inner_queue.pop() {
                inner_answers.push(Some(answer));
                got_new = true;
            }
            let inner_done = inner_queue.drained();
            if got_new || inner_done {
                for index in 0..local.len() {
                    let Some((answer, targets)) = local[index].as_mut() else {
                        continue;
                    };
                    let paired = pair_with_inner(
                        answer,
                        targets,
                        &wildcard_positions,
                        &mut inner_answers,
                        &mut next_inner[index],
                    );
                    if paired {
                        if let Some((answer, _)) = local[index].take() {
                            output.add(answer);
                        }
                    } else if inner_done {
                        local[index] = None;
                    }
                }
                if inner_done || local.iter().all(Option::is_none) {
                    break Ok(());
                }
            } else {
                thread::sleep(POLL_INTERVAL);
            }
        };

        inner_queue.abort();
        for worker in workers {
            if worker.join().is_err() {
                warn!("inner pipeline worker panicked");
            }
        }
        result
    }
}

/// First-fit pairing of a candidate with an inner answer: every wildcard
/// position of the stored link must equal the inner answer's next handle
/// in order, and the bindings must merge without conflict. A consumed
/// inner answer pairs with exactly one candidate.
fn pair_with_inner(
    answer: &mut QueryAnswer,
    targets: &[Handle],
    wildcard_positions: &[usize],
    inner_answers: &mut [Option<QueryAnswer>],
    cursor: &mut usize,
) -> bool {
    while *cursor < inner_answers.len() {
        if let Some(inner) = &inner_answers[*cursor] {
            let mut matches = true;
            let mut handle_cursor = 0usize;
            for &position in wildcard_positions {
                match inner.handles.get(handle_cursor) {
                    Some(handle) if *handle == targets[position] => handle_cursor += 1,
                    _ => {
                        matches = false;
                        break;
                    }
                }
            }
            if matches && answer.merge(inner, false) {
                inner_answers[*cursor] = None;
                return true;
            }
        }
        *cursor += 1;
    }
    false
}
