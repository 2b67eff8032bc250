//! K-ary union with de-duplication.
//!
//! Inputs deliver answers in non-increasing importance order; the union
//! is a k-way merge on importance, dropping any answer whose handles and
//! assignment were already emitted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rustc_hash::FxHashSet;

use crate::answer::QueryAnswer;
use crate::element::{QueryAnswerQueue, POLL_INTERVAL};

pub struct OrOperator;

impl OrOperator {
    /// Merges `inputs` into `output` on a dedicated worker thread.
    pub fn spawn(
        inputs: Vec<Arc<QueryAnswerQueue>>,
        output: Arc<QueryAnswerQueue>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            run(&inputs, &output);
            output.finish();
        })
    }
}

fn dedup_key(answer: &QueryAnswer) -> String {
    let mut key = String::new();
    for handle in &answer.handles {
        key.push_str(handle.as_str());
        key.push(',');
    }
    key.push('|');
    key.push_str(&answer.assignment.to_string());
    key
}

fn run(inputs: &[Arc<QueryAnswerQueue>], output: &Arc<QueryAnswerQueue>) {
    let clause_count = inputs.len();
    let mut buffers: Vec<VecDeque<QueryAnswer>> = vec![VecDeque::new(); clause_count];
    let mut finished = vec![false; clause_count];
    let mut emitted: FxHashSet<String> = FxHashSet::default();

    loop {
        if output.aborted() {
            for input in inputs {
                input.abort();
            }
            return;
        }

        for (i, input) in inputs.iter().enumerate() {
            while let Some(answer) = input.pop() {
                buffers[i].push_back(answer);
            }
            if input.finished() && input.empty() {
                finished[i] = true;
            }
        }

        let mut progressed = false;
        loop {
            // The next global answer is only known once every pending
            // input has shown its head.
            let undecided = (0..clause_count).any(|i| buffers[i].is_empty() && !finished[i]);
            if undecided {
                break;
            }
            let best = (0..clause_count)
                .filter(|&i| !buffers[i].is_empty())
                .max_by(|&a, &b| {
                    let ia = buffers[a].front().map_or(f64::MIN, |ans| ans.importance);
                    let ib = buffers[b].front().map_or(f64::MIN, |ans| ans.importance);
                    ia.partial_cmp(&ib).unwrap_or(std::cmp::Ordering::Equal)
                });
            let Some(best) = best else {
                break;
            };
            let Some(answer) = buffers[best].pop_front() else {
                break;
            };
            if emitted.insert(dedup_key(&answer)) {
                output.add(answer);
            }
            progressed = true;
        }

        if finished.iter().all(|&done| done) && buffers.iter().all(VecDeque::is_empty) {
            return;
        }
        if !progressed {
            thread::sleep(POLL_INTERVAL);
        }
    }
}
