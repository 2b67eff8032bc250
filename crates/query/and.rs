//! K-ary join on assignments.
//!
//! Each input delivers answers in non-increasing importance order. The
//! join walks the k-dimensional cross-product grid as a frontier ordered
//! by the product of the joined importances, emitting a merged answer for
//! every compatible combination. A grid cell is only popped once all of
//! its successors are decidable (present, or ruled out by a finished
//! input), which guarantees no later combination can outrank an emitted
//! one. A merged answer's importance is the maximum of its components and
//! its strength the product.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rustc_hash::FxHashSet;

use crate::answer::QueryAnswer;
use crate::element::{QueryAnswerQueue, POLL_INTERVAL};

struct Cell {
    fitness: f64,
    indices: Vec<usize>,
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.fitness.to_bits() == other.fitness.to_bits() && self.indices == other.indices
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fitness
            .partial_cmp(&other.fitness)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.indices.cmp(&self.indices))
    }
}

pub struct AndOperator;

impl AndOperator {
    /// Joins `inputs` into `output` on a dedicated worker thread.
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

fn make_cell(indices: Vec<usize>, seen: &[Vec<QueryAnswer>]) -> Cell {
    let fitness = indices
        .iter()
        .enumerate()
        .map(|(dim, &index)| seen[dim][index].importance)
        .product();
    Cell { fitness, indices }
}

fn run(inputs: &[Arc<QueryAnswerQueue>], output: &Arc<QueryAnswerQueue>) {
    let clause_count = inputs.len();
    if clause_count == 0 {
        return;
    }
    let mut seen: Vec<Vec<QueryAnswer>> = vec![Vec::new(); clause_count];
    let mut finished = vec![false; clause_count];
    let mut heap: BinaryHeap<Cell> = BinaryHeap::new();
    let mut visited: FxHashSet<Vec<usize>> = FxHashSet::default();
    let mut started = false;

    loop {
        if output.aborted() {
            for input in inputs {
                input.abort();
            }
            return;
        }

        for (i, input) in inputs.iter().enumerate() {
            while let Some(answer) = input.pop() {
                seen[i].push(answer);
            }
            if input.finished() && input.empty() {
                finished[i] = true;
            }
        }

        if !started {
            // An input that finished without any answer empties the whole
            // cross product.
            if (0..clause_count).any(|i| seen[i].is_empty() && finished[i]) {
                return;
            }
            if seen.iter().any(Vec::is_empty) {
                thread::sleep(POLL_INTERVAL);
                continue;
            }
            let origin = vec![0; clause_count];
            visited.insert(origin.clone());
            heap.push(make_cell(origin, &seen));
            started = true;
        }

        let mut progressed = false;
        while let Some(top) = heap.peek() {
            let blocked = (0..clause_count).any(|dim| {
                top.indices[dim] + 1 >= seen[dim].len() && !finished[dim]
            });
            if blocked {
                break;
            }
            let Some(top) = heap.pop() else {
                break;
            };
            for dim in 0..clause_count {
                let mut successor = top.indices.clone();
                successor[dim] += 1;
                if successor[dim] < seen[dim].len() && visited.insert(successor.clone()) {
                    heap.push(make_cell(successor, &seen));
                }
            }
            let mut merged = seen[0][top.indices[0]].clone();
            let mut compatible = true;
            for dim in 1..clause_count {
                if !merged.merge(&seen[dim][top.indices[dim]], true) {
                    compatible = false;
                    break;
                }
            }
            if compatible {
                output.add(merged);
            }
            progressed = true;
        }

        if started && heap.is_empty() {
            return;
        }
        if !progressed {
            thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use das_common::hasher::compute_hash;
    use das_common::Handle;
    use std::time::Duration;

    fn handle(tag: &str) -> Handle {
        compute_hash(tag)
    }

    fn answer(tag: &str, importance: f64, label: &str, value: &str) -> QueryAnswer {
        let mut answer = QueryAnswer::with_handle(handle(tag), importance);
        answer.assignment.assign(label, handle(value));
        answer
    }

    fn drain(output: &QueryAnswerQueue) -> Vec<QueryAnswer> {
        let mut answers = Vec::new();
        while !output.drained() {
            match output.pop() {
                Some(answer) => answers.push(answer),
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        answers
    }

    #[test]
    fn joins_compatible_answers_in_fitness_order() {
        let left = Arc::new(QueryAnswerQueue::new());
        let right = Arc::new(QueryAnswerQueue::new());
        let output = Arc::new(QueryAnswerQueue::new());
        let worker = AndOperator::spawn(
            vec![Arc::clone(&left), Arc::clone(&right)],
            Arc::clone(&output),
        );

        // h1_1/h2_1 share a conflicting binding for v, so the (1, 0)
        // combination is invalid and must be skipped.
        left.add(answer("h1_0", 0.5, "v0", "1"));
        left.add(answer("h1_1", 0.4, "v", "1"));
        left.add(answer("h1_2", 0.3, "v2", "1"));
        left.finish();
        right.add(answer("h2_0", 0.3, "v", "2"));
        right.add(answer("h2_1", 0.2, "v1", "1"));
        right.add(answer("h2_2", 0.1, "v2", "1"));
        right.finish();

        let answers = drain(&output);
        worker.join().expect("worker");

        // Expected fitness order over the 3x3 grid, minus the invalid
        // cell (1, 0): 0.15, 0.10, 0.09, 0.08, 0.06, 0.05, 0.04, 0.03.
        let pairs: Vec<(Handle, Handle)> = answers
            .iter()
            .map(|a| (a.handles[0], a.handles[1]))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (handle("h1_0"), handle("h2_0")),
                (handle("h1_0"), handle("h2_1")),
                (handle("h1_2"), handle("h2_0")),
                (handle("h1_1"), handle("h2_1")),
                (handle("h1_2"), handle("h2_1")),
                (handle("h1_0"), handle("h2_2")),
                (handle("h1_1"), handle("h2_2")),
                (handle("h1_2"), handle("h2_2")),
            ]
        );
        // Importance is the maximum of the joined components.
        assert_eq!(answers[0].importance, 0.5);
        assert_eq!(answers[2].importance, 0.3);
    }

    #[test]
    fn empty_input_empties_the_join() {
        let left = Arc::new(QueryAnswerQueue::new());
        let right = Arc::new(QueryAnswerQueue::new());
        let output = Arc::new(QueryAnswerQueue::new());
        let worker = AndOperator::spawn(
            vec![Arc::clone(&left), Arc::clone(&right)],
            Arc::clone(&output),
        );
        left.add(answer("h1_0", 0.5, "v", "1"));
        left.finish();
        right.finish();
        let answers = drain(&output);
        worker.join().expect("worker");
        assert!(answers.is_empty());
    }

    #[test]
    fn three_way_join_emits_the_full_product() {
        let queues: Vec<Arc<QueryAnswerQueue>> =
            (0..3).map(|_| Arc::new(QueryAnswerQueue::new())).collect();
        let output = Arc::new(QueryAnswerQueue::new());
        let worker = AndOperator::spawn(queues.clone(), Arc::clone(&output));
        for (i, queue) in queues.iter().enumerate() {
            for j in 0..4 {
                queue.add(answer(
                    &format!("h{i}_{j}"),
                    1.0 / f64::from(j + 1),
                    &format!("v{i}"),
                    "1",
                ));
            }
            queue.finish();
        }
        let answers = drain(&output);
        worker.join().expect("worker");
        assert_eq!(answers.len(), 64);
        // Every merged answer carries one handle per input.
        assert!(answers.iter().all(|a| a.handles.len() == 3));
        // The first emission pairs the heads of all three inputs.
        assert_eq!(answers[0].importance, 1.0);
    }

    #[test]
    fn operation_logic_matches_the_fitness_heap() {
        use rand::Rng;
        use std::collections::BinaryHeap;

        let clause_count = 3;
        let link_count = 20;
        let mut rng = rand::thread_rng();
        let mut importance: Vec<Vec<f64>> = Vec::new();
        for _ in 0..clause_count {
            let mut column: Vec<f64> = (0..link_count).map(|_| rng.gen::<f64>()).collect();
            column.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
            importance.push(column);
        }

        let queues: Vec<Arc<QueryAnswerQueue>> = (0..clause_count)
            .map(|_| Arc::new(QueryAnswerQueue::new()))
            .collect();
        let output = Arc::new(QueryAnswerQueue::new());
        let worker = AndOperator::spawn(queues.clone(), Arc::clone(&output));
        for (clause, queue) in queues.iter().enumerate() {
            for (link, &imp) in importance[clause].iter().enumerate() {
                queue.add(answer(&format!("h{clause}_{link}"), imp, "v", "1"));
            }
            queue.finish();
        }

        // Reference: every combination ranked by product of importances,
        // carrying the maximum as the expected answer importance.
        let mut reference: BinaryHeap<Cell> = BinaryHeap::new();
        for i in 0..link_count {
            for j in 0..link_count {
                for k in 0..link_count {
                    reference.push(Cell {
                        fitness: importance[0][i] * importance[1][j] * importance[2][k],
                        indices: vec![i, j, k],
                    });
                }
            }
        }

        let answers = drain(&output);
        worker.join().expect("worker");
        assert_eq!(answers.len(), link_count * link_count * link_count);
        for answer in &answers {
            let expected = reference.pop().expect("reference entry");
            let expected_importance = expected
                .indices
                .iter()
                .enumerate()
                .map(|(dim, &index)| importance[dim][index])
                .fold(f64::MIN, f64::max);
            assert!(
                (answer.importance - expected_importance).abs() < 1e-12,
                "importance {} out of order, expected {}",
                answer.importance,
                expected_importance
            );
        }
    }

    #[test]
    fn abort_propagates_to_inputs() {
        let left = Arc::new(QueryAnswerQueue::new());
        let right = Arc::new(QueryAnswerQueue::new());
        let output = Arc::new(QueryAnswerQueue::new());
        let worker = AndOperator::spawn(
            vec![Arc::clone(&left), Arc::clone(&right)],
            Arc::clone(&output),
        );
        output.abort();
        worker.join().expect("worker");
        assert!(left.aborted());
        assert!(right.aborted());
        assert!(output.finished());
    }
}
