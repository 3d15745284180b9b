//! Work-stealing deque for task scheduling

use crate::scheduler::Task;
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use rand::Rng;
use std::sync::Arc;

/// Work-stealing deque for a single worker
pub(crate) struct WorkerDeque {
    /// Local worker deque (LIFO for own tasks)
    worker: Worker<Arc<Task>>,

    /// Stealer handles for other workers
    stealers: Vec<Stealer<Arc<Task>>>,

    /// Global injector for spawned and resumed tasks
    injector: Arc<Injector<Arc<Task>>>,
}

impl WorkerDeque {
    pub(crate) fn new(
        worker: Worker<Arc<Task>>,
        stealers: Vec<Stealer<Arc<Task>>>,
        injector: Arc<Injector<Arc<Task>>>,
    ) -> Self {
        Self {
            worker,
            stealers,
            injector,
        }
    }

    /// Build one deque per worker, each able to steal from all the others
    pub(crate) fn build_set(count: usize, injector: &Arc<Injector<Arc<Task>>>) -> Vec<WorkerDeque> {
        let workers: Vec<Worker<Arc<Task>>> = (0..count).map(|_| Worker::new_lifo()).collect();
        let stealers: Vec<Stealer<Arc<Task>>> = workers.iter().map(|w| w.stealer()).collect();

        workers
            .into_iter()
            .enumerate()
            .map(|(id, worker)| {
                let others = stealers
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != id)
                    .map(|(_, s)| s.clone())
                    .collect();
                WorkerDeque::new(worker, others, injector.clone())
            })
            .collect()
    }

    /// Push a task to the local deque (LIFO)
    pub(crate) fn push(&self, task: Arc<Task>) {
        self.worker.push(task);
    }

    /// Next task for this worker: local deque, then the injector, then siblings
    ///
    /// Spawned and resumed tasks land in the injector. Taking a batch from it
    /// refills the local deque so the following pops stay local and
    /// uncontended; siblings are only robbed once the injector is dry.
    pub(crate) fn find_work(&self) -> Option<Arc<Task>> {
        self.worker.pop().or_else(|| {
            std::iter::repeat_with(|| {
                self.injector
                    .steal_batch_and_pop(&self.worker)
                    .or_else(|| self.steal_from_others())
            })
            .find(|steal| !steal.is_retry())
            .and_then(Steal::success)
        })
    }

    /// One steal attempt per sibling, starting at a random victim
    ///
    /// `Retry` if any victim was contended and none yielded a task.
    fn steal_from_others(&self) -> Steal<Arc<Task>> {
        if self.stealers.is_empty() {
            return Steal::Empty;
        }
        let start = rand::thread_rng().gen_range(0..self.stealers.len());

        self.stealers
            .iter()
            .cycle()
            .skip(start)
            .take(self.stealers.len())
            .map(Stealer::steal)
            .collect()
    }

    /// Whether the local deque is empty
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.worker.is_empty()
    }
}
