//! Batches of independent work units on a shared worker pool
//!
//! A [`JobBatch`] collects units of work, runs them on a [`WorkerPool`] and
//! returns one [`JobOutcome`] per unit, in the order the units were added.
//! Every unit reports exactly once, including units that panic.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::TextureError;

/// Thread pool the batches run on
#[derive(Debug)]
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Creates a pool with `threads` workers, or one per core when `None`
    pub fn new(threads: Option<usize>) -> Result<Self, TextureError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.unwrap_or(0))
            .thread_name(|index| format!("texture-worker-{index}"))
            .build()
            .map_err(|e| TextureError::allocation("worker pool", e))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

/// How a single unit of work finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<T> {
    Completed(T),
    /// The unit panicked; holds the panic message when it was a string
    Panicked(String),
}

impl<T> JobOutcome<T> {
    /// The unit's result, if it completed
    pub fn completed(self) -> Option<T> {
        match self {
            JobOutcome::Completed(value) => Some(value),
            JobOutcome::Panicked(_) => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }
}

type Job<'a, T> = Box<dyn FnOnce() -> T + Send + 'a>;

/// Ordered units of work that complete together
pub struct JobBatch<'a, T> {
    jobs: Vec<Job<'a, T>>,
}

impl<T> Default for JobBatch<'_, T> {
    fn default() -> Self {
        Self { jobs: Vec::new() }
    }
}

impl<'a, T: Send + 'a> JobBatch<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a unit of work and returns its position in the batch
    pub fn add(&mut self, job: impl FnOnce() -> T + Send + 'a) -> usize {
        self.jobs.push(Box::new(job));
        self.jobs.len() - 1
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Runs every unit on `pool` and blocks until each one has reported
    ///
    /// Units may borrow from the caller. An empty batch returns immediately.
    pub fn run(self, pool: &WorkerPool) -> Vec<JobOutcome<T>> {
        let expected = self.jobs.len();
        if expected == 0 {
            return Vec::new();
        }

        let (sender, receiver) = mpsc::channel();
        pool.pool.scope(|scope| {
            for (index, job) in self.jobs.into_iter().enumerate() {
                let sender = sender.clone();
                scope.spawn(move |_| execute(index, job, &sender));
            }
        });
        drop(sender);

        collect(receiver, expected)
    }
}

impl<T: Send + 'static> JobBatch<'static, T> {
    /// Starts every unit on `pool` without blocking
    pub fn dispatch(self, pool: &WorkerPool) -> PendingBatch<T> {
        let expected = self.jobs.len();
        let (sender, receiver) = mpsc::channel();
        for (index, job) in self.jobs.into_iter().enumerate() {
            let sender = sender.clone();
            pool.pool.spawn(move || execute(index, job, &sender));
        }

        PendingBatch { receiver, expected }
    }
}

/// A dispatched batch whose units may still be running
#[derive(Debug)]
pub struct PendingBatch<T> {
    receiver: Receiver<(usize, JobOutcome<T>)>,
    expected: usize,
}

impl<T> PendingBatch<T> {
    /// Number of units in the batch
    pub fn len(&self) -> usize {
        self.expected
    }

    pub fn is_empty(&self) -> bool {
        self.expected == 0
    }

    /// Blocks until every unit has reported, then returns outcomes in unit order
    pub fn wait(self) -> Vec<JobOutcome<T>> {
        collect(self.receiver, self.expected)
    }
}

fn execute<T>(index: usize, job: Job<'_, T>, sender: &Sender<(usize, JobOutcome<T>)>) {
    let outcome = match catch_unwind(AssertUnwindSafe(job)) {
        Ok(value) => JobOutcome::Completed(value),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(unit = index, message = %message, "job panicked");
            JobOutcome::Panicked(message)
        }
    };
    // The receiver only goes away if the waiter itself was dropped
    let _ = sender.send((index, outcome));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn collect<T>(receiver: Receiver<(usize, JobOutcome<T>)>, expected: usize) -> Vec<JobOutcome<T>> {
    let mut slots: Vec<Option<JobOutcome<T>>> = (0..expected).map(|_| None).collect();
    for (index, outcome) in receiver.iter().take(expected) {
        slots[index] = Some(outcome);
    }

    tracing::trace!(units = expected, "job batch complete");
    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| JobOutcome::Panicked("unit did not report".to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_empty_batch_returns_immediately() {
        let pool = WorkerPool::new(Some(1)).unwrap();
        assert!(JobBatch::<u32>::new().run(&pool).is_empty());

        let pending = JobBatch::<'static, u32>::new().dispatch(&pool);
        assert!(pending.is_empty());
        assert!(pending.wait().is_empty());
    }

    #[test]
    fn test_results_follow_unit_order() {
        let pool = WorkerPool::new(Some(2)).unwrap();
        let (signal, wait) = mpsc::channel::<()>();

        // Unit 0 cannot finish before unit 1 has run
        let mut batch = JobBatch::new();
        batch.add(move || {
            wait.recv_timeout(Duration::from_secs(5)).unwrap();
            "first"
        });
        batch.add(move || {
            signal.send(()).unwrap();
            "second"
        });

        let outcomes = batch.dispatch(&pool).wait();
        assert_eq!(outcomes, [JobOutcome::Completed("first"), JobOutcome::Completed("second")]);
    }

    #[test]
    fn test_scoped_units_borrow_caller_data() {
        let pool = WorkerPool::new(Some(3)).unwrap();
        let inputs = vec![3u64, 5, 7, 11];
        let calls = AtomicUsize::new(0);

        let mut batch = JobBatch::new();
        for value in &inputs {
            let calls = &calls;
            batch.add(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                value * value
            });
        }
        assert_eq!(batch.len(), 4);

        let squares: Vec<u64> = batch.run(&pool).into_iter().filter_map(JobOutcome::completed).collect();
        assert_eq!(squares, [9, 25, 49, 121]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_panicking_unit_reports_once() {
        let pool = WorkerPool::new(Some(2)).unwrap();
        let mut batch = JobBatch::new();
        batch.add(|| 1);
        batch.add(|| panic!("corrupt container"));
        batch.add(|| 3);

        let outcomes = batch.run(&pool);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0], JobOutcome::Completed(1));
        assert_eq!(outcomes[1], JobOutcome::Panicked("corrupt container".to_string()));
        assert!(outcomes[2].is_completed());
    }
}
