//! Parallel Work Queue
//!
//! A map/reduce worker pool with per-worker FIFOs and randomized work
//! stealing, used to run per-method analyses across a whole program.
//!
//! # Execution Model
//! - Tasks are distributed round-robin across per-worker queues before the
//!   run starts (`add_item`), or pushed onto the running worker's own queue
//!   from inside a task (`WorkerState::push_task`).
//! - Each worker walks a randomized permutation of worker indices with its
//!   own index forced to the front, popping one task at a time from the
//!   first non-empty queue. A full pass that yields nothing means the run is
//!   drained and the worker exits.
//! - The caller's reducer folds each task's output into the worker's
//!   accumulated result as tasks complete, and `run_all` folds the
//!   per-worker results into the final output.
//!
//! # Locking
//! Each queue has its own mutex; there is no global queue. Pre-run inserts
//! go through `&mut self` and take no lock. Worker threads get 8 MiB stacks
//! because analyses may recurse deeply on pathological inputs.
//!
//! Worker failure is not recoverable: a panicking task poisons the run and
//! `run_all` propagates the panic.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

type Mapper<'f, I, D, O> = Box<dyn for<'q> Fn(&mut WorkerState<'q, I, D>, I) -> O + Send + Sync + 'f>;
type Reducer<'f, O> = Box<dyn Fn(O, O) -> O + Send + Sync + 'f>;
type DataInit<'f, D> = Box<dyn Fn(usize) -> D + Send + Sync + 'f>;

/// Creates a random visiting order over worker indices with the worker's own
/// index forced to position 0, so every worker drains its own queue before
/// probing others.
///
/// Per-worker randomization matters: a single shared order would turn every
/// idle worker loose on the same victim.
fn steal_order(num_workers: usize, worker_idx: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..num_workers).collect();
    let mut hasher = DefaultHasher::new();
    worker_idx.hash(&mut hasher);
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    for i in (1..num_workers).rev() {
        i.hash(&mut hasher);
        let j = (hasher.finish() as usize) % (i + 1);
        order.swap(i, j);
    }
    if let Some(own) = order.iter().position(|&w| w == worker_idx) {
        order.swap(0, own);
    }
    order
}

fn pop_task<I>(queue: &Mutex<VecDeque<I>>) -> Option<I> {
    queue.lock().expect("worker queue mutex poisoned").pop_front()
}

/// Handle a running task uses to talk to its worker: the worker id, the
/// worker-local data, and a thread-safe path for queueing more work.
pub struct WorkerState<'q, I, D = ()> {
    id: usize,
    queue: &'q Mutex<VecDeque<I>>,
    data: D,
}

impl<'q, I, D> WorkerState<'q, I, D> {
    pub fn worker_id(&self) -> usize {
        self.id
    }

    /// Worker-local data, initialized once when the worker started.
    pub fn data(&mut self) -> &mut D {
        &mut self.data
    }

    /// Queue another task onto this worker's own queue.
    ///
    /// This is the only legal way to submit work while the queue is
    /// running; `WorkQueue::add_item` is for pre-run setup only.
    pub fn push_task(&self, task: I) {
        self.queue
            .lock()
            .expect("worker queue mutex poisoned")
            .push_back(task);
    }
}

/// Fixed pool of workers executing a mapper over queued inputs and reducing
/// the outputs.
pub struct WorkQueue<'f, I, D = (), O = ()> {
    mapper: Mapper<'f, I, D, O>,
    reducer: Reducer<'f, O>,
    data_initializer: DataInit<'f, D>,
    queues: Vec<Mutex<VecDeque<I>>>,
    insert_idx: usize,
}

impl<'f, I, D, O> WorkQueue<'f, I, D, O>
where
    I: Send,
    O: Send + Clone,
{
    /// Build a queue with `num_threads` workers.
    ///
    /// `data_initializer` runs once per worker (receiving the worker index)
    /// when `run_all` starts; the produced value is owned by that worker for
    /// the whole run.
    ///
    /// Panics if `num_threads` is zero.
    pub fn new<M, R, F>(mapper: M, reducer: R, data_initializer: F, num_threads: usize) -> Self
    where
        M: for<'q> Fn(&mut WorkerState<'q, I, D>, I) -> O + Send + Sync + 'f,
        R: Fn(O, O) -> O + Send + Sync + 'f,
        F: Fn(usize) -> D + Send + Sync + 'f,
    {
        assert!(num_threads >= 1, "work queue needs at least one thread");
        let queues = (0..num_threads).map(|_| Mutex::new(VecDeque::new())).collect();
        WorkQueue {
            mapper: Box::new(mapper),
            reducer: Box::new(reducer),
            data_initializer: Box::new(data_initializer),
            queues,
            insert_idx: 0,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.queues.len()
    }

    /// Queue a task, round-robin across workers.
    ///
    /// Exclusive access makes this lock-free; it is usable only before
    /// `run_all` (the borrow checker enforces what the protocol requires —
    /// in-flight submission goes through `WorkerState::push_task`).
    pub fn add_item(&mut self, task: I) {
        self.insert_idx = (self.insert_idx + 1) % self.queues.len();
        let idx = self.insert_idx;
        self.queues[idx]
            .get_mut()
            .expect("worker queue mutex poisoned")
            .push_back(task);
    }

    /// Spawn the workers, drain every queue, and fold the results.
    ///
    /// Blocks until all workers exit. Each worker's accumulator starts from
    /// a clone of `init_output`, and the per-worker results are reduced into
    /// `init_output` at join time.
    pub fn run_all(&mut self, init_output: O) -> O {
        let queues = &self.queues;
        let mapper = &self.mapper;
        let reducer = &self.reducer;
        let data_initializer = &self.data_initializer;
        let num_workers = queues.len();

        let results: Vec<O> = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(num_workers);
            for idx in 0..num_workers {
                let init = init_output.clone();
                let builder = std::thread::Builder::new()
                    .name(format!("bcopt-worker-{idx}"))
                    .stack_size(WORKER_STACK_SIZE);
                let handle = builder
                    .spawn_scoped(scope, move || {
                        let order = steal_order(num_workers, idx);
                        let mut state = WorkerState {
                            id: idx,
                            queue: &queues[idx],
                            data: data_initializer(idx),
                        };
                        let mut result = init;
                        loop {
                            let mut task = None;
                            for &victim in &order {
                                if let Some(found) = pop_task(&queues[victim]) {
                                    task = Some(found);
                                    break;
                                }
                            }
                            match task {
                                Some(task) => {
                                    let output = mapper(&mut state, task);
                                    result = reducer(result, output);
                                }
                                None => return result,
                            }
                        }
                    })
                    .expect("failed to spawn worker thread");
                handles.push(handle);
            }
            handles
                .into_iter()
                .map(|handle| handle.join().expect("worker thread panicked"))
                .collect()
        });

        let mut output = init_output;
        for result in results {
            output = (self.reducer)(output, result);
        }
        output
    }
}

/// Default worker count: one per available hardware thread.
pub fn default_num_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// A queue for jobs with only side effects: no reducer, no per-worker data.
pub fn workqueue_foreach<'f, I, F>(func: F, num_threads: usize) -> WorkQueue<'f, I, (), ()>
where
    I: Send,
    F: Fn(I) + Send + Sync + 'f,
{
    WorkQueue::new(
        move |_state: &mut WorkerState<I, ()>, task: I| func(task),
        |_, _| (),
        |_| (),
        num_threads,
    )
}

/// A queue that reduces task outputs to a single value, with no per-worker
/// data.
pub fn workqueue_mapreduce<'f, I, O, M, R>(
    mapper: M,
    reducer: R,
    num_threads: usize,
) -> WorkQueue<'f, I, (), O>
where
    I: Send,
    O: Send + Clone,
    M: Fn(I) -> O + Send + Sync + 'f,
    R: Fn(O, O) -> O + Send + Sync + 'f,
{
    WorkQueue::new(
        move |_state: &mut WorkerState<I, ()>, task: I| mapper(task),
        reducer,
        |_| (),
        num_threads,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steal_order_is_a_permutation_with_self_first() {
        for workers in 1..9 {
            for idx in 0..workers {
                let order = steal_order(workers, idx);
                assert_eq!(order[0], idx);
                let mut sorted = order.clone();
                sorted.sort_unstable();
                assert_eq!(sorted, (0..workers).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    #[should_panic(expected = "at least one thread")]
    fn zero_threads_fails_fast() {
        let _ = WorkQueue::<u32, (), ()>::new(
            |_state: &mut WorkerState<u32, ()>, _task| (),
            |_, _| (),
            |_| (),
            0,
        );
    }
}
