//! Worker pool: runs oracle invocations for tasks the driver has placed in
//! the tree, records their verdict, and hands off cancellation work (spec
//! §4.1 "Worker callback contract").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_queue::SegQueue;

use crate::config::Config;
use crate::oracle;
use crate::task::{Task, TaskStatus};
use crate::tree::{NodeId, Tree};

/// One unit of work handed to a worker: the tree node a trial belongs to
/// (needed to find its sibling on success) and the task itself.
pub struct WorkItem {
    pub node: NodeId,
    pub task: Arc<Task>,
}

/// Shared queues a worker pool and a reaper pool both need. Cloning is
/// cheap; every field is itself a shared handle.
#[derive(Clone)]
pub struct Queues {
    pub work: Arc<SegQueue<WorkItem>>,
    pub reap: Arc<SegQueue<Arc<Task>>>,
}

impl Queues {
    #[must_use]
    pub fn new() -> Self {
        Self {
            work: Arc::new(SegQueue::new()),
            reap: Arc::new(SegQueue::new()),
        }
    }
}

impl Default for Queues {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns `config.num_threads` worker threads pulling from `queues.work`
/// until either `pool_stop` (this pass is done) or `shutdown` (the whole
/// run is winding down, e.g. on SIGINT) is set. Returns their join handles.
pub fn spawn_pool(
    config: Arc<Config>,
    tree: Arc<Tree>,
    queues: Queues,
    pool_stop: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) -> Vec<std::thread::JoinHandle<()>> {
    (0..config.num_threads)
        .map(|id| {
            let config = Arc::clone(&config);
            let tree = Arc::clone(&tree);
            let queues = queues.clone();
            let pool_stop = Arc::clone(&pool_stop);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name(format!("bisectd-worker-{id}"))
                .spawn(move || worker_loop(&config, &tree, &queues, &pool_stop, &shutdown))
                .expect("failed to spawn worker thread")
        })
        .collect()
}

fn worker_loop(
    config: &Config,
    tree: &Tree,
    queues: &Queues,
    pool_stop: &AtomicBool,
    shutdown: &AtomicBool,
) {
    loop {
        match queues.work.pop() {
            Some(item) => run_one(config, tree, queues, item),
            None => {
                if pool_stop.load(Ordering::Acquire) || shutdown.load(Ordering::Acquire) {
                    return;
                }
                std::thread::sleep(config.poll_delay);
            }
        }
    }
}

/// Executes spec §4.1's worker callback contract for a single task.
fn run_one(config: &Config, tree: &Tree, queues: &Queues, item: WorkItem) {
    let WorkItem { node, task } = item;

    // Step 1: a task the reaper already discarded (tree collapse raced
    // ahead of us) must not run.
    if task.status() == TaskStatus::Discarded {
        return;
    }
    debug_assert_eq!(task.status(), TaskStatus::Pending);

    let candidate = {
        let guard = task.lock();
        guard
            .bytes
            .as_ref()
            .and_then(|f| f.try_clone().ok())
            .expect("a Pending task always owns its candidate file")
    };
    let size = task.size();

    let start = Instant::now();
    let result = oracle::run_oracle(config, &candidate, size, |pid| {
        task.lock().child_pid = pid;
    });

    let (status, elapsed) = match result {
        Ok(outcome) => outcome,
        Err(_) => (TaskStatus::Failure, start.elapsed()),
    };
    task.record_verdict(status, elapsed);

    match status {
        TaskStatus::Success => {
            for victim in tree.abort_mispredicted_subtree(node) {
                queues.reap.push(victim);
            }
        }
        TaskStatus::Failure => {
            queues.reap.push(Arc::clone(&task));
        }
        TaskStatus::Pending | TaskStatus::Discarded => unreachable!("oracle always returns a verdict"),
    }

    tree.condvar().notify_all();
}
