//! Cancellation / reaper pool (spec §4.3): kills mispredicted or superseded
//! oracle invocations and releases their candidate files.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::oracle;
use crate::task::Task;
use crate::worker::Queues;

/// Spawns `config.cleanup_threads` reaper threads pulling from
/// `queues.reap` until either `pool_stop` (this pass is done) or
/// `shutdown` (the whole run is winding down, e.g. on SIGINT) is set.
pub fn spawn_pool(
    config: Arc<Config>,
    queues: Queues,
    pool_stop: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) -> Vec<std::thread::JoinHandle<()>> {
    (0..config.cleanup_threads)
        .map(|id| {
            let config = Arc::clone(&config);
            let queues = queues.clone();
            let pool_stop = Arc::clone(&pool_stop);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name(format!("bisectd-reaper-{id}"))
                .spawn(move || reaper_loop(&config, &queues, &pool_stop, &shutdown))
                .expect("failed to spawn reaper thread")
        })
        .collect()
}

fn reaper_loop(config: &Config, queues: &Queues, pool_stop: &AtomicBool, shutdown: &AtomicBool) {
    loop {
        match queues.reap.pop() {
            Some(task) => retire_one(config, &task),
            None => {
                if pool_stop.load(Ordering::Acquire) || shutdown.load(Ordering::Acquire) {
                    return;
                }
                std::thread::sleep(config.poll_delay);
            }
        }
    }
}

/// Spec §4.3 steps 1-3: signal the process group, transition a still-Pending
/// task to Discarded, then release its file and reap the pid.
fn retire_one(config: &Config, task: &Task) {
    let child_pid = task.lock().child_pid;
    if child_pid > 0 && !config.no_terminate {
        oracle::kill_process_group(child_pid, config.term_signal);
    }

    let (pid, bytes) = task.retire();
    drop(bytes);
    oracle::try_reap(pid);
}
