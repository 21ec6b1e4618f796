//! The generator/driver loop: grows the speculation tree, places
//! speculative work on the worker queue, triggers collapse, and detects
//! termination (spec §4.1, §4.2).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::strategy::{Strategy, StrategyConfig};
use crate::task::Task;
use crate::tree::{NodeId, StepOutcome, Tree};
use crate::worker::{Queues, WorkItem};

/// `kMaxTreeDepth` — the driver compresses the finalized prefix once the
/// tree grows past this height (spec §4.2).
const MAX_TREE_DEPTH: u32 = 64;

/// Runs one pass of `build_bisection_tree` until the search along the
/// current insertion point is exhausted and finalized, driving the worker
/// and reaper pools via `queues`. Blocks the calling thread for the whole
/// run; callers spawn it as "the driver thread" (spec §5).
pub fn build_bisection_tree(
    config: &Config,
    tree: &Tree,
    strategy: &dyn Strategy,
    strategy_config: &StrategyConfig,
    queues: &Queues,
    shutdown: &AtomicBool,
) {
    let max_tree_depth = config.collapse_depth.unwrap_or(MAX_TREE_DEPTH);
    let mut consecutive_backoffs: u32 = 0;

    loop {
        if shutdown.load(Ordering::Acquire) {
            #[cfg(feature = "tracing-integration")]
            tracing::info!("shutdown signal received; driver terminating early");
            return;
        }

        if queues.work.len() > config.max_unprocessed() {
            tree.wait_for_capacity(config.max_wait_time());
        }

        if tree.height() > max_tree_depth {
            let retired = tree.collapse(max_tree_depth);
            #[cfg(feature = "tracing-integration")]
            tracing::debug!(retired = retired.len(), collapsed_time = ?tree.collapsed_time(), "collapsed tree");
            for task in retired {
                queues.reap.push(task);
            }
        }

        if !config.quiet {
            report_progress(tree);
        }

        let outcome = tree.step(|t, node| strategy_callback(t, node, strategy, strategy_config));

        match outcome {
            StepOutcome::NewTask { node, task } => {
                enqueue(queues, node, task);
                consecutive_backoffs = 0;
            }
            StepOutcome::Extended { node, task } => {
                enqueue(queues, node, task);
                consecutive_backoffs = 0;
            }
            StepOutcome::Exhausted { .. } => {
                #[cfg(feature = "tracing-integration")]
                tracing::info!("search exhausted and finalized; driver terminating");
                return;
            }
            StepOutcome::Retry => {
                backoff(config, &mut consecutive_backoffs);
            }
            StepOutcome::QueueFull => {
                tree.wait_for_capacity(config.max_wait_time());
            }
        }
    }
}

fn strategy_callback(
    tree: &Tree,
    node: NodeId,
    strategy: &dyn Strategy,
    strategy_config: &StrategyConfig,
) -> Option<Task> {
    strategy.callback(tree, node, strategy_config)
}

fn enqueue(queues: &Queues, node: NodeId, task: Arc<Task>) {
    queues.work.push(WorkItem { node, task });
}

/// Exponential-ish back-off: `kWorkerPollDelay * n` microseconds on the
/// n-th consecutive retry (spec §4.1), reset by the caller on any enqueue.
fn backoff(config: &Config, consecutive: &mut u32) {
    *consecutive += 1;
    let delay = config.poll_delay * (*consecutive).min(64);
    std::thread::sleep(delay.min(Duration::from_millis(250)));
}

fn report_progress(tree: &Tree) {
    #[cfg(feature = "tracing-integration")]
    {
        let best = tree.best_candidate();
        tracing::info!(
            best_size = best.size(),
            height = tree.height(),
            collapsed_time = ?tree.collapsed_time(),
            "progress"
        );
    }
    #[cfg(not(feature = "tracing-integration"))]
    let _ = tree;
}

/// Sets a pool-stop flag after the driver returns, so `main` can signal
/// workers/reapers parked on an empty queue that this pass is finished.
/// Callers should pass a flag scoped to the current pass, not the
/// process-level shutdown signal, so a `--stable` rerun starts its pools
/// with a clean stop flag.
pub fn mark_done(stop: &AtomicBool) {
    stop.store(true, Ordering::Release);
}
