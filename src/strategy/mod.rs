//! The reduction strategy interface and registry.
//!
//! A strategy is `{name, description, options, callback}` (spec §4.4).
//! `callback` runs in one of two modes depending on what node it is handed:
//! initialization (storing the root's starting cursor) or extension
//! (deriving one child candidate from a node). Both shipped strategies
//! share the `ChunkCursor` state shape from [`crate::task`], but the trait
//! itself carries no assumption about that — a future strategy is free to
//! stash different state on its tasks (spec §9, "Dynamic dispatch on
//! strategies").

mod bisect;
mod zero;

pub use bisect::BisectStrategy;
pub use zero::ZeroStrategy;

use crate::task::{ChunkCursor, Task};
use crate::tree::{NodeId, Tree};

/// A pluggable reduction strategy.
pub trait Strategy: Send + Sync {
    /// Short identifier used on the command line (`--strategy NAME`).
    fn name(&self) -> &'static str;

    /// One-line human description, shown by `--list-strategies`.
    fn describe(&self) -> &'static str;

    /// Produces the next candidate task extending `node`, deriving it from
    /// `node`'s cursor and the nearest `Success` ancestor's bytes.
    ///
    /// The root task is always constructed with `ChunkCursor::whole_file`
    /// (see `Task::root`), so unlike the two-mode `init`/`extend` callback
    /// described in spec §4.4, every call here is effectively "extension" —
    /// there is no separate initialization call. Implementations detect the
    /// one time `node` is the root itself (`tree.parent(node).is_none()`)
    /// and halve that sentinel cursor before treating it as a real
    /// candidate. See `DESIGN.md` for this as a resolved Open Question.
    ///
    /// Returns `None` when the search space from this node is exhausted
    /// (`chunksize` has shrunk to zero).
    fn callback(&self, tree: &Tree, node: NodeId, config: &StrategyConfig) -> Option<Task>;
}

/// Strategy-specific options parsed from the CLI (spec §6,
/// "Strategy-specific" flags).
#[derive(Debug, Clone, Copy)]
pub struct StrategyConfig {
    /// `--bisect-skip-empty`: skip candidates that would be fully empty.
    pub bisect_skip_empty: bool,
    /// `--bisect-skip-threshold N`: don't bother bisecting chunks smaller
    /// than this many bytes; treat the cycle as exhausted instead.
    pub bisect_skip_threshold: u64,
    /// `--zero-char N`: the byte value the zero strategy writes.
    pub zero_char: u8,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            bisect_skip_empty: false,
            bisect_skip_threshold: 0,
            zero_char: 0,
        }
    }
}

/// The set of strategies a binary ships with, looked up by name.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Builds the registry with the two shipped strategies.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            strategies: vec![Box::new(BisectStrategy), Box::new(ZeroStrategy)],
        }
    }

    /// Looks up a strategy by its `name()`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Strategy> {
        self.strategies
            .iter()
            .find(|s| s.name() == name)
            .map(std::convert::AsRef::as_ref)
    }

    /// All registered strategies, for `--list-strategies`.
    #[must_use]
    pub fn all(&self) -> &[Box<dyn Strategy>] {
        &self.strategies
    }
}

/// Advances a strategy's `(offset, chunksize)` cursor by one wrap/halve
/// cycle step, shared by both shipped strategies (spec §4.4's halving
/// description). When `advance` is set, `offset` moves to the next chunk
/// first; either way, if the result would run past `source_size` the cycle
/// wraps: `offset` resets to 0 and `chunksize` is halved, repeating until
/// the candidate fits or `chunksize` reaches 0 (exhaustion).
///
/// A chunk that exactly spans the rest of the file is a legal candidate
/// here (it's how convergence to an empty, or all-zero, result happens) —
/// the one case that must *not* pass through unchanged is the root's
/// virgin `ChunkCursor::whole_file` sentinel, whose `chunksize` starts out
/// equal to `source_size` before anything has been tried yet. Callers
/// handle that one-time halve themselves (see `bisect::next_cursor` /
/// `zero::cycle_step`) rather than folding it in here, since nothing in
/// `(cur, advance, source_size)` alone distinguishes "virgin root" from
/// "legitimately converged down to the whole remaining file".
pub(crate) fn step_cursor(mut cur: ChunkCursor, advance: bool, source_size: u64) -> ChunkCursor {
    if advance {
        cur.offset += cur.chunksize;
    }
    while cur.chunksize != 0 && cur.offset + cur.chunksize > source_size {
        cur.offset = 0;
        cur.chunksize >>= 1;
    }
    cur
}

/// Finds the nearest ancestor of `node` (inclusive) whose task status is
/// `Success`, returning its task. Always succeeds because the root is
/// always `Success` (spec §3 root invariant).
pub(crate) fn nearest_success_ancestor(
    tree: &Tree,
    node: NodeId,
) -> std::sync::Arc<Task> {
    let mut current = node;
    loop {
        if let Some(task) = tree.task(current) {
            if task.status() == crate::task::TaskStatus::Success {
                return task;
            }
        }
        match tree.parent(current) {
            Some(parent) => current = parent,
            None => {
                return tree
                    .task(current)
                    .expect("root always holds a Success task");
            }
        }
    }
}
