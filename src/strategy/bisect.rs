//! Delete-chunk bisection strategy (spec §4.4).

use std::sync::Arc;

use crate::candidate;
use crate::task::{ChunkCursor, Task, TaskStatus};
use crate::tree::{NodeId, Tree};

use super::{step_cursor, Strategy, StrategyConfig};

/// Removes successively smaller chunks of the candidate, cycling the
/// offset across the file and halving the chunk size each time the offset
/// runs off the end, exactly as spec §4.4 describes.
pub struct BisectStrategy;

impl Strategy for BisectStrategy {
    fn name(&self) -> &'static str {
        "bisect"
    }

    fn describe(&self) -> &'static str {
        "delete successively smaller chunks (classic delta-debugging bisection)"
    }

    fn callback(&self, tree: &Tree, node: NodeId, config: &StrategyConfig) -> Option<Task> {
        let parent = tree
            .task(node)
            .expect("callback is only invoked against a resolved (task-bearing) node");
        let source = super::nearest_success_ancestor(tree, node);
        let source_size = source.size();

        let is_virgin_root = tree.parent(node).is_none();
        let next = next_cursor(parent.user, parent.status(), source_size, is_virgin_root, config)?;

        let source_guard = source.lock();
        let source_file = source_guard
            .bytes
            .as_ref()
            .expect("a Success task's bytes are never retired while it is a source");
        let (file, size) = candidate::delete_chunk(
            source_file,
            source_size,
            next.offset,
            next.chunksize,
        )
        .ok()?;
        drop(source_guard);
        Some(Task::pending(file, size, next))
    }
}

/// Advances `prev` by one bisection step relative to `parent_status`: a
/// `Success` parent means the chunk it removed is gone for good, so this
/// retries the same `(offset, chunksize)` against the now-smaller file
/// (this is also how a run converges all the way to an empty result, when
/// the remaining file happens to shrink to exactly the chunk size);
/// anything else advances `offset` to the next chunk. `step_cursor` keeps
/// wrapping/halving until the candidate fits.
///
/// `is_virgin_root` is true exactly once per run, for the root's own
/// `ChunkCursor::whole_file` sentinel: that cursor names the entire
/// (untouched) file as a single chunk, which `step_cursor` would otherwise
/// accept unchanged since it already "fits". It gets a one-time halve here
/// before entering the normal cycle, so the first real candidate is a
/// proper subdivision rather than "delete the whole file" (spec §9's
/// "offset > size after increment" open question; see `DESIGN.md`).
fn next_cursor(
    prev: ChunkCursor,
    parent_status: TaskStatus,
    source_size: u64,
    is_virgin_root: bool,
    config: &StrategyConfig,
) -> Option<ChunkCursor> {
    let mut cur = if is_virgin_root {
        ChunkCursor { offset: 0, chunksize: prev.chunksize >> 1 }
    } else {
        step_cursor(prev, parent_status != TaskStatus::Success, source_size)
    };
    loop {
        if cur.chunksize < config.bisect_skip_threshold {
            cur.chunksize = 0;
        }
        if cur.chunksize == 0 {
            return None;
        }
        if config.bisect_skip_empty && would_be_empty(cur, source_size) {
            cur = step_cursor(cur, true, source_size);
            continue;
        }
        return Some(cur);
    }
}

fn would_be_empty(cur: ChunkCursor, source_size: u64) -> bool {
    cur.offset == 0 && cur.chunksize >= source_size
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> StrategyConfig {
        StrategyConfig::default()
    }

    #[test]
    fn first_step_halves_from_whole_file() {
        let prev = ChunkCursor::whole_file(8);
        let next = next_cursor(prev, TaskStatus::Success, 8, true, &cfg()).unwrap();
        assert_eq!(next, ChunkCursor { offset: 0, chunksize: 4 });
    }

    #[test]
    fn advances_offset_on_failure() {
        let prev = ChunkCursor { offset: 0, chunksize: 4 };
        let next = next_cursor(prev, TaskStatus::Failure, 8, false, &cfg()).unwrap();
        assert_eq!(next, ChunkCursor { offset: 4, chunksize: 4 });
    }

    #[test]
    fn wraps_and_halves_at_end_of_cycle() {
        let prev = ChunkCursor { offset: 4, chunksize: 4 };
        let next = next_cursor(prev, TaskStatus::Failure, 8, false, &cfg()).unwrap();
        assert_eq!(next, ChunkCursor { offset: 0, chunksize: 2 });
    }

    #[test]
    fn exhausts_at_zero_chunksize() {
        let prev = ChunkCursor { offset: 0, chunksize: 1 };
        assert!(next_cursor(prev, TaskStatus::Failure, 1, false, &cfg()).is_none());
    }

    #[test]
    fn keeps_offset_after_success() {
        let prev = ChunkCursor { offset: 2, chunksize: 2 };
        // source_size already reflects the post-deletion size (4, down from 6).
        let next = next_cursor(prev, TaskStatus::Success, 4, false, &cfg()).unwrap();
        assert_eq!(next, ChunkCursor { offset: 2, chunksize: 2 });
    }

    #[test]
    fn converges_to_empty_when_chunk_spans_remaining_file() {
        // Not the virgin root case: a Success retry whose chunk now exactly
        // covers what's left of the file is a legal candidate (it's how a
        // run reaches an empty result when the oracle always succeeds).
        let prev = ChunkCursor { offset: 0, chunksize: 4 };
        let next = next_cursor(prev, TaskStatus::Success, 4, false, &cfg()).unwrap();
        assert_eq!(next, ChunkCursor { offset: 0, chunksize: 4 });
    }
}
