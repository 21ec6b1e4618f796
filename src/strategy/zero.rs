//! Zero-chunk strategy (spec §4.4).

use crate::candidate;
use crate::task::{ChunkCursor, Task, TaskStatus};
use crate::tree::{NodeId, Tree};

use super::{step_cursor, Strategy, StrategyConfig};

/// Overwrites successively smaller chunks with a fixed byte instead of
/// deleting them. Candidate length never shrinks. Skips chunks already
/// known to be zero, either because an ancestor's successful candidate
/// already zeroed an encapsulating region, or because the source bytes
/// already happen to equal the zero byte.
pub struct ZeroStrategy;

impl Strategy for ZeroStrategy {
    fn name(&self) -> &'static str {
        "zero"
    }

    fn describe(&self) -> &'static str {
        "overwrite successively smaller chunks with a fixed byte"
    }

    fn callback(&self, tree: &Tree, node: NodeId, config: &StrategyConfig) -> Option<Task> {
        let parent = tree
            .task(node)
            .expect("callback is only invoked against a resolved (task-bearing) node");
        let source = super::nearest_success_ancestor(tree, node);
        let source_size = source.size();

        let is_virgin_root = tree.parent(node).is_none();
        let mut cur = cycle_step(parent.user, parent.status(), source_size, is_virgin_root)?;
        loop {
            if let Some(encapsulating) = encapsulating_ancestor(tree, node, cur) {
                cur.offset = encapsulating.offset + encapsulating.chunksize;
                cur = step_cursor(cur, false, source_size);
                if cur.chunksize == 0 {
                    return None;
                }
                continue;
            }

            let source_guard = source.lock();
            let source_file = source_guard
                .bytes
                .as_ref()
                .expect("a Success task's bytes are never retired while it is a source");
            let sample = candidate::read_range(source_file, cur.offset, cur.chunksize).ok()?;
            drop(source_guard);
            if sample.iter().all(|&b| b == config.zero_char) {
                cur = cycle_step(cur, TaskStatus::Failure, source_size, false)?;
                continue;
            }
            break;
        }

        let source_guard = source.lock();
        let source_file = source_guard
            .bytes
            .as_ref()
            .expect("a Success task's bytes are never retired while it is a source");
        let (file, size) = candidate::zero_chunk(
            source_file,
            source_size,
            cur.offset,
            cur.chunksize,
            config.zero_char,
        )
        .ok()?;
        drop(source_guard);
        Some(Task::pending(file, size, cur))
    }
}

/// Same wrap/halve cycle as the bisect strategy (`strategy::step_cursor`):
/// advance the offset for a non-success parent, or wrap to a halved chunk
/// size once the offset runs off the end. Unlike bisect, `source_size`
/// never shrinks. `is_virgin_root` forces the one-time halve of the root's
/// `ChunkCursor::whole_file` sentinel, same reasoning as in
/// `bisect::next_cursor`.
fn cycle_step(
    prev: ChunkCursor,
    parent_status: TaskStatus,
    source_size: u64,
    is_virgin_root: bool,
) -> Option<ChunkCursor> {
    let cur = if is_virgin_root {
        ChunkCursor { offset: 0, chunksize: prev.chunksize >> 1 }
    } else {
        step_cursor(prev, parent_status != TaskStatus::Success, source_size)
    };
    if cur.chunksize == 0 {
        return None;
    }
    Some(cur)
}

/// Walks `node` and its ancestors for a `Success` task whose own cursor
/// fully contains `cur`. Tested before the already-zero byte scan because
/// it is cheaper (spec §9 resolves the ordering this way explicitly).
fn encapsulating_ancestor(tree: &Tree, node: NodeId, cur: ChunkCursor) -> Option<ChunkCursor> {
    let mut current = Some(node);
    while let Some(id) = current {
        if let Some(task) = tree.task(id) {
            if task.status() == TaskStatus::Success {
                let anc = task.user;
                let contains = anc.offset <= cur.offset
                    && cur.offset + cur.chunksize <= anc.offset + anc.chunksize;
                if contains {
                    return Some(anc);
                }
            }
        }
        current = tree.parent(id);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_on_failure() {
        let prev = ChunkCursor { offset: 0, chunksize: 2 };
        let next = cycle_step(prev, TaskStatus::Failure, 8, false).unwrap();
        assert_eq!(next, ChunkCursor { offset: 2, chunksize: 2 });
    }

    #[test]
    fn keeps_offset_on_success_mechanically() {
        let prev = ChunkCursor { offset: 2, chunksize: 2 };
        let next = cycle_step(prev, TaskStatus::Success, 8, false).unwrap();
        assert_eq!(next, ChunkCursor { offset: 2, chunksize: 2 });
    }

    #[test]
    fn wraps_and_halves() {
        let prev = ChunkCursor { offset: 6, chunksize: 2 };
        let next = cycle_step(prev, TaskStatus::Failure, 8, false).unwrap();
        assert_eq!(next, ChunkCursor { offset: 0, chunksize: 1 });
    }

    #[test]
    fn halves_virgin_root_sentinel() {
        let prev = ChunkCursor::whole_file(8);
        let next = cycle_step(prev, TaskStatus::Success, 8, true).unwrap();
        assert_eq!(next, ChunkCursor { offset: 0, chunksize: 4 });
    }
}
