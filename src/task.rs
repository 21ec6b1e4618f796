//! A single oracle trial: the candidate bytes, its status, and the
//! bookkeeping the worker/reaper pools need to retire it.
//!
//! `Task` bundles exactly the fields `data_model.md` (spec §3) calls out as
//! mutex-protected — `bytes`, `size`, `status`, `timer`, `child_pid` — behind
//! one `parking_lot::Mutex<TaskState>` so a reader never observes `size`
//! disagreeing with `bytes`'s actual length. `user` (the strategy's private
//! `(offset, chunksize)` state) is written once at task construction and
//! never touched again, so it lives outside the lock.

use std::fs::File;
use std::time::Duration;

use parking_lot::Mutex;

/// Lifecycle state of a [`Task`]. Transitions exactly once, from `Pending`
/// to one of the three terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Awaiting (or running) its oracle invocation.
    Pending,
    /// The oracle exited zero on this candidate.
    Success,
    /// The oracle exited non-zero, was killed, or timed out.
    Failure,
    /// Cancelled before (or instead of) running — the tree disproved this
    /// branch before the worker reached it, or a finished task's bytes were
    /// reclaimed because they will never be read again.
    Discarded,
}

impl TaskStatus {
    /// Whether this status is final with respect to the driver's
    /// finalization check (`status` is `Success` or `Failure`). `Discarded`
    /// is terminal but is not a verdict, so it is intentionally excluded.
    #[must_use]
    pub const fn is_finalized(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Per-strategy candidate coordinates. Both shipped strategies (bisect,
/// zero) share this shape; a future strategy with different state would
/// carry its own type behind the `Strategy` trait instead of extending this
/// one (see `strategy::Strategy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCursor {
    /// Byte offset of the chunk under consideration.
    pub offset: u64,
    /// Size of the chunk under consideration; `0` means the strategy has
    /// exhausted every granularity and the search along this path is done.
    pub chunksize: u64,
}

impl ChunkCursor {
    /// The cursor a freshly-initialized root task starts from: the whole
    /// file is one chunk.
    #[must_use]
    pub const fn whole_file(size: u64) -> Self {
        Self {
            offset: 0,
            chunksize: size,
        }
    }
}

/// Fields guarded by `Task`'s mutex: the candidate's backing file, its
/// length, verdict, wall-clock timing, and the pid of the oracle process
/// group that produced (or is producing) that verdict.
pub struct TaskState {
    /// Anonymous, already-unlinked file holding the candidate bytes. `None`
    /// once the reaper has retired the task.
    pub bytes: Option<File>,
    /// Length of `bytes` in bytes. Must always equal `bytes`'s actual
    /// length while the lock is held (enforced by construction: every
    /// write path updates both together).
    pub size: u64,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Wall-clock duration of the oracle invocation. Set exactly once, on
    /// the transition out of `Pending`.
    pub timer: Option<Duration>,
    /// Process-group leader of the running (or just-finished) oracle
    /// invocation. `0` when no child has been spawned, or after the reaper
    /// has reaped it.
    pub child_pid: i32,
}

/// A single bisection trial: candidate bytes plus the state machine
/// described above.
pub struct Task {
    /// Strategy-private cursor. Immutable after construction.
    pub user: ChunkCursor,
    state: Mutex<TaskState>,
}

impl Task {
    /// Builds a new `Pending` task around an already-materialized candidate
    /// file.
    #[must_use]
    pub fn pending(bytes: File, size: u64, user: ChunkCursor) -> Self {
        Self {
            user,
            state: Mutex::new(TaskState {
                bytes: Some(bytes),
                size,
                status: TaskStatus::Pending,
                timer: None,
                child_pid: 0,
            }),
        }
    }

    /// Builds the root task: the original, already-verified input. Status
    /// is `Success` from the start, per the root invariant in spec §3.
    #[must_use]
    pub fn root(bytes: File, size: u64) -> Self {
        Self {
            user: ChunkCursor::whole_file(size),
            state: Mutex::new(TaskState {
                bytes: Some(bytes),
                size,
                status: TaskStatus::Success,
                timer: None,
                child_pid: 0,
            }),
        }
    }

    /// Builds a placeholder task slot: a node reserving a branch with no
    /// task materialized yet. Placeholders are represented as `Option<Task>
    /// = None` on the tree node rather than as a distinct `Task` variant;
    /// see `tree::Node`.
    pub fn lock(&self) -> parking_lot::MutexGuard<'_, TaskState> {
        self.state.lock()
    }

    /// Snapshot of the current status. Takes the lock briefly.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    /// Snapshot of the current candidate size. Takes the lock briefly.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Records a worker's verdict: `Success` or `Failure`, with the
    /// observed wall-clock duration. Asserts the task was `Pending`,
    /// matching the worker contract in spec §4.1 step 2.
    pub fn record_verdict(&self, status: TaskStatus, elapsed: Duration) {
        debug_assert!(matches!(status, TaskStatus::Success | TaskStatus::Failure));
        let mut state = self.state.lock();
        debug_assert_eq!(
            state.status,
            TaskStatus::Pending,
            "worker observed a non-Pending task past the Discarded check"
        );
        state.status = status;
        state.timer = Some(elapsed);
    }

    /// Reaper-side retirement: closes `bytes`, clears `child_pid`, and -
    /// only if the task was still `Pending` - transitions it to
    /// `Discarded`. Returns the pid to reap (non-blockingly) if one was
    /// recorded, and the file to drop.
    pub fn retire(&self) -> (i32, Option<File>) {
        let mut state = self.state.lock();
        if state.status == TaskStatus::Pending {
            state.status = TaskStatus::Discarded;
        }
        let pid = state.child_pid;
        state.child_pid = 0;
        let bytes = state.bytes.take();
        (pid, bytes)
    }
}
