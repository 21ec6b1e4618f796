//! The speculation tree: a binary tree of [`Task`]s recording the explored
//! bisection search path, plus the collapse procedure that bounds its
//! height.
//!
//! Nodes live in an append-only arena (`Vec<Node>` indexed by [`NodeId`])
//! rather than behind raw pointers, per the design note in spec §9 ("Tree
//! as explicit graph"): collapse relinks parent/child slots, it never frees
//! arena slots, so a plain growable vector is sufficient — there is no
//! generation/reuse concern the way there would be for a node that could be
//! deleted outright.
//!
//! `children: [Option<NodeId>; 2]` is indexed by the boolean outcome
//! (`[false]` = failure branch, `[true]` = success branch), addressed
//! through [`branch_index`] everywhere so "predicted vs actual" never needs
//! its own enum.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::task::{Task, TaskStatus};

/// Handle to a node in the tree's arena. Cheap to copy; stable for the
/// lifetime of the tree (arena slots are never freed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Maps a task's status to the child-branch index used for traversal and
/// for extension placement (see spec §4.1 step 6). `Success` routes to the
/// `[true]` slot; anything else (`Pending`, `Failure`) routes to `[false]`.
#[must_use]
pub const fn branch_index(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Success)
}

/// A node in the speculation tree.
pub struct Node {
    /// The trial this node represents, or `None` for a placeholder slot
    /// reserved on a predicted-unlikely branch.
    pub task: Option<Arc<Task>>,
    /// Parent link; `None` only for the tree's root and the retired root.
    pub parent: Option<NodeId>,
    /// `[false]` = failure-branch child, `[true]` = success-branch child.
    pub children: [Option<NodeId>; 2],
    /// Depth from the root, used to detect when collapse should run.
    pub depth: u32,
}

impl Node {
    const fn placeholder(parent: Option<NodeId>, depth: u32) -> Self {
        Self {
            task: None,
            parent,
            children: [None, None],
            depth,
        }
    }

    const fn with_task(task: Arc<Task>, parent: Option<NodeId>, depth: u32) -> Self {
        Self {
            task: Some(task),
            parent,
            children: [None, None],
            depth,
        }
    }

    /// Whether this node is a placeholder (no task materialized yet).
    #[must_use]
    pub const fn is_placeholder(&self) -> bool {
        self.task.is_none()
    }

    fn child(&self, branch: bool) -> Option<NodeId> {
        self.children[usize::from(branch)]
    }
}

/// What the driver should do after one `step()` call.
pub enum StepOutcome {
    /// A placeholder became a real task; enqueue it on the worker pool.
    NewTask { node: NodeId, task: Arc<Task> },
    /// A leaf was extended with a real child and a placeholder sibling;
    /// enqueue the real child.
    Extended { node: NodeId, task: Arc<Task> },
    /// The strategy returned no candidate and the insertion point's
    /// root-path is finalized: the search along this path is complete.
    /// Carries the node the driver stopped at, for termination bookkeeping.
    Exhausted { node: NodeId },
    /// The strategy returned no candidate but the path is not yet
    /// finalized (an oracle invocation upstream is still Pending); the
    /// driver should back off and retry.
    Retry,
    /// The worker queue is over `kMaxUnprocessed`; the driver should wait
    /// on the tree condition variable.
    QueueFull,
}

/// Shape-guarding state. Everything here requires `tree_lock`.
struct Inner {
    arena: Vec<Node>,
    root: NodeId,
    /// Roots of subtrees detached by collapse, kept until final cleanup.
    /// Not itself a binary tree — just a bag the cleanup pass drains.
    retired: Vec<NodeId>,
    /// Cumulative oracle compute time of collapsed (retired) subtrees, so
    /// progress reporting stays continuous across a collapse.
    collapsed_time: Duration,
    /// Highest `depth` among live (non-retired) nodes.
    max_depth: u32,
}

/// The speculation tree. `tree_lock` (shape) and `tree_cond` (status
/// transitions) live together here; per-task mutexes live on each `Task`
/// and are never held across an oracle invocation.
pub struct Tree {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Tree {
    /// Builds a tree whose root is the already-verified original input.
    #[must_use]
    pub fn new(root_task: Task) -> Self {
        let root_task = Arc::new(root_task);
        let root = Node::with_task(root_task, None, 0);
        Self {
            inner: Mutex::new(Inner {
                arena: vec![root],
                root: NodeId(0),
                retired: Vec::new(),
                collapsed_time: Duration::ZERO,
                max_depth: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// The condition variable signalled on every status transition and
    /// awaited by the driver when its prefetch window is full.
    #[must_use]
    pub const fn condvar(&self) -> &Condvar {
        &self.cond
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    /// Blocks the caller on `tree_cond` for at most `timeout`. Used by the
    /// driver's backpressure wait (spec §4.1 step 1).
    pub fn wait_for_capacity(&self, timeout: Duration) {
        let mut guard = self.lock();
        self.cond.wait_for(&mut guard, timeout);
    }

    /// Returns the root node id.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.lock().root
    }

    /// Current tree height (max depth among live nodes).
    #[must_use]
    pub fn height(&self) -> u32 {
        self.lock().max_depth
    }

    /// One pass of the driver algorithm: walk from the root along the
    /// predicted path, then either materialize a placeholder or extend a
    /// leaf with a speculative pair of children. `strategy_cb` is called at
    /// most once.
    pub fn step<F>(&self, mut strategy_cb: F) -> StepOutcome
    where
        F: FnMut(&Tree, NodeId) -> Option<Task>,
    {
        let mut guard = self.lock();
        let mut current = guard.root;
        loop {
            let node = &guard.arena[current.0];
            if node.is_placeholder() {
                break;
            }
            let status = node
                .task
                .as_ref()
                .map_or(TaskStatus::Pending, |t| t.status());
            let idx = branch_index(status);
            match node.child(idx) {
                Some(next) => current = next,
                None => break,
            }
        }
        let is_placeholder = guard.arena[current.0].is_placeholder();
        drop(guard);

        if is_placeholder {
            return self.fill_placeholder(current, &mut strategy_cb);
        }
        self.extend_leaf(current, &mut strategy_cb)
    }

    fn fill_placeholder<F>(&self, node: NodeId, strategy_cb: &mut F) -> StepOutcome
    where
        F: FnMut(&Tree, NodeId) -> Option<Task>,
    {
        // Spec §4.1 step 4: the callback is driven off the placeholder's
        // *parent*, not the (task-less) placeholder itself — a placeholder
        // has no cursor of its own to extend from.
        let parent = self
            .parent(node)
            .expect("the root is always a resolved task, never a placeholder");
        let Some(task) = strategy_cb(self, parent) else {
            return if self.path_finalized(parent) {
                StepOutcome::Exhausted { node }
            } else {
                StepOutcome::Retry
            };
        };
        let task = Arc::new(task);
        let mut guard = self.lock();
        guard.arena[node.0].task = Some(Arc::clone(&task));
        StepOutcome::NewTask { node, task }
    }

    fn extend_leaf<F>(&self, leaf: NodeId, strategy_cb: &mut F) -> StepOutcome
    where
        F: FnMut(&Tree, NodeId) -> Option<Task>,
    {
        let Some(new_task) = strategy_cb(self, leaf) else {
            return if self.path_finalized(leaf) {
                StepOutcome::Exhausted { node: leaf }
            } else {
                StepOutcome::Retry
            };
        };
        let new_task = Arc::new(new_task);
        let mut guard = self.lock();
        let leaf_status = guard.arena[leaf.0]
            .task
            .as_ref()
            .map_or(TaskStatus::Pending, |t| t.status());
        let real_branch = branch_index(leaf_status);
        let depth = guard.arena[leaf.0].depth + 1;

        let real_id = NodeId(guard.arena.len());
        guard
            .arena
            .push(Node::with_task(Arc::clone(&new_task), Some(leaf), depth));
        let placeholder_id = NodeId(guard.arena.len());
        guard
            .arena
            .push(Node::placeholder(Some(leaf), depth));

        guard.arena[leaf.0].children[usize::from(real_branch)] = Some(real_id);
        guard.arena[leaf.0].children[usize::from(!real_branch)] = Some(placeholder_id);
        if depth > guard.max_depth {
            guard.max_depth = depth;
        }
        StepOutcome::Extended {
            node: real_id,
            task: new_task,
        }
    }

    /// Whether `node` and every ancestor is `Success` or `Failure`.
    #[must_use]
    pub fn path_finalized(&self, node: NodeId) -> bool {
        let guard = self.lock();
        let mut current = Some(node);
        while let Some(id) = current {
            let n = &guard.arena[id.0];
            let finalized = n.task.as_ref().is_some_and(|t| t.status().is_finalized());
            if !finalized {
                return false;
            }
            current = n.parent;
        }
        true
    }

    /// Walks success-then-failure from `from` while each visited node is
    /// finalized, returning the deepest finalized node reached. When
    /// `success_only` is set, returns the deepest node *with* `Success`
    /// status instead of the literal deepest finalized node. Used for
    /// progress reporting, result extraction, and collapse.
    #[must_use]
    pub fn find_finalized_node(&self, from: NodeId, success_only: bool) -> NodeId {
        let guard = self.lock();
        self.find_finalized_node_locked(&guard, from, success_only)
    }

    fn find_finalized_node_locked(
        &self,
        guard: &Inner,
        from: NodeId,
        success_only: bool,
    ) -> NodeId {
        let mut current = from;
        let mut best = from;
        loop {
            let node = &guard.arena[current.0];
            let Some(task) = node.task.as_ref() else {
                break;
            };
            if !task.status().is_finalized() {
                break;
            }
            if !success_only || task.status() == TaskStatus::Success {
                best = current;
            }
            match node.child(branch_index(task.status())) {
                Some(next) => current = next,
                None => break,
            }
        }
        best
    }

    /// Returns the `Arc<Task>` for a node id. Panics on an out-of-range id;
    /// ids returned by this tree are always valid for its lifetime.
    #[must_use]
    pub fn task(&self, node: NodeId) -> Option<Arc<Task>> {
        self.lock().arena[node.0].task.clone()
    }

    /// Returns `node`'s parent, or `None` for the root.
    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.lock().arena[node.0].parent
    }

    /// Called by the worker immediately after publishing a `Success`
    /// verdict on `node`: collects every task in the subtree built under
    /// the assumption *this node* would fail — its own `[false]` child and
    /// everything grown beneath it. That chain is the speculative work the
    /// tree did past a node predicted to fail; once the node succeeds
    /// instead, the whole chain is mispredicted and moot (the glossary's
    /// "non-actual child of a node"), not the placeholder sitting on
    /// `node`'s *other* side of its own parent.
    #[must_use]
    pub fn abort_mispredicted_subtree(&self, node: NodeId) -> Vec<Arc<Task>> {
        let guard = self.lock();
        let Some(failure_child) = guard.arena[node.0].child(false) else {
            return Vec::new();
        };
        let mut collected = Vec::new();
        collect_subtree_tasks(&guard, failure_child, &mut collected);
        collected
    }

    /// Compresses the finalized prefix once `height()` exceeds
    /// `max_tree_depth`. Returns every task from the detached sibling
    /// subtrees, to be enqueued on the reaper by the caller (the
    /// not-yet-discarded ones among them still need cancelling).
    #[must_use]
    pub fn collapse(&self, max_tree_depth: u32) -> Vec<Arc<Task>> {
        let mut guard = self.lock();
        if guard.max_depth <= max_tree_depth {
            return Vec::new();
        }
        let root = guard.root;
        let best_success = self.find_finalized_node_locked(&guard, root, true);
        let deepest = self.find_finalized_node_locked(&guard, root, false);

        let mut to_reap = Vec::new();
        let mut collapsed_time = Duration::ZERO;
        let mut path = Vec::new();
        let mut current = root;
        loop {
            path.push(current);
            if current == deepest {
                break;
            }
            let node = &guard.arena[current.0];
            let Some(task) = node.task.as_ref() else {
                break;
            };
            let idx = branch_index(task.status());
            let Some(next) = node.child(idx) else {
                break;
            };
            // Retire the sibling not taken by the finalized walk.
            if let Some(sib) = node.child(!idx) {
                collect_subtree_tasks(&guard, sib, &mut to_reap);
                sum_subtree_time(&guard, sib, &mut collapsed_time);
                guard.retired.push(sib);
            }
            current = next;
        }

        // Sum compute time of the path nodes we are about to prune (every
        // node strictly between root/best_success/deepest that is not one
        // of the three kept anchors), then relink.
        for &id in &path {
            if id != root && id != best_success && id != deepest {
                if let Some(task) = guard.arena[id.0].task.as_ref() {
                    if let Some(timer) = task.lock().timer {
                        collapsed_time += timer;
                    }
                }
                guard.retired.push(id);
            }
        }
        guard.collapsed_time += collapsed_time;

        let root_idx = guard.arena[root.0]
            .task
            .as_ref()
            .map_or(false, |t| branch_index(t.status()));
        guard.arena[root.0].children[usize::from(root_idx)] = Some(best_success);
        guard.arena[best_success.0].parent = Some(root);
        guard.arena[best_success.0].depth = 1;

        if best_success != deepest {
            let bs_idx = guard.arena[best_success.0]
                .task
                .as_ref()
                .map_or(false, |t| branch_index(t.status()));
            guard.arena[best_success.0].children[usize::from(bs_idx)] = Some(deepest);
            guard.arena[deepest.0].parent = Some(best_success);
            guard.arena[deepest.0].depth = 2;
        }

        guard.max_depth = guard.arena[deepest.0].depth;
        to_reap
    }

    /// The smallest `Success` task reachable from the root, for final
    /// output extraction.
    #[must_use]
    pub fn best_candidate(&self) -> Arc<Task> {
        let guard = self.lock();
        let root = guard.root;
        let node_id = self.find_finalized_node_locked(&guard, root, true);
        guard.arena[node_id.0]
            .task
            .clone()
            .expect("find_finalized_node(success_only) always returns a task-bearing node")
    }

    /// Total collapsed compute time, added to live elapsed time for
    /// continuous progress reporting.
    #[must_use]
    pub fn collapsed_time(&self) -> Duration {
        self.lock().collapsed_time
    }

    /// Renders the tree as Graphviz `digraph` text (spec §6 optional
    /// visualization). When more than 100 nodes are live, subtrees that are
    /// entirely `Discarded` are pruned from the render only.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let guard = self.lock();
        let mut out = String::from("digraph bisection {\n");
        let prune = guard.arena.len() > 100;
        render_node(&guard, guard.root, prune, &mut out);
        out.push_str("}\n");
        out
    }
}

fn sum_subtree_time(guard: &Inner, root: NodeId, acc: &mut Duration) {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let node = &guard.arena[id.0];
        if let Some(task) = node.task.as_ref() {
            if let Some(timer) = task.lock().timer {
                *acc += timer;
            }
        }
        for child in node.children.into_iter().flatten() {
            stack.push(child);
        }
    }
}

fn collect_subtree_tasks(guard: &Inner, root: NodeId, out: &mut Vec<Arc<Task>>) {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let node = &guard.arena[id.0];
        if let Some(task) = node.task.clone() {
            out.push(task);
        }
        for child in node.children.into_iter().flatten() {
            stack.push(child);
        }
    }
}

fn render_node(guard: &Inner, id: NodeId, prune_discarded: bool, out: &mut String) {
    let node = &guard.arena[id.0];
    let (label, color) = node.task.as_ref().map_or_else(
        || ("placeholder".to_string(), "grey"),
        |t| {
            let size = t.size();
            let color = match t.status() {
                TaskStatus::Failure => "red",
                TaskStatus::Success => "green",
                TaskStatus::Pending => "orange",
                TaskStatus::Discarded => "grey",
            };
            (format!("{size} bytes"), color)
        },
    );
    out.push_str(&format!(
        "  n{} [label=\"{}\", color={}];\n",
        id.0, label, color
    ));
    for (branch, child) in node.children.iter().enumerate() {
        let Some(child_id) = child else { continue };
        if prune_discarded && subtree_all_discarded(guard, *child_id) {
            continue;
        }
        let edge_label = if branch == 1 { "Success" } else { "Failure" };
        out.push_str(&format!(
            "  n{} -> n{} [label=\"{}\"];\n",
            id.0, child_id.0, edge_label
        ));
        render_node(guard, *child_id, prune_discarded, out);
    }
}

fn subtree_all_discarded(guard: &Inner, root: NodeId) -> bool {
    let node = &guard.arena[root.0];
    let self_discarded = node
        .task
        .as_ref()
        .is_some_and(|t| t.status() == TaskStatus::Discarded);
    if !self_discarded {
        return false;
    }
    node.children
        .into_iter()
        .flatten()
        .all(|child| subtree_all_discarded(guard, child))
}
