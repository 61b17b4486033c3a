//! Lock tree: the implicit n-ary tree and its three operations
//!
//! The tree is a flat array of [`TreeNode`]s. Node `i > 0` has parent
//! `(i - 1) / B`, so ancestor chains are computed rather than stored and there
//! are no parent or child pointers. The name directory and the node array are
//! immutable after construction and are read without locking.
//!
//! Every operation is one transaction over its subject and the subject's
//! ancestor chain (see [`PathGuard`]). A refused operation leaves every node
//! exactly as it found it.

use super::guard::PathGuard;
use super::node::TreeNode;
use super::types::{
    LockTreeStats, NodeIndex, NodeSnapshot, OperationKind, Outcome, TreeError, TreeResult,
    TreeSnapshot, UserId, parent_index,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Concurrent hierarchical lock manager over a complete n-ary tree
#[derive(Debug)]
pub struct LockTree {
    nodes: Vec<TreeNode>,

    /// Node name -> index
    directory: HashMap<String, NodeIndex>,

    branching_factor: usize,

    counters: Counters,
}

#[derive(Debug, Default)]
struct Counters {
    locks_granted: AtomicU64,
    unlocks_granted: AtomicU64,
    upgrades_granted: AtomicU64,
    denied: AtomicU64,
    unknown_nodes: AtomicU64,
    consolidated: AtomicU64,
    tickets: AtomicU64,
}

impl LockTree {
    /// Build a tree from node names in index order
    ///
    /// # Errors
    /// * [`TreeError::InvalidBranchingFactor`] if `branching_factor` is 0 and
    ///   there is more than one node
    /// * [`TreeError::DuplicateNodeName`] if a name repeats
    pub fn new<I, S>(names: I, branching_factor: usize) -> TreeResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        if branching_factor == 0 && names.len() > 1 {
            return Err(TreeError::InvalidBranchingFactor {
                branching_factor,
                nodes: names.len(),
            });
        }

        let mut directory = HashMap::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            if let Some(first) = directory.insert(name.clone(), index) {
                return Err(TreeError::DuplicateNodeName {
                    name: name.clone(),
                    first,
                    second: index,
                });
            }
        }

        let nodes = names.into_iter().map(TreeNode::new).collect::<Vec<_>>();

        info!(
            nodes = nodes.len(),
            branching_factor, "Lock tree constructed"
        );

        Ok(Self {
            nodes,
            directory,
            branching_factor,
            counters: Counters::default(),
        })
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn branching_factor(&self) -> usize {
        self.branching_factor
    }

    /// Resolve a node name
    pub fn index_of(&self, name: &str) -> Option<NodeIndex> {
        self.directory.get(name).copied()
    }

    pub fn name_of(&self, index: NodeIndex) -> Option<&str> {
        self.nodes.get(index).map(TreeNode::name)
    }

    /// Parent of `index`; `None` for the root
    pub fn parent_of(&self, index: NodeIndex) -> Option<NodeIndex> {
        parent_index(index, self.branching_factor)
    }

    /// Ancestors of `index`, parent first, ending at the root
    pub fn ancestors_of(&self, index: NodeIndex) -> Vec<NodeIndex> {
        std::iter::successors(self.parent_of(index), |&i| self.parent_of(i)).collect()
    }

    /// Current holder of the named node
    pub async fn holder(&self, name: &str) -> Option<UserId> {
        let index = self.index_of(name)?;
        self.nodes[index].holder().await
    }

    /// Lock `name` for `user`
    ///
    /// Succeeds only if the node exists, is unlocked, has no locked ancestor
    /// and no locked descendant.
    pub async fn lock(&self, name: &str, user: UserId) -> bool {
        self.apply(OperationKind::Lock, name, user).await.granted
    }

    /// Unlock `name`, which must currently be held by `user`
    pub async fn unlock(&self, name: &str, user: UserId) -> bool {
        self.apply(OperationKind::Unlock, name, user).await.granted
    }

    /// Replace all of `user`'s locks below `name` with one lock on `name`
    ///
    /// Succeeds only if the node is unlocked and `user` is the one and only
    /// user holding locks in its subtree.
    pub async fn upgrade(&self, name: &str, user: UserId) -> bool {
        self.apply(OperationKind::Upgrade, name, user).await.granted
    }

    /// Run one operation and report where it falls in the tree's history
    pub async fn apply(&self, kind: OperationKind, name: &str, user: UserId) -> Outcome {
        let Some(index) = self.resolve(name, kind, user) else {
            return Outcome::untouched();
        };
        let outcome = match kind {
            OperationKind::Lock => self.lock_index(index, user).await,
            OperationKind::Unlock => self.unlock_index(index, user).await,
            OperationKind::Upgrade => self.upgrade_index(index, user).await,
        };
        self.finish(kind, name, user, outcome);
        outcome
    }

    /// Capture the state of every node
    pub async fn snapshot(&self) -> TreeSnapshot {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            nodes.push(NodeSnapshot {
                index,
                name: node.name().to_string(),
                locked_by: node.holder().await,
                descendant_locks: node.descendant_locks(),
            });
        }
        TreeSnapshot {
            branching_factor: self.branching_factor,
            nodes,
        }
    }

    /// Operation counters since construction
    pub fn stats(&self) -> LockTreeStats {
        let c = &self.counters;
        LockTreeStats {
            locks_granted: c.locks_granted.load(Ordering::Relaxed),
            unlocks_granted: c.unlocks_granted.load(Ordering::Relaxed),
            upgrades_granted: c.upgrades_granted.load(Ordering::Relaxed),
            denied: c.denied.load(Ordering::Relaxed),
            unknown_nodes: c.unknown_nodes.load(Ordering::Relaxed),
            consolidated: c.consolidated.load(Ordering::Relaxed),
        }
    }

    // ========== Transactions ==========

    // Each transaction draws its ticket while it still holds every lock its
    // decision read, and before it releases anything.

    async fn lock_index(&self, index: NodeIndex, user: UserId) -> Outcome {
        let ancestors = self.path_to(index);
        let mut path =
            match PathGuard::acquire_if_ancestors_free(&self.nodes, index, &ancestors).await {
                Ok(path) => path,
                Err(blocker) => {
                    let ticket = self.next_ticket();
                    drop(blocker);
                    return Outcome::new(false, ticket);
                }
            };

        if path.is_locked() || path.node().has_locked_descendants() {
            return Outcome::new(false, self.next_ticket());
        }

        path.set_holder(user);
        let ticket = self.next_ticket();
        path.publish_lock(user);
        Outcome::new(true, ticket)
    }

    async fn unlock_index(&self, index: NodeIndex, user: UserId) -> Outcome {
        let ancestors = self.path_to(index);
        let mut path = PathGuard::acquire(&self.nodes, index, &ancestors).await;

        if path.holder() != Some(user) {
            return Outcome::new(false, self.next_ticket());
        }

        path.clear_holder();
        let ticket = self.next_ticket();
        path.retract_lock(user);
        Outcome::new(true, ticket)
    }

    async fn upgrade_index(&self, index: NodeIndex, user: UserId) -> Outcome {
        let ancestors = self.path_to(index);
        let mut path = PathGuard::acquire(&self.nodes, index, &ancestors).await;

        if path.is_locked() || !path.node().is_sole_descendant_holder(user) {
            return Outcome::new(false, self.next_ticket());
        }
        debug_assert!(!path.any_ancestor_locked());

        path.set_holder(user);
        path.record_lock(user);
        let ticket = self.next_ticket();

        // Ancestors stay held until every descendant is released, so nothing
        // can reach this subtree in the meantime.
        let released = path.node().locked_descendants(user);
        for &descendant in &released {
            let mut claimed = path.claim_descendant(&self.nodes, descendant).await;
            let previous = claimed.clear();
            debug_assert_eq!(previous, Some(user));
            for ancestor in self.ancestors_of(claimed.index()) {
                self.nodes[ancestor].remove_descendant_lock(user, descendant);
            }
        }

        self.counters
            .consolidated
            .fetch_add(released.len() as u64, Ordering::Relaxed);
        debug!(
            node = path.node().name(),
            user,
            released = released.len(),
            "Descendant locks consolidated"
        );
        Outcome::new(true, ticket)
    }

    // ========== Internal Methods ==========

    /// Ancestors of `index`, root first
    fn path_to(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut ancestors = self.ancestors_of(index);
        ancestors.reverse();
        ancestors
    }

    fn resolve(&self, name: &str, kind: OperationKind, user: UserId) -> Option<NodeIndex> {
        let index = self.index_of(name);
        if index.is_none() {
            self.counters.unknown_nodes.fetch_add(1, Ordering::Relaxed);
            debug!(operation = %kind, node = name, user, "Unknown node");
        }
        index
    }

    fn next_ticket(&self) -> u64 {
        self.counters.tickets.fetch_add(1, Ordering::Relaxed)
    }

    fn finish(&self, kind: OperationKind, name: &str, user: UserId, outcome: Outcome) {
        let Outcome { granted, ticket } = outcome;
        let counter = match (kind, granted) {
            (_, false) => &self.counters.denied,
            (OperationKind::Lock, true) => &self.counters.locks_granted,
            (OperationKind::Unlock, true) => &self.counters.unlocks_granted,
            (OperationKind::Upgrade, true) => &self.counters.upgrades_granted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(operation = %kind, node = name, user, granted, ?ticket, "Operation finished");
    }
}
