//! A single node of the lock tree
//!
//! Each node owns two independent synchronization domains:
//! - the operation lock, a reader/writer lock around the node's holder. A
//!   transaction takes it exclusively on its subject and shared on the
//!   subject's ancestors.
//! - the descendant map lock, around the multiset of users locking something
//!   below the node. It is only ever held for one read or one mutation and
//!   never across an `.await`.

use super::multiset::TaggedMultiset;
use super::types::{NodeIndex, UserId};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock as MapLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::RwLock;

/// Users locking a descendant, mapped to the descendants they hold
pub type DescendantLocks = TaggedMultiset<UserId, NodeIndex>;

#[derive(Debug)]
pub struct TreeNode {
    name: String,

    /// Operation lock; the guarded value is the current holder
    holder: RwLock<Option<UserId>>,

    /// Descendant map lock
    descendant_locks: MapLock<DescendantLocks>,
}

impl TreeNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            holder: RwLock::new(None),
            descendant_locks: MapLock::new(DescendantLocks::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operation lock of this node
    pub(crate) fn operation_lock(&self) -> &RwLock<Option<UserId>> {
        &self.holder
    }

    /// Current holder, waiting for any in-flight transaction on this node
    pub async fn holder(&self) -> Option<UserId> {
        *self.holder.read().await
    }

    /// True if some user holds a lock anywhere below this node
    pub fn has_locked_descendants(&self) -> bool {
        !self.descendants().is_empty()
    }

    /// True if `user` is the only user holding locks below this node
    pub fn is_sole_descendant_holder(&self, user: UserId) -> bool {
        self.descendants().sole_tag() == Some(&user)
    }

    /// Descendants locked by `user`, ascending
    pub fn locked_descendants(&self, user: UserId) -> Vec<NodeIndex> {
        let mut indices = self.descendants().lookup(&user);
        indices.sort_unstable();
        indices
    }

    pub(crate) fn add_descendant_lock(&self, user: UserId, index: NodeIndex) {
        self.descendants_mut().add_entry(user, index);
    }

    pub(crate) fn remove_descendant_lock(&self, user: UserId, index: NodeIndex) {
        self.descendants_mut().remove_entry(&user, &index);
    }

    /// Copy of the descendant map with sorted indices
    pub fn descendant_locks(&self) -> BTreeMap<UserId, Vec<NodeIndex>> {
        self.descendants()
            .iter()
            .map(|(user, indices)| {
                let mut indices: Vec<_> = indices.iter().copied().collect();
                indices.sort_unstable();
                (*user, indices)
            })
            .collect()
    }

    // A panic while holding the map lock cannot leave the multiset half
    // updated, so a poisoned lock is still safe to use.
    fn descendants(&self) -> RwLockReadGuard<'_, DescendantLocks> {
        self.descendant_locks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn descendants_mut(&self) -> RwLockWriteGuard<'_, DescendantLocks> {
        self.descendant_locks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_node_is_unlocked() {
        let node = TreeNode::new("root");
        assert_eq!(node.name(), "root");
        assert_eq!(node.holder().await, None);
        assert!(!node.has_locked_descendants());
        assert!(node.descendant_locks().is_empty());
    }

    #[tokio::test]
    async fn test_holder_written_through_operation_lock() {
        let node = TreeNode::new("n1");
        *node.operation_lock().write().await = Some(4);
        assert_eq!(node.holder().await, Some(4));
    }

    #[test]
    fn test_descendant_tracking() {
        let node = TreeNode::new("n1");
        node.add_descendant_lock(1, 4);
        node.add_descendant_lock(1, 3);

        assert!(node.has_locked_descendants());
        assert!(node.is_sole_descendant_holder(1));
        assert!(!node.is_sole_descendant_holder(2));
        assert_eq!(node.locked_descendants(1), vec![3, 4]);

        node.add_descendant_lock(2, 5);
        assert!(!node.is_sole_descendant_holder(1));
        assert_eq!(
            node.descendant_locks(),
            BTreeMap::from([(1, vec![3, 4]), (2, vec![5])])
        );

        node.remove_descendant_lock(2, 5);
        node.remove_descendant_lock(1, 3);
        assert!(node.is_sole_descendant_holder(1));
        assert_eq!(node.locked_descendants(1), vec![4]);
    }

    #[test]
    fn test_sole_holder_requires_some_lock() {
        let node = TreeNode::new("n0");
        assert!(!node.is_sole_descendant_holder(9));
    }
}
