//! Operation-lock guards for a single transaction
//!
//! A [`PathGuard`] holds the operation locks a transaction needs: shared
//! locks on every ancestor of the subject and an exclusive lock on the
//! subject itself. Locks are acquired root first, so every transaction takes
//! operation locks in strictly ascending node index order. Dropping the guard
//! releases whatever is still held.

use super::node::TreeNode;
use super::types::{NodeIndex, UserId};
use std::fmt;
use tokio::sync::{RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

/// Shared hold on one ancestor of the subject
pub(crate) struct AncestorGuard<'a> {
    index: NodeIndex,
    node: &'a TreeNode,
    holder: RwLockReadGuard<'a, Option<UserId>>,
}

impl AncestorGuard<'_> {
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn is_locked(&self) -> bool {
        self.holder.is_some()
    }
}

/// Exclusive hold on a node whose lock is being cleared by an upgrade
pub(crate) struct ReleaseGuard<'a> {
    index: NodeIndex,
    holder: RwLockWriteGuard<'a, Option<UserId>>,
}

impl ReleaseGuard<'_> {
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// Clear the holder, returning who held it
    pub fn clear(&mut self) -> Option<UserId> {
        self.holder.take()
    }
}

/// Shared holds on the ancestor chain plus an exclusive hold on the subject
pub(crate) struct PathGuard<'a> {
    index: NodeIndex,
    node: &'a TreeNode,
    holder: RwLockWriteGuard<'a, Option<UserId>>,

    /// Ordered root first
    ancestors: Vec<AncestorGuard<'a>>,
}

impl<'a> PathGuard<'a> {
    /// Acquire the full path for `index`
    ///
    /// `ancestors` must be ordered root first.
    pub async fn acquire(
        nodes: &'a [TreeNode],
        index: NodeIndex,
        ancestors: &[NodeIndex],
    ) -> PathGuard<'a> {
        let mut held = Vec::with_capacity(ancestors.len());
        for &ancestor in ancestors {
            held.push(Self::share(nodes, ancestor).await);
        }
        Self::finish(nodes, index, held).await
    }

    /// Acquire the path for `index`, giving up at the first locked ancestor
    ///
    /// On failure only the locked ancestor stays held, in the returned error.
    pub async fn acquire_if_ancestors_free(
        nodes: &'a [TreeNode],
        index: NodeIndex,
        ancestors: &[NodeIndex],
    ) -> Result<PathGuard<'a>, AncestorGuard<'a>> {
        let mut held = Vec::with_capacity(ancestors.len());
        for &ancestor in ancestors {
            let guard = Self::share(nodes, ancestor).await;
            if guard.is_locked() {
                trace!(node = index, ancestor, "ancestor is locked");
                return Err(guard);
            }
            held.push(guard);
        }
        Ok(Self::finish(nodes, index, held).await)
    }

    async fn share(nodes: &'a [TreeNode], index: NodeIndex) -> AncestorGuard<'a> {
        let node = &nodes[index];
        let holder = node.operation_lock().read().await;
        AncestorGuard {
            index,
            node,
            holder,
        }
    }

    async fn finish(
        nodes: &'a [TreeNode],
        index: NodeIndex,
        ancestors: Vec<AncestorGuard<'a>>,
    ) -> PathGuard<'a> {
        let node = &nodes[index];
        let holder = node.operation_lock().write().await;
        trace!(node = index, ancestors = ancestors.len(), "path acquired");
        PathGuard {
            index,
            node,
            holder,
            ancestors,
        }
    }

    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// The subject node
    pub fn node(&self) -> &'a TreeNode {
        self.node
    }

    pub fn holder(&self) -> Option<UserId> {
        *self.holder
    }

    pub fn is_locked(&self) -> bool {
        self.holder.is_some()
    }

    pub fn any_ancestor_locked(&self) -> bool {
        self.ancestors.iter().any(AncestorGuard::is_locked)
    }

    pub fn set_holder(&mut self, user: UserId) {
        *self.holder = Some(user);
    }

    pub fn clear_holder(&mut self) -> Option<UserId> {
        self.holder.take()
    }

    /// Record the subject as locked by `user` in every ancestor, releasing
    /// each ancestor right after its entry is in place
    pub fn publish_lock(&mut self, user: UserId) {
        let index = self.index;
        for ancestor in self.ancestors.drain(..).rev() {
            ancestor.node.add_descendant_lock(user, index);
            trace!(node = index, ancestor = ancestor.index, "ancestor released");
        }
    }

    /// Remove the subject's entry for `user` from every ancestor, releasing
    /// each ancestor right after its entry is gone
    pub fn retract_lock(&mut self, user: UserId) {
        let index = self.index;
        for ancestor in self.ancestors.drain(..).rev() {
            ancestor.node.remove_descendant_lock(user, index);
            trace!(node = index, ancestor = ancestor.index, "ancestor released");
        }
    }

    /// Record the subject as locked by `user` in every ancestor while keeping
    /// the ancestors held
    pub fn record_lock(&self, user: UserId) {
        for ancestor in &self.ancestors {
            ancestor.node.add_descendant_lock(user, self.index);
        }
    }

    /// Take an exclusive hold on a descendant of the subject
    ///
    /// Descendants have larger indices than the subject, so taking them in
    /// ascending order keeps the global acquisition order intact.
    pub async fn claim_descendant(
        &self,
        nodes: &'a [TreeNode],
        index: NodeIndex,
    ) -> ReleaseGuard<'a> {
        debug_assert!(index > self.index);
        let holder = nodes[index].operation_lock().write().await;
        ReleaseGuard { index, holder }
    }
}

impl fmt::Display for PathGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path[")?;
        for ancestor in &self.ancestors {
            write!(f, "{} > ", ancestor.index)?;
        }
        write!(f, "{}]", self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(count: usize) -> Vec<TreeNode> {
        (0..count).map(|i| TreeNode::new(format!("n{}", i))).collect()
    }

    #[tokio::test]
    async fn test_path_guard_holds_locks() {
        let nodes = nodes(5);
        let path = PathGuard::acquire(&nodes, 3, &[0, 1]).await;

        assert_eq!(path.index(), 3);
        assert_eq!(path.node().name(), "n3");
        assert_eq!(path.to_string(), "Path[0 > 1 > 3]");

        // ancestors are shared, the subject is exclusive
        assert!(nodes[0].operation_lock().try_read().is_ok());
        assert!(nodes[1].operation_lock().try_write().is_err());
        assert!(nodes[3].operation_lock().try_read().is_err());
        // unrelated nodes are untouched
        assert!(nodes[2].operation_lock().try_write().is_ok());

        drop(path);
        assert!(nodes[3].operation_lock().try_write().is_ok());
        assert!(nodes[1].operation_lock().try_write().is_ok());
    }

    #[tokio::test]
    async fn test_publish_and_retract_release_ancestors() {
        let nodes = nodes(5);
        let mut path = PathGuard::acquire(&nodes, 4, &[0, 1]).await;
        path.set_holder(8);
        path.publish_lock(8);

        assert!(nodes[1].operation_lock().try_write().is_ok());
        assert_eq!(nodes[0].locked_descendants(8), vec![4]);
        assert_eq!(nodes[1].locked_descendants(8), vec![4]);
        assert!(nodes[4].operation_lock().try_read().is_err());
        drop(path);
        assert_eq!(nodes[4].holder().await, Some(8));

        let mut path = PathGuard::acquire(&nodes, 4, &[0, 1]).await;
        assert_eq!(path.clear_holder(), Some(8));
        path.retract_lock(8);
        drop(path);

        assert!(!nodes[0].has_locked_descendants());
        assert!(!nodes[1].has_locked_descendants());
        assert_eq!(nodes[4].holder().await, None);
    }

    #[tokio::test]
    async fn test_acquire_stops_at_locked_ancestor() {
        let nodes = nodes(5);
        *nodes[1].operation_lock().write().await = Some(2);

        let blocker = PathGuard::acquire_if_ancestors_free(&nodes, 3, &[0, 1])
            .await
            .err()
            .expect("n1 is locked");
        assert_eq!(blocker.index(), 1);
        assert!(blocker.is_locked());
        assert!(nodes[0].operation_lock().try_write().is_ok());
        assert!(nodes[1].operation_lock().try_write().is_err());
        assert!(nodes[3].operation_lock().try_write().is_ok());
        drop(blocker);
        assert!(nodes[1].operation_lock().try_write().is_ok());

        let path = PathGuard::acquire(&nodes, 3, &[0, 1]).await;
        assert!(path.any_ancestor_locked());
    }

    #[tokio::test]
    async fn test_claim_descendant() {
        let nodes = nodes(5);
        *nodes[3].operation_lock().write().await = Some(6);

        let path = PathGuard::acquire(&nodes, 1, &[0]).await;
        path.record_lock(6);
        let mut claimed = path.claim_descendant(&nodes, 3).await;
        assert_eq!(claimed.index(), 3);
        assert_eq!(claimed.clear(), Some(6));
        drop(claimed);
        drop(path);

        assert_eq!(nodes[3].holder().await, None);
        assert_eq!(nodes[0].locked_descendants(6), vec![1]);
    }
}
