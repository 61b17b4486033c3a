//! Lock service trait
//!
//! The request processor only needs the three operations; depending on this
//! trait instead of [`LockTree`] keeps it usable with any implementation.

use super::tree::LockTree;
use super::types::{OperationKind, Outcome, UserId};
use async_trait::async_trait;

/// The three hierarchical lock operations
#[async_trait]
pub trait LockService: Send + Sync {
    /// Run one operation, reporting its result and history ticket
    async fn apply(&self, kind: OperationKind, node: &str, user: UserId) -> Outcome;

    /// Lock a node for a user
    async fn lock(&self, node: &str, user: UserId) -> bool {
        self.apply(OperationKind::Lock, node, user).await.granted
    }

    /// Unlock a node held by a user
    async fn unlock(&self, node: &str, user: UserId) -> bool {
        self.apply(OperationKind::Unlock, node, user).await.granted
    }

    /// Consolidate a user's descendant locks into one lock on the node
    async fn upgrade(&self, node: &str, user: UserId) -> bool {
        self.apply(OperationKind::Upgrade, node, user).await.granted
    }
}

#[async_trait]
impl LockService for LockTree {
    async fn apply(&self, kind: OperationKind, node: &str, user: UserId) -> Outcome {
        LockTree::apply(self, kind, node, user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tree_behind_trait_object() {
        let service: Arc<dyn LockService> =
            Arc::new(LockTree::new(["root", "left", "right"], 2).unwrap());

        assert!(service.lock("left", 1).await);
        assert!(!service.lock("root", 2).await);
        assert!(service.upgrade("root", 1).await);
        assert!(!service.unlock("left", 1).await);
        assert!(service.unlock("root", 1).await);

        let outcome = service.apply(OperationKind::Lock, "right", 4).await;
        assert!(outcome.granted);
        assert_eq!(outcome.ticket, Some(5));
    }
}
