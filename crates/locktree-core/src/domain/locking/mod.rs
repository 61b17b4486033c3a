//! Hierarchical locking over an n-ary tree
//!
//! This module provides exclusive per-node locks whose grant depends on the
//! lock state of the node's ancestors and descendants, with fine-grained
//! synchronization so that requests on disjoint subtrees run in parallel.
//!
//! # Architecture
//!
//! - **Tagged Multiset**: `TaggedMultiset`, per-node record of which users
//!   lock which descendants
//! - **Tree Node**: `TreeNode`, holder plus descendant map, each behind its
//!   own lock
//! - **Lock Tree**: `LockTree`, index arithmetic, name directory, and the
//!   `lock` / `unlock` / `upgrade` transactions
//! - **Guards**: `PathGuard`, RAII hold on a transaction's ancestor chain
//!
//! # Rules
//!
//! - A node can be locked only if it, its ancestors and its descendants are
//!   all unlocked
//! - Only the holder can unlock a node
//! - Upgrading a node swaps all of one user's locks below it for a single
//!   lock on it, provided no other user holds anything there
//!
//! # Example
//!
//! ```ignore
//! use locktree_core::domain::locking::LockTree;
//!
//! let tree = LockTree::new(["world", "asia", "africa", "china", "india"], 2)?;
//!
//! assert!(tree.lock("china", 1).await);
//! assert!(tree.lock("india", 1).await);
//! assert!(tree.upgrade("asia", 1).await);
//! ```

pub(crate) mod guard;
pub mod multiset;
pub mod node;
pub mod service;
pub mod tree;
pub mod types;

// Re-export main types
pub use multiset::TaggedMultiset;
pub use node::TreeNode;
pub use service::LockService;
pub use tree::LockTree;
pub use types::{
    LockTreeStats, NodeIndex, NodeSnapshot, OperationKind, Outcome, TreeError, TreeResult,
    TreeSnapshot, UserId,
};
