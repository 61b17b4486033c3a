//! Lock tree types and error definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Identifier of the user requesting or holding a lock
pub type UserId = i64;

/// Dense address of a node, assigned by input order (root is 0)
pub type NodeIndex = usize;

/// Result type for tree construction
pub type TreeResult<T> = std::result::Result<T, TreeError>;

/// Construction-time errors
///
/// Lock, unlock and upgrade never produce these: a refused operation is an
/// ordinary `false`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// More than one node but no room for children
    #[error("Invalid branching factor {branching_factor} for a tree of {nodes} nodes")]
    InvalidBranchingFactor {
        branching_factor: usize,
        nodes: usize,
    },

    /// The same name was given to two nodes
    #[error("Duplicate node name '{name}' at indices {first} and {second}")]
    DuplicateNodeName {
        name: String,
        first: NodeIndex,
        second: NodeIndex,
    },
}

impl TreeError {
    /// Get error code for this tree error
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidBranchingFactor { .. } => "E300",
            Self::DuplicateNodeName { .. } => "E301",
        }
    }
}

/// Kind of tree operation, used for logging and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Lock,
    Unlock,
    Upgrade,
}

impl OperationKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Upgrade => "upgrade",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one operation together with its position in the tree's history
///
/// Tickets are drawn while the operation still holds every lock its decision
/// depended on, so replaying operations in ticket order on a fresh tree
/// reproduces every `granted` value. Requests naming an unknown node or an
/// unrecognized operation never touch the tree and carry no ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub granted: bool,
    pub ticket: Option<u64>,
}

impl Outcome {
    pub(crate) fn new(granted: bool, ticket: u64) -> Self {
        Self {
            granted,
            ticket: Some(ticket),
        }
    }

    /// Refusal that never reached any node, so it has no place in the history
    pub fn untouched() -> Self {
        Self {
            granted: false,
            ticket: None,
        }
    }
}

/// Counters of operation outcomes since the tree was built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockTreeStats {
    /// Successful lock operations
    pub locks_granted: u64,
    /// Successful unlock operations
    pub unlocks_granted: u64,
    /// Successful upgrade operations
    pub upgrades_granted: u64,
    /// Operations refused on a known node
    pub denied: u64,
    /// Operations naming a node that does not exist
    pub unknown_nodes: u64,
    /// Descendant locks released by upgrades
    pub consolidated: u64,
}

impl LockTreeStats {
    /// Total number of operations that returned `true`
    pub fn granted(&self) -> u64 {
        self.locks_granted + self.unlocks_granted + self.upgrades_granted
    }

    /// Total number of operations that returned `false`
    pub fn refused(&self) -> u64 {
        self.denied + self.unknown_nodes
    }
}

/// Point-in-time view of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub index: NodeIndex,
    pub name: String,
    /// Current holder, if the node is locked
    pub locked_by: Option<UserId>,
    /// Users locking something strictly below this node, with the sorted
    /// indices they hold
    pub descendant_locks: BTreeMap<UserId, Vec<NodeIndex>>,
}

/// Point-in-time view of the whole tree
///
/// Captured node by node; it is only guaranteed consistent when no operation
/// is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub branching_factor: usize,
    pub nodes: Vec<NodeSnapshot>,
}

impl TreeSnapshot {
    /// Indices of every locked node with its holder, ascending
    pub fn locked(&self) -> Vec<(NodeIndex, UserId)> {
        self.nodes
            .iter()
            .filter_map(|n| n.locked_by.map(|user| (n.index, user)))
            .collect()
    }

    /// Holder of the node at `index`
    pub fn holder(&self, index: NodeIndex) -> Option<UserId> {
        self.nodes.get(index).and_then(|n| n.locked_by)
    }

    /// Check the hierarchical invariants and describe every violation found
    ///
    /// An empty result means: no locked node has a locked ancestor, and each
    /// node's descendant map lists exactly the locked nodes of its subtree.
    pub fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let mut expected: Vec<BTreeMap<UserId, Vec<NodeIndex>>> =
            vec![BTreeMap::new(); self.nodes.len()];

        for (index, user) in self.locked() {
            for ancestor in self.ancestors(index) {
                if let Some(holder) = self.holder(ancestor) {
                    violations.push(format!(
                        "node {} locked by {} under node {} locked by {}",
                        index, user, ancestor, holder
                    ));
                }
                expected[ancestor].entry(user).or_default().push(index);
            }
        }

        for (node, wanted) in self.nodes.iter().zip(expected) {
            if node.descendant_locks != wanted {
                violations.push(format!(
                    "node {} tracks {:?} but its subtree holds {:?}",
                    node.index, node.descendant_locks, wanted
                ));
            }
        }

        violations
    }

    fn ancestors(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        std::iter::successors(parent_index(index, self.branching_factor), |&i| {
            parent_index(i, self.branching_factor)
        })
    }
}

/// Parent of `index` in a complete tree with the given branching factor
pub(crate) fn parent_index(index: NodeIndex, branching_factor: usize) -> Option<NodeIndex> {
    if index == 0 || branching_factor == 0 {
        None
    } else {
        Some((index - 1) / branching_factor)
    }
}
