//! Error types for Locktree
//!
//! Refused lock operations are not errors; they return `false`. These are the
//! faults around the tree: malformed input, bad configuration, I/O.

use crate::domain::locking::TreeError;
use thiserror::Error;

/// Result type alias using Locktree's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Locktree error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Input errors (E100-E199)
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    // Verification errors (E200-E299)
    #[error("Result mismatch at request {index}: expected {expected}, got {actual}")]
    ResultMismatch {
        index: usize,
        expected: bool,
        actual: bool,
    },

    #[error("Result count mismatch: expected {expected} results, got {actual}")]
    ResultCountMismatch { expected: usize, actual: usize },

    // Tree errors (E300-E399)
    #[error("Invalid tree: {0}")]
    Tree(#[from] TreeError),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a parse error for a 1-based line number
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "E100",
            Self::ResultMismatch { .. } => "E200",
            Self::ResultCountMismatch { .. } => "E201",
            Self::Tree(err) => err.code(),
            Self::ConfigError(_) => "E600",
            Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Parse { .. } => Some(
                "Input must be: node count, branching factor, request count, node names, then `<op> <node> <user>` lines"
                    .to_string(),
            ),
            Self::Tree(TreeError::DuplicateNodeName { name, .. }) => {
                Some(format!("Rename one of the nodes called '{}'", name))
            }
            Self::Tree(TreeError::InvalidBranchingFactor { .. }) => {
                Some("Use a branching factor of at least 1".to_string())
            }
            Self::ConfigError(_) => Some("locktree config list".to_string()),
            _ => None,
        }
    }
}
