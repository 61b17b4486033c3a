//! Locktree Core Library
//!
//! This crate provides the core functionality for Locktree, including:
//! - Hierarchical locking over an implicit n-ary tree
//! - Sequential and concurrent request processing
//! - Batch input parsing and result verification
//! - Configuration persistence

pub mod batch;
pub mod config;
pub mod domain;
pub mod error;
pub mod processor;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::batch::BatchInput;
    pub use crate::config::Config;
    pub use crate::domain::locking::{LockService, LockTree, OperationKind, UserId};
    pub use crate::error::{Error, Result};
    pub use crate::processor::{Operation, ProcessingMode, Request, Response};
}
