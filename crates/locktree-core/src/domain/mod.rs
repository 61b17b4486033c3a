//! Domain layer
//!
//! Contains the lock tree and its synchronization protocol.

pub mod locking;
