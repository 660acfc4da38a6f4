//! Core types for the ramutex distributed mutual-exclusion system.
//!
//! This crate defines the data shared by the wire layer and the kernel:
//! participant identities, the protocol messages and their text codec, and
//! the cluster configuration. It contains no protocol logic.

pub mod config;
pub mod error;
pub mod message;

/// Identifier of one participant.
///
/// Unique and immutable for the lifetime of a cluster; it also breaks ties
/// between requests that carry the same logical timestamp (lower id wins).
pub type NodeId = u32;
