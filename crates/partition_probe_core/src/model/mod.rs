//! Domain model for partition-scoped probe data.
//!
//! # Responsibility
//! - Define the row shape stored under one organization partition.
//! - Define the replica acknowledgment policy shared by reads and writes.
//!
//! # Invariants
//! - `clustering_key` is unique within one `partition_key`.
//! - Consistency levels resolve to a replica count against a concrete node set.

pub mod consistency;
pub mod row;
