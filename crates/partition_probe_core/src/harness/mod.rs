//! Partition-scoped mutation verification harness.
//!
//! # Responsibility
//! - Run the seed, verify, mutate, re-verify scenario against a store.
//! - Classify the outcome and build a diagnostic report.
//!
//! # Invariants
//! - Steps run strictly in order; any step failure halts the scenario.
//! - The delete under test is issued exactly once, never retried.
//! - The store handle is released on every exit path.

pub mod partition_key;
pub mod report;
pub mod scenario;
