//! Row model for the `platform_users` table.
//!
//! # Responsibility
//! - Carry one user record belonging to one organization partition.
//! - Describe the write intent passed to the facade before persistence.
//!
//! # Invariants
//! - `partition_key` and `clustering_key` are non-empty.
//! - `created_at` is stamped by the store, never by the writer.

use serde::{Deserialize, Serialize};

/// One persisted user record, as observed by a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Organization identifier; groups rows for partition-scoped mutations.
    pub partition_key: String,
    /// User identifier, unique within `partition_key`.
    pub clustering_key: String,
    /// Opaque serialized attributes.
    pub payload: String,
    /// Writer-supplied intent marker. Not validated by the store.
    pub version: i32,
    /// Unix epoch milliseconds, stamped by the node at write time.
    pub created_at: i64,
    /// Coordinator write timestamp in microseconds; newest write wins on merge.
    pub write_ts: i64,
}

/// Input for a single row insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRow {
    pub partition_key: String,
    pub clustering_key: String,
    pub payload: String,
    pub version: i32,
}

impl NewRow {
    pub fn new(
        partition_key: impl Into<String>,
        clustering_key: impl Into<String>,
        payload: impl Into<String>,
        version: i32,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            clustering_key: clustering_key.into(),
            payload: payload.into(),
            version,
        }
    }
}
