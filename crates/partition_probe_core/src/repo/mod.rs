//! Data access facade over the partitioned `platform_users` table.
//!
//! # Responsibility
//! - Define the four partition-scoped operations as a storage contract.
//! - Provide the replica-set session that implements the contract locally.
//!
//! # Invariants
//! - Store failures are reported, never retried inside the facade.
//! - Listing surfaces a mid-read failure instead of returning partial rows as
//!   a complete result.

pub mod session;
pub mod store;
