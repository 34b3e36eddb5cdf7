//! Partition-scoped mutation verification for quorum-consistency stores.
//!
//! The facade (`repo`) exposes insert, delete-by-partition, count and list over
//! one partitioned table; the harness (`harness`) seeds a fresh partition,
//! deletes it once and classifies what a follow-up read observes.

pub mod config;
pub mod db;
pub mod harness;
pub mod logging;
pub mod model;
pub mod platform;
pub mod repo;

pub use config::{ConfigError, ProbeConfig};
pub use harness::partition_key::PartitionKeyGenerator;
pub use harness::report::{Classification, ScenarioFailure, ScenarioReport, ScenarioStage};
pub use harness::scenario::{run_scenario, run_scenario_with_config, ScenarioOptions};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::consistency::ConsistencyLevel;
pub use model::row::{NewRow, Row};
pub use platform::PlatformInfo;
pub use repo::session::{NodeStatus, Session};
pub use repo::store::{
    ConnectionError, Listing, ListingStatus, PartitionStore, RowCursor, StoreError, StoreFailure,
    StoreResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
