//! Scenario classification and diagnostic report.
//!
//! # Invariants
//! - `AnomalyDetected` requires an acknowledged delete followed by a non-zero
//!   count; every other unexpected outcome is `Failed`.
//! - Exit codes: 0 consistent, 1 anomaly, 2 failed.

use crate::model::row::Row;
use crate::platform::PlatformInfo;
use crate::repo::store::{ConnectionError, StoreError};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// Non-terminal scenario stages; the terminal state is the `Classification`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStage {
    Init,
    Seed,
    VerifySeed,
    Mutate,
    VerifyMutation,
}

impl ScenarioStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Seed => "seed",
            Self::VerifySeed => "verify_seed",
            Self::Mutate => "mutate",
            Self::VerifyMutation => "verify_mutation",
        }
    }
}

impl Display for ScenarioStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a scenario ended as `Failed`: the tool or setup broke, not the
/// behavior under test.
#[derive(Debug)]
pub enum ScenarioFailure {
    /// No session could be established; nothing was written.
    Connection(ConnectionError),
    /// A seed write or seed read-back failed.
    Setup { operation: String, err: StoreError },
    /// Seeding reported success but the partition does not hold the seed.
    SetupInvariantViolation {
        expected: usize,
        counted: u64,
        listed: usize,
        distinct_keys: usize,
    },
    /// The delete under test returned an error.
    Mutation(StoreError),
    /// The post-delete count failed; the outcome is inconclusive.
    Verification(StoreError),
}

impl ScenarioFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::Setup { .. } => "setup_error",
            Self::SetupInvariantViolation { .. } => "setup_invariant_violation",
            Self::Mutation(_) => "mutation_error",
            Self::Verification(_) => "verification_error",
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Connection(err) => err.is_timeout(),
            Self::Setup { err, .. } | Self::Mutation(err) | Self::Verification(err) => {
                err.is_timeout()
            }
            Self::SetupInvariantViolation { .. } => false,
        }
    }
}

impl Display for ScenarioFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(err) => write!(f, "{err}"),
            Self::Setup { operation, err } => write!(f, "{operation}: {err}"),
            Self::SetupInvariantViolation {
                expected,
                counted,
                listed,
                distinct_keys,
            } => write!(
                f,
                "expected {expected} seeded rows, counted {counted}, listed {listed} ({distinct_keys} distinct keys)"
            ),
            Self::Mutation(err) => write!(f, "{err}"),
            Self::Verification(err) => write!(f, "{err}"),
        }
    }
}

impl Serialize for ScenarioFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ScenarioFailure", 3)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.serialize_field("timed_out", &self.is_timeout())?;
        state.end()
    }
}

/// Scenario outcome.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Classification {
    Consistent,
    /// The delete was acknowledged yet rows remain visible.
    AnomalyDetected { surviving: u64 },
    Failed { reason: ScenarioFailure },
}

impl Classification {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Consistent => 0,
            Self::AnomalyDetected { .. } => 1,
            Self::Failed { .. } => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Consistent => "CONSISTENT",
            Self::AnomalyDetected { .. } => "ANOMALY DETECTED",
            Self::Failed { .. } => "FAILED",
        }
    }
}

/// Everything observed by one scenario run.
#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub platform: PlatformInfo,
    pub partition_key: String,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
    /// Last stage entered before the scenario became terminal.
    pub stage_reached: ScenarioStage,
    pub classification: Classification,
    pub seeded_rows: usize,
    pub count_after_seed: Option<u64>,
    pub count_after_mutation: Option<u64>,
    /// Rows still visible after the delete; filled only on anomaly.
    pub surviving_rows: Vec<Row>,
    /// Set when listing the survivors failed; classification is unaffected.
    pub survivor_listing_error: Option<String>,
}

impl ScenarioReport {
    pub fn exit_code(&self) -> i32 {
        self.classification.exit_code()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Display for ScenarioReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "classification: {}", self.classification.label())?;
        match &self.classification {
            Classification::Consistent => {
                writeln!(f, "delete by partition key removed all rows")?
            }
            Classification::AnomalyDetected { surviving } => writeln!(
                f,
                "delete by partition key was acknowledged but {surviving} rows remain"
            )?,
            Classification::Failed { reason } => writeln!(
                f,
                "reason: {} ({}){}",
                reason.kind(),
                reason,
                if reason.is_timeout() {
                    " [timeout: inconclusive]"
                } else {
                    ""
                }
            )?,
        }
        writeln!(f, "platform: {}", self.platform)?;
        writeln!(f, "partition_key: {}", self.partition_key)?;
        writeln!(f, "stage_reached: {}", self.stage_reached)?;
        writeln!(
            f,
            "started_at_ms: {} finished_at_ms: {}",
            self.started_at_ms, self.finished_at_ms
        )?;
        if let Some(count) = self.count_after_seed {
            writeln!(f, "count_after_seed: {count} (seeded {})", self.seeded_rows)?;
        }
        if let Some(count) = self.count_after_mutation {
            writeln!(f, "count_after_mutation: {count}")?;
        }
        for row in &self.surviving_rows {
            writeln!(
                f,
                "surviving: user_id={} version={} user_data={}",
                row.clustering_key, row.version, row.payload
            )?;
        }
        if let Some(err) = &self.survivor_listing_error {
            writeln!(f, "surviving rows unavailable: {err}")?;
        }
        Ok(())
    }
}
