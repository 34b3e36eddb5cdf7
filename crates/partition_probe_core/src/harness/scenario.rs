//! Seed, delete and re-observe scenario runner.
//!
//! # Responsibility
//! - Drive the scenario state machine against any `PartitionStore`.
//! - Keep setup failures apart from failures of the operation under test.
//!
//! # Invariants
//! - The connection closure is invoked once; its store is dropped before the
//!   report is returned, on every path.
//! - `deleteByPartitionKey` is called at most once per run.

use crate::config::ProbeConfig;
use crate::harness::partition_key::{PartitionKeyGenerator, DEFAULT_KEY_PREFIX};
use crate::harness::report::{Classification, ScenarioFailure, ScenarioReport, ScenarioStage};
use crate::model::row::{NewRow, Row};
use crate::platform::PlatformInfo;
use crate::repo::session::Session;
use crate::repo::store::{ConnectionError, ListingStatus, PartitionStore};
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

const SEED_ROW_VERSION: i32 = 1;

/// Scenario parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOptions {
    /// Rows seeded before the delete; must be at least 1.
    pub seed_rows: usize,
    pub key_prefix: String,
    /// Fixed partition key; generated from `key_prefix` when unset.
    pub partition_key: Option<String>,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            seed_rows: 3,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            partition_key: None,
        }
    }
}

/// Seed rows `user-1..user-N` for a partition.
pub fn seed_rows_for(partition_key: &str, count: usize) -> Vec<NewRow> {
    (1..=count)
        .map(|index| {
            NewRow::new(
                partition_key,
                format!("user-{index}"),
                format!(r#"{{"name":"User{index}"}}"#),
                SEED_ROW_VERSION,
            )
        })
        .collect()
}

/// Runs one scenario against the local replica-set backend.
pub fn run_scenario_with_config(config: ProbeConfig, options: &ScenarioOptions) -> ScenarioReport {
    run_scenario(move || Session::connect(config), options)
}

/// Runs one scenario against the store produced by `connect`.
///
/// Never panics and never returns early without a report; the classification
/// tells whether the tool, the setup or the store under test misbehaved.
pub fn run_scenario<S, C>(connect: C, options: &ScenarioOptions) -> ScenarioReport
where
    S: PartitionStore,
    C: FnOnce() -> Result<S, ConnectionError>,
{
    let started_at_ms = now_epoch_ms();
    let partition_key = options.partition_key.clone().unwrap_or_else(|| {
        PartitionKeyGenerator::new(options.key_prefix.as_str()).generate()
    });
    let platform = PlatformInfo::current();
    let mut run = ScenarioRun::new(partition_key, options.seed_rows.max(1));

    info!(
        "event=scenario_start module=harness status=start platform={} partition_key={} seed_rows={}",
        platform, run.partition_key, run.seed_rows
    );

    run.enter(ScenarioStage::Init);
    let classification = match connect() {
        Ok(store) => {
            let classification = run.drive(&store);
            drop(store);
            info!(
                "event=scenario_release module=harness status=ok partition_key={}",
                run.partition_key
            );
            classification
        }
        Err(err) => {
            error!(
                "event=scenario_connect module=harness status=error partition_key={} error={}",
                run.partition_key, err
            );
            Classification::Failed {
                reason: ScenarioFailure::Connection(err),
            }
        }
    };

    match &classification {
        Classification::Consistent => info!(
            "event=scenario_end module=harness status=ok outcome=consistent partition_key={}",
            run.partition_key
        ),
        Classification::AnomalyDetected { surviving } => warn!(
            "event=scenario_end module=harness status=anomaly outcome=anomaly_detected partition_key={} platform={} surviving={}",
            run.partition_key, platform, surviving
        ),
        Classification::Failed { reason } => error!(
            "event=scenario_end module=harness status=error outcome=failed partition_key={} stage={} reason={} timed_out={}",
            run.partition_key,
            run.stage,
            reason.kind(),
            reason.is_timeout()
        ),
    }

    ScenarioReport {
        platform,
        partition_key: run.partition_key,
        started_at_ms,
        finished_at_ms: now_epoch_ms(),
        stage_reached: run.stage,
        classification,
        seeded_rows: run.seeded,
        count_after_seed: run.count_after_seed,
        count_after_mutation: run.count_after_mutation,
        surviving_rows: run.surviving_rows,
        survivor_listing_error: run.survivor_listing_error,
    }
}

/// Mutable observations collected while the scenario advances.
struct ScenarioRun {
    partition_key: String,
    seed_rows: usize,
    stage: ScenarioStage,
    seeded: usize,
    count_after_seed: Option<u64>,
    count_after_mutation: Option<u64>,
    surviving_rows: Vec<Row>,
    survivor_listing_error: Option<String>,
}

impl ScenarioRun {
    fn new(partition_key: String, seed_rows: usize) -> Self {
        Self {
            partition_key,
            seed_rows,
            stage: ScenarioStage::Init,
            seeded: 0,
            count_after_seed: None,
            count_after_mutation: None,
            surviving_rows: Vec::new(),
            survivor_listing_error: None,
        }
    }

    fn enter(&mut self, stage: ScenarioStage) {
        self.stage = stage;
        info!(
            "event=scenario_stage module=harness status=ok stage={} partition_key={}",
            stage, self.partition_key
        );
    }

    fn drive<S: PartitionStore>(&mut self, store: &S) -> Classification {
        match self.seed_and_verify(store) {
            Ok(()) => self.mutate_and_verify(store),
            Err(reason) => Classification::Failed { reason },
        }
    }

    fn seed_and_verify<S: PartitionStore>(&mut self, store: &S) -> Result<(), ScenarioFailure> {
        self.enter(ScenarioStage::Seed);
        for row in seed_rows_for(&self.partition_key, self.seed_rows) {
            store
                .insert_row(&row)
                .map_err(|err| ScenarioFailure::Setup {
                    operation: format!("insert {}", row.clustering_key),
                    err,
                })?;
            self.seeded += 1;
        }

        self.enter(ScenarioStage::VerifySeed);
        let counted = store
            .count_by_partition_key(&self.partition_key)
            .map_err(|err| ScenarioFailure::Setup {
                operation: "count after seed".to_string(),
                err,
            })?;
        self.count_after_seed = Some(counted);

        let listed = store
            .list_by_partition_key(&self.partition_key)
            .into_listing()
            .into_result()
            .map_err(|err| ScenarioFailure::Setup {
                operation: "list after seed".to_string(),
                err,
            })?;
        let distinct_keys = listed
            .iter()
            .map(|row| row.clustering_key.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        let expected = self.seed_rows;
        if counted != expected as u64 || listed.len() != expected || distinct_keys != expected {
            return Err(ScenarioFailure::SetupInvariantViolation {
                expected,
                counted,
                listed: listed.len(),
                distinct_keys,
            });
        }
        Ok(())
    }

    fn mutate_and_verify<S: PartitionStore>(&mut self, store: &S) -> Classification {
        self.enter(ScenarioStage::Mutate);
        if let Err(err) = store.delete_by_partition_key(&self.partition_key) {
            return Classification::Failed {
                reason: ScenarioFailure::Mutation(err),
            };
        }

        self.enter(ScenarioStage::VerifyMutation);
        let remaining = match store.count_by_partition_key(&self.partition_key) {
            Ok(count) => count,
            Err(err) => {
                return Classification::Failed {
                    reason: ScenarioFailure::Verification(err),
                }
            }
        };
        self.count_after_mutation = Some(remaining);

        if remaining == 0 {
            return Classification::Consistent;
        }

        // Survivor dump is diagnostic only; a failed listing keeps the anomaly.
        let listing = store.list_by_partition_key(&self.partition_key).into_listing();
        self.surviving_rows = listing.rows;
        if let ListingStatus::Failed(err) = listing.status {
            warn!(
                "event=survivor_list module=harness status=error partition_key={} error={}",
                self.partition_key, err
            );
            self.survivor_listing_error = Some(err.to_string());
        }
        Classification::AnomalyDetected {
            surviving: remaining,
        }
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{seed_rows_for, ScenarioOptions};

    #[test]
    fn seed_rows_match_reproduction_fixture() {
        let rows = seed_rows_for("test-org-1", 3);
        let keys: Vec<_> = rows.iter().map(|row| row.clustering_key.as_str()).collect();
        assert_eq!(keys, ["user-1", "user-2", "user-3"]);
        assert_eq!(rows[1].payload, r#"{"name":"User2"}"#);
        assert!(rows.iter().all(|row| row.version == 1));
    }

    #[test]
    fn default_options_seed_three_rows() {
        let options = ScenarioOptions::default();
        assert_eq!(options.seed_rows, 3);
        assert_eq!(options.key_prefix, "test-org");
        assert!(options.partition_key.is_none());
    }
}
