use partition_probe_core::{
    run_scenario, run_scenario_with_config, Classification, ConnectionError, ConsistencyLevel,
    NewRow, PartitionStore, ProbeConfig, Row, RowCursor, ScenarioFailure, ScenarioOptions,
    ScenarioStage, Session, StoreError, StoreFailure, StoreResult,
};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

static NODE_SEQ: AtomicUsize = AtomicUsize::new(0);

fn memory_config() -> ProbeConfig {
    let run = NODE_SEQ.fetch_add(1, Ordering::Relaxed);
    ProbeConfig::with_endpoints(
        (1..=3).map(|node| format!("memory:scenario-{}-{run}-{node}", std::process::id())),
    )
}

fn file_endpoints(dir: &Path) -> Vec<String> {
    (1..=3)
        .map(|node| format!("file:{}", dir.join(format!("node-{node}")).display()))
        .collect()
}

/// Sets its flag when the owning store is dropped.
#[derive(Default)]
struct ReleaseFlag(Rc<Cell<bool>>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

fn write_unavailable() -> StoreError {
    StoreError::Write(StoreFailure::Unavailable {
        required: 2,
        alive: 1,
    })
}

fn write_timeout() -> StoreError {
    StoreError::Write(StoreFailure::Timeout)
}

fn read_timeout() -> StoreError {
    StoreError::Read(StoreFailure::Timeout)
}

/// Scripted in-memory store with per-operation fault switches.
#[derive(Default)]
struct ScriptedStore {
    rows: RefCell<BTreeMap<(String, String), Row>>,
    fail_insert_at: Option<usize>,
    inserts: Cell<usize>,
    delete_error: Option<fn() -> StoreError>,
    delete_is_ignored: bool,
    count_after_delete_error: Option<fn() -> StoreError>,
    count_offset: u64,
    list_error_after_delete: bool,
    list_drop_before_delete: usize,
    list_error_before_delete: bool,
    deleted: Cell<bool>,
    delete_calls: Rc<Cell<usize>>,
    released: ReleaseFlag,
}

impl ScriptedStore {
    fn visible(&self, partition_key: &str) -> Vec<Row> {
        self.rows
            .borrow()
            .values()
            .filter(|row| row.partition_key == partition_key)
            .cloned()
            .collect()
    }
}

impl PartitionStore for ScriptedStore {
    fn insert_row(&self, row: &NewRow) -> StoreResult<()> {
        let attempt = self.inserts.get() + 1;
        self.inserts.set(attempt);
        if self.fail_insert_at == Some(attempt) {
            return Err(StoreError::Write(StoreFailure::ConsistencyNotMet {
                required: 2,
                acked: 1,
            }));
        }
        self.rows.borrow_mut().insert(
            (row.partition_key.clone(), row.clustering_key.clone()),
            Row {
                partition_key: row.partition_key.clone(),
                clustering_key: row.clustering_key.clone(),
                payload: row.payload.clone(),
                version: row.version,
                created_at: 1,
                write_ts: attempt as i64,
            },
        );
        Ok(())
    }

    fn delete_by_partition_key(&self, partition_key: &str) -> StoreResult<()> {
        self.delete_calls.set(self.delete_calls.get() + 1);
        if let Some(make_err) = self.delete_error {
            return Err(make_err());
        }
        self.deleted.set(true);
        if !self.delete_is_ignored {
            self.rows
                .borrow_mut()
                .retain(|(partition, _), _| partition != partition_key);
        }
        Ok(())
    }

    fn count_by_partition_key(&self, partition_key: &str) -> StoreResult<u64> {
        if self.deleted.get() {
            if let Some(make_err) = self.count_after_delete_error {
                return Err(make_err());
            }
        }
        Ok(self.visible(partition_key).len() as u64 + self.count_offset)
    }

    fn list_by_partition_key(&self, partition_key: &str) -> RowCursor {
        if self.deleted.get() && self.list_error_after_delete {
            return RowCursor::failed(StoreError::Read(StoreFailure::Timeout));
        }
        let mut rows = self.visible(partition_key);
        if !self.deleted.get() {
            rows.truncate(rows.len().saturating_sub(self.list_drop_before_delete));
            if self.list_error_before_delete {
                rows.truncate(1);
                return RowCursor::new(rows, Some(StoreError::Read(StoreFailure::Timeout)));
            }
        }
        RowCursor::new(rows, None)
    }
}

fn fixed_key_options(key: &str) -> ScenarioOptions {
    ScenarioOptions {
        partition_key: Some(key.to_string()),
        ..ScenarioOptions::default()
    }
}

#[test]
fn healthy_replica_set_is_classified_consistent() {
    let report = run_scenario_with_config(memory_config(), &ScenarioOptions::default());

    assert!(matches!(report.classification, Classification::Consistent));
    assert_eq!(report.exit_code(), 0);
    assert!(report.partition_key.starts_with("test-org-"));
    assert_eq!(report.seeded_rows, 3);
    assert_eq!(report.count_after_seed, Some(3));
    assert_eq!(report.count_after_mutation, Some(0));
    assert_eq!(report.stage_reached, ScenarioStage::VerifyMutation);
    assert!(report.surviving_rows.is_empty());
    assert!(report.finished_at_ms >= report.started_at_ms);
}

#[test]
fn ignored_delete_is_reported_as_anomaly_with_survivors() {
    let released = Rc::new(Cell::new(false));
    let store = ScriptedStore {
        delete_is_ignored: true,
        released: ReleaseFlag(Rc::clone(&released)),
        ..ScriptedStore::default()
    };

    let report = run_scenario(move || Ok(store), &fixed_key_options("test-org-1700000000"));

    assert!(matches!(
        report.classification,
        Classification::AnomalyDetected { surviving: 3 }
    ));
    assert_eq!(report.exit_code(), 1);
    let survivors: Vec<_> = report
        .surviving_rows
        .iter()
        .map(|row| row.clustering_key.as_str())
        .collect();
    assert_eq!(survivors, ["user-1", "user-2", "user-3"]);
    assert!(report.survivor_listing_error.is_none());
    assert!(released.get());

    let text = report.to_string();
    assert!(text.contains("ANOMALY DETECTED"));
    assert!(text.contains("partition_key: test-org-1700000000"));
    assert!(text.contains("surviving: user_id=user-2"));
}

#[test]
fn failed_survivor_listing_keeps_anomaly_classification() {
    let store = ScriptedStore {
        delete_is_ignored: true,
        list_error_after_delete: true,
        ..ScriptedStore::default()
    };

    let report = run_scenario(move || Ok(store), &fixed_key_options("org-x"));

    assert!(matches!(
        report.classification,
        Classification::AnomalyDetected { surviving: 3 }
    ));
    assert!(report.surviving_rows.is_empty());
    assert!(report.survivor_listing_error.is_some());
}

#[test]
fn delete_error_is_failed_not_anomaly() {
    let released = Rc::new(Cell::new(false));
    let store = ScriptedStore {
        delete_error: Some(write_unavailable as fn() -> StoreError),
        released: ReleaseFlag(Rc::clone(&released)),
        ..ScriptedStore::default()
    };

    let report = run_scenario(move || Ok(store), &fixed_key_options("org-x"));

    match &report.classification {
        Classification::Failed {
            reason: ScenarioFailure::Mutation(StoreError::Write(StoreFailure::Unavailable { .. })),
        } => {}
        other => panic!("unexpected classification: {other:?}"),
    }
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.stage_reached, ScenarioStage::Mutate);
    assert!(report.count_after_mutation.is_none());
    assert!(released.get());
}

#[test]
fn delete_is_attempted_exactly_once() {
    let delete_calls = Rc::new(Cell::new(0usize));
    let store = ScriptedStore {
        delete_error: Some(write_timeout as fn() -> StoreError),
        delete_calls: Rc::clone(&delete_calls),
        ..ScriptedStore::default()
    };

    let report = run_scenario(move || Ok(store), &fixed_key_options("org-x"));

    assert_eq!(delete_calls.get(), 1);
    match &report.classification {
        Classification::Failed { reason } => assert!(reason.is_timeout()),
        other => panic!("unexpected classification: {other:?}"),
    }
}

#[test]
fn seed_write_failure_aborts_before_delete() {
    let released = Rc::new(Cell::new(false));
    let store = ScriptedStore {
        fail_insert_at: Some(2),
        released: ReleaseFlag(Rc::clone(&released)),
        ..ScriptedStore::default()
    };

    let report = run_scenario(move || Ok(store), &fixed_key_options("org-x"));

    match &report.classification {
        Classification::Failed {
            reason: ScenarioFailure::Setup { operation, .. },
        } => assert_eq!(operation, "insert user-2"),
        other => panic!("unexpected classification: {other:?}"),
    }
    assert_eq!(report.seeded_rows, 1);
    assert_eq!(report.stage_reached, ScenarioStage::Seed);
    assert!(released.get());
}

#[test]
fn seed_count_mismatch_is_setup_invariant_violation() {
    let released = Rc::new(Cell::new(false));
    let store = ScriptedStore {
        count_offset: 1,
        released: ReleaseFlag(Rc::clone(&released)),
        ..ScriptedStore::default()
    };

    let report = run_scenario(move || Ok(store), &fixed_key_options("org-x"));

    match &report.classification {
        Classification::Failed {
            reason:
                ScenarioFailure::SetupInvariantViolation {
                    expected: 3,
                    counted: 4,
                    listed: 3,
                    distinct_keys: 3,
                },
        } => {}
        other => panic!("unexpected classification: {other:?}"),
    }
    assert_eq!(report.stage_reached, ScenarioStage::VerifySeed);
    assert!(released.get());
}

#[test]
fn seed_listing_shortfall_is_setup_invariant_violation() {
    let delete_calls = Rc::new(Cell::new(0usize));
    let store = ScriptedStore {
        list_drop_before_delete: 1,
        delete_calls: Rc::clone(&delete_calls),
        ..ScriptedStore::default()
    };

    let report = run_scenario(move || Ok(store), &fixed_key_options("org-x"));

    match &report.classification {
        Classification::Failed {
            reason:
                ScenarioFailure::SetupInvariantViolation {
                    expected: 3,
                    counted: 3,
                    listed: 2,
                    distinct_keys: 2,
                },
        } => {}
        other => panic!("unexpected classification: {other:?}"),
    }
    assert_eq!(report.stage_reached, ScenarioStage::VerifySeed);
    assert_eq!(delete_calls.get(), 0);
}

#[test]
fn partial_seed_listing_is_setup_error_not_trusted() {
    let delete_calls = Rc::new(Cell::new(0usize));
    let store = ScriptedStore {
        list_error_before_delete: true,
        delete_calls: Rc::clone(&delete_calls),
        ..ScriptedStore::default()
    };

    let report = run_scenario(move || Ok(store), &fixed_key_options("org-x"));

    match &report.classification {
        Classification::Failed {
            reason: ScenarioFailure::Setup { operation, err },
        } => {
            assert_eq!(operation, "list after seed");
            assert!(err.is_timeout());
        }
        other => panic!("unexpected classification: {other:?}"),
    }
    assert_eq!(report.count_after_seed, Some(3));
    assert_eq!(report.stage_reached, ScenarioStage::VerifySeed);
    assert_eq!(delete_calls.get(), 0);
}

#[test]
fn oversized_connect_timeout_fails_without_panicking() {
    let mut config = memory_config();
    config.connect_timeout_ms = u64::MAX;

    let report = run_scenario_with_config(config, &fixed_key_options("org-x"));

    match &report.classification {
        Classification::Failed {
            reason: ScenarioFailure::Connection(ConnectionError::InvalidConfig(_)),
        } => {}
        other => panic!("unexpected classification: {other:?}"),
    }
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.seeded_rows, 0);
}

#[test]
fn timed_out_verification_is_inconclusive() {
    let store = ScriptedStore {
        count_after_delete_error: Some(read_timeout as fn() -> StoreError),
        ..ScriptedStore::default()
    };

    let report = run_scenario(move || Ok(store), &fixed_key_options("org-x"));

    match &report.classification {
        Classification::Failed { reason } => {
            assert!(matches!(reason, ScenarioFailure::Verification(_)));
            assert!(reason.is_timeout());
        }
        other => panic!("unexpected classification: {other:?}"),
    }
    assert_eq!(report.stage_reached, ScenarioStage::VerifyMutation);
}

#[test]
fn connection_failure_writes_nothing() {
    let config = ProbeConfig::with_endpoints(["127.0.0.1:9043"]);

    let report = run_scenario_with_config(config, &fixed_key_options("org-x"));

    match &report.classification {
        Classification::Failed {
            reason: ScenarioFailure::Connection(ConnectionError::NoReachableEndpoint(attempts)),
        } => assert_eq!(attempts.len(), 1),
        other => panic!("unexpected classification: {other:?}"),
    }
    assert_eq!(report.stage_reached, ScenarioStage::Init);
    assert_eq!(report.seeded_rows, 0);
    assert!(report.count_after_seed.is_none());
}

#[test]
fn replica_missing_the_tombstone_reproduces_anomaly_at_one() {
    /// Drops the delete on nodes 2 and 3, then reads from node 2.
    struct LaggingReplicas {
        session: Session,
        endpoints: Vec<String>,
    }

    impl PartitionStore for LaggingReplicas {
        fn insert_row(&self, row: &NewRow) -> StoreResult<()> {
            self.session.insert_row(row)
        }
        fn delete_by_partition_key(&self, key: &str) -> StoreResult<()> {
            self.session.set_node_available(&self.endpoints[1], false);
            self.session.set_node_available(&self.endpoints[2], false);
            let result = self.session.delete_by_partition_key(key);
            self.session.set_node_available(&self.endpoints[0], false);
            self.session.set_node_available(&self.endpoints[1], true);
            self.session.set_node_available(&self.endpoints[2], true);
            result
        }
        fn count_by_partition_key(&self, key: &str) -> StoreResult<u64> {
            self.session.count_by_partition_key(key)
        }
        fn list_by_partition_key(&self, key: &str) -> RowCursor {
            self.session.list_by_partition_key(key)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let endpoints = file_endpoints(dir.path());
    let mut config = ProbeConfig::with_endpoints(endpoints.clone());
    config.consistency = ConsistencyLevel::One;

    let report = run_scenario(
        move || {
            Ok(LaggingReplicas {
                session: Session::connect(config)?,
                endpoints,
            })
        },
        &ScenarioOptions::default(),
    );

    assert!(matches!(
        report.classification,
        Classification::AnomalyDetected { surviving: 3 }
    ));
    assert_eq!(report.surviving_rows.len(), 3);

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["classification"]["outcome"], "anomaly_detected");
    assert_eq!(json["classification"]["surviving"], 3);
    assert_eq!(json["stage_reached"], "verify_mutation");
    assert_eq!(json["platform"]["os"], std::env::consts::OS);
    assert_eq!(json["surviving_rows"][0]["clustering_key"], "user-1");
}

#[test]
fn concurrent_scenarios_on_shared_nodes_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let endpoints = file_endpoints(dir.path());
    Session::connect(ProbeConfig::with_endpoints(endpoints.clone()))
        .unwrap()
        .close();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let mut config = ProbeConfig::with_endpoints(endpoints.clone());
            config.timeout_ms = 30_000;
            std::thread::spawn(move || {
                let report = run_scenario_with_config(config, &ScenarioOptions::default());
                (report.partition_key.clone(), report.exit_code())
            })
        })
        .collect();

    let mut keys = Vec::new();
    for handle in handles {
        let (key, exit_code) = handle.join().unwrap();
        assert_eq!(exit_code, 0, "scenario {key} was not consistent");
        keys.push(key);
    }
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 4);
}
