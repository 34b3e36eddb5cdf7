//! Replica-set session implementing `PartitionStore` on local nodes.
//!
//! # Responsibility
//! - Own one connection per reachable endpoint for the session lifetime.
//! - Replicate writes to live nodes and count acknowledgments.
//! - Merge replica reads by write timestamp and partition tombstones.
//!
//! # Invariants
//! - Write timestamps are strictly increasing within one session.
//! - A write is acknowledged only when `required_replicas` nodes applied it.
//! - A read answers only after `required_replicas` nodes responded.
//! - Rows with `write_ts` at or below the newest partition tombstone are
//!   never returned.

use crate::config::ProbeConfig;
use crate::db::{open_node, Endpoint, NodeOpenOptions};
use crate::model::consistency::ConsistencyLevel;
use crate::model::row::{NewRow, Row};
use crate::repo::store::{
    ConnectionError, PartitionStore, RowCursor, StoreError, StoreFailure, StoreResult,
};
use log::{debug, error, info, warn};
use rusqlite::{params, Connection};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

const INSERT_ROW_SQL: &str = "INSERT INTO platform_users (
        org_id,
        user_id,
        user_data,
        version,
        created_at,
        write_ts
    ) VALUES (?1, ?2, ?3, ?4, CAST(unixepoch('subsec') * 1000 AS INTEGER), ?5)
    ON CONFLICT (org_id, user_id) DO UPDATE SET
        user_data = excluded.user_data,
        version = excluded.version,
        created_at = excluded.created_at,
        write_ts = excluded.write_ts
    WHERE excluded.write_ts > platform_users.write_ts;";

const SELECT_PARTITION_SQL: &str = "SELECT
        user_id,
        user_data,
        version,
        created_at,
        write_ts
    FROM platform_users
    WHERE org_id = ?1
    ORDER BY user_id ASC;";

struct Node {
    endpoint: String,
    conn: Option<Connection>,
    available: Cell<bool>,
}

impl Node {
    fn live_conn(&self) -> Option<&Connection> {
        if self.available.get() {
            self.conn.as_ref()
        } else {
            None
        }
    }
}

/// Rows and newest tombstone observed on one replica.
struct NodeSnapshot {
    rows: Vec<Row>,
    tombstone: Option<i64>,
    decode_error: Option<String>,
}

/// Liveness of one configured endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub endpoint: String,
    pub connected: bool,
    pub available: bool,
}

/// Open session against the configured replica nodes.
///
/// Dropping the session releases every node connection.
pub struct Session {
    config: ProbeConfig,
    nodes: Vec<Node>,
    last_write_ts: Cell<i64>,
}

impl Session {
    /// Opens every configured endpoint.
    ///
    /// Succeeds when at least one node is reachable; unreachable nodes count as
    /// down replicas for every later operation.
    ///
    /// # Errors
    /// - `InvalidConfig` when the config fails validation.
    /// - `NoReachableEndpoint` when no node could be opened.
    /// - `Timeout` when bootstrap exceeded the connect timeout.
    pub fn connect(config: ProbeConfig) -> Result<Self, ConnectionError> {
        config.validate()?;
        let started_at = Instant::now();
        info!(
            "event=session_connect module=repo status=start endpoints={} keyspace={} consistency={}",
            config.endpoints.len(),
            config.keyspace,
            config.consistency
        );

        let options = NodeOpenOptions {
            keyspace: &config.keyspace,
            connect_timeout: config.connect_timeout(),
            op_timeout: config.timeout(),
        };

        let mut nodes = Vec::with_capacity(config.endpoints.len());
        let mut failures = Vec::new();
        for raw in &config.endpoints {
            let endpoint = Endpoint::parse(raw);
            match open_node(&endpoint, &options) {
                Ok(conn) => nodes.push(Node {
                    endpoint: endpoint.to_string(),
                    conn: Some(conn),
                    available: Cell::new(true),
                }),
                Err(err) => {
                    warn!(
                        "event=session_connect module=repo status=node_unreachable endpoint={} error={}",
                        endpoint, err
                    );
                    nodes.push(Node {
                        endpoint: endpoint.to_string(),
                        conn: None,
                        available: Cell::new(false),
                    });
                    failures.push((endpoint.to_string(), err));
                }
            }
        }

        let elapsed = started_at.elapsed();
        if failures.len() == nodes.len() {
            error!(
                "event=session_connect module=repo status=error duration_ms={} error_code=no_reachable_endpoint",
                elapsed.as_millis()
            );
            return Err(ConnectionError::NoReachableEndpoint(failures));
        }
        if elapsed > config.connect_timeout() {
            error!(
                "event=session_connect module=repo status=error duration_ms={} error_code=connect_timeout",
                elapsed.as_millis()
            );
            return Err(ConnectionError::Timeout {
                elapsed_ms: elapsed.as_millis(),
            });
        }

        info!(
            "event=session_connect module=repo status=ok duration_ms={} reachable={}/{}",
            elapsed.as_millis(),
            nodes.len() - failures.len(),
            nodes.len()
        );
        Ok(Self {
            config,
            nodes,
            last_write_ts: Cell::new(0),
        })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn consistency(&self) -> ConsistencyLevel {
        self.config.consistency
    }

    pub fn node_statuses(&self) -> Vec<NodeStatus> {
        self.nodes
            .iter()
            .map(|node| NodeStatus {
                endpoint: node.endpoint.clone(),
                connected: node.conn.is_some(),
                available: node.live_conn().is_some(),
            })
            .collect()
    }

    /// Marks a connected node up or down, simulating replica loss.
    ///
    /// Returns `false` when the endpoint is unknown or never connected.
    pub fn set_node_available(&self, endpoint: &str, available: bool) -> bool {
        let target = Endpoint::parse(endpoint).to_string();
        match self
            .nodes
            .iter()
            .find(|node| node.endpoint == target && node.conn.is_some())
        {
            Some(node) => {
                node.available.set(available);
                info!(
                    "event=node_availability module=repo status=ok endpoint={} available={}",
                    node.endpoint, available
                );
                true
            }
            None => false,
        }
    }

    /// Releases every node connection.
    pub fn close(self) {}

    fn required_replicas(&self) -> usize {
        self.config
            .consistency
            .required_replicas(self.nodes.len())
    }

    fn live_nodes(&self) -> impl Iterator<Item = (&Node, &Connection)> {
        self.nodes
            .iter()
            .filter_map(|node| node.live_conn().map(|conn| (node, conn)))
    }

    fn check_available(&self) -> Result<usize, StoreFailure> {
        let required = self.required_replicas();
        let alive = self.live_nodes().count();
        if alive < required {
            return Err(StoreFailure::Unavailable { required, alive });
        }
        Ok(required)
    }

    fn next_write_ts(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        let next = now.max(self.last_write_ts.get().saturating_add(1));
        self.last_write_ts.set(next);
        next
    }

    /// Applies `apply` on every live node and checks the acknowledgment count.
    fn replicate<F>(&self, op: &'static str, apply: F) -> Result<usize, StoreFailure>
    where
        F: Fn(&Connection) -> rusqlite::Result<()>,
    {
        let required = self.check_available()?;
        let mut acked = 0;
        let mut timed_out = false;
        for (node, conn) in self.live_nodes() {
            match apply(conn) {
                Ok(()) => acked += 1,
                Err(err) => {
                    let failure = StoreFailure::from(err);
                    timed_out |= matches!(failure, StoreFailure::Timeout);
                    warn!(
                        "event={} module=repo status=node_error endpoint={} error={}",
                        op, node.endpoint, failure
                    );
                }
            }
        }

        if acked >= required {
            Ok(acked)
        } else if timed_out {
            Err(StoreFailure::Timeout)
        } else {
            Err(StoreFailure::ConsistencyNotMet { required, acked })
        }
    }

    /// Reads the partition from live nodes until `required` replicas answered.
    fn read_partition(&self, partition_key: &str) -> Result<NodeMerge, StoreFailure> {
        let required = self.check_available()?;
        let mut merge = NodeMerge::default();
        let mut answered = 0;
        let mut timed_out = false;
        for (node, conn) in self.live_nodes() {
            if answered == required {
                break;
            }
            match fetch_partition(conn, partition_key) {
                Ok(snapshot) => {
                    merge.absorb(snapshot);
                    answered += 1;
                }
                Err(failure) => {
                    timed_out |= matches!(failure, StoreFailure::Timeout);
                    warn!(
                        "event=partition_read module=repo status=node_error endpoint={} error={}",
                        node.endpoint, failure
                    );
                }
            }
        }

        if answered < required {
            return Err(if timed_out {
                StoreFailure::Timeout
            } else {
                StoreFailure::ConsistencyNotMet {
                    required,
                    acked: answered,
                }
            });
        }
        Ok(merge)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        info!(
            "event=session_close module=repo status=ok nodes={}",
            self.nodes.len()
        );
    }
}

impl PartitionStore for Session {
    fn insert_row(&self, row: &NewRow) -> StoreResult<()> {
        if row.partition_key.is_empty() {
            return Err(StoreError::InvalidArgument("partition key must not be empty"));
        }
        if row.clustering_key.is_empty() {
            return Err(StoreError::InvalidArgument("clustering key must not be empty"));
        }

        let started_at = Instant::now();
        let write_ts = self.next_write_ts();
        let result = self.replicate("row_insert", |conn| {
            conn.execute(
                INSERT_ROW_SQL,
                params![
                    row.partition_key.as_str(),
                    row.clustering_key.as_str(),
                    row.payload.as_str(),
                    row.version,
                    write_ts,
                ],
            )?;
            Ok(())
        });

        match result {
            Ok(acked) => {
                debug!(
                    "event=row_insert module=repo status=ok partition_key={} clustering_key={} acked={} duration_ms={}",
                    row.partition_key,
                    row.clustering_key,
                    acked,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(failure) => {
                error!(
                    "event=row_insert module=repo status=error partition_key={} clustering_key={} duration_ms={} error={}",
                    row.partition_key,
                    row.clustering_key,
                    started_at.elapsed().as_millis(),
                    failure
                );
                Err(StoreError::Write(failure))
            }
        }
    }

    fn delete_by_partition_key(&self, partition_key: &str) -> StoreResult<()> {
        if partition_key.is_empty() {
            return Err(StoreError::InvalidArgument("partition key must not be empty"));
        }

        let started_at = Instant::now();
        let write_ts = self.next_write_ts();
        let result = self.replicate("partition_delete", |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO partition_tombstones (org_id, deleted_at)
                 VALUES (?1, ?2)
                 ON CONFLICT (org_id) DO UPDATE SET
                    deleted_at = max(deleted_at, excluded.deleted_at);",
                params![partition_key, write_ts],
            )?;
            tx.execute(
                "DELETE FROM platform_users WHERE org_id = ?1 AND write_ts <= ?2;",
                params![partition_key, write_ts],
            )?;
            tx.commit()
        });

        match result {
            Ok(acked) => {
                info!(
                    "event=partition_delete module=repo status=ok partition_key={} acked={} duration_ms={}",
                    partition_key,
                    acked,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(failure) => {
                error!(
                    "event=partition_delete module=repo status=error partition_key={} duration_ms={} error={}",
                    partition_key,
                    started_at.elapsed().as_millis(),
                    failure
                );
                Err(StoreError::Write(failure))
            }
        }
    }

    fn count_by_partition_key(&self, partition_key: &str) -> StoreResult<u64> {
        if partition_key.is_empty() {
            return Err(StoreError::InvalidArgument("partition key must not be empty"));
        }

        let started_at = Instant::now();
        let result = self.read_partition(partition_key).and_then(|merge| {
            let (rows, decode_error) = merge.finish();
            match decode_error {
                // A count over undecodable rows would silently undercount.
                Some(message) => Err(StoreFailure::InvalidData(message)),
                None => Ok(rows.len() as u64),
            }
        });

        match result {
            Ok(count) => {
                debug!(
                    "event=partition_count module=repo status=ok partition_key={} count={} duration_ms={}",
                    partition_key,
                    count,
                    started_at.elapsed().as_millis()
                );
                Ok(count)
            }
            Err(failure) => {
                error!(
                    "event=partition_count module=repo status=error partition_key={} duration_ms={} error={}",
                    partition_key,
                    started_at.elapsed().as_millis(),
                    failure
                );
                Err(StoreError::Read(failure))
            }
        }
    }

    fn list_by_partition_key(&self, partition_key: &str) -> RowCursor {
        if partition_key.is_empty() {
            return RowCursor::failed(StoreError::InvalidArgument(
                "partition key must not be empty",
            ));
        }

        match self.read_partition(partition_key) {
            Ok(merge) => {
                let (rows, decode_error) = merge.finish();
                debug!(
                    "event=partition_list module=repo status={} partition_key={} rows={}",
                    if decode_error.is_some() { "partial" } else { "ok" },
                    partition_key,
                    rows.len()
                );
                let terminal =
                    decode_error.map(|message| StoreError::Read(StoreFailure::InvalidData(message)));
                RowCursor::new(rows, terminal)
            }
            Err(failure) => {
                error!(
                    "event=partition_list module=repo status=error partition_key={} error={}",
                    partition_key, failure
                );
                RowCursor::failed(StoreError::Read(failure))
            }
        }
    }
}

/// Accumulates replica snapshots; newest write per clustering key wins.
#[derive(Default)]
struct NodeMerge {
    rows: BTreeMap<String, Row>,
    tombstone: Option<i64>,
    decode_error: Option<String>,
}

impl NodeMerge {
    fn absorb(&mut self, snapshot: NodeSnapshot) {
        for row in snapshot.rows {
            match self.rows.get(&row.clustering_key) {
                Some(existing) if existing.write_ts >= row.write_ts => {}
                _ => {
                    self.rows.insert(row.clustering_key.clone(), row);
                }
            }
        }
        self.tombstone = self.tombstone.max(snapshot.tombstone);
        if self.decode_error.is_none() {
            self.decode_error = snapshot.decode_error;
        }
    }

    /// Returns visible rows ordered by clustering key.
    fn finish(self) -> (Vec<Row>, Option<String>) {
        let tombstone = self.tombstone;
        let rows = self
            .rows
            .into_values()
            .filter(|row| tombstone.map_or(true, |deleted_at| row.write_ts > deleted_at))
            .collect();
        (rows, self.decode_error)
    }
}

fn fetch_partition(conn: &Connection, partition_key: &str) -> Result<NodeSnapshot, StoreFailure> {
    let tombstone = conn
        .query_row(
            "SELECT max(deleted_at) FROM partition_tombstones WHERE org_id = ?1;",
            [partition_key],
            |row| row.get::<_, Option<i64>>(0),
        )?;

    let mut stmt = conn.prepare_cached(SELECT_PARTITION_SQL)?;
    let mut result_rows = stmt.query([partition_key])?;
    let mut rows = Vec::new();
    let mut decode_error = None;
    while let Some(raw) = result_rows.next()? {
        match parse_row(partition_key, raw) {
            Ok(row) => rows.push(row),
            Err(message) => {
                decode_error = Some(message);
                break;
            }
        }
    }

    Ok(NodeSnapshot {
        rows,
        tombstone,
        decode_error,
    })
}

fn parse_row(partition_key: &str, raw: &rusqlite::Row<'_>) -> Result<Row, String> {
    let clustering_key: String = raw.get("user_id").map_err(|err| err.to_string())?;
    let version_raw: i64 = raw.get("version").map_err(|err| err.to_string())?;
    let version = i32::try_from(version_raw).map_err(|_| {
        format!("version `{version_raw}` out of range for user `{clustering_key}`")
    })?;

    Ok(Row {
        partition_key: partition_key.to_string(),
        payload: raw.get("user_data").map_err(|err| err.to_string())?,
        version,
        created_at: raw.get("created_at").map_err(|err| err.to_string())?,
        write_ts: raw.get("write_ts").map_err(|err| err.to_string())?,
        clustering_key,
    })
}
