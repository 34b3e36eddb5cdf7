//! Node schema registry.
//!
//! # Invariants
//! - Versions are dense and start at 1; a node's `user_version` is the last
//!   version applied to it.
//! - Pending versions are applied in one transaction, so a node never holds a
//!   partially migrated schema.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

struct NodeSchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const NODE_SCHEMA: &[NodeSchemaStep] = &[
    NodeSchemaStep {
        version: 1,
        name: "platform_users",
        sql: include_str!("0001_init.sql"),
    },
    NodeSchemaStep {
        version: 2,
        name: "partition_tombstones",
        sql: include_str!("0002_partition_tombstones.sql"),
    },
];

/// Highest schema version this build can write.
pub fn latest_version() -> u32 {
    NODE_SCHEMA.len() as u32
}

/// Reads the schema version stamped on a node.
pub fn node_schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Brings a node up to `latest_version()` and returns how many steps ran.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the node was written by a newer build.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<u32> {
    let on_node = node_schema_version(conn)?;
    let latest = latest_version();
    if on_node > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: on_node,
            latest_supported: latest,
        });
    }

    let pending: Vec<&NodeSchemaStep> = NODE_SCHEMA
        .iter()
        .filter(|step| step.version > on_node)
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    for step in &pending {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
        info!(
            "event=node_migrate module=db status=ok version={} step={}",
            step.version, step.name
        );
    }
    tx.commit()?;

    Ok(pending.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, latest_version, node_schema_version, NODE_SCHEMA};
    use rusqlite::Connection;

    #[test]
    fn schema_versions_are_dense_from_one() {
        for (index, step) in NODE_SCHEMA.iter().enumerate() {
            assert_eq!(step.version as usize, index + 1, "step {}", step.name);
        }
    }

    #[test]
    fn second_apply_runs_no_steps() {
        let mut conn = Connection::open_in_memory().unwrap();

        assert_eq!(apply_migrations(&mut conn).unwrap(), latest_version());
        assert_eq!(apply_migrations(&mut conn).unwrap(), 0);
        assert_eq!(node_schema_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn partially_migrated_node_only_runs_remaining_steps() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(NODE_SCHEMA[0].sql).unwrap();
        conn.pragma_update(None, "user_version", 1u32).unwrap();

        assert_eq!(apply_migrations(&mut conn).unwrap(), latest_version() - 1);
    }
}
