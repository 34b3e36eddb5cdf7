//! Connection bootstrap for replica nodes.
//!
//! # Responsibility
//! - Open file or shared-cache in-memory node connections.
//! - Bound bootstrap by the connect timeout and steady state by the op timeout.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have migrations fully applied.
//! - File nodes run in WAL journal mode.
//! - Returned connections wait at most `op_timeout` on a locked node.

use super::migrations::apply_migrations;
use super::{DbError, DbResult, Endpoint};
use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use std::time::{Duration, Instant};

/// Per-node open parameters derived from the session config.
#[derive(Debug, Clone)]
pub struct NodeOpenOptions<'a> {
    pub keyspace: &'a str,
    pub connect_timeout: Duration,
    pub op_timeout: Duration,
}

/// Opens one replica node and applies all pending migrations.
///
/// # Side effects
/// - Creates the node directory for `file:` endpoints.
/// - Emits `node_open` logging events with duration and status.
pub fn open_node(endpoint: &Endpoint, options: &NodeOpenOptions<'_>) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=node_open module=db status=start endpoint={endpoint}");

    let result = connect(endpoint, options.keyspace).and_then(|mut conn| {
        bootstrap_connection(&mut conn, options, started_at)?;
        Ok(conn)
    });

    match &result {
        Ok(_) => info!(
            "event=node_open module=db status=ok endpoint={} duration_ms={}",
            endpoint,
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=node_open module=db status=error endpoint={} duration_ms={} error={}",
            endpoint,
            started_at.elapsed().as_millis(),
            err
        ),
    }
    result
}

fn connect(endpoint: &Endpoint, keyspace: &str) -> DbResult<Connection> {
    match endpoint {
        Endpoint::File(dir) => {
            std::fs::create_dir_all(dir)?;
            let conn = Connection::open(dir.join(format!("{keyspace}.sqlite3")))?;
            // Concurrent sessions on one node: readers must not block the writer.
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get::<_, String>(0))?;
            Ok(conn)
        }
        Endpoint::Memory(name) => {
            let uri = format!("file:{name}-{keyspace}?mode=memory&cache=shared");
            Ok(Connection::open_with_flags(
                uri,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?)
        }
        Endpoint::Remote(addr) => Err(DbError::UnsupportedEndpoint(addr.clone())),
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    options: &NodeOpenOptions<'_>,
    started_at: Instant,
) -> DbResult<()> {
    conn.busy_timeout(clamp_lock_wait(options.connect_timeout))?;
    apply_migrations(conn)?;

    let elapsed = started_at.elapsed();
    if elapsed > options.connect_timeout {
        return Err(DbError::ConnectTimeout {
            elapsed_ms: elapsed.as_millis(),
        });
    }

    conn.busy_timeout(clamp_lock_wait(options.op_timeout))?;
    Ok(())
}

/// SQLite takes the busy timeout as `i32` milliseconds.
fn clamp_lock_wait(timeout: Duration) -> Duration {
    timeout.min(Duration::from_millis(i32::MAX as u64))
}
