//! Replica node storage bootstrap.
//!
//! # Responsibility
//! - Resolve configured endpoints to local replica nodes.
//! - Open and configure SQLite connections for each node.
//! - Apply schema migrations in deterministic order.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No row is read or written on a node before its migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod endpoint;
pub mod migrations;
mod open;

pub use endpoint::Endpoint;
pub use open::{open_node, NodeOpenOptions};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// The endpoint cannot be served by the local replica backend.
    UnsupportedEndpoint(String),
    /// Node open plus migration exceeded the connect timeout.
    ConnectTimeout { elapsed_ms: u128 },
}

impl DbError {
    /// Returns whether the failure is a lock wait that ran out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::ConnectTimeout { .. } => true,
            _ => false,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "node schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::UnsupportedEndpoint(endpoint) => write!(
                f,
                "endpoint `{endpoint}` is not served by the local replica backend; use file:<dir> or memory:<name>"
            ),
            Self::ConnectTimeout { elapsed_ms } => {
                write!(f, "node bootstrap exceeded connect timeout after {elapsed_ms}ms")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. }
            | Self::UnsupportedEndpoint(_)
            | Self::ConnectTimeout { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<std::io::Error> for DbError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
