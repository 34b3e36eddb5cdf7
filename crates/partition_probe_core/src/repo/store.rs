//! Storage contract, error taxonomy and row listing types.
//!
//! # Responsibility
//! - Define `PartitionStore`, the seam between harness and store backends.
//! - Classify single-operation failures as write or read failures.
//!
//! # Invariants
//! - A `RowCursor` yields its terminal error exactly once, after the rows.
//! - `Listing::into_result` never returns rows from a failed read.

use crate::config::ConfigError;
use crate::db::DbError;
use crate::model::row::{NewRow, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Partition-scoped data access contract.
///
/// Implementations report every failure to the caller and never retry.
pub trait PartitionStore {
    /// Writes one row; the store stamps `created_at`.
    fn insert_row(&self, row: &NewRow) -> StoreResult<()>;
    /// Removes every row sharing `partition_key` with a single mutation.
    /// Deleting an empty partition succeeds.
    fn delete_by_partition_key(&self, partition_key: &str) -> StoreResult<()>;
    fn count_by_partition_key(&self, partition_key: &str) -> StoreResult<u64>;
    /// Issues a fresh read on every call.
    ///
    /// The cursor is single-pass but not lazy: the local replica backend
    /// reads and merges the whole partition before returning it. A read
    /// failure still surfaces as the cursor's final item.
    fn list_by_partition_key(&self, partition_key: &str) -> RowCursor;
}

impl<S: PartitionStore + ?Sized> PartitionStore for Box<S> {
    fn insert_row(&self, row: &NewRow) -> StoreResult<()> {
        (**self).insert_row(row)
    }

    fn delete_by_partition_key(&self, partition_key: &str) -> StoreResult<()> {
        (**self).delete_by_partition_key(partition_key)
    }

    fn count_by_partition_key(&self, partition_key: &str) -> StoreResult<u64> {
        (**self).count_by_partition_key(partition_key)
    }

    fn list_by_partition_key(&self, partition_key: &str) -> RowCursor {
        (**self).list_by_partition_key(partition_key)
    }
}

/// Why a single store operation did not succeed.
#[derive(Debug)]
pub enum StoreFailure {
    /// A replica did not answer within the configured timeout.
    Timeout,
    /// Fewer live replicas than the consistency level requires.
    Unavailable { required: usize, alive: usize },
    /// Replicas were contacted but too few acknowledged.
    ConsistencyNotMet { required: usize, acked: usize },
    /// Persisted data could not be decoded into a `Row`.
    InvalidData(String),
    Backend(DbError),
}

impl Display for StoreFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out waiting for replica"),
            Self::Unavailable { required, alive } => write!(
                f,
                "not enough replicas available: required {required}, alive {alive}"
            ),
            Self::ConsistencyNotMet { required, acked } => write!(
                f,
                "consistency not met: required {required} replica responses, got {acked}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted row data: {message}"),
            Self::Backend(err) => write!(f, "{err}"),
        }
    }
}

impl From<DbError> for StoreFailure {
    fn from(value: DbError) -> Self {
        if value.is_timeout() {
            Self::Timeout
        } else {
            Self::Backend(value)
        }
    }
}

impl From<rusqlite::Error> for StoreFailure {
    fn from(value: rusqlite::Error) -> Self {
        DbError::Sqlite(value).into()
    }
}

/// Facade-level operation error.
#[derive(Debug)]
pub enum StoreError {
    Write(StoreFailure),
    Read(StoreFailure),
    /// Rejected before any replica was contacted.
    InvalidArgument(&'static str),
}

impl StoreError {
    pub fn failure(&self) -> Option<&StoreFailure> {
        match self {
            Self::Write(failure) | Self::Read(failure) => Some(failure),
            Self::InvalidArgument(_) => None,
        }
    }

    /// Timeouts are inconclusive: the mutation may or may not have applied.
    pub fn is_timeout(&self) -> bool {
        matches!(self.failure(), Some(StoreFailure::Timeout))
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write(failure) => write!(f, "write failed: {failure}"),
            Self::Read(failure) => write!(f, "read failed: {failure}"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.failure() {
            Some(StoreFailure::Backend(err)) => Some(err),
            _ => None,
        }
    }
}

/// Session establishment failure.
#[derive(Debug)]
pub enum ConnectionError {
    InvalidConfig(ConfigError),
    /// Every endpoint failed to open; one entry per endpoint.
    NoReachableEndpoint(Vec<(String, DbError)>),
    /// Nodes opened but the whole bootstrap exceeded `connect_timeout`.
    Timeout { elapsed_ms: u128 },
}

impl ConnectionError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::NoReachableEndpoint(attempts) => {
                !attempts.is_empty() && attempts.iter().all(|(_, err)| err.is_timeout())
            }
            Self::InvalidConfig(_) => false,
        }
    }
}

impl Display for ConnectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(err) => write!(f, "invalid session config: {err}"),
            Self::NoReachableEndpoint(attempts) => {
                write!(f, "no endpoint reachable")?;
                for (endpoint, err) in attempts {
                    write!(f, "; {endpoint}: {err}")?;
                }
                Ok(())
            }
            Self::Timeout { elapsed_ms } => {
                write!(f, "session not established within connect timeout ({elapsed_ms}ms)")
            }
        }
    }
}

impl Error for ConnectionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidConfig(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for ConnectionError {
    fn from(value: ConfigError) -> Self {
        Self::InvalidConfig(value)
    }
}

/// Single-pass row sequence with a terminal status.
///
/// Iteration yields `Ok(row)` for every row read, then `Err` once if the read
/// failed part-way (or before any row), then ends.
#[derive(Debug)]
pub struct RowCursor {
    rows: std::vec::IntoIter<Row>,
    terminal: Option<StoreError>,
}

impl RowCursor {
    pub fn new(rows: Vec<Row>, terminal: Option<StoreError>) -> Self {
        Self {
            rows: rows.into_iter(),
            terminal,
        }
    }

    pub fn failed(err: StoreError) -> Self {
        Self::new(Vec::new(), Some(err))
    }

    /// Drains the cursor into rows plus the terminal status.
    pub fn into_listing(self) -> Listing {
        let mut rows = Vec::new();
        let mut status = ListingStatus::Complete;
        for item in self {
            match item {
                Ok(row) => rows.push(row),
                Err(err) => status = ListingStatus::Failed(err),
            }
        }
        Listing { rows, status }
    }
}

impl Iterator for RowCursor {
    type Item = StoreResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rows.next() {
            Some(row) => Some(Ok(row)),
            None => self.terminal.take().map(Err),
        }
    }
}

/// Terminal status of a drained listing.
#[derive(Debug)]
pub enum ListingStatus {
    Complete,
    Failed(StoreError),
}

/// Rows observed by one listing, paired with whether the read completed.
#[derive(Debug)]
#[must_use = "check `status` before trusting that `rows` is complete"]
pub struct Listing {
    pub rows: Vec<Row>,
    pub status: ListingStatus,
}

impl Listing {
    pub fn is_complete(&self) -> bool {
        matches!(self.status, ListingStatus::Complete)
    }

    /// Returns the rows only if the read completed.
    pub fn into_result(self) -> StoreResult<Vec<Row>> {
        match self.status {
            ListingStatus::Complete => Ok(self.rows),
            ListingStatus::Failed(err) => Err(err),
        }
    }
}
