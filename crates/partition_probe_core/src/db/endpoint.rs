//! Endpoint addressing for replica nodes.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

const FILE_SCHEME: &str = "file:";
const MEMORY_SCHEME: &str = "memory:";

/// One configured cluster entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Node data lives in `<dir>/<keyspace>.sqlite3`.
    File(PathBuf),
    /// Shared-cache in-memory node, alive while any connection holds it.
    Memory(String),
    /// `host:port` address; reachable only through a network driver.
    Remote(String),
}

impl Endpoint {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(path) = trimmed.strip_prefix(FILE_SCHEME) {
            return Self::File(PathBuf::from(path));
        }
        if let Some(name) = trimmed.strip_prefix(MEMORY_SCHEME) {
            return Self::Memory(name.to_string());
        }
        Self::Remote(trimmed.to_string())
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{FILE_SCHEME}{}", path.display()),
            Self::Memory(name) => write!(f, "{MEMORY_SCHEME}{name}"),
            Self::Remote(addr) => f.write_str(addr),
        }
    }
}
