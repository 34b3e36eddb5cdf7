//! Read-only platform snapshot for diagnostic reports.

use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Host description attached to every scenario report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub family: &'static str,
    pub available_parallelism: usize,
    pub crate_version: &'static str,
    pub build_mode: &'static str,
}

impl PlatformInfo {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            family: std::env::consts::FAMILY,
            available_parallelism: std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1),
            crate_version: env!("CARGO_PKG_VERSION"),
            build_mode: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
        }
    }
}

impl Display for PlatformInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}
