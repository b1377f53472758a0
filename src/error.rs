//! Error types shared by the sweeper, the prober and the scanner.
use std::io;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Errors surfaced to the caller before or instead of a [`ScanReport`].
///
/// Per-target network failures never show up here, they are carried as
/// data inside each [`ProbeResult`].
///
/// [`ScanReport`]: crate::report::ScanReport
/// [`ProbeResult`]: crate::scanner::ProbeResult
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid IP address format: {0}")]
    InvalidRange(String),

    #[error("Range {range} is too large to sweep, at most {max} addresses are allowed")]
    RangeTooLarge { range: String, max: u128 },

    #[error("Invalid port range {start}-{end}: ports must satisfy 1 <= start <= end <= 65535")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("Host discovery failed: {0}")]
    Discovery(String),
}

/// Why a single probe did not end in a clean `Open`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("{message} ({kind:?})")]
    Io { kind: io::ErrorKind, message: String },

    #[error("probe cancelled before completion")]
    Cancelled,

    #[error("probe task panicked: {0}")]
    Panicked(String),
}

impl ProbeError {
    pub fn kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io { kind, .. } => Some(*kind),
            Self::Cancelled | Self::Panicked(_) => None,
        }
    }
}

impl From<io::Error> for ProbeError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl Serialize for ProbeError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
