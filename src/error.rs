//! Error taxonomy for configuration, protocol misuse, and run failures.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ConveyorId, StationId};

/// Rejected configuration; nothing has been started when this is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("station count {count} out of range (1..={max})")]
    StationCountOutOfRange { count: usize, max: usize },
    #[error("line {line}: station count {value} must be at least 1")]
    NonPositiveStationCount { line: usize, value: i64 },
    #[error("workload list has {actual} entries, expected {expected}")]
    WorkloadLengthMismatch { expected: usize, actual: usize },
    #[error("station {station} has negative workload {value}")]
    NegativeWorkload { station: StationId, value: i64 },
    #[error("line {line}: not an integer: {text:?}")]
    InvalidNumber { line: usize, text: String },
    #[error("workload file is missing the station count")]
    MissingStationCount,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Misuse of the conveyor acquire/release contract. Indicates a bug in the
/// station state machine, never a runtime condition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("conveyor C{conveyor} released by S{station} but held by {holder:?}")]
    ReleaseByNonHolder {
        conveyor: ConveyorId,
        station: StationId,
        holder: Option<StationId>,
    },
    #[error("conveyor C{conveyor} acquired twice by S{station}")]
    DoubleAcquire {
        conveyor: ConveyorId,
        station: StationId,
    },
}

/// Failure of a whole simulation run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("failed to spawn station thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("station S{0} panicked")]
    StationPanicked(StationId),
}
