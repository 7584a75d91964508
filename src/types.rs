//! Shared identifiers and small value types used across the ring.

use std::fmt;

/// Unique identifier for a routing station (worker thread).
pub type StationId = usize;
/// Unique identifier for a conveyor (shared resource).
pub type ConveyorId = usize;

/// Which of its two conveyors a station is dealing with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Input,
    Output,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Input => f.write_str("input"),
            Side::Output => f.write_str("output"),
        }
    }
}

/// How a station left its work loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StationOutcome {
    /// Remaining work reached zero.
    Completed,
    /// The run was cancelled (global timeout) before the work ran out.
    Cancelled,
}

impl StationOutcome {
    pub fn is_completed(self) -> bool {
        self == StationOutcome::Completed
    }
}

impl fmt::Display for StationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationOutcome::Completed => f.write_str("completed"),
            StationOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Position of a station inside its acquire/work/release cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StationState {
    Idle = 0,
    AcquiringInput,
    AcquiringOutput,
    Working,
    Releasing,
    Terminated,
    Cancelled,
}

impl StationState {
    /// True once the station will never attempt another acquisition.
    pub fn is_terminal(self) -> bool {
        matches!(self, StationState::Terminated | StationState::Cancelled)
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => StationState::Idle,
            1 => StationState::AcquiringInput,
            2 => StationState::AcquiringOutput,
            3 => StationState::Working,
            4 => StationState::Releasing,
            5 => StationState::Terminated,
            _ => StationState::Cancelled,
        }
    }
}

impl fmt::Display for StationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StationState::Idle => "idle",
            StationState::AcquiringInput => "acquiring-input",
            StationState::AcquiringOutput => "acquiring-output",
            StationState::Working => "working",
            StationState::Releasing => "releasing",
            StationState::Terminated => "terminated",
            StationState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
