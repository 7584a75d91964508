//! Ring of routing stations sharing conveyors.
//!
//! Each station needs exclusive use of two conveyors, its input and its
//! output, to move one package group. Station `i` outputs onto the conveyor
//! station `i + 1` takes as input, so the resources form a cycle. Stations
//! avoid deadlock by never waiting on the output while holding the input.

pub mod logging;

pub mod cancel;
pub mod config;
pub mod conveyor;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod health_monitor;
pub mod station;
pub mod timing;
pub mod types;

pub use config::{MAX_STATIONS, WorkloadFile};
pub use conveyor::Conveyor;
pub use coordinator::{Coordinator, RunOptions, RunReport, StationReport, run_simulation};
pub use error::{ConfigError, ProtocolError, RunError};
pub use events::{EventLog, EventSink, StationEvent};
pub use station::{StateWatch, Station};
pub use timing::{DelayPolicy, DelayRange, FixedDelay, RandomDelay, TimingConfig};
pub use types::{ConveyorId, Side, StationId, StationOutcome, StationState};
