//! Lockable conveyor shared by two neighbouring stations.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ProtocolError;
use crate::types::{ConveyorId, StationId};

// Holder value meaning "nobody"; station ids are ring indices and never reach it.
const FREE: usize = usize::MAX;

/// A non-reentrant, single-owner conveyor.
///
/// Acquisition never blocks or queues: [`Conveyor::try_acquire`] either takes
/// the conveyor immediately or reports that somebody else has it.
#[derive(Debug)]
pub struct Conveyor {
    id: ConveyorId,
    holder: AtomicUsize,
}

impl Conveyor {
    /// Create a free conveyor with a stable id.
    pub fn new(id: ConveyorId) -> Self {
        Self {
            id,
            holder: AtomicUsize::new(FREE),
        }
    }

    pub fn id(&self) -> ConveyorId {
        self.id
    }

    /// Take exclusive ownership if the conveyor is free.
    ///
    /// Returns `Ok(false)` when another station holds it. Asking for a
    /// conveyor the caller already holds is a protocol violation.
    pub fn try_acquire(&self, station: StationId) -> Result<bool, ProtocolError> {
        debug_assert!(station != FREE, "station id collides with free marker");
        match self
            .holder
            .compare_exchange(FREE, station, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(true),
            Err(current) if current == station => {
                tracing::error!(conveyor = self.id, station, "conveyor acquired twice");
                debug_assert!(
                    false,
                    "conveyor acquired twice: conveyor={} station={station}",
                    self.id
                );
                Err(ProtocolError::DoubleAcquire {
                    conveyor: self.id,
                    station,
                })
            }
            Err(_) => Ok(false),
        }
    }

    /// Give the conveyor back. Only the current holder may do this.
    pub fn release(&self, station: StationId) -> Result<(), ProtocolError> {
        match self
            .holder
            .compare_exchange(station, FREE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(current) => {
                let holder = (current != FREE).then_some(current);
                tracing::error!(
                    conveyor = self.id,
                    station,
                    ?holder,
                    "conveyor release by non-holder"
                );
                debug_assert!(
                    false,
                    "conveyor release by non-holder: conveyor={} station={station} holder={holder:?}",
                    self.id
                );
                Err(ProtocolError::ReleaseByNonHolder {
                    conveyor: self.id,
                    station,
                    holder,
                })
            }
        }
    }

    /// Current holder, for diagnostics only. May be stale by the time it is read.
    pub fn owner_id(&self) -> Option<StationId> {
        let current = self.holder.load(Ordering::Acquire);
        (current != FREE).then_some(current)
    }
}
