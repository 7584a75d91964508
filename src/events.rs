//! Structured station events and the sinks that consume them.
//!
//! The core never prints. Stations report every protocol step as a
//! [`StationEvent`] to an [`EventSink`]; what happens to it (recording,
//! tracing, rendering to a console) is up to the caller.
//!
//! Ordering: `Acquired` is emitted after the conveyor is taken and
//! `Released` before it is given back, so any serialized log shows a
//! conveyor's release ahead of the next holder's acquisition.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::types::{ConveyorId, Side, StationId, StationOutcome};

/// One observable step of a station's lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StationEvent {
    Online {
        station: StationId,
        input: ConveyorId,
        output: ConveyorId,
        workload: u32,
    },
    AcquireAttempt {
        station: StationId,
        conveyor: ConveyorId,
        side: Side,
    },
    Acquired {
        station: StationId,
        conveyor: ConveyorId,
        side: Side,
    },
    AcquireFailed {
        station: StationId,
        conveyor: ConveyorId,
        side: Side,
        held_by: Option<StationId>,
    },
    BackingOff {
        station: StationId,
        delay: Duration,
    },
    WorkStarted {
        station: StationId,
    },
    WorkCompleted {
        station: StationId,
        remaining: u32,
    },
    Released {
        station: StationId,
        conveyor: ConveyorId,
        side: Side,
        remaining: u32,
    },
    Terminated {
        station: StationId,
        outcome: StationOutcome,
    },
}

impl StationEvent {
    pub fn station(&self) -> StationId {
        match *self {
            StationEvent::Online { station, .. }
            | StationEvent::AcquireAttempt { station, .. }
            | StationEvent::Acquired { station, .. }
            | StationEvent::AcquireFailed { station, .. }
            | StationEvent::BackingOff { station, .. }
            | StationEvent::WorkStarted { station }
            | StationEvent::WorkCompleted { station, .. }
            | StationEvent::Released { station, .. }
            | StationEvent::Terminated { station, .. } => station,
        }
    }
}

impl fmt::Display for StationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationEvent::Online {
                station,
                input,
                output,
                workload,
            } => write!(
                f,
                "Routing Station S{station}: coming online - input conveyor C{input}, output conveyor C{output}, workload {workload} package group(s)"
            ),
            StationEvent::AcquireAttempt {
                station,
                conveyor,
                side,
            } => write!(f, "Routing Station S{station}: requesting {side} conveyor C{conveyor}"),
            StationEvent::Acquired {
                station,
                conveyor,
                side,
            } => write!(f, "Routing Station S{station}: holds lock on {side} conveyor C{conveyor}"),
            StationEvent::AcquireFailed {
                station,
                conveyor,
                side,
                held_by,
            } => {
                let side = side.to_string().to_uppercase();
                match held_by {
                    Some(holder) => write!(
                        f,
                        "Routing Station S{station}: UNABLE TO LOCK {side} CONVEYOR C{conveyor} - held by S{holder}"
                    ),
                    None => write!(
                        f,
                        "Routing Station S{station}: UNABLE TO LOCK {side} CONVEYOR C{conveyor}"
                    ),
                }
            }
            StationEvent::BackingOff { station, delay } => write!(
                f,
                "Routing Station S{station}: released input, backing off {}ms",
                delay.as_millis()
            ),
            StationEvent::WorkStarted { station } => write!(
                f,
                "Routing Station S{station}: holds both conveyors - moving packages"
            ),
            StationEvent::WorkCompleted { station, remaining } => write!(
                f,
                "Routing Station S{station}: package group completed - {remaining} package group(s) remaining"
            ),
            StationEvent::Released {
                station,
                conveyor,
                side,
                ..
            } => write!(f, "Routing Station S{station}: unlocks/releases {side} conveyor C{conveyor}"),
            StationEvent::Terminated { station, outcome } => match outcome {
                StationOutcome::Completed => {
                    write!(f, "Routing Station S{station}: OFFLINE - work completed")
                }
                StationOutcome::Cancelled => {
                    write!(f, "Routing Station S{station}: OFFLINE - cancelled")
                }
            },
        }
    }
}

/// Consumer of station events. Called concurrently from every station thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StationEvent);
}

/// Drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: StationEvent) {}
}

/// Forwards each event to `tracing` at info level.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: StationEvent) {
        tracing::info!(station = event.station(), "{event}");
    }
}

/// Forwards each event to several sinks, in order.
pub struct FanOut {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanOut {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanOut {
    fn emit(&self, event: StationEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Two stations were seen holding the same conveyor at once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExclusionViolation {
    pub conveyor: ConveyorId,
    pub holder: StationId,
    pub intruder: StationId,
}

/// In-order record of every event, for assertions and summaries.
pub struct EventLog {
    events: Mutex<Vec<StationEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<StationEvent> {
        self.events.lock().expect("event log mutex poisoned").clone()
    }

    pub fn for_station(&self, station: StationId) -> Vec<StationEvent> {
        let guard = self.events.lock().expect("event log mutex poisoned");
        guard
            .iter()
            .filter(|event| event.station() == station)
            .cloned()
            .collect()
    }

    /// Number of completed work units, for one station or all of them.
    pub fn work_units(&self, station: Option<StationId>) -> usize {
        let guard = self.events.lock().expect("event log mutex poisoned");
        guard
            .iter()
            .filter(|event| matches!(event, StationEvent::WorkCompleted { .. }))
            .filter(|event| station.is_none_or(|id| event.station() == id))
            .count()
    }

    /// Replay acquisitions and releases and report the first overlap.
    pub fn check_exclusion(&self) -> Result<(), ExclusionViolation> {
        let guard = self.events.lock().expect("event log mutex poisoned");
        let mut holders: HashMap<ConveyorId, StationId> = HashMap::new();
        for event in guard.iter() {
            match *event {
                StationEvent::Acquired {
                    station, conveyor, ..
                } => {
                    if let Some(&holder) = holders.get(&conveyor) {
                        return Err(ExclusionViolation {
                            conveyor,
                            holder,
                            intruder: station,
                        });
                    }
                    holders.insert(conveyor, station);
                }
                StationEvent::Released { conveyor, .. } => {
                    holders.remove(&conveyor);
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("event log mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: StationEvent) {
        self.events
            .lock()
            .expect("event log mutex poisoned")
            .push(event);
    }
}

/// Lock-free per-conveyor occupancy counters.
///
/// Cheaper than [`EventLog`] for long benchmark runs: it only tracks how
/// many stations currently hold each conveyor and flags any count above one.
pub struct OccupancyProbe {
    per_conveyor: Vec<AtomicUsize>,
    max_occupancy: AtomicUsize,
    violation: AtomicBool,
}

impl OccupancyProbe {
    pub fn new(conveyors: usize) -> Self {
        Self {
            per_conveyor: (0..conveyors).map(|_| AtomicUsize::new(0)).collect(),
            max_occupancy: AtomicUsize::new(0),
            violation: AtomicBool::new(false),
        }
    }

    fn enter(&self, conveyor: ConveyorId) {
        let Some(slot) = self.per_conveyor.get(conveyor) else {
            self.violation.store(true, Ordering::SeqCst);
            return;
        };
        let current = slot.fetch_add(1, Ordering::SeqCst) + 1;
        if current > 1 {
            self.violation.store(true, Ordering::SeqCst);
        }
        let mut prev = self.max_occupancy.load(Ordering::SeqCst);
        while current > prev {
            match self.max_occupancy.compare_exchange(
                prev,
                current,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(next) => prev = next,
            }
        }
    }

    fn leave(&self, conveyor: ConveyorId) {
        if let Some(slot) = self.per_conveyor.get(conveyor) {
            let prev = slot.fetch_sub(1, Ordering::SeqCst);
            debug_assert!(prev > 0, "conveyor occupancy underflow");
        }
    }

    /// Highest number of simultaneous holders seen on any one conveyor.
    pub fn max_occupancy(&self) -> usize {
        self.max_occupancy.load(Ordering::SeqCst)
    }

    pub fn has_violation(&self) -> bool {
        self.violation.load(Ordering::SeqCst)
    }
}

impl EventSink for OccupancyProbe {
    fn emit(&self, event: StationEvent) {
        match event {
            StationEvent::Acquired { conveyor, .. } => self.enter(conveyor),
            StationEvent::Released { conveyor, .. } => self.leave(conveyor),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acquired(station: StationId, conveyor: ConveyorId) -> StationEvent {
        StationEvent::Acquired {
            station,
            conveyor,
            side: Side::Input,
        }
    }

    fn released(station: StationId, conveyor: ConveyorId) -> StationEvent {
        StationEvent::Released {
            station,
            conveyor,
            side: Side::Input,
            remaining: 0,
        }
    }

    #[test]
    fn exclusion_check_accepts_handover() {
        let log = EventLog::new();
        log.emit(acquired(0, 1));
        log.emit(released(0, 1));
        log.emit(acquired(1, 1));
        assert_eq!(log.check_exclusion(), Ok(()));
    }

    #[test]
    fn exclusion_check_reports_overlap() {
        let log = EventLog::new();
        log.emit(acquired(0, 1));
        log.emit(acquired(2, 1));
        assert_eq!(
            log.check_exclusion(),
            Err(ExclusionViolation {
                conveyor: 1,
                holder: 0,
                intruder: 2,
            })
        );
    }

    #[test]
    fn work_units_filter_by_station() {
        let log = EventLog::new();
        log.emit(StationEvent::WorkCompleted {
            station: 0,
            remaining: 1,
        });
        log.emit(StationEvent::WorkCompleted {
            station: 1,
            remaining: 0,
        });
        log.emit(StationEvent::WorkCompleted {
            station: 0,
            remaining: 0,
        });
        assert_eq!(log.work_units(None), 3);
        assert_eq!(log.work_units(Some(0)), 2);
        assert_eq!(log.for_station(1).len(), 1);
    }

    #[test]
    fn occupancy_probe_flags_double_holder() {
        let probe = OccupancyProbe::new(2);
        probe.emit(acquired(0, 0));
        probe.emit(released(0, 0));
        probe.emit(acquired(1, 0));
        assert!(!probe.has_violation());
        assert_eq!(probe.max_occupancy(), 1);
        probe.emit(acquired(0, 0));
        assert!(probe.has_violation());
        assert_eq!(probe.max_occupancy(), 2);
    }

    #[test]
    fn fan_out_reaches_every_sink() {
        let first = Arc::new(EventLog::new());
        let second = Arc::new(EventLog::new());
        let fan = FanOut::new(vec![first.clone() as Arc<dyn EventSink>, second.clone()]);
        fan.emit(StationEvent::WorkStarted { station: 4 });
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn failed_acquire_renders_holder() {
        let line = StationEvent::AcquireFailed {
            station: 1,
            conveyor: 2,
            side: Side::Output,
            held_by: Some(2),
        }
        .to_string();
        assert_eq!(
            line,
            "Routing Station S1: UNABLE TO LOCK OUTPUT CONVEYOR C2 - held by S2"
        );
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("capture poisoned").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn tracing_sink_logs_rendered_event() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            TracingSink.emit(StationEvent::WorkCompleted {
                station: 2,
                remaining: 4,
            });
        });

        let bytes = captured.0.lock().expect("capture poisoned").clone();
        let output = String::from_utf8(bytes).expect("utf8 log");
        assert!(output.contains("INFO"), "log: {output}");
        assert!(output.contains("station=2"), "log: {output}");
        assert!(
            output.contains("Routing Station S2: package group completed - 4 package group(s) remaining"),
            "log: {output}"
        );
    }
}
