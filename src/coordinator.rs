//! Ring construction and run lifecycle.
//!
//! The coordinator wires `n` conveyors and `n` stations into a ring
//! (station `i` takes conveyor `i` as input and `(i + 1) % n` as output),
//! runs every station on its own thread, and waits for all of them under a
//! global timeout. On timeout every station is cancelled at its next
//! suspension point and gives back whatever it holds.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::{MAX_STATIONS, ring_wiring, validate_ring};
use crate::conveyor::Conveyor;
use crate::error::{ProtocolError, RunError};
use crate::events::{EventSink, NullSink, StationEvent};
use crate::health_monitor::HealthMonitor;
use crate::log_dev;
use crate::station::Station;
use crate::timing::{DelayPolicy, TimingConfig};
use crate::types::{StationId, StationOutcome};

/// Builds the delay policy for each station.
pub type PolicyFactory = dyn Fn(StationId) -> Box<dyn DelayPolicy> + Send + Sync;

/// Knobs for one run.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub max_stations: usize,
    /// Global limit on the whole run; stations still going are cancelled.
    pub timeout: Duration,
    /// Report stations with no completed unit for this long.
    pub stall_threshold: Option<Duration>,
    /// How often the coordinator wakes to check stalls and the deadline.
    pub poll: Duration,
    pub timing: TimingConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_stations: MAX_STATIONS,
            timeout: Duration::from_secs(60),
            stall_threshold: None,
            poll: Duration::from_millis(50),
            timing: TimingConfig::default(),
        }
    }
}

/// Final state of one station.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StationReport {
    pub station: StationId,
    pub outcome: StationOutcome,
    pub initial_workload: u32,
    pub remaining: u32,
}

impl StationReport {
    pub fn work_done(&self) -> u32 {
        self.initial_workload - self.remaining
    }
}

/// Aggregate result of a run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub stations: Vec<StationReport>,
    pub elapsed: Duration,
    pub timed_out: bool,
    /// Stations that went longer than the stall threshold without progress.
    pub stalled: Vec<StationId>,
}

impl RunReport {
    /// True when every station worked its way down to zero.
    pub fn is_success(&self) -> bool {
        self.stations
            .iter()
            .all(|report| report.outcome.is_completed())
    }

    /// Stations that did not terminate normally.
    pub fn unfinished(&self) -> Vec<StationId> {
        self.stations
            .iter()
            .filter(|report| !report.outcome.is_completed())
            .map(|report| report.station)
            .collect()
    }

    pub fn total_work_done(&self) -> u64 {
        self.stations
            .iter()
            .map(|report| u64::from(report.work_done()))
            .sum()
    }
}

// Feeds progress into the health monitor on the way to the caller's sink.
struct ProgressSink {
    monitor: Arc<HealthMonitor>,
    inner: Arc<dyn EventSink>,
}

impl EventSink for ProgressSink {
    fn emit(&self, event: StationEvent) {
        match event {
            StationEvent::WorkCompleted { station, .. } => self.monitor.heartbeat(station),
            StationEvent::Terminated { station, .. } => self.monitor.retire(station),
            _ => {}
        }
        self.inner.emit(event);
    }
}

type Finished = (StationId, Result<StationOutcome, ProtocolError>, u32);

/// Runs rings of stations to completion.
pub struct Coordinator {
    options: RunOptions,
    sink: Arc<dyn EventSink>,
    policies: Option<Box<PolicyFactory>>,
}

impl Coordinator {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            sink: Arc::new(NullSink),
            policies: None,
        }
    }

    /// Receive every station event.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the timing-derived delay policy, e.g. with fixed delays in tests.
    pub fn with_policy<F>(mut self, factory: F) -> Self
    where
        F: Fn(StationId) -> Box<dyn DelayPolicy> + Send + Sync + 'static,
    {
        self.policies = Some(Box::new(factory));
        self
    }

    fn policy_for(&self, station: StationId) -> Box<dyn DelayPolicy> {
        match &self.policies {
            Some(factory) => factory(station),
            None => Box::new(self.options.timing.policy_for(station)),
        }
    }

    /// Build the ring, run it, and block until every station has exited.
    ///
    /// Configuration problems are rejected before any thread starts.
    pub fn run(&self, station_count: usize, workloads: &[u32]) -> Result<RunReport, RunError> {
        validate_ring(station_count, workloads, self.options.max_stations)?;

        let conveyors: Vec<Arc<Conveyor>> = (0..station_count)
            .map(|id| Arc::new(Conveyor::new(id)))
            .collect();
        let monitor = Arc::new(HealthMonitor::new());
        let sink: Arc<dyn EventSink> = Arc::new(ProgressSink {
            monitor: Arc::clone(&monitor),
            inner: Arc::clone(&self.sink),
        });
        let cancel = Arc::new(CancelToken::new());
        let (done_tx, done_rx) = mpsc::channel::<Finished>();

        info!(stations = station_count, "ring simulation starting");
        let start = Instant::now();

        let mut handles = Vec::with_capacity(station_count);
        let mut states = Vec::with_capacity(station_count);
        for (id, &workload) in workloads.iter().enumerate() {
            let (input, output) = ring_wiring(id, station_count);
            log_dev!("[RING] S{id}: input C{input} output C{output} workload={workload}");
            monitor.register_station(id);

            let mut station = Station::new(
                id,
                Arc::clone(&conveyors[input]),
                Arc::clone(&conveyors[output]),
                workload,
                self.policy_for(id),
                Arc::clone(&sink),
            );
            states.push(station.watch_state());
            let station_cancel = Arc::clone(&cancel);
            let done_tx = done_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("station-{id}"))
                .spawn(move || {
                    let result = station.run(&station_cancel);
                    let _ = done_tx.send((id, result, station.remaining()));
                });
            match spawned {
                Ok(handle) => handles.push((id, handle)),
                Err(err) => {
                    warn!(station = id, "failed to spawn station thread: {err}");
                    cancel.cancel();
                    for (_, handle) in handles {
                        let _ = handle.join();
                    }
                    return Err(RunError::Spawn(err));
                }
            }
        }
        // Only station threads hold senders now; disconnect means they are all gone.
        drop(done_tx);

        let mut finished: Vec<Slot> = (0..station_count).map(|_| None).collect();
        let mut received = 0;
        let mut timed_out = false;
        // A timeout too large to represent as an instant never fires.
        let deadline = start.checked_add(self.options.timeout);
        while received < station_count {
            let now = Instant::now();
            if !timed_out && deadline.is_some_and(|deadline| now >= deadline) {
                timed_out = true;
                warn!(
                    timeout_ms = self.options.timeout.as_millis() as u64,
                    pending = station_count - received,
                    "run timed out; cancelling remaining stations"
                );
                cancel.cancel();
            }
            let wait = match deadline {
                Some(deadline) if !timed_out => {
                    deadline.saturating_duration_since(now).min(self.options.poll)
                }
                _ => self.options.poll,
            };
            match done_rx.recv_timeout(wait) {
                Ok((id, result, remaining)) => {
                    finished[id] = Some((result, remaining));
                    received += 1;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if let Some(threshold) = self.options.stall_threshold {
                for station in monitor.detect_stalled(threshold) {
                    warn!(
                        station,
                        state = %states[station].get(),
                        threshold_ms = threshold.as_millis() as u64,
                        "station made no progress within threshold"
                    );
                }
            }
        }

        for (id, handle) in handles {
            if handle.join().is_err() {
                return Err(RunError::StationPanicked(id));
            }
        }

        let stations = collect_reports(finished, workloads)?;

        let report = RunReport {
            stations,
            elapsed: start.elapsed(),
            timed_out,
            stalled: monitor.stalled_stations(),
        };
        info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            work_units = report.total_work_done(),
            success = report.is_success(),
            "ring simulation finished"
        );
        Ok(report)
    }
}

type Slot = Option<(Result<StationOutcome, ProtocolError>, u32)>;

// A station that sent nothing unwound before reporting; a protocol error
// from any station fails the whole run.
fn collect_reports(finished: Vec<Slot>, workloads: &[u32]) -> Result<Vec<StationReport>, RunError> {
    let mut stations = Vec::with_capacity(finished.len());
    for (id, slot) in finished.into_iter().enumerate() {
        let Some((result, remaining)) = slot else {
            return Err(RunError::StationPanicked(id));
        };
        stations.push(StationReport {
            station: id,
            outcome: result?,
            initial_workload: workloads[id],
            remaining,
        });
    }
    Ok(stations)
}

/// Run one ring with the given options and event sink.
pub fn run_simulation(
    station_count: usize,
    workloads: &[u32],
    options: RunOptions,
    sink: Arc<dyn EventSink>,
) -> Result<RunReport, RunError> {
    Coordinator::new(options)
        .with_sink(sink)
        .run(station_count, workloads)
}
