//! Progress heartbeats and stall detection for stations.
//!
//! A station heartbeats each time it finishes a unit of work. Under heavy
//! contention a station can go a long time without winning both conveyors;
//! the monitor makes that visible without influencing the protocol.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::StationId;

struct HealthState {
    last_progress: HashMap<StationId, Instant>,
    stalled: HashSet<StationId>,
}

/// Tracks per-station progress and reports stations that stop making it.
pub struct HealthMonitor {
    state: Mutex<HealthState>,
}

impl HealthMonitor {
    fn overdue_stations(state: &HealthState, now: Instant, threshold: Duration) -> Vec<StationId> {
        state
            .last_progress
            .iter()
            .filter_map(|(&station, &last)| {
                if now.duration_since(last) > threshold {
                    Some(station)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn new() -> Self {
        Self {
            state: Mutex::new(HealthState {
                last_progress: HashMap::new(),
                stalled: HashSet::new(),
            }),
        }
    }

    /// Start tracking a station; no-op if already registered.
    pub fn register_station(&self, station: StationId) {
        let mut guard = self.state.lock().expect("health monitor mutex poisoned");
        guard.last_progress.entry(station).or_insert_with(Instant::now);
    }

    /// Record progress for a station.
    pub fn heartbeat(&self, station: StationId) {
        let mut guard = self.state.lock().expect("health monitor mutex poisoned");
        guard.last_progress.insert(station, Instant::now());
    }

    /// Stop tracking a station that has left its work loop.
    ///
    /// A stall recorded earlier in the run is kept for the report.
    pub fn retire(&self, station: StationId) {
        let mut guard = self.state.lock().expect("health monitor mutex poisoned");
        guard.last_progress.remove(&station);
    }

    /// Mark tracked stations without progress for longer than `threshold`.
    ///
    /// Returns only the stations newly marked by this call.
    pub fn detect_stalled(&self, threshold: Duration) -> Vec<StationId> {
        let mut guard = self.state.lock().expect("health monitor mutex poisoned");
        let now = Instant::now();
        // Collect first to avoid mutating while iterating.
        let overdue = Self::overdue_stations(&guard, now, threshold);
        let mut fresh: Vec<StationId> = overdue
            .into_iter()
            .filter(|station| guard.stalled.insert(*station))
            .collect();
        fresh.sort_unstable();
        fresh
    }

    /// Every station that was marked stalled at some point, sorted.
    pub fn stalled_stations(&self) -> Vec<StationId> {
        let guard = self.state.lock().expect("health monitor mutex poisoned");
        let mut stalled: Vec<StationId> = guard.stalled.iter().copied().collect();
        stalled.sort_unstable();
        stalled
    }

    #[cfg(test)]
    fn set_last_progress_for_test(&self, station: StationId, instant: Instant) {
        let mut guard = self.state.lock().expect("health monitor mutex poisoned");
        guard.last_progress.insert(station, instant);
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_stall_after_threshold() {
        let monitor = HealthMonitor::new();
        let past = Instant::now() - Duration::from_millis(50);
        monitor.set_last_progress_for_test(3, past);
        assert_eq!(monitor.detect_stalled(Duration::from_millis(10)), vec![3]);
        assert_eq!(monitor.stalled_stations(), vec![3]);
    }

    #[test]
    fn reports_each_stall_once() {
        let monitor = HealthMonitor::new();
        let past = Instant::now() - Duration::from_secs(5);
        monitor.set_last_progress_for_test(1, past);
        assert_eq!(monitor.detect_stalled(Duration::from_secs(1)), vec![1]);
        assert!(monitor.detect_stalled(Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn fresh_heartbeat_is_not_stalled() {
        let monitor = HealthMonitor::new();
        monitor.register_station(0);
        monitor.heartbeat(0);
        assert!(monitor.detect_stalled(Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn retired_station_is_never_marked() {
        let monitor = HealthMonitor::new();
        let past = Instant::now() - Duration::from_secs(5);
        monitor.set_last_progress_for_test(2, past);
        monitor.retire(2);
        assert!(monitor.detect_stalled(Duration::from_millis(1)).is_empty());
        assert!(monitor.stalled_stations().is_empty());
    }
}
