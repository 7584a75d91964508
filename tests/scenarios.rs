//! End-to-end ring scenarios against the library API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use routing_ring::events::{EventLog, EventSink, FanOut, StationEvent};
use routing_ring::timing::DelayPolicy;
use routing_ring::{
    Conveyor, Coordinator, DelayRange, FixedDelay, RunOptions, Side, StationId, StationOutcome,
    TimingConfig,
};

fn options() -> RunOptions {
    RunOptions {
        timeout: Duration::from_secs(30),
        poll: Duration::from_millis(5),
        ..RunOptions::default()
    }
}

fn fast_random(seed: u64) -> RunOptions {
    RunOptions {
        timing: TimingConfig {
            work: DelayRange::up_to(3),
            backoff: DelayRange::up_to(3),
            input_retry: Duration::ZERO,
            seed: Some(seed),
        },
        ..options()
    }
}

#[test]
fn single_station_ring_shares_one_conveyor() {
    let log = Arc::new(EventLog::new());
    let report = Coordinator::new(options())
        .with_sink(log.clone())
        .with_policy(|_| Box::new(FixedDelay::zero()))
        .run(1, &[3])
        .expect("run");

    assert!(report.is_success());
    assert_eq!(report.stations[0].remaining, 0);
    assert_eq!(log.work_units(Some(0)), 3);
    let online = log.events().into_iter().next().expect("online event");
    assert_eq!(
        online,
        StationEvent::Online {
            station: 0,
            input: 0,
            output: 0,
            workload: 3
        }
    );
    assert_eq!(log.check_exclusion(), Ok(()));
}

#[test]
fn three_station_ring_completes_all_work() {
    let log = Arc::new(EventLog::new());
    let report = Coordinator::new(fast_random(5))
        .with_sink(log.clone())
        .run(3, &[2, 2, 2])
        .expect("run");

    assert!(report.is_success());
    assert_eq!(report.total_work_done(), 6);
    assert_eq!(log.work_units(None), 6);
    let mut wiring: Vec<(StationId, usize, usize)> = log
        .events()
        .iter()
        .filter_map(|event| match *event {
            StationEvent::Online {
                station,
                input,
                output,
                ..
            } => Some((station, input, output)),
            _ => None,
        })
        .collect();
    wiring.sort_unstable();
    assert_eq!(wiring, vec![(0, 0, 1), (1, 1, 2), (2, 2, 0)]);
    assert_eq!(log.check_exclusion(), Ok(()));
}

#[test]
fn idle_peer_does_not_block_busy_peer() {
    let log = Arc::new(EventLog::new());
    let report = Coordinator::new(fast_random(9))
        .with_sink(log.clone())
        .run(2, &[0, 5])
        .expect("run");

    assert!(report.is_success());
    assert_eq!(report.stations[0].work_done(), 0);
    assert_eq!(report.stations[1].work_done(), 5);
    // Station 0 never contends for anything.
    assert!(!log.for_station(0).iter().any(|event| matches!(
        event,
        StationEvent::AcquireAttempt { .. } | StationEvent::Acquired { .. }
    )));
}

#[test]
fn every_ring_size_terminates_under_random_timing() {
    for n in 2..=10usize {
        let log = Arc::new(EventLog::new());
        let workloads: Vec<u32> = (0..n).map(|i| 2 + (i % 3) as u32).collect();
        let report = Coordinator::new(fast_random(n as u64))
            .with_sink(log.clone())
            .run(n, &workloads)
            .expect("run");
        assert!(report.is_success(), "ring of {n} did not finish: {report:?}");
        let expected: u64 = workloads.iter().map(|&w| u64::from(w)).sum();
        assert_eq!(report.total_work_done(), expected);
        assert_eq!(log.check_exclusion(), Ok(()), "ring of {n}");
    }
}

#[test]
fn remaining_work_strictly_decreases_to_zero() {
    let log = Arc::new(EventLog::new());
    let workloads = [4, 3, 5, 2];
    Coordinator::new(fast_random(21))
        .with_sink(log.clone())
        .run(workloads.len(), &workloads)
        .expect("run");

    for (station, &workload) in workloads.iter().enumerate() {
        let remaining: Vec<u32> = log
            .for_station(station)
            .iter()
            .filter_map(|event| match *event {
                StationEvent::WorkCompleted { remaining, .. } => Some(remaining),
                _ => None,
            })
            .collect();
        let expected: Vec<u32> = (0..workload).rev().collect();
        assert_eq!(remaining, expected, "station {station}");
    }
}

#[test]
fn no_acquisition_after_termination() {
    let log = Arc::new(EventLog::new());
    Coordinator::new(fast_random(33))
        .with_sink(log.clone())
        .run(5, &[3, 0, 2, 4, 1])
        .expect("run");

    for station in 0..5 {
        let events = log.for_station(station);
        let terminated = events
            .iter()
            .position(|event| matches!(event, StationEvent::Terminated { .. }))
            .expect("terminated");
        assert_eq!(terminated, events.len() - 1, "station {station}");
        assert!(matches!(
            events[terminated],
            StationEvent::Terminated {
                outcome: StationOutcome::Completed,
                ..
            }
        ));
    }
}

#[test]
fn work_happens_only_while_holding_both_conveyors() {
    let log = Arc::new(EventLog::new());
    Coordinator::new(fast_random(44))
        .with_sink(log.clone())
        .run(4, &[3, 3, 3, 3])
        .expect("run");

    for station in 0..4 {
        let mut held: Vec<Side> = Vec::new();
        for event in log.for_station(station) {
            match event {
                StationEvent::Acquired { side, .. } => {
                    if side == Side::Output {
                        assert_eq!(held, vec![Side::Input], "output before input");
                    }
                    held.push(side);
                }
                StationEvent::Released { side, .. } => held.retain(|s| *s != side),
                StationEvent::WorkStarted { .. } | StationEvent::WorkCompleted { .. } => {
                    assert_eq!(held.len(), 2, "station {station} worked without both")
                }
                StationEvent::AcquireAttempt {
                    side: Side::Input, ..
                } => assert!(held.is_empty(), "input retry while holding"),
                _ => {}
            }
        }
        assert!(held.is_empty());
    }
}

/// Checks, at the moment a station starts backing off, that it no longer
/// owns its input conveyor.
struct BackoffCheck {
    conveyors: Vec<Arc<Conveyor>>,
    violated: AtomicBool,
}

impl EventSink for BackoffCheck {
    fn emit(&self, event: StationEvent) {
        if let StationEvent::BackingOff { station, .. } = event {
            if self.conveyors[station].owner_id() == Some(station) {
                self.violated.store(true, Ordering::SeqCst);
            }
        }
    }
}

#[test]
fn failed_output_acquisition_gives_input_back() {
    // Drive two stations by hand over shared conveyors so the check can see them.
    let conveyors: Vec<Arc<Conveyor>> = (0..2).map(|id| Arc::new(Conveyor::new(id))).collect();
    let check = Arc::new(BackoffCheck {
        conveyors: conveyors.clone(),
        violated: AtomicBool::new(false),
    });
    let log = Arc::new(EventLog::new());
    let sink: Arc<dyn EventSink> = Arc::new(FanOut::new(vec![
        check.clone() as Arc<dyn EventSink>,
        log.clone(),
    ]));
    let cancel = Arc::new(routing_ring::cancel::CancelToken::new());

    let mut handles = Vec::new();
    for id in 0..2usize {
        // Station 1 works slowly so station 0 keeps hitting a busy output.
        let work = Duration::from_millis(if id == 1 { 4 } else { 1 });
        let mut station = routing_ring::Station::new(
            id,
            Arc::clone(&conveyors[id]),
            Arc::clone(&conveyors[(id + 1) % 2]),
            20,
            Box::new(FixedDelay {
                work,
                backoff: Duration::from_millis(1),
                input_retry: Duration::ZERO,
            }),
            Arc::clone(&sink),
        );
        let cancel = Arc::clone(&cancel);
        handles.push(std::thread::spawn(move || station.run(&cancel)));
    }
    for handle in handles {
        assert_eq!(
            handle.join().expect("station panicked"),
            Ok(StationOutcome::Completed)
        );
    }

    assert!(!check.violated.load(Ordering::SeqCst));
    assert_eq!(log.work_units(None), 40);
    assert_eq!(log.check_exclusion(), Ok(()));
    for conveyor in &conveyors {
        assert_eq!(conveyor.owner_id(), None);
    }
}

/// Delays one station's every input attempt so the pair races unevenly.
struct Laggard {
    lag: Duration,
}

impl DelayPolicy for Laggard {
    fn work_duration(&mut self) -> Duration {
        Duration::from_millis(1)
    }

    fn backoff_duration(&mut self) -> Duration {
        self.lag
    }

    fn input_retry(&mut self) -> Duration {
        self.lag
    }
}

#[test]
fn induced_contention_keeps_exclusion_and_progress() {
    let log = Arc::new(EventLog::new());
    let report = Coordinator::new(options())
        .with_sink(log.clone())
        .with_policy(|station: StationId| {
            let lag = if station == 0 {
                Duration::from_millis(2)
            } else {
                Duration::ZERO
            };
            Box::new(Laggard { lag })
        })
        .run(2, &[15, 15])
        .expect("run");

    assert!(report.is_success());
    assert_eq!(log.work_units(Some(0)), 15);
    assert_eq!(log.work_units(Some(1)), 15);
    assert_eq!(log.check_exclusion(), Ok(()));
}
