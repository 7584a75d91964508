//! Demo, workload-file, benchmark, and stress runners for the routing ring.
//!
//! These are the only places that write to stdout; the library reports
//! through events and `tracing`.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use routing_ring::events::{EventLog, EventSink, FanOut, OccupancyProbe, StationEvent};
use routing_ring::events::TracingSink;
use routing_ring::{
    ConfigError, Coordinator, DelayRange, MAX_STATIONS, RunError, RunOptions, RunReport,
    TimingConfig, WorkloadFile,
};

// Demo timing knobs (small for quick CLI feedback).
const DEMO_WORKLOADS: [u32; 3] = [3, 2, 4];
const DEMO_WORK_MS: u64 = 20;
const DEMO_BACKOFF_MS: u64 = 10;
const DEMO_STALL_MS: u64 = 2000;
// Stress sweep defaults.
const STRESS_STATION_SETS: [usize; 5] = [2, 3, 5, 8, 10];
const STRESS_WORKLOAD_SETS: [u32; 3] = [5, 10, 25];

const CSV_HEADER: &str = "stations,workload,work_ms,total_units,elapsed_ms,throughput_units_per_s,cpu_user_s,cpu_sys_s,max_occupancy,exclusion_violation,unfinished";

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    // SAFETY: rusage is plain old data; getrusage fills it in or fails.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let user = usage.ru_utime.tv_sec as f64 + (usage.ru_utime.tv_usec as f64 / 1_000_000.0);
    let sys = usage.ru_stime.tv_sec as f64 + (usage.ru_stime.tv_usec as f64 / 1_000_000.0);
    Some((user, sys))
}

/// Stub on non-Unix platforms.
#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// Prints every event as a narrative line.
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: StationEvent) {
        match event {
            StationEvent::Online { .. } | StationEvent::Terminated { .. } => {
                println!("\n*** {event} ***\n")
            }
            StationEvent::WorkStarted { .. } | StationEvent::WorkCompleted { .. } => {
                println!("\t*** {event} ***")
            }
            _ => println!("\t{event}"),
        }
    }
}

fn report_exit(report: &RunReport) -> ExitCode {
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Run the built-in three-station ring and print a summary block.
pub fn run_demo() -> Result<ExitCode, RunError> {
    let log = Arc::new(EventLog::new());
    let sink = Arc::new(FanOut::new(vec![
        Arc::new(ConsoleSink) as Arc<dyn EventSink>,
        log.clone(),
    ]));
    let options = RunOptions {
        stall_threshold: Some(Duration::from_millis(DEMO_STALL_MS)),
        timing: TimingConfig {
            work: DelayRange::up_to(DEMO_WORK_MS),
            backoff: DelayRange::up_to(DEMO_BACKOFF_MS),
            ..TimingConfig::default()
        },
        ..RunOptions::default()
    };

    let report = Coordinator::new(options)
        .with_sink(sink)
        .run(DEMO_WORKLOADS.len(), &DEMO_WORKLOADS)?;

    let per_station: Vec<u32> = report.stations.iter().map(|s| s.work_done()).collect();
    println!("DEMO SUMMARY");
    println!(
        "stations={} workload_total={}",
        DEMO_WORKLOADS.len(),
        DEMO_WORKLOADS.iter().sum::<u32>()
    );
    println!("work_units_per_station={per_station:?}");
    println!("work_units_recorded={}", log.work_units(None));
    println!("exclusion_violation={}", log.check_exclusion().is_err());
    println!("unfinished_stations={:?}", report.unfinished());
    println!("stalled_stations={:?}", report.stalled);
    println!("elapsed_ms={}", report.elapsed.as_millis());
    Ok(report_exit(&report))
}

/// Run the ring described by a workload file, narrating every step.
///
/// With `trace` set the events also go to the log at info level.
pub fn run_from_file(path: &Path, options: RunOptions, trace: bool) -> Result<ExitCode, RunError> {
    let file = WorkloadFile::load(path)?;
    file.validate(options.max_stations)?;

    println!("Configuration/Input:");
    println!("\tNumber of Stations: {}", file.station_count);
    for (station, workload) in file.workloads.iter().enumerate() {
        println!("\tStation S{station}: {workload} package group(s)");
    }
    println!("\n*** PACKAGE MANAGEMENT FACILITY SIMULATION BEGINS ***\n");

    let sink: Arc<dyn EventSink> = if trace {
        Arc::new(FanOut::new(vec![
            Arc::new(ConsoleSink) as Arc<dyn EventSink>,
            Arc::new(TracingSink),
        ]))
    } else {
        Arc::new(ConsoleSink)
    };
    let report = Coordinator::new(options)
        .with_sink(sink)
        .run(file.station_count, &file.workloads)?;

    if report.is_success() {
        println!("\n*** ALL WORKLOAD COMPLETED - SIMULATION IS SHUTTING DOWN ***");
    } else {
        println!(
            "\n*** RUN TIMED OUT - UNFINISHED STATIONS: {:?} ***",
            report.unfinished()
        );
    }
    println!("*** THE PACKAGE MANAGEMENT FACILITY SIMULATION HAS ENDED ***");
    Ok(report_exit(&report))
}

/// Aggregated metrics from a single benchmark run.
struct BenchResult {
    stations: usize,
    workload: u32,
    work_ms: u64,
    total_units: u64,
    elapsed_ms: f64,
    throughput: f64,
    cpu_user_s: Option<f64>,
    cpu_sys_s: Option<f64>,
    max_occupancy: usize,
    exclusion_violation: bool,
    unfinished: usize,
}

fn benchmark_once(stations: usize, workload: u32, work_ms: u64) -> Result<BenchResult, RunError> {
    // Size the probe and workload list only for a ring that may actually run.
    if stations == 0 || stations > MAX_STATIONS {
        return Err(ConfigError::StationCountOutOfRange {
            count: stations,
            max: MAX_STATIONS,
        }
        .into());
    }
    let probe = Arc::new(OccupancyProbe::new(stations));
    let options = RunOptions {
        timing: TimingConfig {
            work: DelayRange::up_to(work_ms),
            backoff: DelayRange::up_to(work_ms),
            ..TimingConfig::default()
        },
        ..RunOptions::default()
    };
    let workloads = vec![workload; stations];

    let cpu_start = cpu_times_seconds();
    let report = Coordinator::new(options)
        .with_sink(probe.clone())
        .run(stations, &workloads)?;

    let elapsed_ms = report.elapsed.as_secs_f64() * 1000.0;
    let total_units = report.total_work_done();
    let throughput = if elapsed_ms > 0.0 {
        (total_units as f64) / (elapsed_ms / 1000.0)
    } else {
        0.0
    };
    let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
            (Some(user_end - user_start), Some(sys_end - sys_start))
        }
        _ => (None, None),
    };

    Ok(BenchResult {
        stations,
        workload,
        work_ms,
        total_units,
        elapsed_ms,
        throughput,
        cpu_user_s,
        cpu_sys_s,
        max_occupancy: probe.max_occupancy(),
        exclusion_violation: probe.has_violation(),
        unfinished: report.unfinished().len(),
    })
}

fn print_row(result: &BenchResult, validate: bool) {
    let cpu_user = result
        .cpu_user_s
        .map(|v| format!("{v:.4}"))
        .unwrap_or_else(|| "NA".to_string());
    let cpu_sys = result
        .cpu_sys_s
        .map(|v| format!("{v:.4}"))
        .unwrap_or_else(|| "NA".to_string());
    println!(
        "{},{},{},{},{:.2},{:.2},{},{},{},{},{}",
        result.stations,
        result.workload,
        result.work_ms,
        result.total_units,
        result.elapsed_ms,
        result.throughput,
        cpu_user,
        cpu_sys,
        result.max_occupancy,
        result.exclusion_violation,
        result.unfinished
    );
    if result.unfinished > 0 {
        eprintln!("# warning,unfinished_stations,{}", result.unfinished);
    }
    if validate && result.exclusion_violation {
        eprintln!("# violation,conveyor_exclusivity");
    }
}

/// Run a single benchmark with optional parameter overrides.
pub fn run_benchmark(
    stations: Option<usize>,
    workload: Option<u32>,
    work_ms: Option<u64>,
    validate: bool,
) -> Result<ExitCode, RunError> {
    let stations = stations.unwrap_or(5);
    let workload = workload.unwrap_or(10);
    let work_ms = work_ms.unwrap_or(5);

    let result = benchmark_once(stations, workload, work_ms)?;
    println!("{CSV_HEADER}");
    print_row(&result, validate);
    if validate && result.exclusion_violation {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Sweep multiple benchmark configurations and print CSV output.
pub fn run_stress(
    station_sets: Vec<usize>,
    workload_sets: Vec<u32>,
    work_ms: Option<u64>,
    validate: bool,
) -> Result<ExitCode, RunError> {
    let station_sets = if station_sets.is_empty() {
        STRESS_STATION_SETS.to_vec()
    } else {
        station_sets
    };
    let workload_sets = if workload_sets.is_empty() {
        STRESS_WORKLOAD_SETS.to_vec()
    } else {
        workload_sets
    };
    let work_ms = work_ms.unwrap_or(2);

    let mut violated = false;
    println!("{CSV_HEADER}");
    for stations in station_sets {
        for workload in workload_sets.iter().copied() {
            let result = benchmark_once(stations, workload, work_ms)?;
            violated |= result.exclusion_violation;
            print_row(&result, validate);
        }
    }
    if validate && violated {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
