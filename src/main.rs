mod sim;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use routing_ring::logging;
use routing_ring::{DelayRange, RunError, RunOptions, TimingConfig};

#[derive(Parser)]
#[command(name = "routing_ring", about = "Package routing ring simulation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the built-in three-station demo (default)
    Demo,
    /// Run the ring described by a workload file
    Run {
        /// First line: station count; then one workload per line
        #[arg(long, default_value = "config.txt")]
        config: PathBuf,
        /// Also log every station event at info level
        #[arg(long)]
        trace: bool,
        #[command(flatten)]
        timing: TimingArgs,
    },
    /// Benchmark one ring size and print a CSV row
    Bench {
        stations: Option<usize>,
        workload: Option<u32>,
        work_ms: Option<u64>,
        /// Flag conveyor exclusivity violations on stderr
        #[arg(long)]
        validate: bool,
    },
    /// Sweep ring sizes and workloads, one CSV row each
    Stress {
        /// Comma-separated station counts (e.g. 2,3,5)
        #[arg(long, value_delimiter = ',')]
        stations: Vec<usize>,
        /// Comma-separated per-station workloads
        #[arg(long, value_delimiter = ',')]
        workloads: Vec<u32>,
        work_ms: Option<u64>,
        #[arg(long)]
        validate: bool,
    },
}

#[derive(Args)]
struct TimingArgs {
    /// Seed for reproducible delays
    #[arg(long)]
    seed: Option<u64>,
    /// Upper bound of one work unit, in milliseconds
    #[arg(long, default_value_t = 1000)]
    work_ms: u64,
    /// Upper bound of the backoff after output contention, in milliseconds
    #[arg(long, default_value_t = 500)]
    backoff_ms: u64,
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
    /// Warn about stations without progress for this long
    #[arg(long)]
    stall_ms: Option<u64>,
}

impl TimingArgs {
    fn into_options(self) -> RunOptions {
        RunOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            stall_threshold: self.stall_ms.map(Duration::from_millis),
            timing: TimingConfig {
                work: DelayRange::up_to(self.work_ms),
                backoff: DelayRange::up_to(self.backoff_ms),
                seed: self.seed,
                ..TimingConfig::default()
            },
            ..RunOptions::default()
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let tracing_events = matches!(cli.command, Some(Command::Run { trace: true, .. }));
    logging::init(if tracing_events {
        logging::TRACE_FILTER
    } else {
        logging::DEFAULT_FILTER
    });

    let result = match cli.command.unwrap_or(Command::Demo) {
        Command::Demo => sim::run_demo(),
        Command::Run {
            config,
            trace,
            timing,
        } => sim::run_from_file(&config, timing.into_options(), trace),
        Command::Bench {
            stations,
            workload,
            work_ms,
            validate,
        } => sim::run_benchmark(stations, workload, work_ms, validate),
        Command::Stress {
            stations,
            workloads,
            work_ms,
            validate,
        } => sim::run_stress(stations, workloads, work_ms, validate),
    };

    match result {
        Ok(code) => code,
        Err(err @ RunError::Config(_)) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
