//! Delay policies for simulated work and contention backoff.
//!
//! Each station owns its own policy instance, so there is no shared random
//! state between threads. Tests inject [`FixedDelay`] to make timing
//! irrelevant; the runners use [`RandomDelay`].

use std::ops::Range;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::types::StationId;

/// Source of the durations a station sleeps for.
pub trait DelayPolicy: Send {
    /// How long one unit of work holds both conveyors.
    fn work_duration(&mut self) -> Duration;
    /// Pause after giving the input conveyor back on output contention.
    fn backoff_duration(&mut self) -> Duration;
    /// Pause between failed input attempts; zero means just yield.
    fn input_retry(&mut self) -> Duration {
        Duration::ZERO
    }
}

/// Small deterministic PRNG (xorshift64).
#[derive(Clone, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift.
        let state = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform-ish value in `range`; returns `range.start` for empty ranges.
    pub fn next_in(&mut self, range: Range<u64>) -> u64 {
        if range.end <= range.start {
            return range.start;
        }
        range.start + self.next_u64() % (range.end - range.start)
    }
}

/// Half-open millisecond range, `[min_ms, max_ms)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn up_to(max_ms: u64) -> Self {
        Self { min_ms: 0, max_ms }
    }

    pub const fn fixed(ms: u64) -> Self {
        Self {
            min_ms: ms,
            max_ms: ms,
        }
    }

    fn sample(&self, rng: &mut XorShift64) -> Duration {
        Duration::from_millis(rng.next_in(self.min_ms..self.max_ms))
    }
}

/// Timing knobs shared by every station of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimingConfig {
    pub work: DelayRange,
    pub backoff: DelayRange,
    pub input_retry: Duration,
    /// Fixed seed for reproducible runs; `None` seeds from the clock.
    pub seed: Option<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            work: DelayRange::up_to(1000),
            backoff: DelayRange::up_to(500),
            input_retry: Duration::ZERO,
            seed: None,
        }
    }
}

impl TimingConfig {
    /// Build the policy for one station.
    pub fn policy_for(&self, station: StationId) -> RandomDelay {
        let base = self.seed.unwrap_or_else(clock_seed);
        // Spread station ids so neighbouring stations do not share a stream.
        let seed = base ^ (station as u64 + 1).wrapping_mul(0x2545_F491_4F6C_DD1D);
        RandomDelay {
            work: self.work,
            backoff: self.backoff,
            input_retry: self.input_retry,
            rng: XorShift64::new(seed),
        }
    }
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Uniform random durations drawn from [`TimingConfig`] ranges.
#[derive(Clone, Debug)]
pub struct RandomDelay {
    work: DelayRange,
    backoff: DelayRange,
    input_retry: Duration,
    rng: XorShift64,
}

impl DelayPolicy for RandomDelay {
    fn work_duration(&mut self) -> Duration {
        self.work.sample(&mut self.rng)
    }

    fn backoff_duration(&mut self) -> Duration {
        self.backoff.sample(&mut self.rng)
    }

    fn input_retry(&mut self) -> Duration {
        self.input_retry
    }
}

/// Constant durations; `FixedDelay::zero()` removes all sleeping.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedDelay {
    pub work: Duration,
    pub backoff: Duration,
    pub input_retry: Duration,
}

impl FixedDelay {
    pub fn zero() -> Self {
        Self::default()
    }
}

impl DelayPolicy for FixedDelay {
    fn work_duration(&mut self) -> Duration {
        self.work
    }

    fn backoff_duration(&mut self) -> Duration {
        self.backoff
    }

    fn input_retry(&mut self) -> Duration {
        self.input_retry
    }
}
