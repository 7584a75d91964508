//! Routing station: the acquire-both-or-back-off work loop.
//!
//! A station spins on its input conveyor, then makes exactly one attempt at
//! its output. If the output is busy it gives the input back before pausing,
//! so no station ever waits while holding a conveyor its neighbour needs.
//! That is what keeps the ring free of a cyclic wait.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::cancel::CancelToken;
use crate::conveyor::Conveyor;
use crate::error::ProtocolError;
use crate::events::{EventSink, StationEvent};
use crate::log_dev;
use crate::timing::DelayPolicy;
use crate::types::{Side, StationId, StationOutcome, StationState};

// Result of one pass through acquire/work/release.
enum Flow {
    Worked,
    Cancelled,
}

/// Live view of a station's state, readable from other threads while it runs.
#[derive(Clone, Debug)]
pub struct StateWatch(Arc<AtomicU8>);

impl StateWatch {
    fn new(state: StationState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> StationState {
        StationState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: StationState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// One worker of the ring, bound to two shared conveyors.
pub struct Station {
    id: StationId,
    input: Arc<Conveyor>,
    output: Arc<Conveyor>,
    remaining: u32,
    state: StateWatch,
    policy: Box<dyn DelayPolicy>,
    sink: Arc<dyn EventSink>,
    input_retries: u64,
}

impl Station {
    pub fn new(
        id: StationId,
        input: Arc<Conveyor>,
        output: Arc<Conveyor>,
        workload: u32,
        policy: Box<dyn DelayPolicy>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            id,
            input,
            output,
            remaining: workload,
            state: StateWatch::new(StationState::Idle),
            policy,
            sink,
            input_retries: 0,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn state(&self) -> StationState {
        self.state.get()
    }

    /// Handle for observing the state after the station moves to its thread.
    pub fn watch_state(&self) -> StateWatch {
        self.state.clone()
    }

    /// True for a one-station ring, where input and output are the same conveyor.
    pub fn shares_single_conveyor(&self) -> bool {
        Arc::ptr_eq(&self.input, &self.output)
    }

    /// Work until the remaining count hits zero or the run is cancelled.
    ///
    /// Never returns while holding a conveyor, except on a protocol error.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<StationOutcome, ProtocolError> {
        self.emit(StationEvent::Online {
            station: self.id,
            input: self.input.id(),
            output: self.output.id(),
            workload: self.remaining,
        });

        let outcome = loop {
            if self.remaining == 0 {
                break StationOutcome::Completed;
            }
            if cancel.is_cancelled() {
                break StationOutcome::Cancelled;
            }
            match self.cycle(cancel)? {
                Flow::Worked => self.state.set(StationState::Idle),
                Flow::Cancelled => break StationOutcome::Cancelled,
            }
        };

        self.state.set(match outcome {
            StationOutcome::Completed => StationState::Terminated,
            StationOutcome::Cancelled => StationState::Cancelled,
        });
        log_dev!(
            "[STATION] S{} exiting {outcome} remaining={} input_retries={}",
            self.id,
            self.remaining,
            self.input_retries
        );
        self.emit(StationEvent::Terminated {
            station: self.id,
            outcome,
        });
        Ok(outcome)
    }

    fn cycle(&mut self, cancel: &CancelToken) -> Result<Flow, ProtocolError> {
        loop {
            self.state.set(StationState::AcquiringInput);
            self.emit(StationEvent::AcquireAttempt {
                station: self.id,
                conveyor: self.input.id(),
                side: Side::Input,
            });
            // Waiting on the input alone cannot close a cycle: nothing is held.
            while !self.input.try_acquire(self.id)? {
                self.input_retries += 1;
                let pause = self.policy.input_retry();
                if cancel.pause(pause).is_err() {
                    return Ok(Flow::Cancelled);
                }
            }
            self.emit(StationEvent::Acquired {
                station: self.id,
                conveyor: self.input.id(),
                side: Side::Input,
            });

            if self.shares_single_conveyor() {
                return self.work(cancel);
            }

            self.state.set(StationState::AcquiringOutput);
            self.emit(StationEvent::AcquireAttempt {
                station: self.id,
                conveyor: self.output.id(),
                side: Side::Output,
            });
            if self.output.try_acquire(self.id)? {
                self.emit(StationEvent::Acquired {
                    station: self.id,
                    conveyor: self.output.id(),
                    side: Side::Output,
                });
                return self.work(cancel);
            }

            self.emit(StationEvent::AcquireFailed {
                station: self.id,
                conveyor: self.output.id(),
                side: Side::Output,
                held_by: self.output.owner_id(),
            });
            self.state.set(StationState::Releasing);
            self.release(Side::Input)?;

            let delay = self.policy.backoff_duration();
            self.emit(StationEvent::BackingOff {
                station: self.id,
                delay,
            });
            if cancel.pause(delay).is_err() {
                return Ok(Flow::Cancelled);
            }
        }
    }

    // Holds both conveyors (or the single shared one) on entry.
    fn work(&mut self, cancel: &CancelToken) -> Result<Flow, ProtocolError> {
        self.state.set(StationState::Working);
        self.emit(StationEvent::WorkStarted { station: self.id });

        let duration = self.policy.work_duration();
        if cancel.pause(duration).is_err() {
            // The unit never finished; nothing is counted.
            self.release_held()?;
            return Ok(Flow::Cancelled);
        }

        self.remaining -= 1;
        self.emit(StationEvent::WorkCompleted {
            station: self.id,
            remaining: self.remaining,
        });
        self.release_held()?;
        Ok(Flow::Worked)
    }

    fn release_held(&mut self) -> Result<(), ProtocolError> {
        self.state.set(StationState::Releasing);
        if !self.shares_single_conveyor() {
            self.release(Side::Output)?;
        }
        self.release(Side::Input)
    }

    fn release(&self, side: Side) -> Result<(), ProtocolError> {
        let conveyor = match side {
            Side::Input => &self.input,
            Side::Output => &self.output,
        };
        // Announce before letting go so the next holder's event sorts after ours.
        self.emit(StationEvent::Released {
            station: self.id,
            conveyor: conveyor.id(),
            side,
            remaining: self.remaining,
        });
        conveyor.release(self.id)
    }

    fn emit(&self, event: StationEvent) {
        self.sink.emit(event);
    }
}
