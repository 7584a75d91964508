//! Run-wide cancellation signal with interruptible sleeps.

use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Returned by [`CancelToken::pause`] when the run was cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cancelled;

/// Shared flag that wakes every sleeping station when raised.
pub struct CancelToken {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    /// Raise the flag and wake all sleepers. Idempotent.
    pub fn cancel(&self) {
        let mut guard = self.cancelled.lock().expect("cancel mutex poisoned");
        *guard = true;
        self.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().expect("cancel mutex poisoned")
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// A zero duration only checks the flag and yields the thread.
    pub fn pause(&self, duration: Duration) -> Result<(), Cancelled> {
        if duration.is_zero() {
            if self.is_cancelled() {
                return Err(Cancelled);
            }
            thread::yield_now();
            return Ok(());
        }

        let deadline = Instant::now() + duration;
        let mut guard = self.cancelled.lock().expect("cancel mutex poisoned");
        loop {
            if *guard {
                return Err(Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            // Spurious wakeups just loop back and re-check the deadline.
            let (next, _) = self
                .wake
                .wait_timeout(guard, deadline - now)
                .expect("condvar wait failed");
            guard = next;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;

    #[test]
    fn pause_runs_to_completion_when_not_cancelled() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert_eq!(token.pause(Duration::from_millis(20)), Ok(()));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn zero_pause_checks_flag() {
        let token = CancelToken::new();
        assert_eq!(token.pause(Duration::ZERO), Ok(()));
        token.cancel();
        assert_eq!(token.pause(Duration::ZERO), Err(Cancelled));
    }

    #[test]
    fn cancel_wakes_long_sleeper() {
        let token = Arc::new(CancelToken::new());
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let sleeper = Arc::clone(&token);
        let handle = thread::spawn(move || {
            ready_tx.send(()).expect("ready");
            let result = sleeper.pause(Duration::from_secs(30));
            done_tx.send(result).expect("done");
        });

        ready_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("ready");
        token.cancel();

        let result = done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("sleeper should wake promptly");
        assert_eq!(result, Err(Cancelled));
        handle.join().expect("sleeper thread panicked");
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }
}
