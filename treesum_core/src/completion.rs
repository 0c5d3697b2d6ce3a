//! One-shot completion signal between the root task and the driving thread.

use crate::error::Error;
use crate::task::TaskResult;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// What ended the run.
#[derive(Debug)]
pub enum Signal {
    /// The root task finished with this result.
    Finished(TaskResult),
    /// A broken invariant stopped the run.
    Aborted(Error),
}

/// Set once, waited on once.
#[derive(Debug, Default)]
pub struct Completion {
    slot: Mutex<Slot>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct Slot {
    signal: Option<Signal>,
    fired: bool,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Only the first call has any effect; later calls
    /// return `false` and drop their signal.
    pub fn set(&self, signal: Signal) -> bool {
        let mut slot = self.slot.lock();
        if slot.fired {
            return false;
        }
        slot.fired = true;
        slot.signal = Some(signal);
        self.cond.notify_all();
        true
    }

    /// Take the signal if it has already fired, without blocking.
    pub fn try_take(&self) -> Option<Signal> {
        self.slot.lock().signal.take()
    }

    /// Block until the signal fires or `timeout` elapses (`None` waits
    /// forever). Takes the signal; returns `None` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<Signal> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.slot.lock();
        while !slot.fired {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut slot, deadline).timed_out() && !slot.fired {
                        return None;
                    }
                }
                None => self.cond.wait(&mut slot),
            }
        }
        slot.signal.take()
    }
}
