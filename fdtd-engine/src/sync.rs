use std::time::{
    Duration,
    Instant,
};

use parking_lot::{
    Condvar,
    Mutex,
};

use crate::error::ConcurrencyFault;

/// Reusable rendezvous point for a fixed number of threads.
///
/// Unlike [`std::sync::Barrier`] a wait can time out, and a barrier can be
/// poisoned. Once poisoned, every current and future wait fails immediately,
/// so a single failing participant can't leave its peers blocked forever.
#[derive(Debug)]
pub struct PhaseBarrier {
    label: &'static str,
    participants: usize,
    timeout: Option<Duration>,
    state: Mutex<BarrierState>,
    condition: Condvar,
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    poisoned: bool,
}

/// Returned from a successful [`PhaseBarrier::wait`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierWaitResult {
    is_leader: bool,
}

impl BarrierWaitResult {
    /// Exactly one participant of each rendezvous is the leader: the last one
    /// to arrive.
    pub fn is_leader(&self) -> bool {
        self.is_leader
    }
}

impl PhaseBarrier {
    pub fn new(label: &'static str, participants: usize, timeout: Option<Duration>) -> Self {
        assert!(participants > 0, "barrier {label} needs at least 1 participant");

        Self {
            label,
            participants,
            timeout,
            state: Mutex::new(BarrierState::default()),
            condition: Condvar::new(),
        }
    }

    /// Blocks until all participants arrived.
    ///
    /// Everything a participant wrote before arriving is visible to all
    /// participants after they leave.
    pub fn wait(&self) -> Result<BarrierWaitResult, ConcurrencyFault> {
        let mut state = self.state.lock();

        if state.poisoned {
            return Err(self.poisoned());
        }

        state.arrived += 1;
        if state.arrived == self.participants {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.condition.notify_all();
            return Ok(BarrierWaitResult { is_leader: true });
        }

        let generation = state.generation;
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let timed_out = if let Some(deadline) = deadline {
                self.condition
                    .wait_until(&mut state, deadline)
                    .timed_out()
            }
            else {
                self.condition.wait(&mut state);
                false
            };

            if state.generation != generation {
                return Ok(BarrierWaitResult { is_leader: false });
            }
            if state.poisoned {
                return Err(self.poisoned());
            }
            if timed_out {
                state.poisoned = true;
                self.condition.notify_all();

                let timeout = self.timeout.unwrap_or_default();
                tracing::warn!(barrier = self.label, ?timeout, "barrier wait timed out");
                return Err(ConcurrencyFault::BarrierTimeout {
                    barrier: self.label,
                    timeout,
                });
            }
        }
    }

    /// Fails all current and future waits.
    pub fn poison(&self) {
        let mut state = self.state.lock();
        if !state.poisoned {
            tracing::debug!(barrier = self.label, "poisoning barrier");
            state.poisoned = true;
            self.condition.notify_all();
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned
    }

    fn poisoned(&self) -> ConcurrencyFault {
        ConcurrencyFault::BarrierPoisoned {
            barrier: self.label,
        }
    }
}

/// The barriers separating the phases of a step.
#[derive(Debug)]
pub struct PhaseBarriers {
    /// voltage updates done, excitation may start. slabs and excitation.
    pub voltage_done: PhaseBarrier,
    /// excitation done, current updates may start. slabs and excitation.
    pub excitation_done: PhaseBarrier,
    /// current updates done, the next step may start. slabs only.
    pub current_done: PhaseBarrier,
}

impl PhaseBarriers {
    pub fn new(num_slabs: usize, timeout: Option<Duration>) -> Self {
        Self {
            voltage_done: PhaseBarrier::new("voltage_done", num_slabs + 1, timeout),
            excitation_done: PhaseBarrier::new("excitation_done", num_slabs + 1, timeout),
            current_done: PhaseBarrier::new("current_done", num_slabs, timeout),
        }
    }

    pub fn poison_all(&self) {
        self.voltage_done.poison();
        self.excitation_done.poison();
        self.current_done.poison();
    }
}
