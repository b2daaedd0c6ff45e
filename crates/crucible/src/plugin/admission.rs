//! Admission gate for in-flight plugin calls
//!
//! Every call forwarded to a plugin holds a [`Permit`] while it runs. Once
//! unloading begins the gate stops handing out permits, and [`DrainGate::drain`]
//! blocks until every outstanding permit has been dropped, so a plugin is
//! never torn down under a live call.

use std::time::Duration;

use parking_lot::Mutex;

/// How long the drain loop sleeps between checks of the in-flight counter.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Reserve refused: the gate has begun draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateClosed;

#[derive(Default)]
struct GateState {
    inflight: usize,
    unloading: bool,
}

/// Concurrency gate tracking in-flight calls to one plugin.
#[derive(Default)]
pub struct DrainGate {
    state: Mutex<GateState>,
}

/// Proof of admission for one forwarded call.
///
/// The in-flight counter is decremented when the permit drops, so release
/// happens on every exit path of the call, including errors and panics.
#[must_use = "dropping the permit immediately releases the reservation"]
pub struct Permit<'a> {
    gate: &'a DrainGate,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

impl DrainGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one call. Fails once unloading has begun.
    pub fn reserve(&self) -> Result<Permit<'_>, GateClosed> {
        let mut state = self.state.lock();
        if state.unloading {
            return Err(GateClosed);
        }
        state.inflight += 1;
        Ok(Permit { gate: self })
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.inflight -= 1;
    }

    /// Number of calls currently admitted.
    pub fn inflight(&self) -> usize {
        self.state.lock().inflight
    }

    /// Whether unloading has begun.
    pub fn is_draining(&self) -> bool {
        self.state.lock().unloading
    }

    /// Stop admitting new calls and wait for the in-flight count to hit zero.
    ///
    /// The unloading flag is one-shot: once set it is never cleared. The wait
    /// polls on a fixed interval, logging progress periodically so a stuck
    /// drain shows up in the logs instead of hanging silently.
    pub async fn drain(&self) {
        self.state.lock().unloading = true;

        let mut iterations: u64 = 0;
        loop {
            let inflight = {
                let state = self.state.lock();
                if state.inflight == 0 {
                    break;
                }
                state.inflight
            };
            if iterations % 100 == 0 {
                tracing::debug!(inflight, "draining in-flight plugin calls");
            }
            iterations += 1;
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
