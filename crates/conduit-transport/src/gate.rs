//! One-time "driver ready" gate.
//!
//! Network subsystem initialisation may complete asynchronously (driver
//! binding on some platforms). Connection setup waits on this gate before
//! touching any socket and fails fast if it never opens.

use std::sync::{Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::warn;

/// Default time to wait for the networking subsystem to come up
pub const DRIVER_GATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Initialisation still in progress
    Pending,
    /// Networking is available
    Ready,
    /// Initialisation failed, networking is unavailable
    Failed,
}

/// One-shot latch signalled when the network subsystem is initialised
#[derive(Debug)]
pub struct DriverGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl DriverGate {
    /// Create a gate that has not been signalled yet
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Pending),
            cond: Condvar::new(),
        }
    }

    /// Create a gate that is already open
    #[must_use]
    pub fn ready() -> Self {
        let gate = Self::new();
        gate.signal(true);
        gate
    }

    /// Process-wide gate, opened on first use since socket support needs no
    /// asynchronous initialisation on the platforms we build for
    pub fn global() -> &'static DriverGate {
        static GLOBAL: OnceLock<DriverGate> = OnceLock::new();
        GLOBAL.get_or_init(DriverGate::ready)
    }

    /// Resolve the gate. Only the first call has any effect.
    pub fn signal(&self, ok: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == GateState::Pending {
            *state = if ok { GateState::Ready } else { GateState::Failed };
            self.cond.notify_all();
        }
    }

    /// Get the current state without waiting
    pub fn state(&self) -> GateState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait up to `timeout` for the gate to resolve.
    ///
    /// Returns `true` only if the subsystem came up.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while *state == GateState::Pending {
            let now = Instant::now();
            if now >= deadline {
                warn!("Network driver gate did not open within {:?}", timeout);
                return false;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
        *state == GateState::Ready
    }
}

impl Default for DriverGate {
    fn default() -> Self {
        Self::new()
    }
}
