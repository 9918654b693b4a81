//! Arbitration of the shared peripheral bus.
//!
//! Display, storage and audio all sit on one bus and must never drive it
//! concurrently. The arbiter is a single ownership-tracked gate: the current
//! owner may re-acquire without deadlocking, and the panic path can force a
//! release regardless of who holds it. It is plain `Mutex` + `Condvar` so it
//! stays callable from any context, async or not.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error};

/// Bound on waiting for the bus. A peer that holds the bus this long is
/// wedged or crashed, and there is no recovery with a dead shared bus.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Logical subsystems that can own the bus.
///
/// `Any` is a wildcard accepted only by [`BusArbiter::release`]; the panic
/// path uses it to unlock whatever was held when the panic was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOwner {
    Display,
    Storage,
    Audio,
    Any,
}

/// Timed-out waiting for the current holder to release.
#[derive(Debug, thiserror::Error)]
#[error("bus acquisition timed out for {owner:?}")]
pub struct BusTimeout {
    pub owner: BusOwner,
}

#[derive(Debug, Default)]
pub struct BusArbiter {
    holder: Mutex<Option<BusOwner>>,
    released: Condvar,
}

impl BusArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the bus for `owner`, waiting up to [`ACQUIRE_TIMEOUT`].
    ///
    /// Re-entrant for the current holder: acquiring twice in a row with the
    /// same owner returns immediately. Timing out aborts the process; a
    /// wedged bus cannot be waited out.
    pub fn acquire(&self, owner: BusOwner) {
        if let Err(e) = self.acquire_timeout(owner, ACQUIRE_TIMEOUT) {
            error!("{e}, aborting");
            std::process::abort();
        }
    }

    /// Timeout-bounded acquire; the fatal policy lives in [`Self::acquire`].
    pub fn acquire_timeout(&self, owner: BusOwner, timeout: Duration) -> Result<(), BusTimeout> {
        debug_assert!(owner != BusOwner::Any, "Any is a release-only wildcard");

        let holder = self
            .holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *holder == Some(owner) {
            return Ok(());
        }

        let (mut holder, wait) = self
            .released
            .wait_timeout_while(holder, timeout, |h| h.is_some())
            .unwrap_or_else(PoisonError::into_inner);
        if wait.timed_out() && holder.is_some() {
            return Err(BusTimeout { owner });
        }

        *holder = Some(owner);
        Ok(())
    }

    /// Releases the bus if `owner` is the current holder or `Any`.
    /// Anything else is a silent no-op.
    pub fn release(&self, owner: BusOwner) {
        let mut holder = self
            .holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *holder {
            Some(current) if current == owner || owner == BusOwner::Any => {
                debug!("bus released by {owner:?} (held by {current:?})");
                *holder = None;
                self.released.notify_one();
            }
            _ => {}
        }
    }

    /// Current holder, if any. Diagnostic only.
    pub fn holder(&self) -> Option<BusOwner> {
        *self
            .holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
