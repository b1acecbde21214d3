//! Suspension of background polling while the uplink owns the link.
//!
//! The console task checks the gate before handing a command to the node. The
//! uplink controller holds a [`PollingPause`] for the whole network exchange,
//! so a command can never interleave with a half-written batch.

use core::sync::atomic::{AtomicBool, Ordering};

use log::debug;

#[derive(Debug, Default)]
pub struct PollingGate {
    paused: AtomicBool,
}

impl PollingGate {
    pub const fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
        }
    }

    /// Suspend polling until the returned guard is dropped.
    ///
    /// Pauses do not nest; the first guard to drop resumes polling.
    pub fn pause(&self) -> PollingPause<'_> {
        self.paused.store(true, Ordering::Release);
        debug!("Background polling paused");
        PollingPause { gate: self }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

/// Guard returned by [`PollingGate::pause`].
#[must_use = "polling resumes as soon as the guard is dropped"]
pub struct PollingPause<'a> {
    gate: &'a PollingGate,
}

impl Drop for PollingPause<'_> {
    fn drop(&mut self) {
        self.gate.paused.store(false, Ordering::Release);
        debug!("Background polling resumed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_lasts_for_guard_lifetime() {
        let gate = PollingGate::new();
        assert!(!gate.is_paused());
        {
            let _pause = gate.pause();
            assert!(gate.is_paused());
        }
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_early_return_resumes_polling() {
        fn exchange(gate: &PollingGate, fail: bool) -> Result<(), ()> {
            let _pause = gate.pause();
            if fail {
                return Err(());
            }
            Ok(())
        }

        let gate = PollingGate::new();
        assert!(exchange(&gate, true).is_err());
        assert!(!gate.is_paused());
    }
}
