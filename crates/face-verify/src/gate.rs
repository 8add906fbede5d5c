//! Frame gate: the single "verification in flight" flag

use std::sync::atomic::{AtomicBool, Ordering};

/// Lock-free flag saying whether a verification job holds the pipeline.
///
/// Read on every incoming frame from the capture thread, so a read is a
/// single atomic load. Claiming uses compare-and-swap so two frames racing
/// to commit cannot both win.
#[derive(Debug, Default)]
pub struct FrameGate {
    claimed: AtomicBool,
}

impl FrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a job currently holds the gate
    #[inline]
    pub fn read(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Unconditionally set the flag
    #[inline]
    pub fn set(&self, claimed: bool) {
        self.claimed.store(claimed, Ordering::Release);
    }

    /// Claim the gate if it is free. Returns `false` if it was already held.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
