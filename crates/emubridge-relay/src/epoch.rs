//! Session epochs: the single source of truth for "is this the active launch".
//!
//! Every launch allocates a new epoch. Deferred work (timers, network
//! completions, channel consumers) captures the epoch it was created under
//! and re-checks [`SessionEpochGuard::is_current`] before any side effect.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Identifier of one launch attempt.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Epoch(u64);

impl Epoch {
    /// The epoch before any launch. Never current once a launch happened.
    pub const NONE: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic session counter.
#[derive(Debug, Default)]
pub struct SessionEpochGuard {
    current: AtomicU64,
}

impl SessionEpochGuard {
    pub const fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
        }
    }

    /// Allocate the next epoch and make it current, invalidating all prior ones.
    pub fn new_epoch(&self) -> Epoch {
        Epoch(self.current.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn is_current(&self, epoch: Epoch) -> bool {
        epoch != Epoch::NONE && self.current.load(Ordering::Acquire) == epoch.0
    }

    pub fn current(&self) -> Epoch {
        Epoch(self.current.load(Ordering::Acquire))
    }

    /// Retire `epoch` if it is still current.
    ///
    /// The guard moves to a fresh epoch that no session owns, so every task
    /// of the retired session observes itself as stale. A newer session is
    /// left untouched.
    pub fn retire(&self, epoch: Epoch) -> bool {
        if epoch == Epoch::NONE {
            return false;
        }
        self.current
            .compare_exchange(epoch.0, epoch.0 + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
