//! Per-collection replication cursor.

use serde::{Deserialize, Serialize};

use crate::stamp::Stamp;

/// Marks the `updated_at` of the last remote row durably applied locally.
///
/// Absence of a persisted checkpoint means "replicate from the beginning of
/// time"; `Checkpoint::epoch()` models that. Checkpoints only move forward,
/// and only after the rows they cover have been applied to the local store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Checkpoint {
    pub updated_at: Stamp,
}

impl Checkpoint {
    pub fn epoch() -> Self {
        Checkpoint {
            updated_at: Stamp::EPOCH,
        }
    }

    pub fn at(stamp: Stamp) -> Self {
        Checkpoint { updated_at: stamp }
    }

    /// Advance to `stamp` if it is newer; never moves backwards.
    pub fn advance_to(&mut self, stamp: Stamp) {
        self.updated_at = self.updated_at.max(stamp);
    }

    /// Whether a row with this stamp is newer than the cursor.
    ///
    /// Strict comparison: rows sharing the checkpoint stamp are re-pulled and
    /// re-applied (a no-op) rather than risk being skipped.
    pub fn admits(&self, stamp: Stamp) -> bool {
        stamp > self.updated_at
    }
}
