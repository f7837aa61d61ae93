//! Shared types used by the arbitrage coordinator.

use std::fmt;

use serde::{Deserialize, Serialize};

use market::venue::LegKind;

/// One side of a cross-venue pair: where and on what product it trades.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Leg {
    pub venue: String,
    pub kind: LegKind,
}

impl Leg {
    pub fn new(venue: impl Into<String>, kind: LegKind) -> Self {
        Self {
            venue: venue.into(),
            kind,
        }
    }
}

/// Lifecycle of the coordinator.
///
/// `Error` is sticky: once a batch could not be unwound the coordinator
/// reports it until the process restarts, even while it keeps watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorStatus {
    Idle,
    Watching,
    Opening,
    Closing,
    Error,
}

impl fmt::Display for CoordinatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoordinatorStatus::Idle => "Idle",
            CoordinatorStatus::Watching => "Watching",
            CoordinatorStatus::Opening => "Opening",
            CoordinatorStatus::Closing => "Closing",
            CoordinatorStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: CoordinatorStatus,
    pub open_positions: usize,
    pub failed_batches: usize,
    /// Ledger writes that failed since startup.
    pub persistence_failures: u64,
}

impl Default for StatusReport {
    fn default() -> Self {
        Self {
            status: CoordinatorStatus::Idle,
            open_positions: 0,
            failed_batches: 0,
            persistence_failures: 0,
        }
    }
}
