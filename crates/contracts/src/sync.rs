//! SyncedCaptures - multi-device synchronizer output

use serde::{Deserialize, Serialize};

use crate::Capture;

/// One capture per device, index 0 is the master.
#[derive(Debug, Clone)]
pub struct SyncedCaptures {
    /// Per-device captures in rig order
    pub captures: Vec<Capture>,

    /// How the result was reached
    pub report: SyncReport,
}

impl SyncedCaptures {
    pub fn master(&self) -> Option<&Capture> {
        self.captures.first()
    }

    pub fn subordinates(&self) -> &[Capture] {
        self.captures.get(1..).unwrap_or(&[])
    }
}

/// Diagnostics for one synchronized retrieval
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    /// Master color timestamp the result is aligned to (device clock, µs)
    pub reference_timestamp_usec: u64,

    /// Full scans of the subordinate list, including the accepting one
    pub passes: u64,

    /// Re-fetches issued per device after the initial seed
    pub refetches: Vec<u64>,

    /// Per-subordinate alignment (index 0 is unused for the master)
    pub alignments: Vec<Option<SubordinateAlignment>>,

    /// Whether subordinates were compared on their depth images
    pub compared_depth: bool,

    /// Wall-clock time spent converging (µs)
    pub elapsed_usec: u64,
}

impl SyncReport {
    pub fn total_refetches(&self) -> u64 {
        self.refetches.iter().sum()
    }
}

/// Accepted timestamp relationship of one subordinate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubordinateAlignment {
    /// Timestamp the subordinate image was expected at (µs)
    pub expected_usec: i64,

    /// Observed minus expected (µs)
    pub error_usec: i64,

    /// Filtered residual offset estimate (µs)
    pub drift_offset_usec: f64,

    /// Filtered offset rate of change (µs per second)
    pub drift_rate_usec_per_s: f64,
}

/// Single-device assembler counters (for diagnostics)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblerStats {
    /// Captures handed to the output queue
    pub captures_emitted: u64,

    /// Color images discarded while waiting for a match
    pub color_dropped: u64,

    /// Depth/IR images discarded while waiting for a match
    pub depth_dropped: u64,

    /// Blocks rejected as malformed
    pub malformed: u64,

    /// Notifications ignored because their stream is disabled or failed
    pub ignored: u64,
}
