//! Vblank timing helpers.
//!
//! Display models and test doubles need a consistent notion of "the next
//! vblank edge" when answering [`query_vblank`](crate::DisplayLink::query_vblank).
//! [`VblankClock`] keeps the arithmetic in one place so every implementation
//! agrees on period rounding and sequence accounting.

use crate::VblankStamp;

/// Convert a refresh rate (Hz) into a vblank period in nanoseconds.
///
/// Returns `None` for a rate of 0 (vblank pacing disabled). Rounds up so
/// 60 Hz maps to 16_666_667 ns rather than truncating.
pub fn refresh_period_ns(hz: u32) -> Option<u64> {
    if hz == 0 {
        return None;
    }
    Some(1_000_000_000u64.div_ceil(u64::from(hz)))
}

/// A free-running vblank counter advanced by the caller's clock.
#[derive(Debug, Clone)]
pub struct VblankClock {
    period_ns: u64,
    sequence: u64,
    last_edge_ns: u64,
}

impl VblankClock {
    /// `None` if `hz` is 0 (no pacing).
    pub fn new(hz: u32) -> Option<Self> {
        Some(Self {
            period_ns: refresh_period_ns(hz)?,
            sequence: 0,
            last_edge_ns: 0,
        })
    }

    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    /// Advance to `now_ns`, returning the number of vblank edges that
    /// passed. Time moving backwards is ignored.
    pub fn advance_to(&mut self, now_ns: u64) -> u64 {
        if now_ns <= self.last_edge_ns {
            return 0;
        }
        let edges = (now_ns - self.last_edge_ns) / self.period_ns;
        self.sequence += edges;
        self.last_edge_ns += edges * self.period_ns;
        edges
    }

    /// Stamp of the most recent edge.
    pub fn stamp(&self) -> VblankStamp {
        VblankStamp {
            ust_us: self.last_edge_ns / 1_000,
            sequence: self.sequence,
        }
    }
}
