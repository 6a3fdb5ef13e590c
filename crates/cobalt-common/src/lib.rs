//! Cobalt Graph Common - shared record model, error taxonomy, and config
//! types used by every crate in the workspace.
//!
//! This crate has no async runtime dependency and no I/O: it is the leaf of
//! the dependency graph (spec §2 component order, item 1).

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod ipclass;
pub mod record;
pub mod timestamp;

pub use config::PipelineConfig;
pub use error::{CobaltError, CobaltResult, ExitCode, IntelErrorKind};
pub use record::{
    CaptureMode, ConnectionRecord, ConsensusAssessment, EnrichedRecord, GeoInfo, Protocol,
    ReputationInfo, ScorerId, ScorerVote, CONSENSUS_METHOD,
};
pub use timestamp::Timestamp;

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counter used for the pipeline's runtime counters (spec §4.8.4).
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    #[inline(always)]
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn add(&self, val: u64) -> u64 {
        self.0.fetch_add(val, Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_counter_counts() {
        let counter = AtomicCounter::new(0);
        assert_eq!(counter.inc(), 0);
        assert_eq!(counter.inc(), 1);
        assert_eq!(counter.get(), 2);
    }
}
