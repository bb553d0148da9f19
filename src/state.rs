//! Explicit run state, owned by the caller of `RoundScheduler::run`.

use serde::Serialize;
use std::time::Duration;

use crate::session::CapturedObject;

/// Counters reported at the end of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub rounds: u32,
    pub positions: u64,
    pub seeks_converged: u64,
    pub seeks_abandoned: u64,
    pub captures: u64,
    pub duplicates_skipped: u64,
    pub camera_faults: u64,
    pub inference_errors: u64,
}

#[derive(Debug)]
pub struct RunState {
    /// Zero-based index of the current round.
    pub round: u32,
    /// Every capture of the run. Dedup only looks at the current round.
    pub captures: Vec<CapturedObject>,
    /// Clock reading when the current round started.
    pub round_started: Duration,
    /// Sweep tilt of the current round.
    pub tilt: f64,
    /// Scan-level camera faults since the last successful position.
    pub consecutive_faults: u32,
    pub stats: RunStats,
}

impl RunState {
    pub fn new(initial_tilt: f64) -> Self {
        Self {
            round: 0,
            captures: Vec::new(),
            round_started: Duration::ZERO,
            tilt: initial_tilt,
            consecutive_faults: 0,
            stats: RunStats::default(),
        }
    }

    /// Captures made during the current round.
    pub fn round_captures(&self) -> impl Iterator<Item = &CapturedObject> {
        let round = self.round;
        self.captures.iter().filter(move |c| c.round == round)
    }

    /// Next round's tilt after a round with or without captures.
    ///
    /// An empty round lowers the tilt by `step`; past `floor` it snaps back
    /// to `initial`. A productive round keeps the current tilt.
    pub fn next_tilt(&self, found_any: bool, initial: f64, step: f64, floor: f64) -> f64 {
        if found_any || step <= 0.0 {
            return self.tilt;
        }
        let lowered = self.tilt - step;
        if lowered < floor {
            initial
        } else {
            lowered
        }
    }
}
