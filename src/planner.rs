//! Sweep planning.

use crate::geometry::SweepPosition;

/// Plans one full 360° sweep at fixed tilt and zoom.
///
/// Positions start at pan 0 and advance by `pan_step`. When 360 is not a
/// multiple of the step, the last step is shortened so the sweep closes the
/// loop without ever commanding a pan at or past 360°.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanPlanner {
    pan_step: f64,
    tilt: f64,
    zoom: f64,
}

impl ScanPlanner {
    /// `pan_step` is validated by `ScanConfig`; non-positive steps are
    /// treated as a full turn so the sweep stays finite.
    pub fn new(pan_step: f64, tilt: f64, zoom: f64) -> Self {
        let pan_step = if pan_step.is_finite() && pan_step > 0.0 {
            pan_step.min(360.0)
        } else {
            360.0
        };
        Self {
            pan_step,
            tilt,
            zoom,
        }
    }

    /// Fresh, finite sequence of positions for one round.
    pub fn positions(&self) -> SweepPositions {
        SweepPositions {
            planner: *self,
            index: 0,
            count: self.len(),
        }
    }

    /// Number of positions in one sweep.
    pub fn len(&self) -> usize {
        // Tolerance keeps float noise (e.g. 360 / 0.1) from adding a
        // position at 360°.
        ((360.0 / self.pan_step) - 1e-9).ceil().max(1.0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pan_at(&self, index: usize) -> f64 {
        // index < len() keeps this below 360; the closing step is whatever
        // remains of the turn.
        index as f64 * self.pan_step
    }
}

/// Iterator returned by [`ScanPlanner::positions`].
#[derive(Clone, Debug)]
pub struct SweepPositions {
    planner: ScanPlanner,
    index: usize,
    count: usize,
}

impl Iterator for SweepPositions {
    type Item = SweepPosition;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let pan = self.planner.pan_at(self.index);
        self.index += 1;
        Some(SweepPosition::new(pan, self.planner.tilt, self.planner.zoom))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SweepPositions {}
