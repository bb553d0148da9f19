//! Closed-loop seek: center a candidate, then zoom until it fills the frame.
//!
//! ```text
//! Centering --centered--> Zooming --stop--> Converged
//!     |                      |
//!     +--budget/lost/fault---+-----fault---> Abandoned
//! ```
//!
//! Every loop is bounded: centering by `max_center_attempts` moves and
//! `max_consecutive_misses` empty re-detects, zooming by `max_zoom_steps`.
//! Once centered the seek never returns to centering.

use std::time::Duration;

use crate::camera::CameraPort;
use crate::clock::Clock;
use crate::config::SeekSettings;
use crate::detect::{detect_filtered, Detection, DetectionBackend, TargetSpec};
use crate::error::CameraFault;
use crate::frame::Frame;
use crate::geometry::{SweepPosition, ZoomOptics};

const ZOOM_EPSILON: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekPhase {
    Centering,
    Zooming,
    Converged,
    Abandoned,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AbandonReason {
    /// Still off-center after `max_center_attempts` corrections.
    CenteringExhausted,
    /// `max_consecutive_misses` re-detects in a row found nothing.
    TargetLost,
    CameraFault(CameraFault),
}

/// Why zooming stopped on a converged seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoomStop {
    FillReached,
    MaxZoom,
    /// Zooming further would push the box out of the frame margin.
    FrameBounds,
    StepBudget,
    /// The last step lost the target or let it drift; it was undone.
    Reverted,
}

#[derive(Debug)]
pub struct SeekResult {
    /// Detection in `frame`.
    pub detection: Detection,
    /// Best frame of the seek, taken at `position`.
    pub frame: Frame,
    pub position: SweepPosition,
    pub center_moves: u32,
    pub zoom_steps: u32,
    pub stop: ZoomStop,
}

#[derive(Debug)]
pub enum SeekOutcome {
    Converged(SeekResult),
    Abandoned {
        reason: AbandonReason,
        /// Last commanded camera position.
        position: SweepPosition,
    },
}

impl SeekOutcome {
    pub fn phase(&self) -> SeekPhase {
        match self {
            SeekOutcome::Converged(_) => SeekPhase::Converged,
            SeekOutcome::Abandoned { .. } => SeekPhase::Abandoned,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, SeekOutcome::Converged(_))
    }
}

/// Pick the candidate to seek: highest confidence, then larger box, then
/// earliest in backend order.
pub fn select_target(detections: &[Detection]) -> Option<&Detection> {
    let mut best: Option<&Detection> = None;
    for det in detections {
        let better = match best {
            None => true,
            Some(cur) => {
                det.confidence > cur.confidence
                    || (det.confidence == cur.confidence && det.bbox.area() > cur.bbox.area())
            }
        };
        if better {
            best = Some(det);
        }
    }
    best
}

struct SeekState {
    phase: SeekPhase,
    position: SweepPosition,
    best: Detection,
    frame: Frame,
    center_moves: u32,
    zoom_steps: u32,
    misses: u32,
}

impl SeekState {
    fn enter(&mut self, phase: SeekPhase) {
        if self.phase != phase {
            log::debug!("seek {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn adopt(&mut self, detection: Detection, frame: Frame) {
        self.position = frame.position();
        self.best = detection;
        self.frame = frame;
        self.misses = 0;
    }
}

enum Step {
    Continue,
    Converge(ZoomStop),
    Abandon(AbandonReason),
}

pub struct SeekController<'a> {
    settings: &'a SeekSettings,
    optics: &'a ZoomOptics,
    target: &'a TargetSpec,
    threshold: f32,
    settle: Duration,
    clock: &'a dyn Clock,
}

impl<'a> SeekController<'a> {
    pub fn new(
        settings: &'a SeekSettings,
        optics: &'a ZoomOptics,
        target: &'a TargetSpec,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            settings,
            optics,
            target,
            threshold: 0.0,
            settle: Duration::ZERO,
            clock,
        }
    }

    /// Confidence floor for re-detections.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Wait after each move before capturing.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Seek `initial`, detected in `frame`.
    pub fn run(
        &self,
        camera: &mut dyn CameraPort,
        backend: &mut dyn DetectionBackend,
        initial: Detection,
        frame: Frame,
    ) -> SeekOutcome {
        let mut state = SeekState {
            phase: SeekPhase::Centering,
            position: frame.position(),
            best: initial,
            frame,
            center_moves: 0,
            zoom_steps: 0,
            misses: 0,
        };
        log::debug!(
            "seek start: {} conf={:.2} at pan={:.1} tilt={:.1}",
            state.best.label,
            state.best.confidence,
            state.position.pan,
            state.position.tilt
        );

        loop {
            let step = match state.phase {
                SeekPhase::Centering => self.center_step(camera, backend, &mut state),
                _ => self.zoom_step(camera, backend, &mut state),
            };
            match step {
                Step::Continue => {}
                Step::Converge(stop) => {
                    state.enter(SeekPhase::Converged);
                    log::debug!(
                        "seek converged ({:?}) at zoom {:.1} after {} moves, {} zoom steps",
                        stop,
                        state.position.zoom,
                        state.center_moves,
                        state.zoom_steps
                    );
                    return SeekOutcome::Converged(SeekResult {
                        detection: state.best,
                        frame: state.frame,
                        position: state.position,
                        center_moves: state.center_moves,
                        zoom_steps: state.zoom_steps,
                        stop,
                    });
                }
                Step::Abandon(reason) => {
                    state.enter(SeekPhase::Abandoned);
                    log::debug!("seek abandoned: {:?}", reason);
                    return SeekOutcome::Abandoned {
                        reason,
                        position: state.position,
                    };
                }
            }
        }
    }

    fn is_centered(&self, detection: &Detection, tolerance: f32) -> bool {
        let (dx, dy) = detection.bbox.center_offset();
        dx.abs() <= tolerance && dy.abs() <= tolerance
    }

    fn center_step(
        &self,
        camera: &mut dyn CameraPort,
        backend: &mut dyn DetectionBackend,
        state: &mut SeekState,
    ) -> Step {
        if self.is_centered(&state.best, self.settings.center_tolerance) {
            state.enter(SeekPhase::Zooming);
            return Step::Continue;
        }
        if state.center_moves >= self.settings.max_center_attempts {
            return Step::Abandon(AbandonReason::CenteringExhausted);
        }

        let (d_pan, d_tilt) = self
            .optics
            .centering_correction(&state.best.bbox, state.position.zoom);
        if let Err(fault) = camera.move_relative(d_pan, d_tilt) {
            return Step::Abandon(AbandonReason::CameraFault(fault));
        }
        state.center_moves += 1;
        state.position = state.position.offset(d_pan, d_tilt);
        self.clock.sleep(self.settle);

        // Re-observe from the same position until the target shows up again
        // or the miss budget runs out.
        loop {
            match self.observe(camera, backend, &state.best.label) {
                Err(fault) => return Step::Abandon(AbandonReason::CameraFault(fault)),
                Ok(Some((detection, frame))) => {
                    state.adopt(detection, frame);
                    return Step::Continue;
                }
                Ok(None) => {
                    state.misses += 1;
                    log::debug!(
                        "seek re-detect miss {}/{}",
                        state.misses,
                        self.settings.max_consecutive_misses
                    );
                    if state.misses >= self.settings.max_consecutive_misses {
                        return Step::Abandon(AbandonReason::TargetLost);
                    }
                }
            }
        }
    }

    fn zoom_step(
        &self,
        camera: &mut dyn CameraPort,
        backend: &mut dyn DetectionBackend,
        state: &mut SeekState,
    ) -> Step {
        let bbox = state.best.bbox;
        let area = bbox.area();
        let zoom = state.position.zoom;
        let fill = self.settings.target_fill;

        if area >= fill {
            return Step::Converge(ZoomStop::FillReached);
        }
        if zoom >= self.optics.max_zoom - ZOOM_EPSILON {
            return Step::Converge(ZoomStop::MaxZoom);
        }
        if state.zoom_steps >= self.settings.max_zoom_steps {
            return Step::Converge(ZoomStop::StepBudget);
        }

        let fill_scale = if area > 0.0 {
            ((fill / area) as f64).sqrt()
        } else {
            f64::INFINITY
        };
        let bound_scale = bbox.max_scale_within(self.settings.frame_margin) as f64;
        let wanted = fill_scale.min(self.settings.max_zoom_step_ratio);
        let scale = wanted.min(bound_scale);
        let next_zoom = self.optics.zoom_for_scale(zoom, scale);
        if next_zoom <= zoom + ZOOM_EPSILON {
            let stop = if bound_scale < wanted {
                ZoomStop::FrameBounds
            } else {
                ZoomStop::MaxZoom
            };
            return Step::Converge(stop);
        }

        let previous = state.position;
        let next = previous.with_zoom(next_zoom);
        if let Err(fault) = camera.move_absolute(next.pan, next.tilt, next.zoom) {
            return Step::Abandon(AbandonReason::CameraFault(fault));
        }
        state.zoom_steps += 1;
        state.position = next;
        self.clock.sleep(self.settle);

        // A converged frame must stay within the centering tolerance.
        match self.observe(camera, backend, &state.best.label) {
            Err(fault) => Step::Abandon(AbandonReason::CameraFault(fault)),
            Ok(Some((detection, frame)))
                if self.is_centered(&detection, self.settings.center_tolerance) =>
            {
                state.adopt(detection, frame);
                Step::Continue
            }
            Ok(hit) => {
                match &hit {
                    Some((det, _)) => log::debug!(
                        "zoom step to {:.1} drifted to offset {:?}, reverting",
                        next.zoom,
                        det.bbox.center_offset()
                    ),
                    None => log::debug!("zoom step to {:.1} lost the target, reverting", next.zoom),
                }
                if let Err(fault) = camera.move_absolute(previous.pan, previous.tilt, previous.zoom)
                {
                    return Step::Abandon(AbandonReason::CameraFault(fault));
                }
                state.position = previous;
                self.clock.sleep(self.settle);
                Step::Converge(ZoomStop::Reverted)
            }
        }
    }

    /// Capture and re-detect the label being sought. Among several matches
    /// the one closest to the frame center wins, then higher confidence.
    fn observe(
        &self,
        camera: &mut dyn CameraPort,
        backend: &mut dyn DetectionBackend,
        label: &str,
    ) -> Result<Option<(Detection, Frame)>, CameraFault> {
        let frame = camera.capture()?;
        let detections = match detect_filtered(backend, &frame, self.target, self.threshold) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("seek re-detect failed, treating as miss: {}", err);
                Vec::new()
            }
        };
        let best = detections
            .into_iter()
            .filter(|det| det.same_label(label))
            .min_by(|a, b| {
                center_distance(a)
                    .total_cmp(&center_distance(b))
                    .then(b.confidence.total_cmp(&a.confidence))
            });
        Ok(best.map(|det| (det, frame)))
    }
}

fn center_distance(det: &Detection) -> f32 {
    let (dx, dy) = det.bbox.center_offset();
    (dx * dx + dy * dy).sqrt()
}
