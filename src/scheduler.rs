//! Round scheduler: the outer scan loop.
//!
//! Each round walks the planner's sweep positions. At every position the
//! camera moves, settles and captures; the best candidate (if any, and not
//! already captured this round) is handed to the seek controller, whose
//! outcome goes to the capture session. The scan then resumes at the next
//! planned position. Round starts are spaced at least `iter_delay` apart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::camera::CameraPort;
use crate::clock::Clock;
use crate::config::ScanConfig;
use crate::detect::{detect_filtered, Detection, DetectionBackend};
use crate::error::{CameraFault, RunError};
use crate::frame::Frame;
use crate::geometry::SweepPosition;
use crate::planner::ScanPlanner;
use crate::seek::{select_target, SeekController, SeekOutcome};
use crate::session::{CaptureSession, CapturedObject};
use crate::state::{RunState, RunStats};

/// Longest uninterrupted inter-round sleep; the stop flag is polled between
/// slices.
const STOP_POLL: Duration = Duration::from_millis(500);

/// Progress callbacks. All methods default to no-ops.
pub trait ScanObserver {
    fn on_round_start(&mut self, _round: u32, _positions: usize, _tilt: f64) {}

    fn on_position(&mut self, _round: u32, _index: usize, _position: &SweepPosition) {}

    fn on_capture(&mut self, _captured: &CapturedObject) {}

    fn on_round_end(&mut self, _round: u32, _stats: &RunStats) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl ScanObserver for NoopObserver {}

pub struct RoundScheduler {
    config: ScanConfig,
    camera: Box<dyn CameraPort>,
    backend: Box<dyn DetectionBackend>,
    session: CaptureSession,
    clock: Arc<dyn Clock>,
    stop: Arc<AtomicBool>,
    observer: Box<dyn ScanObserver>,
}

impl RoundScheduler {
    /// `config` must already be validated.
    pub fn new(
        config: ScanConfig,
        camera: Box<dyn CameraPort>,
        backend: Box<dyn DetectionBackend>,
        session: CaptureSession,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            camera,
            backend,
            session,
            clock,
            stop: Arc::new(AtomicBool::new(false)),
            observer: Box::new(NoopObserver),
        }
    }

    /// Share an external stop flag (e.g. set from a Ctrl-C handler).
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn ScanObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Run all rounds. Returns the run summary, or `RunError` when the
    /// camera keeps failing at scan level.
    pub fn run(&mut self, state: &mut RunState) -> Result<RunStats, RunError> {
        if let Err(err) = self.backend.prepare(&self.config.target) {
            log::warn!("detector {} prepare failed: {}", self.backend.name(), err);
        }
        log::info!(
            "scan start: {} rounds, pan step {:.1}, detector {}, publish {}",
            self.config.iterations,
            self.config.pan_step,
            self.backend.name(),
            self.session.sink_name()
        );

        'rounds: for round in 0..self.config.iterations {
            if self.stop_requested() {
                break;
            }
            state.round = round;
            state.round_started = self.clock.now();
            let planner = ScanPlanner::new(self.config.pan_step, state.tilt, self.config.zoom);
            log::info!(
                "round {}/{}: {} positions at tilt {:.1}",
                round + 1,
                self.config.iterations,
                planner.len(),
                state.tilt
            );
            self.observer
                .on_round_start(round, planner.len(), state.tilt);

            let mut found_any = false;
            for (index, position) in planner.positions().enumerate() {
                if self.stop_requested() {
                    log::info!("stop requested, ending scan");
                    break 'rounds;
                }
                self.observer.on_position(round, index, &position);
                found_any |= self.scan_position(state, position)?;
            }

            state.stats.rounds += 1;
            let next_tilt = state.next_tilt(
                found_any,
                self.config.tilt,
                self.config.boredom_tilt_step,
                self.config.tilt_floor,
            );
            if next_tilt != state.tilt {
                log::info!(
                    "nothing found in round {}, tilt {:.1} -> {:.1}",
                    round + 1,
                    state.tilt,
                    next_tilt
                );
                state.tilt = next_tilt;
            }
            self.observer.on_round_end(round, &state.stats);

            if round + 1 < self.config.iterations {
                self.wait_for_next_round(state);
            }
        }

        log::info!(
            "scan done: {} rounds, {} captures, {} seeks abandoned",
            state.stats.rounds,
            state.stats.captures,
            state.stats.seeks_abandoned
        );
        Ok(state.stats.clone())
    }

    /// Visit one sweep position. Returns true when a candidate was seen.
    fn scan_position(
        &mut self,
        state: &mut RunState,
        position: SweepPosition,
    ) -> Result<bool, RunError> {
        state.stats.positions += 1;
        let event_id = crate::new_event_id();

        let frame = match self.move_and_capture(&position) {
            Ok(frame) => {
                state.consecutive_faults = 0;
                frame
            }
            Err(fault) => {
                state.stats.camera_faults += 1;
                state.consecutive_faults += 1;
                log::warn!(
                    "camera fault at pan={:.1} ({}/{}): {}",
                    position.pan,
                    state.consecutive_faults,
                    self.config.max_camera_faults,
                    fault
                );
                if state.consecutive_faults >= self.config.max_camera_faults {
                    log::error!("too many consecutive camera faults, stopping");
                    return Err(RunError::CameraFaults {
                        count: state.consecutive_faults,
                        last: fault,
                    });
                }
                return Ok(false);
            }
        };

        let detections = match detect_filtered(
            self.backend.as_mut(),
            &frame,
            &self.config.target,
            self.config.confidence,
        ) {
            Ok(detections) => detections,
            Err(err) => {
                state.stats.inference_errors += 1;
                log::warn!("detection failed at pan={:.1}: {}", position.pan, err);
                Vec::new()
            }
        };
        if detections.is_empty() {
            log::debug!("pan={:.1}: nothing of interest", position.pan);
            return Ok(false);
        }

        // Objects already captured this round drop out before selection so
        // a distinct object in the same frame still gets its seek.
        let seen_from = frame.position();
        let (fresh, duplicates): (Vec<Detection>, Vec<Detection>) = detections
            .into_iter()
            .partition(|det| !self.session.is_duplicate(state, det, &seen_from));
        for det in &duplicates {
            log::info!("{} already captured this round, skipping", det.label);
        }
        state.stats.duplicates_skipped += duplicates.len() as u64;
        let Some(candidate) = select_target(&fresh).cloned() else {
            return Ok(true);
        };
        log::info!(
            "pan={:.1}: {} conf={:.2}",
            position.pan,
            candidate.label,
            candidate.confidence
        );

        let location = self.camera.location();
        self.session
            .publish_before(state, &candidate, &frame, &event_id, location);

        let controller = SeekController::new(
            &self.config.seek,
            &self.config.camera.optics,
            &self.config.target,
            &*self.clock,
        )
        .with_threshold(self.config.confidence)
        .with_settle(self.config.camera.move_settle);
        let outcome = controller.run(
            self.camera.as_mut(),
            self.backend.as_mut(),
            candidate,
            frame,
        );

        match &outcome {
            SeekOutcome::Converged(_) => state.stats.seeks_converged += 1,
            SeekOutcome::Abandoned { reason, position } => {
                state.stats.seeks_abandoned += 1;
                if matches!(reason, crate::seek::AbandonReason::CameraFault(_)) {
                    state.stats.camera_faults += 1;
                }
                log::info!(
                    "seek abandoned at pan={:.1} tilt={:.1}: {:?}",
                    position.pan,
                    position.tilt,
                    reason
                );
            }
        }
        if let Some(captured) = self.session.record(state, &outcome, &event_id, location) {
            self.observer.on_capture(&captured);
        }
        Ok(true)
    }

    fn move_and_capture(&mut self, position: &SweepPosition) -> Result<Frame, CameraFault> {
        self.camera
            .move_absolute(position.pan, position.tilt, position.zoom)?;
        self.clock.sleep(self.config.camera.move_settle);
        self.camera.capture()
    }

    /// Sleep out the rest of `iter_delay`, measured from the round start.
    fn wait_for_next_round(&self, state: &RunState) {
        let elapsed = self.clock.now().saturating_sub(state.round_started);
        let mut remaining = self.config.iter_delay.saturating_sub(elapsed);
        if remaining.is_zero() {
            log::info!(
                "round took {:.1}s, longer than the {}s delay; starting next round",
                elapsed.as_secs_f64(),
                self.config.iter_delay.as_secs()
            );
            return;
        }
        log::info!(
            "round took {:.1}s, waiting {:.1}s",
            elapsed.as_secs_f64(),
            remaining.as_secs_f64()
        );
        while !remaining.is_zero() {
            if self.stop_requested() {
                return;
            }
            let slice = remaining.min(STOP_POLL);
            self.clock.sleep(slice);
            remaining -= slice;
        }
    }
}
