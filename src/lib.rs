//! PTZ scan-and-seek
//!
//! This crate drives a motorized pan-tilt-zoom camera through repeated 360°
//! sweeps, runs an object detector on every stop, and when something of
//! interest shows up it closes the loop on the camera: center the object,
//! zoom in until it fills the frame, then capture and tag a single image.
//!
//! # Architecture
//!
//! The control loop is strictly sequential. One camera command is in flight
//! at a time and detection always runs on the most recent capture.
//!
//! 1. **RoundScheduler** (`scheduler`) runs the configured number of rounds
//!    and enforces the minimum spacing between round starts.
//! 2. **ScanPlanner** (`planner`) yields the sweep positions of one round.
//! 3. **CameraPort** (`camera`) moves the camera and captures frames.
//! 4. **DetectionBackend** (`detect`) turns a frame into detections.
//! 5. **SeekController** (`seek`) centers and zooms on a candidate.
//! 6. **CaptureSession** (`session`) dedups, tags, persists and publishes.
//!
//! # Module Structure
//!
//! - `geometry`: sweep positions, bounding boxes, zoom optics
//! - `frame`: captured image container
//! - `error`: camera, inference, publish and run error taxonomy
//! - `config`: run configuration (file + env + CLI overrides)
//! - `clock`: injectable time source for settle and inter-round delays
//! - `publish`: publish sinks (log, MQTT)
//! - `state`: explicit run state threaded through the loop

pub mod camera;
pub mod clock;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod planner;
pub mod publish;
pub mod scheduler;
pub mod seek;
pub mod session;
pub mod state;

pub use camera::{CameraPort, GeoLocation, SimCamera, SimObject, SimWorld};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BackendSettings, CameraSettings, CaptureSettings, PublishSettings, ScanConfig, SeekSettings,
};
pub use detect::{
    create_backend, detect_filtered, BackendOptions, Detection, DetectionBackend,
    DetectionCapability, ModelSpec, SimBackend, TargetSpec,
};
pub use error::{CameraFault, InferenceError, PublishError, RunError};
pub use frame::{Frame, ImageEncoding};
pub use geometry::{AngularPosition, BoundingBox, FieldOfView, SweepPosition, ZoomOptics};
pub use planner::ScanPlanner;
pub use publish::{CaptureMetadata, CaptureView, LogSink, PublishSink};
pub use scheduler::{NoopObserver, RoundScheduler, ScanObserver};
pub use seek::{
    select_target, AbandonReason, SeekController, SeekOutcome, SeekPhase, SeekResult, ZoomStop,
};
pub use session::{CaptureSession, CapturedObject};
pub use state::{RunState, RunStats};

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, saturating to zero on clock skew.
pub fn now_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Random 128-bit identifier shared by every artifact of one scan position.
pub fn new_event_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}
