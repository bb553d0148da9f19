//! Capture session: dedup, capture decision, metadata, retention and
//! publishing of finished captures.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::camera::GeoLocation;
use crate::config::CaptureSettings;
use crate::detect::Detection;
use crate::frame::Frame;
use crate::geometry::{AngularPosition, SweepPosition, ZoomOptics};
use crate::publish::{CaptureMetadata, CaptureView, PublishSink};
use crate::seek::SeekOutcome;
use crate::state::RunState;

/// One finished capture.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CapturedObject {
    pub event_id: String,
    pub label: String,
    pub confidence: f32,
    /// Camera position of the captured frame.
    pub position: SweepPosition,
    /// Absolute angular position of the object center.
    pub angular: AngularPosition,
    pub timestamp_s: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    pub round: u32,
}

pub struct CaptureSession {
    sink: Box<dyn PublishSink>,
    keep_dir: Option<PathBuf>,
    dedup_tolerance_deg: f64,
    publish_before: bool,
    optics: ZoomOptics,
}

impl CaptureSession {
    pub fn new(sink: Box<dyn PublishSink>, settings: &CaptureSettings, optics: ZoomOptics) -> Self {
        Self {
            sink,
            keep_dir: settings
                .keep_images
                .then(|| settings.keep_dir.clone()),
            dedup_tolerance_deg: settings.dedup_tolerance_deg,
            publish_before: settings.publish_before,
            optics,
        }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// True when `detection`, seen from `position`, matches an object
    /// already captured in the current round.
    pub fn is_duplicate(
        &self,
        run: &RunState,
        detection: &Detection,
        position: &SweepPosition,
    ) -> bool {
        let angular = self.optics.project(position, &detection.bbox);
        run.round_captures().any(|prior| {
            detection.same_label(&prior.label)
                && prior.angular.distance_to(&angular) <= self.dedup_tolerance_deg
        })
    }

    /// Publish the wide frame a candidate was found in, when enabled.
    pub fn publish_before(
        &mut self,
        run: &RunState,
        detection: &Detection,
        frame: &Frame,
        event_id: &str,
        location: Option<GeoLocation>,
    ) {
        if !self.publish_before {
            return;
        }
        let metadata = self.metadata(
            run,
            detection,
            frame,
            event_id,
            location,
            CaptureView::Before,
        );
        if let Err(err) = self.sink.submit(frame.bytes(), &metadata) {
            log::warn!("publish of before view {} failed: {}", event_id, err);
        }
    }

    /// Record a seek outcome. Only converged, non-duplicate seeks produce a
    /// capture; the capture is persisted (when enabled), published, and
    /// appended to the run state.
    pub fn record(
        &mut self,
        run: &mut RunState,
        outcome: &SeekOutcome,
        event_id: &str,
        location: Option<GeoLocation>,
    ) -> Option<CapturedObject> {
        let result = match outcome {
            SeekOutcome::Converged(result) => result,
            SeekOutcome::Abandoned { .. } => return None,
        };
        let frame = &result.frame;
        let detection = &result.detection;
        let position = frame.position();
        if self.is_duplicate(run, detection, &position) {
            log::info!(
                "{} at pan={:.1} already captured this round after seek, skipping",
                detection.label,
                position.pan
            );
            run.stats.duplicates_skipped += 1;
            return None;
        }

        let metadata = self.metadata(run, detection, frame, event_id, location, CaptureView::After);
        if let Some(dir) = &self.keep_dir {
            if let Err(err) = persist(dir, frame, &metadata) {
                log::warn!("failed to keep capture {}: {:#}", event_id, err);
            }
        }
        if let Err(err) = self.sink.submit(frame.bytes(), &metadata) {
            log::warn!("publish of capture {} failed: {}", event_id, err);
        }

        let captured = CapturedObject {
            event_id: event_id.to_string(),
            label: detection.label.clone(),
            confidence: detection.confidence,
            position,
            angular: AngularPosition {
                pan: metadata.target_pan,
                tilt: metadata.target_tilt,
            },
            timestamp_s: metadata.timestamp_s,
            location,
            round: run.round,
        };
        log::info!(
            "captured {} conf={:.2} at pan={:.1} tilt={:.1} zoom={:.1}",
            captured.label,
            captured.confidence,
            position.pan,
            position.tilt,
            position.zoom
        );
        run.captures.push(captured.clone());
        run.stats.captures += 1;
        Some(captured)
    }

    fn metadata(
        &self,
        run: &RunState,
        detection: &Detection,
        frame: &Frame,
        event_id: &str,
        location: Option<GeoLocation>,
        view: CaptureView,
    ) -> CaptureMetadata {
        let position = frame.position();
        let angular = self.optics.project(&position, &detection.bbox);
        CaptureMetadata {
            event_id: event_id.to_string(),
            view,
            object_type: detection.label.clone(),
            confidence: detection.confidence,
            timestamp_s: frame.timestamp_s(),
            pan: position.pan,
            tilt: position.tilt,
            zoom: position.zoom,
            target_pan: angular.pan,
            target_tilt: angular.tilt,
            round: run.round,
            location,
            image_sha256: frame.sha256_hex(),
        }
    }
}

fn file_stem(frame: &Frame, metadata: &CaptureMetadata) -> String {
    let label: String = metadata
        .object_type
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!(
        "{}_{}_conf{:.2}",
        frame.timestamp_ms(),
        label,
        metadata.confidence
    )
}

fn persist(dir: &Path, frame: &Frame, metadata: &CaptureMetadata) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create keep dir {}", dir.display()))?;
    let stem = file_stem(frame, metadata);
    let image_path = dir.join(format!("{}.{}", stem, frame.encoding.extension()));
    std::fs::write(&image_path, frame.bytes())
        .with_context(|| format!("failed to write {}", image_path.display()))?;
    let meta_path = dir.join(format!("{}.json", stem));
    let json = serde_json::to_vec_pretty(metadata).context("encode capture metadata")?;
    std::fs::write(&meta_path, json)
        .with_context(|| format!("failed to write {}", meta_path.display()))?;
    Ok(image_path)
}
