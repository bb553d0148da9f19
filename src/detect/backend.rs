use crate::detect::result::{Detection, TargetSpec};
use crate::error::InferenceError;
use crate::frame::Frame;

/// Detection capabilities supported by backends.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    /// Fixed class list (e.g. COCO). Supports the `*` wildcard.
    ClosedVocabulary,
    /// Free-text phrases grounded in the image (vision-language models).
    OpenVocabulary,
}

/// Detector backend trait.
///
/// A backend maps a frame to detections and nothing else. It must not move
/// the camera, write to the capture session, or keep the frame beyond the
/// `detect` call. Internal caches (model state, prompts) are allowed, hence
/// `&mut self`.
pub trait DetectionBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on a frame. Returns every detection the model produced;
    /// target and threshold filtering happens in [`detect_filtered`].
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError>;

    /// Configure the backend for the run's targets before the first frame.
    ///
    /// Open-vocabulary backends build their prompt here.
    fn prepare(&mut self, _target: &TargetSpec) -> Result<(), InferenceError> {
        Ok(())
    }
}

/// Run detection and keep only detections with `confidence >= threshold`
/// whose label is in `target` (any label for the wildcard).
pub fn detect_filtered(
    backend: &mut dyn DetectionBackend,
    frame: &Frame,
    target: &TargetSpec,
    threshold: f32,
) -> Result<Vec<Detection>, InferenceError> {
    let detections = backend.detect(frame)?;
    Ok(detections
        .into_iter()
        .filter(|det| det.confidence >= threshold && target.matches(&det.label))
        .collect())
}
