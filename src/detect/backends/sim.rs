use crate::camera::SimWorld;
use crate::detect::backend::{DetectionBackend, DetectionCapability};
use crate::detect::result::Detection;
use crate::error::InferenceError;
use crate::frame::Frame;
use crate::geometry::ZoomOptics;

/// Detector over a simulated world.
///
/// Pairs with `SimCamera`: instead of looking at pixels it projects the
/// world's objects through the position stamped on the frame, so the
/// closed loop behaves like a real camera/detector pair without a model.
pub struct SimBackend {
    world: SimWorld,
    optics: ZoomOptics,
    frames_seen: u64,
}

impl SimBackend {
    pub fn new(world: SimWorld, optics: ZoomOptics) -> Self {
        Self {
            world,
            optics,
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl DetectionBackend for SimBackend {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ClosedVocabulary)
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        if frame.is_empty() {
            return Err(InferenceError::MalformedFrame("empty frame".to_string()));
        }
        self.frames_seen += 1;
        Ok(self.world.observe(&frame.position(), &self.optics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SimObject;
    use crate::frame::ImageEncoding;
    use crate::geometry::SweepPosition;

    fn frame_at(position: SweepPosition, data: Vec<u8>) -> Frame {
        Frame::new(data, 4, 4, ImageEncoding::Rgb8, position)
    }

    #[test]
    fn sim_backend_sees_objects_in_view() {
        let world = SimWorld::new(vec![SimObject::new("person", 45.0, 0.0, 2.0, 5.0, 0.3)]);
        let mut backend = SimBackend::new(world, ZoomOptics::default());

        let hits = backend
            .detect(&frame_at(SweepPosition::new(45.0, 0.0, 1.0), vec![1; 48]))
            .expect("detect");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].label, "person");
        let (dx, dy) = hits[0].bbox.center_offset();
        assert!(dx.abs() < 1e-4 && dy.abs() < 1e-4);

        let misses = backend
            .detect(&frame_at(SweepPosition::new(200.0, 0.0, 1.0), vec![1; 48]))
            .expect("detect");
        assert!(misses.is_empty());
        assert_eq!(backend.frames_seen(), 2);
    }

    #[test]
    fn empty_frame_is_an_inference_error() {
        let mut backend = SimBackend::new(SimWorld::default(), ZoomOptics::default());
        let err = backend
            .detect(&frame_at(SweepPosition::new(0.0, 0.0, 1.0), Vec::new()))
            .unwrap_err();
        assert!(matches!(err, InferenceError::MalformedFrame(_)));
    }
}
