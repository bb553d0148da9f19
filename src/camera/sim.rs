//! Synthetic camera and scene used with `stub://` URLs.

use serde::{Deserialize, Serialize};

use super::{CameraPort, GeoLocation};
use crate::detect::Detection;
use crate::error::CameraFault;
use crate::frame::{Frame, ImageEncoding};
use crate::geometry::{signed_pan_delta, BoundingBox, SweepPosition, ZoomOptics};

const TILT_LIMIT: f64 = 90.0;

/// Object fixed in the scene at an absolute pan/tilt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimObject {
    pub label: String,
    pub pan: f64,
    pub tilt: f64,
    /// Angular size in degrees.
    pub width_deg: f64,
    pub height_deg: f64,
    pub confidence: f32,
}

impl SimObject {
    pub fn new(
        label: impl Into<String>,
        pan: f64,
        tilt: f64,
        width_deg: f64,
        height_deg: f64,
        confidence: f32,
    ) -> Self {
        Self {
            label: label.into(),
            pan,
            tilt,
            width_deg,
            height_deg,
            confidence,
        }
    }
}

/// Static scene around the camera.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimWorld {
    pub objects: Vec<SimObject>,
}

impl SimWorld {
    pub fn new(objects: Vec<SimObject>) -> Self {
        Self { objects }
    }

    /// Small scene for demos: a person due east and a bird to the southwest.
    pub fn demo() -> Self {
        Self::new(vec![
            SimObject::new("person", 45.0, 0.0, 2.0, 5.0, 0.3),
            SimObject::new("bird", 200.0, -5.0, 0.8, 0.6, 0.6),
        ])
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Detections a perfect detector would report from `position`.
    ///
    /// An object is visible when its center lies inside the frame; its box
    /// is clipped to the frame.
    pub fn observe(&self, position: &SweepPosition, optics: &ZoomOptics) -> Vec<Detection> {
        let fov = optics.fov(position.zoom);
        self.objects
            .iter()
            .filter_map(|obj| {
                let dx = signed_pan_delta(position.pan, obj.pan) / fov.horizontal;
                let dy = (obj.tilt - position.tilt) / fov.vertical;
                let (cx, cy) = (0.5 + dx, 0.5 + dy);
                if !(0.0..=1.0).contains(&cx) || !(0.0..=1.0).contains(&cy) {
                    return None;
                }
                let w = obj.width_deg / fov.horizontal;
                let h = obj.height_deg / fov.vertical;
                let bbox =
                    BoundingBox::centered_at(cx as f32, cy as f32, w as f32, h as f32).clipped();
                Some(Detection::new(obj.label.clone(), obj.confidence, bbox))
            })
            .collect()
    }
}

/// Camera that moves instantly and renders flat synthetic frames.
///
/// Pair with [`crate::detect::SimBackend`] over the same world to exercise
/// the full loop without hardware.
pub struct SimCamera {
    world: SimWorld,
    optics: ZoomOptics,
    position: SweepPosition,
    width: u32,
    height: u32,
    location: Option<GeoLocation>,
    frames: u64,
    absolute_moves: u64,
    relative_moves: u64,
    pending_capture_faults: u32,
}

impl SimCamera {
    pub fn new(world: SimWorld, optics: ZoomOptics) -> Self {
        Self {
            world,
            optics,
            position: SweepPosition::new(0.0, 0.0, optics.min_zoom),
            width: 64,
            height: 36,
            location: None,
            frames: 0,
            absolute_moves: 0,
            relative_moves: 0,
            pending_capture_faults: 0,
        }
    }

    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    pub fn with_location(mut self, location: Option<GeoLocation>) -> Self {
        self.location = location;
        self
    }

    /// Make the next `count` captures fail.
    pub fn inject_capture_faults(&mut self, count: u32) {
        self.pending_capture_faults = count;
    }

    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    pub fn position(&self) -> SweepPosition {
        self.position
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames
    }

    pub fn absolute_moves(&self) -> u64 {
        self.absolute_moves
    }

    pub fn relative_moves(&self) -> u64 {
        self.relative_moves
    }

    fn render(&self) -> Vec<u8> {
        // Shade varies with pan so successive frames hash differently.
        let shade = (self.position.pan as u32 % 256) as u8;
        let len = self.width as usize * self.height as usize * 3;
        let mut data = vec![shade; len];
        if let Some(first) = data.first_mut() {
            *first = (self.frames % 256) as u8;
        }
        data
    }
}

impl CameraPort for SimCamera {
    fn move_absolute(&mut self, pan: f64, tilt: f64, zoom: f64) -> Result<(), CameraFault> {
        if !(pan.is_finite() && tilt.is_finite() && zoom.is_finite()) {
            return Err(CameraFault::Move("non-finite setpoint".to_string()));
        }
        if zoom < self.optics.min_zoom || zoom > self.optics.max_zoom {
            return Err(CameraFault::Move(format!(
                "zoom {:.2} outside {:.1}..{:.1}",
                zoom, self.optics.min_zoom, self.optics.max_zoom
            )));
        }
        self.position = SweepPosition::new(pan, tilt.clamp(-TILT_LIMIT, TILT_LIMIT), zoom);
        self.absolute_moves += 1;
        Ok(())
    }

    fn move_relative(&mut self, d_pan: f64, d_tilt: f64) -> Result<(), CameraFault> {
        if !(d_pan.is_finite() && d_tilt.is_finite()) {
            return Err(CameraFault::Move("non-finite offset".to_string()));
        }
        let next = self.position.offset(d_pan, d_tilt);
        self.position = SweepPosition {
            tilt: next.tilt.clamp(-TILT_LIMIT, TILT_LIMIT),
            ..next
        };
        self.relative_moves += 1;
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, CameraFault> {
        if self.pending_capture_faults > 0 {
            self.pending_capture_faults -= 1;
            return Err(CameraFault::Capture("injected capture fault".to_string()));
        }
        let data = self.render();
        self.frames += 1;
        Ok(Frame::new(
            data,
            self.width,
            self.height,
            ImageEncoding::Rgb8,
            self.position,
        ))
    }

    fn location(&self) -> Option<GeoLocation> {
        self.location
    }
}
