//! Camera geometry: sweep positions, normalized bounding boxes and the
//! zoom-to-field-of-view model used to turn image offsets into degrees.

use serde::{Deserialize, Serialize};

/// One pan/tilt/zoom setpoint. Pan is kept in `[0, 360)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepPosition {
    pub pan: f64,
    pub tilt: f64,
    pub zoom: f64,
}

impl SweepPosition {
    pub fn new(pan: f64, tilt: f64, zoom: f64) -> Self {
        Self {
            pan: normalize_pan(pan),
            tilt,
            zoom,
        }
    }

    /// Position after a relative pan/tilt move. Zoom is unchanged.
    pub fn offset(self, d_pan: f64, d_tilt: f64) -> Self {
        Self::new(self.pan + d_pan, self.tilt + d_tilt, self.zoom)
    }

    pub fn with_zoom(self, zoom: f64) -> Self {
        Self { zoom, ..self }
    }
}

/// Wrap a pan angle into `[0, 360)`.
pub fn normalize_pan(pan: f64) -> f64 {
    let wrapped = pan.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed shortest pan difference `to - from`, in `(-180, 180]`.
pub fn signed_pan_delta(from: f64, to: f64) -> f64 {
    let d = (to - from).rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Absolute pan/tilt of a point in the scene, in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AngularPosition {
    pub pan: f64,
    pub tilt: f64,
}

impl AngularPosition {
    /// Angular separation with wrap-aware pan.
    pub fn distance_to(&self, other: &AngularPosition) -> f64 {
        let d_pan = signed_pan_delta(self.pan, other.pan);
        let d_tilt = other.tilt - self.tilt;
        (d_pan * d_pan + d_tilt * d_tilt).sqrt()
    }
}

/// Axis-aligned box in frame-relative coordinates (`0..1`, origin top-left).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Box of the given size centered on `(cx, cy)`.
    pub fn centered_at(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, w, h)
    }

    /// Build from pixel corner coordinates `(x1, y1, x2, y2)`.
    pub fn from_pixel_corners(corners: [f32; 4], width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let (fw, fh) = (width as f32, height as f32);
        let [x1, y1, x2, y2] = corners;
        let bbox = Self::new(x1 / fw, y1 / fh, (x2 - x1) / fw, (y2 - y1) / fh);
        Some(bbox.clipped())
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Offset of the box center from the frame center, each in `-0.5..0.5`.
    pub fn center_offset(&self) -> (f32, f32) {
        let (cx, cy) = self.center();
        (cx - 0.5, cy - 0.5)
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Intersection with the frame. Degenerate boxes collapse to zero size.
    pub fn clipped(&self) -> Self {
        let x1 = self.x.clamp(0.0, 1.0);
        let y1 = self.y.clamp(0.0, 1.0);
        let x2 = (self.x + self.w).clamp(0.0, 1.0);
        let y2 = (self.y + self.h).clamp(0.0, 1.0);
        Self::new(x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0))
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Largest magnification about the frame center that keeps the box at
    /// least `margin` away from every frame edge.
    pub fn max_scale_within(&self, margin: f32) -> f32 {
        let (dx, dy) = self.center_offset();
        let half_room = 0.5 - margin;
        let extent_x = dx.abs() + self.w / 2.0;
        let extent_y = dy.abs() + self.h / 2.0;
        let extent = extent_x.max(extent_y);
        if extent <= f32::EPSILON {
            return f32::INFINITY;
        }
        half_room / extent
    }
}

/// Horizontal and vertical field of view in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldOfView {
    pub horizontal: f64,
    pub vertical: f64,
}

/// Linear zoom→FOV model of the PTZ lens.
///
/// The FOV shrinks linearly from the wide end at `min_zoom` to the tele end
/// at `max_zoom`. Defaults describe a 4.25–170 mm, 40x block camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomOptics {
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub h_fov_wide: f64,
    pub h_fov_tele: f64,
    pub v_fov_wide: f64,
    pub v_fov_tele: f64,
}

impl Default for ZoomOptics {
    fn default() -> Self {
        Self {
            min_zoom: 1.0,
            max_zoom: 40.0,
            h_fov_wide: 65.66,
            h_fov_tele: 1.88,
            v_fov_wide: 39.40,
            v_fov_tele: 1.09,
        }
    }
}

impl ZoomOptics {
    pub fn clamp_zoom(&self, zoom: f64) -> f64 {
        zoom.clamp(self.min_zoom, self.max_zoom)
    }

    fn zoom_fraction(&self, zoom: f64) -> f64 {
        let span = self.max_zoom - self.min_zoom;
        if span <= 0.0 {
            return 0.0;
        }
        (self.clamp_zoom(zoom) - self.min_zoom) / span
    }

    pub fn fov(&self, zoom: f64) -> FieldOfView {
        let t = self.zoom_fraction(zoom);
        FieldOfView {
            horizontal: self.h_fov_wide - t * (self.h_fov_wide - self.h_fov_tele),
            vertical: self.v_fov_wide - t * (self.v_fov_wide - self.v_fov_tele),
        }
    }

    /// Zoom level at which objects appear `scale` times larger than at `zoom`.
    ///
    /// Result is clamped to the lens range.
    pub fn zoom_for_scale(&self, zoom: f64, scale: f64) -> f64 {
        let current = self.fov(zoom).horizontal;
        let wanted = current / scale.max(f64::EPSILON);
        let span = self.h_fov_wide - self.h_fov_tele;
        if span <= 0.0 {
            return self.clamp_zoom(zoom);
        }
        let t = (self.h_fov_wide - wanted) / span;
        self.clamp_zoom(self.min_zoom + t * (self.max_zoom - self.min_zoom))
    }

    /// Pan/tilt correction that brings `bbox` to the frame center.
    ///
    /// Tilt follows image rows: an object below the center yields a
    /// positive tilt correction.
    pub fn centering_correction(&self, bbox: &BoundingBox, zoom: f64) -> (f64, f64) {
        let fov = self.fov(zoom);
        let (dx, dy) = bbox.center_offset();
        (dx as f64 * fov.horizontal, dy as f64 * fov.vertical)
    }

    /// Absolute angular position of the box center seen from `position`.
    pub fn project(&self, position: &SweepPosition, bbox: &BoundingBox) -> AngularPosition {
        let (d_pan, d_tilt) = self.centering_correction(bbox, position.zoom);
        AngularPosition {
            pan: normalize_pan(position.pan + d_pan),
            tilt: position.tilt + d_tilt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn fov_interpolates_between_wide_and_tele() {
        let optics = ZoomOptics::default();
        let wide = optics.fov(1.0);
        assert!(approx(wide.horizontal, 65.66));
        assert!(approx(wide.vertical, 39.40));

        let tele = optics.fov(40.0);
        assert!(approx(tele.horizontal, 1.88));
        assert!(approx(tele.vertical, 1.09));

        // out of range zoom is clamped
        assert_eq!(optics.fov(0.2), wide);
        assert_eq!(optics.fov(80.0), tele);
    }

    #[test]
    fn zoom_for_scale_inverts_fov() {
        let optics = ZoomOptics::default();
        let zoom = optics.zoom_for_scale(1.0, 2.0);
        let ratio = optics.fov(1.0).horizontal / optics.fov(zoom).horizontal;
        assert!((ratio - 2.0).abs() < 1e-6);
        assert_eq!(optics.zoom_for_scale(39.0, 10.0), 40.0);
    }

    #[test]
    fn pan_wraps_and_distance_is_shortest_way_round() {
        assert!(approx(normalize_pan(-15.0), 345.0));
        assert!(approx(normalize_pan(375.0), 15.0));
        assert!(approx(signed_pan_delta(350.0, 10.0), 20.0));
        assert!(approx(signed_pan_delta(10.0, 350.0), -20.0));

        let a = AngularPosition { pan: 358.0, tilt: 0.0 };
        let b = AngularPosition { pan: 2.0, tilt: 3.0 };
        assert!(approx(a.distance_to(&b), 5.0));
    }

    #[test]
    fn centered_box_needs_no_correction() {
        let optics = ZoomOptics::default();
        let bbox = BoundingBox::centered_at(0.5, 0.5, 0.1, 0.2);
        let (d_pan, d_tilt) = optics.centering_correction(&bbox, 1.0);
        assert!(d_pan.abs() < 1e-6);
        assert!(d_tilt.abs() < 1e-6);

        let right = BoundingBox::centered_at(0.75, 0.5, 0.1, 0.1);
        let (d_pan, _) = optics.centering_correction(&right, 1.0);
        assert!(approx(d_pan, 0.25 * 65.66));
    }

    #[test]
    fn max_scale_keeps_box_inside_frame() {
        let bbox = BoundingBox::centered_at(0.5, 0.5, 0.1, 0.1);
        assert!((bbox.max_scale_within(0.0) - 10.0).abs() < 1e-4);

        let edge = BoundingBox::new(0.0, 0.4, 0.2, 0.2);
        assert!(edge.max_scale_within(0.02) < 1.0);
    }

    #[test]
    fn pixel_corners_are_normalized_and_clipped() {
        let bbox = BoundingBox::from_pixel_corners([-10.0, 0.0, 320.0, 240.0], 640, 480)
            .expect("non-empty frame");
        assert_eq!(bbox.x, 0.0);
        assert!((bbox.w - 0.5).abs() < 1e-6);
        assert!((bbox.h - 0.5).abs() < 1e-6);
        assert!(BoundingBox::from_pixel_corners([0.0; 4], 0, 480).is_none());
    }
}
