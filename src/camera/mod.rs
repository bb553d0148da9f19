//! Camera port.
//!
//! The control loop talks to the PTZ head through [`CameraPort`] only. A
//! driver executes one command at a time and returns once the head has
//! accepted it; settling is the caller's job.
//!
//! Drivers are chosen by URL scheme:
//! - `stub://...` synthetic camera over a [`SimWorld`]
//! - `http(s)://...` camera control server (feature `camera-http`)

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::config::CameraSettings;
use crate::error::CameraFault;
use crate::frame::Frame;

#[cfg(feature = "camera-http")]
mod http;
mod sim;

#[cfg(feature = "camera-http")]
pub use http::HttpCamera;
pub use sim::{SimCamera, SimObject, SimWorld};

/// Camera install location attached to capture metadata.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
}

/// Motion and capture commands for a PTZ camera.
pub trait CameraPort: Send {
    /// Move to an absolute pan/tilt/zoom setpoint.
    fn move_absolute(&mut self, pan: f64, tilt: f64, zoom: f64) -> Result<(), CameraFault>;

    /// Move pan/tilt relative to the current position. Zoom is unchanged.
    fn move_relative(&mut self, d_pan: f64, d_tilt: f64) -> Result<(), CameraFault>;

    /// Capture a frame stamped with the position it was taken from.
    fn capture(&mut self) -> Result<Frame, CameraFault>;

    /// Install location, if known.
    fn location(&self) -> Option<GeoLocation> {
        None
    }
}

/// Open the camera named by `settings.url`.
pub fn connect(settings: &CameraSettings) -> Result<Box<dyn CameraPort>> {
    let url = settings.url.trim();
    if url.starts_with("stub://") {
        let world = SimWorld::new(settings.sim_objects.clone());
        let camera = SimCamera::new(world, settings.optics)
            .with_frame_size(settings.frame_width, settings.frame_height)
            .with_location(settings.location);
        log::info!("camera: synthetic {} ({} objects)", url, camera.world().len());
        return Ok(Box::new(camera));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return connect_http(settings);
    }
    Err(anyhow!(
        "unsupported camera url '{}'; expected stub:// or http(s)://",
        url
    ))
}

#[cfg(feature = "camera-http")]
fn connect_http(settings: &CameraSettings) -> Result<Box<dyn CameraPort>> {
    let camera = HttpCamera::new(settings)?;
    log::info!("camera: control server {}", settings.url);
    Ok(Box::new(camera))
}

#[cfg(not(feature = "camera-http"))]
fn connect_http(settings: &CameraSettings) -> Result<Box<dyn CameraPort>> {
    Err(anyhow!(
        "camera url '{}' requires the camera-http feature",
        settings.url
    ))
}
