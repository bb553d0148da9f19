//! Publish sinks for finished captures.
//!
//! A sink receives the image bytes and their metadata once per view. Sinks
//! are fire-and-forget from the loop's point of view: a `PublishError` is
//! logged by the capture session and the scan moves on.

use anyhow::Result;
use serde::Serialize;

use crate::camera::GeoLocation;
use crate::config::PublishSettings;
use crate::error::PublishError;

mod mqtt;

pub use mqtt::{parse_broker, MqttEndpoint, MqttSink};

/// Which moment of a seek an image shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureView {
    /// Wide frame in which the candidate was first detected.
    Before,
    /// Centered, zoomed frame at convergence.
    After,
}

impl CaptureView {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureView::Before => "before",
            CaptureView::After => "after",
        }
    }
}

/// Metadata published alongside every image.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptureMetadata {
    pub event_id: String,
    pub view: CaptureView,
    pub object_type: String,
    pub confidence: f32,
    pub timestamp_s: u64,
    pub pan: f64,
    pub tilt: f64,
    pub zoom: f64,
    /// Absolute angular position of the object center.
    pub target_pan: f64,
    pub target_tilt: f64,
    pub round: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    pub image_sha256: String,
}

impl CaptureMetadata {
    pub fn to_json(&self) -> Result<Vec<u8>, PublishError> {
        serde_json::to_vec(self).map_err(|e| PublishError::Encode(e.to_string()))
    }
}

pub trait PublishSink: Send {
    fn name(&self) -> &'static str;

    fn submit(&mut self, image: &[u8], metadata: &CaptureMetadata) -> Result<(), PublishError>;
}

/// Sink that only logs. Used when no broker is configured.
#[derive(Debug, Default)]
pub struct LogSink {
    submitted: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }
}

impl PublishSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn submit(&mut self, image: &[u8], metadata: &CaptureMetadata) -> Result<(), PublishError> {
        self.submitted += 1;
        log::info!(
            "capture {} [{}]: {} conf={:.2} at pan={:.1} tilt={:.1} zoom={:.1} ({} bytes)",
            metadata.event_id,
            metadata.view.as_str(),
            metadata.object_type,
            metadata.confidence,
            metadata.pan,
            metadata.tilt,
            metadata.zoom,
            image.len()
        );
        Ok(())
    }
}

/// Build the sink for the configured transport.
pub fn connect(settings: &PublishSettings) -> Result<Box<dyn PublishSink>> {
    match settings.mqtt_broker.as_deref() {
        Some(broker) => {
            let endpoint = parse_broker(broker)?;
            let sink = MqttSink::connect(&endpoint, settings)?;
            Ok(Box::new(sink))
        }
        None => {
            log::info!("publish: no MQTT broker configured, logging captures only");
            Ok(Box::new(LogSink::new()))
        }
    }
}
