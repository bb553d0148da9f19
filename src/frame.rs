//! Captured image container.
//!
//! A `Frame` is owned by the loop step that requested it and is dropped as
//! soon as detection and capture are done with it. Image bytes are private
//! and zeroized on drop; the only readers are the publish and keep-images
//! paths of the capture session.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

use crate::geometry::SweepPosition;

/// How the frame bytes are encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    /// Compressed JPEG as delivered by network cameras.
    Jpeg,
    /// Packed 8-bit RGB, `width * height * 3` bytes.
    Rgb8,
}

impl ImageEncoding {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "jpg",
            ImageEncoding::Rgb8 => "rgb",
        }
    }
}

/// One captured image plus the camera position it was taken from.
///
/// Not `Clone`: a frame has exactly one owner at a time.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub encoding: ImageEncoding,
    position: SweepPosition,
    captured_at: SystemTime,
    capture_instant: Instant,
}

impl Frame {
    /// Create a frame. Called by camera drivers.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        encoding: ImageEncoding,
        position: SweepPosition,
    ) -> Self {
        Self {
            data,
            width,
            height,
            encoding,
            position,
            captured_at: SystemTime::now(),
            capture_instant: Instant::now(),
        }
    }

    /// Camera position reported at capture time.
    pub fn position(&self) -> SweepPosition {
        self.position
    }

    /// Wall-clock capture time in seconds since the Unix epoch.
    pub fn timestamp_s(&self) -> u64 {
        self.captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Wall-clock capture time in milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> u128 {
        self.captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }

    pub fn age_secs(&self) -> u64 {
        self.capture_instant.elapsed().as_secs()
    }

    /// Image bytes, read-only.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Hex SHA-256 of the image bytes, attached to capture metadata.
    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.data))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("encoding", &self.encoding)
            .field("bytes", &self.data.len())
            .field("position", &self.position)
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}
