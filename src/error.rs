//! Error taxonomy of the scan loop.
//!
//! Each error class has a fixed recovery policy:
//! - `InferenceError`: treated as "no detections" for that frame.
//! - `PublishError`: logged, the scan moves on.
//! - `CameraFault`: abandons a seek; repeated at scan level it ends the run.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraFault {
    #[error("camera move failed: {0}")]
    Move(String),

    #[error("camera capture failed: {0}")]
    Capture(String),

    #[error("camera unreachable: {0}")]
    Transport(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("inference failed: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("publish transport error: {0}")]
    Transport(String),

    #[error("publish encoding error: {0}")]
    Encode(String),
}

/// Unrecoverable run termination.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("{count} consecutive camera faults, last: {last}")]
    CameraFaults { count: u32, last: CameraFault },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_error_display_names_last_fault() {
        let err = RunError::CameraFaults {
            count: 3,
            last: CameraFault::Capture("timeout".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 consecutive"));
        assert!(msg.contains("timeout"));
    }
}
