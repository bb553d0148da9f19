//! Camera control server driver.
//!
//! Every command is a JSON POST of `{"tool": <name>, "params": {...}}` to
//! `<base>/mcp`. Motion and snapshot tools answer with
//! `{"status": "success" | "error", ...}`; `get_position` answers with
//! `{"pan", "tilt", "zoom"}`.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{CameraPort, GeoLocation};
use crate::config::CameraSettings;
use crate::error::CameraFault;
use crate::frame::{Frame, ImageEncoding};
use crate::geometry::SweepPosition;

const MAX_SNAPSHOT_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
struct ToolReply {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    pan: Option<f64>,
    #[serde(default)]
    tilt: Option<f64>,
    #[serde(default)]
    zoom: Option<f64>,
}

impl ToolReply {
    fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }

    fn reason(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| format!("status {:?}", self.status))
    }

    fn position(&self) -> Option<SweepPosition> {
        Some(SweepPosition::new(self.pan?, self.tilt?, self.zoom?))
    }
}

pub struct HttpCamera {
    agent: ureq::Agent,
    endpoint: Url,
    width: u32,
    height: u32,
    location: Option<GeoLocation>,
    // Last commanded position, used when the server cannot report one.
    commanded: SweepPosition,
}

impl HttpCamera {
    pub fn new(settings: &CameraSettings) -> Result<Self> {
        let base = Url::parse(&settings.url).context("parse camera url")?;
        let endpoint = mcp_endpoint(&base)?;
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.request_timeout)
            .build();
        Ok(Self {
            agent,
            endpoint,
            width: settings.frame_width,
            height: settings.frame_height,
            location: settings.location,
            commanded: SweepPosition::new(0.0, 0.0, settings.optics.min_zoom),
        })
    }

    fn call(&self, tool: &str, params: Value) -> Result<ToolReply, CameraFault> {
        let payload = json!({ "tool": tool, "params": params });
        let response = self
            .agent
            .post(self.endpoint.as_str())
            .send_json(payload)
            .map_err(|e| CameraFault::Transport(format!("{}: {}", tool, e)))?;
        response
            .into_json::<ToolReply>()
            .map_err(|e| CameraFault::Transport(format!("{}: invalid reply: {}", tool, e)))
    }

    /// Position reported by the server, if it answers.
    pub fn query_position(&self) -> Option<SweepPosition> {
        match self.call("get_position", json!({})) {
            Ok(reply) => {
                let position = reply.position();
                if position.is_none() {
                    log::warn!("camera get_position: {}", reply.reason());
                }
                position
            }
            Err(err) => {
                log::warn!("camera get_position failed: {}", err);
                None
            }
        }
    }
}

fn mcp_endpoint(base: &Url) -> Result<Url> {
    if !matches!(base.scheme(), "http" | "https") {
        return Err(anyhow!(
            "unsupported camera scheme '{}'; expected http(s)",
            base.scheme()
        ));
    }
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("mcp").context("build camera endpoint")
}

impl CameraPort for HttpCamera {
    fn move_absolute(&mut self, pan: f64, tilt: f64, zoom: f64) -> Result<(), CameraFault> {
        let reply = self.call(
            "move_absolute",
            json!({ "pan": pan, "tilt": tilt, "zoom": zoom }),
        )?;
        if !reply.is_success() {
            return Err(CameraFault::Move(reply.reason()));
        }
        self.commanded = SweepPosition::new(pan, tilt, zoom);
        Ok(())
    }

    fn move_relative(&mut self, d_pan: f64, d_tilt: f64) -> Result<(), CameraFault> {
        let reply = self.call(
            "move_relative",
            json!({ "pan": d_pan, "tilt": d_tilt, "zoom": 0.0 }),
        )?;
        if !reply.is_success() {
            return Err(CameraFault::Move(reply.reason()));
        }
        self.commanded = self.commanded.offset(d_pan, d_tilt);
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, CameraFault> {
        let reply = self.call("take_snapshot", json!({}))?;
        if !reply.is_success() {
            return Err(CameraFault::Capture(reply.reason()));
        }
        let encoded = reply
            .image_base64
            .as_deref()
            .ok_or_else(|| CameraFault::Capture("snapshot reply without image".to_string()))?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CameraFault::Capture(format!("snapshot decode: {}", e)))?;
        if data.is_empty() {
            return Err(CameraFault::Capture("empty snapshot".to_string()));
        }
        if data.len() > MAX_SNAPSHOT_BYTES {
            return Err(CameraFault::Capture(format!(
                "snapshot too large ({} bytes)",
                data.len()
            )));
        }
        let position = self.query_position().unwrap_or(self.commanded);
        self.commanded = position;
        Ok(Frame::new(
            data,
            self.width,
            self.height,
            ImageEncoding::Jpeg,
            position,
        ))
    }

    fn location(&self) -> Option<GeoLocation> {
        self.location
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_mcp_path() {
        let base = Url::parse("http://localhost:8000").expect("url");
        assert_eq!(
            mcp_endpoint(&base).expect("endpoint").as_str(),
            "http://localhost:8000/mcp"
        );
        let nested = Url::parse("http://cam.local/api").expect("url");
        assert_eq!(
            mcp_endpoint(&nested).expect("endpoint").as_str(),
            "http://cam.local/api/mcp"
        );
        let other = Url::parse("ftp://cam.local").expect("url");
        assert!(mcp_endpoint(&other).is_err());
    }

    #[test]
    fn reply_parsing_accepts_status_and_position_shapes() {
        let ok: ToolReply =
            serde_json::from_str(r#"{"status":"success","message":"moving"}"#).expect("json");
        assert!(ok.is_success());

        let err: ToolReply = serde_json::from_str(r#"{"error":"not initialized"}"#).expect("json");
        assert!(!err.is_success());
        assert_eq!(err.reason(), "not initialized");

        let pos: ToolReply =
            serde_json::from_str(r#"{"pan":370.0,"tilt":-4.5,"zoom":3.0}"#).expect("json");
        let position = pos.position().expect("position");
        assert!((position.pan - 10.0).abs() < 1e-9);
        assert_eq!(position.zoom, 3.0);
    }
}
