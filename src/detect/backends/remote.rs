#![cfg(feature = "backend-remote")]

//! Open-vocabulary detection over HTTP.
//!
//! Frames are POSTed to an inference service hosting a vision-language
//! model (Florence-2 phrase grounding). The service answers with pixel
//! boxes which are normalized here.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::detect::backend::{DetectionBackend, DetectionCapability};
use crate::detect::result::{Detection, TargetSpec};
use crate::error::InferenceError;
use crate::frame::{Frame, ImageEncoding};
use crate::geometry::BoundingBox;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct GroundingResponse {
    width: u32,
    height: u32,
    #[serde(default)]
    detections: Vec<GroundedPhrase>,
}

#[derive(Debug, Deserialize)]
struct GroundedPhrase {
    label: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    bbox: [f32; 4],
}

// Phrase grounding reports no score; every returned box is a full match.
fn default_confidence() -> f32 {
    1.0
}

pub struct RemoteBackend {
    agent: ureq::Agent,
    endpoint: Url,
    model: String,
    prompt_context: String,
    prompt: String,
}

impl RemoteBackend {
    pub fn new(endpoint: &str, model: &str, prompt_context: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("parse inference endpoint")?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported inference endpoint scheme '{}'; expected http(s)",
                endpoint.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Ok(Self {
            agent,
            endpoint,
            model: model.to_string(),
            prompt_context: prompt_context.trim().to_string(),
            prompt: String::new(),
        })
    }

    /// Prompt sent with every frame, built by `prepare`.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

/// `"<context>, <p1> or <p2>"`, or just the phrases without a context.
fn build_prompt(context: &str, target: &TargetSpec) -> String {
    let phrases = if target.is_wildcard() {
        "objects".to_string()
    } else {
        target.labels().join(" or ")
    };
    if context.is_empty() {
        phrases
    } else {
        format!("{}, {}", context, phrases)
    }
}

fn parse_response(body: GroundingResponse) -> Vec<Detection> {
    body.detections
        .into_iter()
        .filter_map(|phrase| {
            let bbox = BoundingBox::from_pixel_corners(phrase.bbox, body.width, body.height)?;
            Some(Detection::new(
                phrase.label.trim().to_lowercase(),
                phrase.confidence.clamp(0.0, 1.0),
                bbox,
            ))
        })
        .collect()
}

impl DetectionBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::OpenVocabulary)
    }

    fn prepare(&mut self, target: &TargetSpec) -> Result<(), InferenceError> {
        self.prompt = build_prompt(&self.prompt_context, target);
        log::debug!("remote backend prompt: {}", self.prompt);
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        if frame.is_empty() {
            return Err(InferenceError::MalformedFrame("empty frame".to_string()));
        }
        let content_type = match frame.encoding {
            ImageEncoding::Jpeg => "image/jpeg",
            ImageEncoding::Rgb8 => "application/octet-stream",
        };
        let response = self
            .agent
            .post(self.endpoint.as_str())
            .query("model", &self.model)
            .query("prompt", &self.prompt)
            .query("width", &frame.width.to_string())
            .query("height", &frame.height.to_string())
            .set("Content-Type", content_type)
            .send_bytes(frame.bytes())
            .map_err(|e| InferenceError::Backend(format!("inference request failed: {}", e)))?;
        let body: GroundingResponse = response
            .into_json()
            .map_err(|e| InferenceError::Backend(format!("invalid inference response: {}", e)))?;
        Ok(parse_response(body))
    }
}
