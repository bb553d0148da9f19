use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use regex::Regex;

use super::backend::DetectionBackend;
use super::backends::SimBackend;
use crate::camera::SimWorld;
use crate::geometry::ZoomOptics;

const YOLO_PATTERN: &str = r"^(?:yolov(?:8|9|10)|yolo11)[nsmlex]$";
const FLORENCE_PATTERN: &str = r"^florence-(base|large)$";

/// Validated model choice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelSpec {
    /// Closed-vocabulary YOLO detector, e.g. `yolov8n`, `yolo11x`.
    Yolo { name: String },
    /// Open-vocabulary Florence-2 phrase grounding, `base` or `large`.
    Florence { size: String },
    /// Detector over the simulated world used with `stub://` cameras.
    Sim,
}

fn yolo_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(YOLO_PATTERN).expect("static yolo pattern"))
}

fn florence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FLORENCE_PATTERN).expect("static florence pattern"))
}

impl ModelSpec {
    /// Parse a model name. Matching is case-insensitive.
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim().to_lowercase();
        if name == "sim" {
            return Ok(ModelSpec::Sim);
        }
        if name.contains("yolo") {
            if !yolo_regex().is_match(&name) {
                return Err(anyhow!(
                    "invalid YOLO model name '{}'; expected yolov8|yolov9|yolov10|yolo11 \
                     followed by one of n,s,m,l,x",
                    raw
                ));
            }
            return Ok(ModelSpec::Yolo { name });
        }
        if name.contains("florence") {
            let size = florence_regex()
                .captures(&name)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| {
                    anyhow!(
                        "invalid Florence model name '{}'; expected Florence-base or Florence-large",
                        raw
                    )
                })?;
            return Ok(ModelSpec::Florence { size });
        }
        Err(anyhow!(
            "unknown model '{}'; expected a YOLO model (e.g. yolov8n, yolo11n), \
             Florence-base, Florence-large or sim",
            raw
        ))
    }

    pub fn name(&self) -> String {
        match self {
            ModelSpec::Yolo { name } => name.clone(),
            ModelSpec::Florence { size } => format!("florence-{}", size),
            ModelSpec::Sim => "sim".to_string(),
        }
    }
}

/// Everything a backend constructor may need.
#[derive(Clone, Debug)]
pub struct BackendOptions {
    /// Directory holding `<model>.onnx` files for local backends.
    pub model_dir: PathBuf,
    /// Inference service endpoint for remote backends.
    pub endpoint: Option<String>,
    /// Scene description prepended to open-vocabulary prompts.
    pub prompt_context: String,
    /// Square model input size for local backends.
    pub input_size: u32,
    /// World observed by the `sim` backend.
    pub sim_world: SimWorld,
    pub optics: ZoomOptics,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            endpoint: None,
            prompt_context: String::new(),
            input_size: 640,
            sim_world: SimWorld::default(),
            optics: ZoomOptics::default(),
        }
    }
}

/// Build the backend for a model.
pub fn create_backend(
    model: &ModelSpec,
    options: &BackendOptions,
) -> Result<Box<dyn DetectionBackend>> {
    match model {
        ModelSpec::Sim => Ok(Box::new(SimBackend::new(
            options.sim_world.clone(),
            options.optics,
        ))),
        ModelSpec::Yolo { name } => create_yolo(name, options),
        ModelSpec::Florence { size } => create_florence(size, options),
    }
}

#[cfg(feature = "backend-tract")]
fn create_yolo(name: &str, options: &BackendOptions) -> Result<Box<dyn DetectionBackend>> {
    let path = options.model_dir.join(format!("{}.onnx", name));
    let backend = super::backends::TractBackend::new(&path, options.input_size)?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn create_yolo(name: &str, _options: &BackendOptions) -> Result<Box<dyn DetectionBackend>> {
    Err(anyhow!(
        "model '{}' requires the backend-tract feature",
        name
    ))
}

#[cfg(feature = "backend-remote")]
fn create_florence(size: &str, options: &BackendOptions) -> Result<Box<dyn DetectionBackend>> {
    let endpoint = options
        .endpoint
        .as_deref()
        .ok_or_else(|| anyhow!("Florence models need an inference endpoint"))?;
    let backend = super::backends::RemoteBackend::new(
        endpoint,
        &format!("florence-{}", size),
        &options.prompt_context,
    )?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-remote"))]
fn create_florence(size: &str, _options: &BackendOptions) -> Result<Box<dyn DetectionBackend>> {
    Err(anyhow!(
        "model 'florence-{}' requires the backend-remote feature",
        size
    ))
}
