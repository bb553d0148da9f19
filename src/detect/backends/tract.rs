#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionBackend, DetectionCapability};
use crate::detect::result::Detection;
use crate::error::InferenceError;
use crate::frame::{Frame, ImageEncoding};
use crate::geometry::BoundingBox;

const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Tract-based YOLO backend for exported ONNX detectors.
///
/// Expects the Ultralytics export layout: one input `[1, 3, S, S]` and one
/// output `[1, 4 + classes, candidates]` with center-format boxes in input
/// pixels followed by per-class scores.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    min_score: f32,
    nms_iou: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            min_score: 0.05,
            nms_iou: 0.45,
        })
    }

    /// Override the raw score floor applied before NMS.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor, InferenceError> {
        let rgb = match frame.encoding {
            ImageEncoding::Jpeg => image::load_from_memory(frame.bytes())
                .map_err(|e| InferenceError::MalformedFrame(e.to_string()))?
                .to_rgb8(),
            ImageEncoding::Rgb8 => {
                image::RgbImage::from_raw(frame.width, frame.height, frame.bytes().to_vec())
                    .ok_or_else(|| {
                        InferenceError::MalformedFrame(format!(
                            "expected {} RGB bytes for {}x{}, received {}",
                            frame.width as usize * frame.height as usize * 3,
                            frame.width,
                            frame.height,
                            frame.byte_len()
                        ))
                    })?
            }
        };
        let size = self.input_size;
        let resized = image::imageops::resize(&rgb, size, size, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>, InferenceError> {
        let output = outputs
            .first()
            .ok_or_else(|| InferenceError::Backend("model produced no outputs".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::Backend(format!("output tensor was not f32: {}", e)))?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[1] <= 4 {
            return Err(InferenceError::Backend(format!(
                "unexpected output shape {:?}",
                shape
            )));
        }
        let classes = shape[1] - 4;
        let size = self.input_size as f32;

        let mut candidates = Vec::new();
        for i in 0..shape[2] {
            let mut best = (0usize, f32::NEG_INFINITY);
            for c in 0..classes {
                let score = view[[0, 4 + c, i]];
                if score > best.1 {
                    best = (c, score);
                }
            }
            if best.1 < self.min_score {
                continue;
            }
            let (cx, cy) = (view[[0, 0, i]] / size, view[[0, 1, i]] / size);
            let (w, h) = (view[[0, 2, i]] / size, view[[0, 3, i]] / size);
            let label = COCO_LABELS
                .get(best.0)
                .map(|l| l.to_string())
                .unwrap_or_else(|| format!("class_{}", best.0));
            candidates.push(Detection::new(
                label,
                best.1.clamp(0.0, 1.0),
                BoundingBox::centered_at(cx, cy, w, h).clipped(),
            ));
        }
        Ok(non_max_suppression(candidates, self.nms_iou))
    }
}

/// Greedy per-label NMS, highest confidence first.
fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for cand in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.label == cand.label && k.bbox.iou(&cand.bbox) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

impl DetectionBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ClosedVocabulary)
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| InferenceError::Backend(format!("ONNX inference failed: {}", e)))?;
        self.decode(outputs)
    }
}
