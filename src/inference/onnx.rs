//! YOLOv8-seg segmenter on ONNX Runtime
//!
//! Expects the standard Ultralytics export: one image input `[1, 3, H, W]` in
//! [0, 1] and two outputs, predictions `[1, 4 + classes + M, anchors]`
//! (center box, class scores, mask coefficients) and mask prototypes
//! `[1, M, mh, mw]`.

use std::path::Path;
use std::sync::Mutex;

use image::{Luma, RgbImage};
use ndarray::{s, Array4, ArrayView2, ArrayView3, Axis, Ix2, Ix3};
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{debug, info};

use super::segmentation::{Detection, FlowerSegmenter, Mask};
use crate::utils::error::{FloraError, Result};

/// Overlap above which the weaker of two boxes is dropped
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.7;

/// Candidate box before mask assembly
#[derive(Debug, Clone)]
struct Candidate {
    /// x1, y1, x2, y2 in input pixels
    bbox: [f32; 4],
    score: f32,
    coefficients: Vec<f32>,
}

pub struct YoloSegmenter {
    session: Mutex<Session>,
    iou_threshold: f32,
}

impl YoloSegmenter {
    /// Load an exported YOLOv8-seg model
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FloraError::PathNotFound(path.to_path_buf()));
        }

        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| FloraError::Segmentation(format!("Failed to load {:?}: {}", path, e)))?;

        info!("Loaded segmentation model from {:?}", path);
        Ok(Self {
            session: Mutex::new(session),
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }
}

impl FlowerSegmenter for YoloSegmenter {
    fn segment(&self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let (width, height) = image.dimensions();
        let input = Array4::from_shape_fn((1, 3, height as usize, width as usize), |(_, c, y, x)| {
            image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        let input = ort::value::Tensor::from_array(input)
            .map_err(|e| FloraError::Segmentation(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| FloraError::Segmentation("segmentation session lock poisoned".to_string()))?;

        let names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if names.len() < 2 {
            return Err(FloraError::Segmentation(format!(
                "expected prediction and prototype outputs, model has {}",
                names.len()
            )));
        }

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| FloraError::Segmentation(format!("Segmentation run failed: {}", e)))?;

        let extract = |name: &str| {
            outputs
                .get(name)
                .ok_or_else(|| FloraError::Segmentation(format!("Output '{}' not found", name)))?
                .try_extract_array::<f32>()
                .map_err(|e| FloraError::Segmentation(format!("Failed to extract '{}': {}", name, e)))
        };
        let preds = extract(&names[0])?;
        let protos = extract(&names[1])?;

        if preds.ndim() != 3 || protos.ndim() != 4 {
            return Err(FloraError::Segmentation(format!(
                "unexpected output ranks {} and {}",
                preds.ndim(),
                protos.ndim()
            )));
        }
        let preds = preds
            .index_axis_move(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .map_err(|e| FloraError::Segmentation(e.to_string()))?;
        let protos = protos
            .index_axis_move(Axis(0), 0)
            .into_dimensionality::<Ix3>()
            .map_err(|e| FloraError::Segmentation(e.to_string()))?;

        let detections = decode_detections(
            preds,
            protos,
            (width, height),
            confidence_threshold,
            self.iou_threshold,
        )?;
        debug!("yolo: {} detection(s) after NMS", detections.len());
        Ok(detections)
    }

    fn name(&self) -> &str {
        "yolov8-seg"
    }
}

/// Turn raw predictions and prototypes into scored masks, best first
pub fn decode_detections(
    preds: ArrayView2<f32>,
    protos: ArrayView3<f32>,
    input_size: (u32, u32),
    confidence_threshold: f32,
    iou_threshold: f32,
) -> Result<Vec<Detection>> {
    let num_protos = protos.shape()[0];
    let channels = preds.shape()[0];
    if channels <= 4 + num_protos {
        return Err(FloraError::Segmentation(format!(
            "{} prediction channels leave no room for class scores with {} prototypes",
            channels, num_protos
        )));
    }
    let num_classes = channels - 4 - num_protos;

    let mut candidates: Vec<Candidate> = preds
        .axis_iter(Axis(1))
        .filter_map(|col| {
            let score = col
                .slice(s![4..4 + num_classes])
                .iter()
                .copied()
                .fold(f32::MIN, f32::max);
            if score < confidence_threshold {
                return None;
            }
            let (cx, cy, w, h) = (col[0], col[1], col[2], col[3]);
            Some(Candidate {
                bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
                score,
                coefficients: col.slice(s![4 + num_classes..]).to_vec(),
            })
        })
        .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let kept = non_max_suppression(candidates, iou_threshold);
    Ok(kept
        .iter()
        .map(|c| Detection::new(c.score, proto_mask(c, protos, input_size)))
        .collect())
}

/// Greedy NMS over score-sorted candidates
fn non_max_suppression(sorted: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in sorted {
        if kept.iter().all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// sigmoid(coefficients . prototypes), zero outside the box
fn proto_mask(candidate: &Candidate, protos: ArrayView3<f32>, input_size: (u32, u32)) -> Mask {
    let (mask_h, mask_w) = (protos.shape()[1], protos.shape()[2]);
    let sx = mask_w as f32 / input_size.0.max(1) as f32;
    let sy = mask_h as f32 / input_size.1.max(1) as f32;
    let [x1, y1, x2, y2] = candidate.bbox;

    Mask::from_fn(mask_w as u32, mask_h as u32, |x, y| {
        let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
        if px < x1 * sx || px > x2 * sx || py < y1 * sy || py > y2 * sy {
            return Luma([0.0]);
        }
        let logit: f32 = candidate
            .coefficients
            .iter()
            .enumerate()
            .map(|(k, c)| c * protos[[k, y as usize, x as usize]])
            .sum();
        Luma([1.0 / (1.0 + (-logit).exp())])
    })
}
