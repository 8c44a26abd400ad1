use anyhow::{Context, Result};
use opencv::core::Mat;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use super::landmark::{BBox, Landmark, Person};
use super::preprocess::{preprocess_for_movenet, preprocess_for_yolo, YOLO_INPUT_SIZE};
use super::schema::ModelKind;
use super::synthetic::SyntheticDetector;

/// Minimum mean keypoint confidence for MoveNet to count as a detection.
const MOVENET_PRESENCE_THRESHOLD: f32 = 0.25;

/// Detection score threshold for YOLOv8-pose candidates.
const YOLO_SCORE_THRESHOLD: f32 = 0.25;

/// IoU threshold for non-maximum suppression.
const YOLO_IOU_THRESHOLD: f32 = 0.45;

/// Upper bound on persons reported per frame.
const YOLO_MAX_DETECTIONS: usize = 10;

/// Detection backend boundary: a pixel buffer in, zero or more persons out.
/// The landmark table and model name come from `kind()`.
pub trait PoseBackend: Send {
    fn process(&mut self, frame: &Mat) -> Result<Vec<Person>>;
    fn kind(&self) -> ModelKind;
}

/// Build the backend selected by `kind`. `models_dir` holds the ONNX files.
pub fn create_detector(kind: ModelKind, models_dir: &str) -> Result<Box<dyn PoseBackend>> {
    match kind {
        ModelKind::MoveNet => {
            let path = Path::new(models_dir).join("movenet_lightning.onnx");
            Ok(Box::new(MoveNetDetector::new(&path)?))
        }
        ModelKind::YoloPose => {
            let path = Path::new(models_dir).join("yolov8n-pose.onnx");
            Ok(Box::new(YoloPoseDetector::new(&path)?))
        }
        ModelKind::Synthetic => Ok(Box::new(SyntheticDetector::new())),
    }
}

/// MoveNet Lightning backend. Single person, COCO-17, no bounding box.
pub struct MoveNetDetector {
    session: Session,
}

impl MoveNetDetector {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path.as_ref())
            .context("failed to load MoveNet ONNX model")?;
        Ok(Self { session })
    }
}

impl PoseBackend for MoveNetDetector {
    fn process(&mut self, frame: &Mat) -> Result<Vec<Person>> {
        let input = preprocess_for_movenet(frame)?;
        let input_tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs!["serving_default_input_0" => input_tensor])
            .context("MoveNet inference failed")?;

        // Output is [1, 1, 17, 3] (y, x, confidence), already normalized
        let output: ndarray::ArrayViewD<f32> = outputs["StatefulPartitionedCall_0"]
            .try_extract_array()
            .context("failed to extract MoveNet output tensor")?;

        let count = ModelKind::MoveNet.schema().count();
        let mut landmarks = Vec::with_capacity(count);
        for i in 0..count {
            let y = output[[0, 0, i, 0]];
            let x = output[[0, 0, i, 1]];
            let confidence = output[[0, 0, i, 2]];
            landmarks.push(Landmark::new(x, y, 0.0, confidence));
        }

        let person = Person::new(1, landmarks, None);
        if person.average_confidence() < MOVENET_PRESENCE_THRESHOLD {
            return Ok(Vec::new());
        }
        Ok(vec![person])
    }

    fn kind(&self) -> ModelKind {
        ModelKind::MoveNet
    }
}

/// YOLOv8n-pose backend. Multi-person, COCO-17, normalized bounding boxes.
pub struct YoloPoseDetector {
    session: Session,
}

/// One raw candidate before NMS: score, pixel-space box, landmarks.
struct Candidate {
    score: f32,
    // (x1, y1, x2, y2) in input-space pixels
    rect: (f32, f32, f32, f32),
    landmarks: Vec<Landmark>,
}

impl YoloPoseDetector {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path.as_ref())
            .context("failed to load YOLOv8-pose ONNX model")?;
        Ok(Self { session })
    }
}

impl PoseBackend for YoloPoseDetector {
    fn process(&mut self, frame: &Mat) -> Result<Vec<Person>> {
        let input = preprocess_for_yolo(frame)?;
        let input_tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs!["images" => input_tensor])
            .context("YOLOv8-pose inference failed")?;

        // Output is [1, 56, N]: cx, cy, w, h, score, then 17x (x, y, conf),
        // coordinates in input-space pixels
        let output: ndarray::ArrayViewD<f32> = outputs["output0"]
            .try_extract_array()
            .context("failed to extract YOLOv8-pose output tensor")?;

        let size = YOLO_INPUT_SIZE as f32;
        let kp_count = ModelKind::YoloPose.schema().count();
        let n_candidates = output.shape()[2];

        let mut candidates = Vec::new();
        for i in 0..n_candidates {
            let score = output[[0, 4, i]];
            if score < YOLO_SCORE_THRESHOLD {
                continue;
            }
            let cx = output[[0, 0, i]];
            let cy = output[[0, 1, i]];
            let w = output[[0, 2, i]];
            let h = output[[0, 3, i]];

            let mut landmarks = Vec::with_capacity(kp_count);
            for k in 0..kp_count {
                let x = output[[0, 5 + k * 3, i]];
                let y = output[[0, 5 + k * 3 + 1, i]];
                let confidence = output[[0, 5 + k * 3 + 2, i]].clamp(0.0, 1.0);
                landmarks.push(Landmark::new(
                    (x / size).clamp(0.0, 1.0),
                    (y / size).clamp(0.0, 1.0),
                    0.0,
                    confidence,
                ));
            }

            candidates.push(Candidate {
                score,
                rect: (cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
                landmarks,
            });
        }

        let kept = nms(candidates, YOLO_IOU_THRESHOLD, YOLO_MAX_DETECTIONS);

        // Dense 1-based ids, in descending score order
        let persons = kept
            .into_iter()
            .enumerate()
            .map(|(idx, c)| {
                let (x1, y1, x2, y2) = c.rect;
                let bbox = BBox {
                    center_x: ((x1 + x2) / 2.0 / size).clamp(0.0, 1.0),
                    center_y: ((y1 + y2) / 2.0 / size).clamp(0.0, 1.0),
                    width: ((x2 - x1) / size).clamp(0.0, 1.0),
                    height: ((y2 - y1) / size).clamp(0.0, 1.0),
                };
                Person::new(idx as u32 + 1, c.landmarks, Some(bbox))
            })
            .collect();

        Ok(persons)
    }

    fn kind(&self) -> ModelKind {
        ModelKind::YoloPose
    }
}

/// Greedy non-maximum suppression over score-sorted candidates.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32, max_keep: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_keep {
            break;
        }
        if kept
            .iter()
            .all(|k| iou(k.rect, candidate.rect) < iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: (f32, f32, f32, f32), b: (f32, f32, f32, f32)) -> f32 {
    let ix1 = a.0.max(b.0);
    let iy1 = a.1.max(b.1);
    let ix2 = a.2.min(b.2);
    let iy2 = a.3.min(b.3);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a.2 - a.0).max(0.0) * (a.3 - a.1).max(0.0);
    let area_b = (b.2 - b.0).max(0.0) * (b.3 - b.1).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(score: f32, rect: (f32, f32, f32, f32)) -> Candidate {
        Candidate {
            score,
            rect,
            landmarks: Vec::new(),
        }
    }

    #[test]
    fn test_iou_disjoint() {
        let a = (0.0, 0.0, 10.0, 10.0);
        let b = (20.0, 20.0, 30.0, 30.0);
        assert_eq!(iou(a, b), 0.0);
    }

    #[test]
    fn test_iou_identical() {
        let a = (0.0, 0.0, 10.0, 10.0);
        assert!((iou(a, a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = (0.0, 0.0, 10.0, 10.0);
        let b = (5.0, 0.0, 15.0, 10.0);
        // intersection 50, union 150
        assert!((iou(a, b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlap() {
        let candidates = vec![
            candidate(0.9, (0.0, 0.0, 10.0, 10.0)),
            candidate(0.8, (1.0, 1.0, 11.0, 11.0)),
            candidate(0.7, (100.0, 100.0, 110.0, 110.0)),
        ];
        let kept = nms(candidates, 0.45, 10);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
        assert!((kept[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_respects_max_keep() {
        let candidates = vec![
            candidate(0.9, (0.0, 0.0, 10.0, 10.0)),
            candidate(0.8, (50.0, 50.0, 60.0, 60.0)),
            candidate(0.7, (100.0, 100.0, 110.0, 110.0)),
        ];
        let kept = nms(candidates, 0.45, 2);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_nms_sorts_by_score() {
        let candidates = vec![
            candidate(0.3, (0.0, 0.0, 10.0, 10.0)),
            candidate(0.9, (50.0, 50.0, 60.0, 60.0)),
        ];
        let kept = nms(candidates, 0.45, 10);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
    }
}
