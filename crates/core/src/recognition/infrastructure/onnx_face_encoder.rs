use std::path::Path;

use crate::recognition::domain::face_encoder::{DetectedFace, Embedding, EncodeError, FaceEncoder};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;
use crate::shared::match_config::DetectionModel;

/// Default confidence threshold for face detection.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const FAST_INPUT_SIZE: u32 = 320;
const ACCURATE_INPUT_SIZE: u32 = 640;

const NMS_IOU_THRESH: f64 = 0.45;

const EMBED_INPUT_SIZE: usize = 112;
const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;

/// Faces narrower than this are too small to embed reliably.
const MIN_FACE_SIZE: i32 = 8;

/// Face detector + embedder backed by two ONNX Runtime sessions.
///
/// A YOLO face model locates faces (letterbox, confidence filter, NMS);
/// each face's square crop is then embedded by an ArcFace model into an
/// L2-normalized vector. Faces are returned highest-confidence first.
///
/// Distances between these vectors live on a different scale from the
/// default tolerances (0.6 / 0.65). Two photos of the same person
/// usually land around 0.8 to 1.1 apart and unrelated faces near
/// `sqrt(2)`, so with the defaults genuine matches are rarely reported.
/// Use `crates/cli/config/arcface.json`, or set `one_shot_tolerance`
/// and `continuous_threshold` to about 1.1.
pub struct OnnxFaceEncoder {
    detector: ort::session::Session,
    embedder: ort::session::Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxFaceEncoder {
    /// Loads both models.
    ///
    /// Models exported with a fixed input resolution use it as-is; for
    /// dynamic models `model` picks the letterbox size (fast = 320,
    /// accurate = 640).
    pub fn new(
        detector_path: &Path,
        embedder_path: &Path,
        model: DetectionModel,
        confidence: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let detector = ort::session::Session::builder()?
            .with_execution_providers(platform_providers())?
            .commit_from_file(detector_path)?;

        let intra_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let embedder = ort::session::Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_inter_threads(1)?
            .with_intra_threads(intra_threads)?
            .with_execution_providers(platform_providers())?
            .commit_from_file(embedder_path)?;

        let requested = match model {
            DetectionModel::Fast => FAST_INPUT_SIZE,
            DetectionModel::Accurate => ACCURATE_INPUT_SIZE,
        };
        let input_size = fixed_input_size(&detector).unwrap_or(requested);
        log::info!("Face detector input size: {input_size} ({model} model)");

        Ok(Self {
            detector,
            embedder,
            confidence,
            input_size,
        })
    }

    fn encode(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>> {
        let boxes = self.detect(frame)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for bounding_box in boxes {
            let crop = bounding_box.square_within(frame.width(), frame.height());
            if crop.width < MIN_FACE_SIZE || crop.height < MIN_FACE_SIZE {
                continue;
            }
            let embedding = self.embed(frame, &crop)?;
            faces.push(DetectedFace {
                bounding_box,
                embedding,
            });
        }
        Ok(faces)
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, Box<dyn std::error::Error>> {
        let (input_tensor, scale, pad_x, pad_y) =
            letterbox(frame, self.input_size).ok_or("Frame pixel data is malformed")?;

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.detector.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("Detection model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        if shape.len() != 3 {
            return Err(format!("Unexpected detection output shape: {shape:?}").into());
        }

        // [1, features, detections] (transposed) or [1, detections, features]
        let transposed = shape[1] < shape[2];
        let (num_dets, num_feats) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if num_feats < 5 {
            return Ok(Vec::new());
        }
        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;
        let feature = |det: usize, f: usize| -> f64 {
            if transposed {
                data[f * num_dets + det] as f64
            } else {
                data[det * num_feats + f] as f64
            }
        };

        let mut candidates = Vec::new();
        for i in 0..num_dets {
            let conf = feature(i, 4);
            if conf < self.confidence {
                continue;
            }
            let (cx, cy, w, h) = (feature(i, 0), feature(i, 1), feature(i, 2), feature(i, 3));
            let bbox = BoundingBox::from_corners(
                ((cx - w / 2.0) - pad_x as f64) / scale,
                ((cy - h / 2.0) - pad_y as f64) / scale,
                ((cx + w / 2.0) - pad_x as f64) / scale,
                ((cy + h / 2.0) - pad_y as f64) / scale,
                frame.width(),
                frame.height(),
            );
            if !bbox.is_empty() {
                candidates.push((bbox, conf));
            }
        }

        Ok(nms(candidates, NMS_IOU_THRESH))
    }

    fn embed(
        &mut self,
        frame: &Frame,
        crop: &BoundingBox,
    ) -> Result<Embedding, Box<dyn std::error::Error>> {
        let tensor = preprocess_crop(frame, crop).ok_or("Frame pixel data is malformed")?;
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let outputs = self.embedder.run(ort::inputs![input_value])?;
        let embedding_array = outputs[0].try_extract_array::<f32>()?;
        let mut embedding = embedding_array
            .as_slice()
            .ok_or("Cannot get embedding slice")?
            .to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn detect_and_encode(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, EncodeError> {
        self.encode(frame)
            .map_err(|e| -> EncodeError { e.to_string().into() })
    }
}

/// CoreML on macOS, DirectML on Windows, ort's default CPU provider elsewhere.
fn platform_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        Vec::new()
    }
}

/// Input height of a model exported with a fixed NCHW shape.
fn fixed_input_size(session: &ort::session::Session) -> Option<u32> {
    session.inputs().first().and_then(|input| {
        if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
            if shape.len() >= 4 && shape[2] > 0 {
                return Some(shape[2] as u32);
            }
        }
        None
    })
}

/// Letterbox-resize a frame to `target_size` × `target_size`.
///
/// Returns `(NCHW float32 tensor, scale, pad_x, pad_y)`.
fn letterbox(frame: &Frame, target_size: u32) -> Option<(ndarray::Array4<f32>, f64, u32, u32)> {
    let src = frame.as_ndarray()?;
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // YOLO pads with 114/255 gray
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    Some((tensor, scale, pad_x, pad_y))
}

/// Greedy NMS: highest confidence first, suppress overlapping boxes.
fn nms(mut candidates: Vec<(BoundingBox, f64)>, iou_thresh: f64) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for (bbox, _) in candidates {
        if keep.iter().all(|k| k.iou(&bbox) <= iou_thresh) {
            keep.push(bbox);
        }
    }
    keep
}

/// Resize a face crop to 112x112, normalize to [-1, 1], NCHW layout.
fn preprocess_crop(frame: &Frame, crop: &BoundingBox) -> Option<ndarray::Array4<f32>> {
    let src = frame.as_ndarray()?;
    let crop_w = crop.width.max(1) as usize;
    let crop_h = crop.height.max(1) as usize;
    let max_x = frame.width() as usize - 1;
    let max_y = frame.height() as usize - 1;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE));
    for y in 0..EMBED_INPUT_SIZE {
        let offset_y = ((y as f64 + 0.5) * crop_h as f64 / EMBED_INPUT_SIZE as f64) as usize;
        let src_y = (crop.y.max(0) as usize + offset_y).min(max_y);
        for x in 0..EMBED_INPUT_SIZE {
            let offset_x = ((x as f64 + 0.5) * crop_w as f64 / EMBED_INPUT_SIZE as f64) as usize;
            let src_x = (crop.x.max(0) as usize + offset_x).min(max_x);
            for c in 0..3 {
                tensor[[0, c, y, x]] = (src[[src_y, src_x, c]] as f32 - NORM_MEAN) / NORM_STD;
            }
        }
    }
    Some(tensor)
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_preserves_aspect_ratio() {
        // scale = min(640/200, 640/100) = 3.2 → 640x320, pad_y = 160
        let frame = Frame::new(vec![128u8; 200 * 100 * 3], 200, 100, 3, 0);
        let (tensor, scale, pad_x, pad_y) = letterbox(&frame, 640).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((scale - 3.2).abs() < 0.01);
        assert_eq!(pad_x, 0);
        assert_eq!(pad_y, 160);
    }

    #[test]
    fn test_letterbox_fast_size_pads_with_gray() {
        let frame = Frame::new(vec![255u8; 100 * 50 * 3], 100, 50, 3, 0);
        let (tensor, _, pad_x, pad_y) = letterbox(&frame, FAST_INPUT_SIZE).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 320, 320]);
        assert_eq!(pad_x, 0);
        assert_eq!(pad_y, 80);
        assert!((tensor[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 0.01);
        assert!((tensor[[0, 0, pad_y as usize + 1, 1]] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let kept = nms(
            vec![
                (BoundingBox::new(0, 0, 100, 100), 0.8),
                (BoundingBox::new(5, 5, 100, 100), 0.9),
            ],
            0.3,
        );
        assert_eq!(kept, vec![BoundingBox::new(5, 5, 100, 100)]);
    }

    #[test]
    fn test_nms_orders_by_confidence() {
        let kept = nms(
            vec![
                (BoundingBox::new(0, 0, 50, 50), 0.6),
                (BoundingBox::new(200, 200, 50, 50), 0.9),
            ],
            0.3,
        );
        assert_eq!(
            kept,
            vec![BoundingBox::new(200, 200, 50, 50), BoundingBox::new(0, 0, 50, 50)]
        );
    }

    #[test]
    fn test_nms_empty_input() {
        assert!(nms(Vec::new(), 0.3).is_empty());
    }

    #[test]
    fn test_preprocess_crop_shape_and_range() {
        let frame = Frame::new(vec![255u8; 50 * 50 * 3], 50, 50, 3, 0);
        let tensor = preprocess_crop(&frame, &BoundingBox::new(10, 10, 20, 20)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_preprocess_crop_normalizes_dark_pixels() {
        let frame = Frame::new(vec![0u8; 20 * 20 * 3], 20, 20, 3, 0);
        let tensor = preprocess_crop(&frame, &BoundingBox::new(0, 0, 20, 20)).unwrap();
        assert!((tensor[[0, 2, 111, 111]] + 1.0).abs() < 0.01);
    }

    #[test]
    fn test_l2_normalize_unit_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }
}
