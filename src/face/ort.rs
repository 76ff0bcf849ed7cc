use std::{cmp::Ordering, path::Path, time::Instant};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{FaceLandmarkDetector, FaceRectangleDetector, ObjectTracker, TrackObservation};
use crate::{
    preprocess::{self, InputSpec, Normalization, TensorLayout},
    types::{Frame, NormalizedRect},
};

const DETECTOR_INPUT_WIDTH: u32 = 320;
const DETECTOR_INPUT_HEIGHT: u32 = 240;
const LANDMARK_INPUT_SIZE: u32 = 112;

#[derive(Clone, Debug)]
pub struct FaceDetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for FaceDetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.7,
            nms_threshold: 0.3,
            top_k: 8,
        }
    }
}

/// Anchor-decoded face detector: `scores [1, N, 2]` (background, face) and
/// `boxes [1, N, 4]` as normalized corners.
pub struct OrtFaceDetector {
    session: Session,
    cfg: FaceDetectorConfig,
    input: InputSpec,
}

impl OrtFaceDetector {
    pub fn new(model_path: &Path, cfg: FaceDetectorConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load face detector from {}", model_path.display())
            })?;

        Ok(Self {
            session,
            cfg,
            input: InputSpec {
                width: DETECTOR_INPUT_WIDTH,
                height: DETECTOR_INPUT_HEIGHT,
                layout: TensorLayout::Nchw,
                normalization: Normalization::SIGNED,
            },
        })
    }

    /// Detections with their scores, best first.
    pub fn detect_scored(&mut self, frame: &Frame) -> Result<Vec<(NormalizedRect, f32)>> {
        let input = preprocess::prepare_scale_fill(frame, &self.input)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run face detector session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "face detector returned {} outputs, expected 2",
                outputs.len()
            ));
        }

        let scores = outputs[0].try_extract_array::<f32>()?;
        let boxes = outputs[1].try_extract_array::<f32>()?;
        decode_detections(
            scores
                .as_slice()
                .ok_or_else(|| anyhow!("face scores not contiguous"))?,
            boxes
                .as_slice()
                .ok_or_else(|| anyhow!("face boxes not contiguous"))?,
            &self.cfg,
        )
    }
}

impl FaceRectangleDetector for OrtFaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<NormalizedRect>> {
        Ok(self
            .detect_scored(frame)?
            .into_iter()
            .map(|(rect, _)| rect)
            .collect())
    }
}

fn decode_detections(
    scores: &[f32],
    boxes: &[f32],
    cfg: &FaceDetectorConfig,
) -> Result<Vec<(NormalizedRect, f32)>> {
    if scores.len() % 2 != 0 || boxes.len() % 4 != 0 {
        return Err(anyhow!(
            "unexpected face output sizes: scores {}, boxes {}",
            scores.len(),
            boxes.len()
        ));
    }
    let anchors = scores.len() / 2;
    if boxes.len() / 4 != anchors {
        return Err(anyhow!(
            "anchor count mismatch between scores ({anchors}) and boxes ({})",
            boxes.len() / 4
        ));
    }

    let mut candidates: Vec<(NormalizedRect, f32)> = scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(score, _)| score[1] >= cfg.score_threshold)
        .map(|(score, b)| {
            let x1 = b[0].clamp(0.0, 1.0);
            let y1 = b[1].clamp(0.0, 1.0);
            let x2 = b[2].clamp(0.0, 1.0);
            let y2 = b[3].clamp(0.0, 1.0);
            (NormalizedRect::from_corners(x1, y1, x2, y2), score[1])
        })
        .filter(|(rect, _)| rect.area() > 0.0)
        .collect();

    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut keep: Vec<(NormalizedRect, f32)> = Vec::new();
    'outer: for candidate in candidates {
        for kept in &keep {
            if candidate.0.iou(&kept.0) >= cfg.nms_threshold {
                continue 'outer;
            }
        }
        keep.push(candidate);
        if keep.len() >= cfg.top_k {
            break;
        }
    }

    Ok(keep)
}

/// Follows a face by re-detecting it and associating the detection that
/// overlaps the previous box most. Confidence is that overlap (IoU) scaled by
/// the detection score, so a face that jumps or vanishes drops the track.
///
/// Every tracked face in a frame is associated against the same detector
/// pass; the model runs once per frame however many tracks are live.
pub struct DetectionTracker {
    detector: OrtFaceDetector,
    cache: FrameDetections,
}

impl DetectionTracker {
    pub fn new(detector: OrtFaceDetector) -> Self {
        Self {
            detector,
            cache: FrameDetections::default(),
        }
    }
}

impl ObjectTracker for DetectionTracker {
    fn track(&mut self, frame: &Frame, previous: &NormalizedRect) -> Result<TrackObservation> {
        let detector = &mut self.detector;
        let detections = self
            .cache
            .get_or_detect(frame.timestamp, || detector.detect_scored(frame))?;
        Ok(associate(previous, detections))
    }
}

/// Scored detections of the most recent frame, keyed by its capture time.
/// Failed passes are not cached.
#[derive(Debug, Default)]
struct FrameDetections {
    stamp: Option<Instant>,
    detections: Vec<(NormalizedRect, f32)>,
}

impl FrameDetections {
    fn get_or_detect(
        &mut self,
        stamp: Instant,
        detect: impl FnOnce() -> Result<Vec<(NormalizedRect, f32)>>,
    ) -> Result<&[(NormalizedRect, f32)]> {
        if self.stamp != Some(stamp) {
            self.stamp = None;
            self.detections = detect()?;
            self.stamp = Some(stamp);
        }
        Ok(&self.detections)
    }
}

fn associate(previous: &NormalizedRect, detections: &[(NormalizedRect, f32)]) -> TrackObservation {
    detections
        .iter()
        .map(|(rect, score)| TrackObservation {
            bbox: *rect,
            confidence: previous.iou(rect) * score,
        })
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(Ordering::Equal)
        })
        .unwrap_or(TrackObservation {
            bbox: *previous,
            confidence: 0.0,
        })
}

/// Dense facial landmark regressor run on a face crop. The model emits
/// `[1, 2 * points]` coordinates relative to the crop; the refined box is
/// their extent.
pub struct OrtLandmarkDetector {
    session: Session,
    input: InputSpec,
}

impl OrtLandmarkDetector {
    pub fn new(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load landmark model from {}", model_path.display())
            })?;

        Ok(Self {
            session,
            input: InputSpec {
                width: LANDMARK_INPUT_SIZE,
                height: LANDMARK_INPUT_SIZE,
                layout: TensorLayout::Nchw,
                normalization: Normalization::UNIT,
            },
        })
    }
}

impl FaceLandmarkDetector for OrtLandmarkDetector {
    fn refine(&mut self, frame: &Frame, region: &NormalizedRect) -> Result<Vec<NormalizedRect>> {
        let (input, crop) = preprocess::prepare_region(frame, region, &self.input)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run landmark session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("landmark model returned no outputs"));
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let points: Vec<(f32, f32)> = flattened
            .chunks_exact(2)
            .map(|p| crop.to_frame(p[0], p[1]))
            .collect();

        Ok(landmark_extent(&points).into_iter().collect())
    }
}

fn landmark_extent(points: &[(f32, f32)]) -> Option<NormalizedRect> {
    if points.is_empty() {
        return None;
    }
    let (min_x, max_x, min_y, max_y) = points
        .iter()
        .fold((f32::MAX, f32::MIN, f32::MAX, f32::MIN), |acc, (x, y)| {
            (acc.0.min(*x), acc.1.max(*x), acc.2.min(*y), acc.3.max(*y))
        });
    let rect = NormalizedRect::from_corners(min_x, min_y, max_x, max_y);
    (rect.area() > 0.0).then_some(rect)
}
