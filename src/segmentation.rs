use std::{cmp::Ordering, path::Path, time::Instant};

use anyhow::{Context, Result, anyhow};
use image::{GrayImage, Luma};
use ndarray::{Array2, ArrayViewD, Axis, Ix3};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use crate::{
    error::{Stage, VisionError},
    preprocess::{self, InputSpec, Normalization, TensorLayout},
    types::Frame,
};

pub const SEGMENTATION_INPUT_SIZE: u32 = 257;

/// Opaque segmentation network: one frame in, per-pixel class map out.
pub trait SegmentationEngine: Send + 'static {
    fn segment(&mut self, frame: &Frame) -> anyhow::Result<Array2<u32>>;
}

/// Binary mask for one target class plus a rendered 8-bit buffer of it.
#[derive(Clone, Debug)]
pub struct SegmentationResult {
    /// `mask[[row, col]]` is 1 where the target class was predicted.
    pub mask: Array2<u8>,
    pub image: GrayImage,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl SegmentationResult {
    pub fn from_class_map(classes: &Array2<u32>, target_class: u32, timestamp: Instant) -> Self {
        let mask = classes.mapv(|class| u8::from(class == target_class));
        let (rows, cols) = mask.dim();
        let image = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([mask[[y as usize, x as usize]] * 255])
        });

        Self {
            mask,
            image,
            width: cols as u32,
            height: rows as u32,
            timestamp,
        }
    }

    pub fn coverage(&self) -> f32 {
        let total = self.mask.len();
        if total == 0 {
            return 0.0;
        }
        self.mask.iter().map(|&v| v as usize).sum::<usize>() as f32 / total as f32
    }
}

pub struct Segmenter {
    engine: Box<dyn SegmentationEngine>,
    target_class: u32,
}

impl Segmenter {
    pub fn new(engine: Box<dyn SegmentationEngine>, target_class: u32) -> Self {
        Self {
            engine,
            target_class,
        }
    }

    pub fn process(&mut self, frame: &Frame) -> Result<SegmentationResult, VisionError> {
        let classes = self
            .engine
            .segment(frame)
            .map_err(|err| VisionError::inference(Stage::Segmentation, &err))?;
        Ok(SegmentationResult::from_class_map(
            &classes,
            self.target_class,
            frame.timestamp,
        ))
    }
}

/// Per-pixel argmax over `[rows, cols, classes]` logits (leading unit axes
/// allowed).
pub fn argmax_classes(logits: ArrayViewD<'_, f32>) -> Result<Array2<u32>> {
    let mut view = logits;
    while view.ndim() > 3 && view.shape()[0] == 1 {
        view = view.index_axis_move(Axis(0), 0);
    }
    let view = view
        .into_dimensionality::<Ix3>()
        .map_err(|_| anyhow!("segmentation logits must be [rows, cols, classes]"))?;

    let (rows, cols, classes) = view.dim();
    if classes == 0 {
        return Err(anyhow!("segmentation logits have no classes"));
    }

    Ok(Array2::from_shape_fn((rows, cols), |(r, c)| {
        view.slice(ndarray::s![r, c, ..])
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
            .map(|(idx, _)| idx as u32)
            .unwrap_or(0)
    }))
}

pub struct OrtSegmentationEngine {
    session: Session,
    input: InputSpec,
}

impl OrtSegmentationEngine {
    pub fn new(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!(
                    "failed to load segmentation model from {}",
                    model_path.display()
                )
            })?;

        Ok(Self {
            session,
            input: InputSpec {
                width: SEGMENTATION_INPUT_SIZE,
                height: SEGMENTATION_INPUT_SIZE,
                layout: TensorLayout::Nhwc,
                normalization: Normalization {
                    mean: [0.5, 0.5, 0.5],
                    std: [0.5, 0.5, 0.5],
                },
            },
        })
    }
}

impl SegmentationEngine for OrtSegmentationEngine {
    fn segment(&mut self, frame: &Frame) -> Result<Array2<u32>> {
        let input = preprocess::prepare_scale_fill(frame, &self.input)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run segmentation session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("segmentation model returned no outputs"));
        }

        let logits = outputs[0].try_extract_array::<f32>()?;
        argmax_classes(logits)
    }
}
