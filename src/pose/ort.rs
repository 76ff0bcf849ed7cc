use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ndarray::ArrayD;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::PoseEngine;
use crate::{
    preprocess::{self, InputSpec, Normalization, TensorLayout},
    types::Frame,
};

pub const POSE_INPUT_SIZE: u32 = 192;

pub struct OrtPoseEngine {
    session: Session,
    input: InputSpec,
}

impl OrtPoseEngine {
    pub fn new(model_path: &Path) -> Result<Self> {
        Self::with_input(
            model_path,
            InputSpec {
                width: POSE_INPUT_SIZE,
                height: POSE_INPUT_SIZE,
                layout: TensorLayout::Nhwc,
                normalization: Normalization::UNIT,
            },
        )
    }

    pub fn with_input(model_path: &Path, input: InputSpec) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load pose model from {}", model_path.display()))?;

        Ok(Self { session, input })
    }
}

impl PoseEngine for OrtPoseEngine {
    fn infer(&mut self, frame: &Frame) -> Result<ArrayD<f32>> {
        let input = preprocess::prepare_scale_fill(frame, &self.input)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run pose session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("pose model returned no outputs"));
        }

        let heatmaps = outputs[0].try_extract_array::<f32>()?;
        Ok(heatmaps.to_owned())
    }
}
