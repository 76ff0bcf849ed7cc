pub mod body;
pub mod heatmap;
pub mod joints;
pub mod ort;
pub mod smoothing;

use ndarray::ArrayD;

pub use body::{BodyTrackingData, BodyTrackingPositions};
pub use joints::{JOINT_COUNT, JOINTS, Joint};
pub use smoothing::{MovingAverageFilter, TemporalSmoother};

use crate::{
    error::{Stage, VisionError},
    gesture::{GestureClassifier, GestureFlags},
    types::{Frame, PredictedPoint},
};

/// Opaque pose network: one frame in, raw heatmap tensor out.
pub trait PoseEngine: Send + 'static {
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<ArrayD<f32>>;
}

/// Everything the pose path produces for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseUpdate {
    pub flags: GestureFlags,
    pub body: BodyTrackingData,
    pub points: Vec<Option<PredictedPoint>>,
}

/// Heatmap decoding, smoothing and gesture derivation for one pose session.
pub struct PoseEstimator {
    engine: Box<dyn PoseEngine>,
    smoother: TemporalSmoother,
    classifier: GestureClassifier,
    mirror: bool,
}

impl PoseEstimator {
    pub fn new(engine: Box<dyn PoseEngine>, classifier: GestureClassifier, mirror: bool) -> Self {
        Self {
            engine,
            smoother: TemporalSmoother::default(),
            classifier,
            mirror,
        }
    }

    pub fn process(&mut self, frame: &Frame) -> Result<PoseUpdate, VisionError> {
        let raw = self
            .engine
            .infer(frame)
            .map_err(|err| VisionError::inference(Stage::Pose, &err))?;

        Ok(self.update_from_heatmaps(raw))
    }

    /// Runs the post-inference half of the pose path on a raw model output.
    /// Unusable tensors produce an update with no points.
    pub fn update_from_heatmaps(&mut self, raw: ArrayD<f32>) -> PoseUpdate {
        let mut points = match heatmap::squeeze_to_heatmaps(raw.view()) {
            Some(maps) => heatmap::convert_to_predicted_points(maps, self.mirror),
            None => {
                log::debug!("skipping unusable heatmap of shape {:?}", raw.shape());
                Vec::new()
            }
        };

        if !points.is_empty() {
            self.smoother.smooth(&mut points);
        }

        PoseUpdate {
            flags: self.classifier.classify(&points),
            body: BodyTrackingData::from_points(&points),
            points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, IxDyn};

    struct NoEngine;

    impl PoseEngine for NoEngine {
        fn infer(&mut self, _frame: &Frame) -> anyhow::Result<ArrayD<f32>> {
            Err(anyhow::anyhow!("no model"))
        }
    }

    fn estimator() -> PoseEstimator {
        PoseEstimator::new(Box::new(NoEngine), GestureClassifier::default(), true)
    }

    #[test]
    fn unparseable_heatmap_yields_empty_update_with_full_flags() {
        let mut est = estimator();
        let update = est.update_from_heatmaps(ArrayD::zeros(IxDyn(&[5])));
        assert!(update.points.is_empty());
        assert_eq!(update.flags, GestureFlags::default());
        assert_eq!(update.body, BodyTrackingData::default());
    }

    #[test]
    fn heatmaps_are_mirrored_and_smoothed() {
        let mut est = estimator();

        let mut maps = Array3::<f32>::zeros((JOINT_COUNT, 4, 4));
        for k in 0..JOINT_COUNT {
            maps[[k, 0, 0]] = 0.95;
        }
        let first = est.update_from_heatmaps(maps.clone().into_dyn());
        let wrist = first.body.wrists.right.unwrap();
        assert!((wrist.x - 0.875).abs() < 1e-6);

        let mut moved = Array3::<f32>::zeros((JOINT_COUNT, 4, 4));
        for k in 0..JOINT_COUNT {
            moved[[k, 0, 3]] = 0.95;
        }
        let second = est.update_from_heatmaps(moved.into_dyn());
        let wrist = second.body.wrists.right.unwrap();
        assert!((wrist.x - 0.5).abs() < 1e-6);
        assert_eq!(second.points.len(), JOINT_COUNT);
    }

    #[test]
    fn inference_failure_is_a_pose_stage_error() {
        let mut est = estimator();
        let frame = Frame::new(vec![0; 16], 2, 2, std::time::Instant::now());
        match est.process(&frame) {
            Err(VisionError::Inference { stage, .. }) => assert_eq!(stage, Stage::Pose),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
