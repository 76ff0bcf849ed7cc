use super::joints::Joint;
use crate::types::PredictedPoint;

/// Left/right estimates for one paired joint group.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BodyTrackingPositions {
    pub left: Option<PredictedPoint>,
    pub right: Option<PredictedPoint>,
}

impl BodyTrackingPositions {
    pub fn confidence_left(&self) -> Option<f32> {
        self.left.map(|p| p.confidence)
    }

    pub fn confidence_right(&self) -> Option<f32> {
        self.right.map(|p| p.confidence)
    }
}

/// Named joint-group snapshot for one frame, derived from the smoothed
/// points.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BodyTrackingData {
    pub top: Option<PredictedPoint>,
    pub neck: Option<PredictedPoint>,
    pub shoulders: BodyTrackingPositions,
    pub elbows: BodyTrackingPositions,
    pub wrists: BodyTrackingPositions,
    pub hips: BodyTrackingPositions,
    pub knees: BodyTrackingPositions,
    pub ankles: BodyTrackingPositions,
}

impl BodyTrackingData {
    pub fn from_points(points: &[Option<PredictedPoint>]) -> Self {
        let get = |joint: Joint| points.get(joint.index()).copied().flatten();
        let pair = |left: Joint, right: Joint| BodyTrackingPositions {
            left: get(left),
            right: get(right),
        };

        Self {
            top: get(Joint::Top),
            neck: get(Joint::Neck),
            shoulders: pair(Joint::LeftShoulder, Joint::RightShoulder),
            elbows: pair(Joint::LeftElbow, Joint::RightElbow),
            wrists: pair(Joint::LeftWrist, Joint::RightWrist),
            hips: pair(Joint::LeftHip, Joint::RightHip),
            knees: pair(Joint::LeftKnee, Joint::RightKnee),
            ankles: pair(Joint::LeftAnkle, Joint::RightAnkle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::joints::JOINT_COUNT;

    #[test]
    fn groups_follow_the_joint_table() {
        let points: Vec<Option<PredictedPoint>> = (0..JOINT_COUNT)
            .map(|i| Some(PredictedPoint::new(i as f32 / 100.0, 0.0, 0.5)))
            .collect();
        let body = BodyTrackingData::from_points(&points);

        assert_eq!(body.top.unwrap().x, 0.0);
        assert_eq!(body.wrists.right.unwrap().x, 0.04);
        assert_eq!(body.wrists.left.unwrap().x, 0.07);
        assert_eq!(body.ankles.left.unwrap().x, 0.13);
        assert_eq!(body.hips.confidence_right(), Some(0.5));
    }

    #[test]
    fn short_or_empty_input_leaves_groups_absent() {
        let body = BodyTrackingData::from_points(&[]);
        assert_eq!(body, BodyTrackingData::default());
        assert_eq!(body.knees.confidence_left(), None);
    }
}
