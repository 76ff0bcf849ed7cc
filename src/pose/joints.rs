/// The 14 joints emitted by the pose model, in heatmap channel order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Joint {
    Top,
    Neck,
    RightShoulder,
    RightElbow,
    RightWrist,
    LeftShoulder,
    LeftElbow,
    LeftWrist,
    RightHip,
    RightKnee,
    RightAnkle,
    LeftHip,
    LeftKnee,
    LeftAnkle,
}

pub const JOINT_COUNT: usize = 14;

pub const JOINTS: [Joint; JOINT_COUNT] = [
    Joint::Top,
    Joint::Neck,
    Joint::RightShoulder,
    Joint::RightElbow,
    Joint::RightWrist,
    Joint::LeftShoulder,
    Joint::LeftElbow,
    Joint::LeftWrist,
    Joint::RightHip,
    Joint::RightKnee,
    Joint::RightAnkle,
    Joint::LeftHip,
    Joint::LeftKnee,
    Joint::LeftAnkle,
];

impl Joint {
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Joint> {
        JOINTS.get(index).copied()
    }

    pub fn label(&self) -> &'static str {
        match self {
            Joint::Top => "top",
            Joint::Neck => "neck",
            Joint::RightShoulder => "R shoulder",
            Joint::RightElbow => "R elbow",
            Joint::RightWrist => "R wrist",
            Joint::LeftShoulder => "L shoulder",
            Joint::LeftElbow => "L elbow",
            Joint::LeftWrist => "L wrist",
            Joint::RightHip => "R hip",
            Joint::RightKnee => "R knee",
            Joint::RightAnkle => "R ankle",
            Joint::LeftHip => "L hip",
            Joint::LeftKnee => "L knee",
            Joint::LeftAnkle => "L ankle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_order_matches_enum_discriminants() {
        for (idx, joint) in JOINTS.iter().enumerate() {
            assert_eq!(joint.index(), idx);
            assert_eq!(Joint::from_index(idx), Some(*joint));
        }
        assert_eq!(Joint::from_index(JOINT_COUNT), None);
        assert_eq!(Joint::LeftWrist.label(), "L wrist");
    }
}
