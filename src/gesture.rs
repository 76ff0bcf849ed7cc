use crate::{
    config::{GestureConfig, MopRule},
    pose::joints::Joint,
    types::PredictedPoint,
};

const CONFIDENCE_THRESHOLD: f32 = 0.9;
const HEIGHT_THRESHOLD: f32 = 0.3;
// Wrist to hip, hands raised.
const SECONDARY_HEIGHT_THRESHOLD: f32 = 0.5;
const SHOULDER_BRUSH_THRESHOLD: f32 = 0.08;

const WOAH_WRIST_HEAD: f32 = 0.25;
const WOAH_LEFT_WRIST_SHOULDER: f32 = 0.1;
const WOAH_RIGHT_WRIST_SHOULDER: f32 = 0.25;
const WOAH_WRISTS: f32 = 0.1;
const X_ARMS_THRESHOLD: f32 = 0.05;
const CLAP_THRESHOLD: f32 = 0.2;
const MOP_WRISTS: f32 = 0.2;
const MOP_WRIST_SHOULDER: f32 = 0.15;

/// Every gesture flag for one frame. Always fully populated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GestureFlags {
    pub is_getting_low: bool,
    pub is_shoulder_brush: bool,
    pub is_hands_up: bool,
    pub calibrated: bool,
    pub woah: bool,
    pub x_with_arms: bool,
    pub clap: bool,
    pub mop: bool,
}

impl GestureFlags {
    pub fn active_labels(&self) -> Vec<&'static str> {
        [
            (self.is_getting_low, "isGettingLow"),
            (self.is_shoulder_brush, "isShoulderBrush"),
            (self.is_hands_up, "isHandsUp"),
            (self.calibrated, "calibrated"),
            (self.woah, "woah"),
            (self.x_with_arms, "x_with_arms"),
            (self.clap, "clap"),
            (self.mop, "mop"),
        ]
        .into_iter()
        .filter_map(|(on, label)| on.then_some(label))
        .collect()
    }
}

/// A joint as the distance math sees it: missing joints sit at the origin
/// with zero confidence.
#[derive(Clone, Copy, Debug)]
struct Reading {
    x: f32,
    y: f32,
    confidence: f32,
}

impl Reading {
    fn of(points: &[Option<PredictedPoint>], joint: Joint) -> Self {
        match points.get(joint.index()).copied().flatten() {
            Some(p) => Reading {
                x: p.x,
                y: p.y,
                confidence: p.confidence,
            },
            None => Reading {
                x: 0.0,
                y: 0.0,
                confidence: 0.0,
            },
        }
    }

    fn confident(&self) -> bool {
        self.confidence > CONFIDENCE_THRESHOLD
    }
}

fn vertical(a: Reading, b: Reading) -> f32 {
    (a.y - b.y).powi(2).sqrt()
}

fn horizontal(a: Reading, b: Reading) -> f32 {
    (a.x - b.x).powi(2).sqrt()
}

/// Named single-axis distances the rules are written against. All of them
/// are vertical except the wrist-to-wrist gap, which is horizontal.
#[derive(Clone, Copy, Debug)]
struct Distances {
    head_right_hip: f32,
    right_wrist_left_shoulder: f32,
    left_wrist_right_shoulder: f32,
    left_wrist_left_hip: f32,
    right_wrist_right_hip: f32,
    left_wrist_head: f32,
    right_wrist_head: f32,
    left_wrist_right_elbow: f32,
    right_wrist_left_elbow: f32,
    left_wrist_left_shoulder: f32,
    right_wrist_right_shoulder: f32,
    wrists: f32,
}

/// Derives [`GestureFlags`] from the smoothed joint array.
///
/// Classification is a pure function of the points passed in; the classifier
/// only holds its rule configuration.
#[derive(Clone, Debug, Default)]
pub struct GestureClassifier {
    config: GestureConfig,
}

impl GestureClassifier {
    pub fn new(config: GestureConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, points: &[Option<PredictedPoint>]) -> GestureFlags {
        if points.iter().all(Option::is_none) {
            return GestureFlags::default();
        }

        let head = Reading::of(points, Joint::Top);
        let right_shoulder = Reading::of(points, Joint::RightShoulder);
        let left_shoulder = Reading::of(points, Joint::LeftShoulder);
        let right_elbow = Reading::of(points, Joint::RightElbow);
        let left_elbow = Reading::of(points, Joint::LeftElbow);
        let right_wrist = Reading::of(points, Joint::RightWrist);
        let left_wrist = Reading::of(points, Joint::LeftWrist);
        let right_hip = Reading::of(points, Joint::RightHip);
        let left_hip = Reading::of(points, Joint::LeftHip);

        let d = Distances {
            head_right_hip: vertical(head, right_hip),
            right_wrist_left_shoulder: vertical(left_shoulder, right_wrist),
            left_wrist_right_shoulder: vertical(right_shoulder, left_wrist),
            left_wrist_left_hip: vertical(left_hip, left_wrist),
            right_wrist_right_hip: vertical(right_hip, right_wrist),
            left_wrist_head: vertical(head, left_wrist),
            right_wrist_head: vertical(head, right_wrist),
            left_wrist_right_elbow: vertical(right_elbow, left_wrist),
            right_wrist_left_elbow: vertical(left_elbow, right_wrist),
            left_wrist_left_shoulder: vertical(left_shoulder, left_wrist),
            right_wrist_right_shoulder: vertical(right_shoulder, right_wrist),
            wrists: horizontal(left_wrist, right_wrist),
        };

        let calibrated = [
            left_wrist,
            right_wrist,
            left_shoulder,
            right_shoulder,
            head,
            left_hip,
            right_hip,
        ]
        .iter()
        .all(Reading::confident);

        if self.config.gate_on_calibration && !calibrated {
            return GestureFlags::default();
        }

        let is_getting_low = head.confident() && d.head_right_hip <= HEIGHT_THRESHOLD;

        // Left wrist is only consulted when the right wrist is not already
        // brushing.
        let mut is_shoulder_brush =
            right_wrist.confident() && d.right_wrist_left_shoulder <= SHOULDER_BRUSH_THRESHOLD;
        if !is_shoulder_brush {
            is_shoulder_brush =
                left_wrist.confident() && d.left_wrist_right_shoulder <= SHOULDER_BRUSH_THRESHOLD;
        }

        let is_hands_up = head.confident()
            && (d.right_wrist_right_hip >= SECONDARY_HEIGHT_THRESHOLD
                || d.left_wrist_left_hip >= SECONDARY_HEIGHT_THRESHOLD);

        let woah = (d.left_wrist_head <= WOAH_WRIST_HEAD
            && d.left_wrist_right_shoulder <= WOAH_LEFT_WRIST_SHOULDER
            && d.wrists <= WOAH_WRISTS)
            || (d.right_wrist_head <= WOAH_WRIST_HEAD
                && d.right_wrist_left_shoulder <= WOAH_RIGHT_WRIST_SHOULDER
                && d.wrists <= WOAH_WRISTS);

        let x_with_arms = d.left_wrist_right_elbow <= X_ARMS_THRESHOLD
            && d.right_wrist_left_elbow <= X_ARMS_THRESHOLD
            && d.wrists <= X_ARMS_THRESHOLD;

        let clap = d.wrists <= CLAP_THRESHOLD;

        let mop = match self.config.mop_rule {
            MopRule::AlwaysOn => true,
            MopRule::Geometric => {
                d.wrists <= MOP_WRISTS
                    && (d.left_wrist_left_shoulder <= MOP_WRIST_SHOULDER
                        || d.right_wrist_right_shoulder <= MOP_WRIST_SHOULDER)
            }
        };

        GestureFlags {
            is_getting_low,
            is_shoulder_brush,
            is_hands_up,
            calibrated,
            woah,
            x_with_arms,
            clap,
            mop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::joints::JOINT_COUNT;

    fn body(confidence: f32) -> Vec<Option<PredictedPoint>> {
        // A plausible standing pose, arms relaxed at the sides.
        let mut points = vec![None; JOINT_COUNT];
        let mut set = |joint: Joint, x: f32, y: f32| {
            points[joint.index()] = Some(PredictedPoint::new(x, y, confidence));
        };
        set(Joint::Top, 0.5, 0.1);
        set(Joint::Neck, 0.5, 0.2);
        set(Joint::RightShoulder, 0.4, 0.25);
        set(Joint::LeftShoulder, 0.6, 0.25);
        set(Joint::RightElbow, 0.35, 0.4);
        set(Joint::LeftElbow, 0.65, 0.4);
        set(Joint::RightWrist, 0.3, 0.55);
        set(Joint::LeftWrist, 0.7, 0.55);
        set(Joint::RightHip, 0.45, 0.6);
        set(Joint::LeftHip, 0.55, 0.6);
        set(Joint::RightKnee, 0.45, 0.75);
        set(Joint::LeftKnee, 0.55, 0.75);
        set(Joint::RightAnkle, 0.45, 0.9);
        set(Joint::LeftAnkle, 0.55, 0.9);
        points
    }

    fn move_joint(points: &mut [Option<PredictedPoint>], joint: Joint, x: f32, y: f32) {
        if let Some(p) = points[joint.index()].as_mut() {
            p.x = x;
            p.y = y;
        }
    }

    fn strict() -> GestureClassifier {
        GestureClassifier::new(GestureConfig {
            mop_rule: MopRule::Geometric,
            gate_on_calibration: false,
        })
    }

    #[test]
    fn right_wrist_on_left_shoulder_brushes() {
        let mut points = body(0.95);
        move_joint(&mut points, Joint::RightWrist, 0.6, 0.25);

        let flags = GestureClassifier::default().classify(&points);
        assert!(flags.is_shoulder_brush);
        assert!(flags.calibrated);
    }

    #[test]
    fn left_wrist_brush_is_checked_when_right_is_not() {
        let mut points = body(0.95);
        move_joint(&mut points, Joint::LeftWrist, 0.4, 0.27);
        assert!(strict().classify(&points).is_shoulder_brush);

        // Low-confidence left wrist cannot brush.
        points[Joint::LeftWrist.index()].as_mut().unwrap().confidence = 0.5;
        assert!(!strict().classify(&points).is_shoulder_brush);
    }

    #[test]
    fn crouch_with_wrists_together() {
        let mut points = body(0.95);
        move_joint(&mut points, Joint::Top, 0.5, 0.55);
        move_joint(&mut points, Joint::RightWrist, 0.5, 0.5);
        move_joint(&mut points, Joint::LeftWrist, 0.5, 0.5);

        let flags = GestureClassifier::default().classify(&points);
        assert!(flags.is_getting_low);
        assert!(flags.clap);
    }

    #[test]
    fn getting_low_needs_a_confident_head() {
        let mut points = body(0.95);
        move_joint(&mut points, Joint::Top, 0.5, 0.55);
        points[Joint::Top.index()].as_mut().unwrap().confidence = 0.8;
        assert!(!strict().classify(&points).is_getting_low);
    }

    #[test]
    fn hands_up_from_either_wrist() {
        let mut points = body(0.95);
        assert!(!strict().classify(&points).is_hands_up);

        move_joint(&mut points, Joint::LeftWrist, 0.7, 0.05);
        assert!(strict().classify(&points).is_hands_up);

        let mut points = body(0.95);
        move_joint(&mut points, Joint::RightWrist, 0.3, 0.05);
        assert!(strict().classify(&points).is_hands_up);
    }

    #[test]
    fn relaxed_pose_raises_nothing_under_strict_rules() {
        let flags = strict().classify(&body(0.95));
        assert_eq!(
            flags,
            GestureFlags {
                calibrated: true,
                ..GestureFlags::default()
            }
        );
    }

    #[test]
    fn woah_and_crossed_arms() {
        let mut points = body(0.95);
        // Both wrists up by the head, hands together, left wrist level with the
        // right shoulder.
        move_joint(&mut points, Joint::LeftWrist, 0.5, 0.3);
        move_joint(&mut points, Joint::RightWrist, 0.52, 0.3);
        let flags = strict().classify(&points);
        assert!(flags.woah);
        assert!(!flags.x_with_arms);

        let mut points = body(0.95);
        move_joint(&mut points, Joint::LeftWrist, 0.5, 0.4);
        move_joint(&mut points, Joint::RightWrist, 0.52, 0.41);
        let flags = strict().classify(&points);
        assert!(flags.x_with_arms);
        assert!(flags.clap);
    }

    #[test]
    fn woah_from_the_right_wrist_allows_a_wider_shoulder_gap() {
        // Right wrist 0.2 from the head and 0.2 from the left shoulder; the
        // left wrist sits low, so only the right-wrist rule can fire.
        let mut points = body(0.95);
        move_joint(&mut points, Joint::LeftShoulder, 0.6, 0.1);
        move_joint(&mut points, Joint::RightWrist, 0.5, 0.3);
        move_joint(&mut points, Joint::LeftWrist, 0.52, 0.5);
        assert!(strict().classify(&points).woah);

        // The same 0.2 shoulder gap on the left wrist is too wide.
        let mut points = body(0.95);
        move_joint(&mut points, Joint::RightShoulder, 0.4, 0.1);
        move_joint(&mut points, Joint::LeftWrist, 0.5, 0.3);
        move_joint(&mut points, Joint::RightWrist, 0.52, 0.5);
        assert!(!strict().classify(&points).woah);
    }

    #[test]
    fn mop_rule_selection() {
        let relaxed = body(0.95);
        assert!(GestureClassifier::default().classify(&relaxed).mop);
        assert!(!strict().classify(&relaxed).mop);

        let mut points = body(0.95);
        move_joint(&mut points, Joint::RightWrist, 0.5, 0.3);
        move_joint(&mut points, Joint::LeftWrist, 0.55, 0.3);
        assert!(strict().classify(&points).mop);
    }

    #[test]
    fn calibration_requires_every_primary_joint() {
        let mut points = body(0.95);
        points[Joint::LeftHip.index()].as_mut().unwrap().confidence = 0.9;
        assert!(!strict().classify(&points).calibrated);

        // Knees and ankles do not take part.
        let mut points = body(0.95);
        points[Joint::LeftKnee.index()] = None;
        assert!(strict().classify(&points).calibrated);
    }

    #[test]
    fn calibration_gate_suppresses_gestures() {
        let gated = GestureClassifier::new(GestureConfig {
            mop_rule: MopRule::AlwaysOn,
            gate_on_calibration: true,
        });
        let mut points = body(0.5);
        move_joint(&mut points, Joint::RightWrist, 0.5, 0.5);
        move_joint(&mut points, Joint::LeftWrist, 0.5, 0.5);

        assert_eq!(gated.classify(&points), GestureFlags::default());
        assert!(GestureClassifier::default().classify(&points).clap);
    }

    #[test]
    fn no_points_yields_an_all_false_record() {
        let classifier = GestureClassifier::default();
        assert_eq!(classifier.classify(&[]), GestureFlags::default());
        assert_eq!(
            classifier.classify(&vec![None; JOINT_COUNT]),
            GestureFlags::default()
        );
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let classifier = GestureClassifier::default();
        let points = body(0.93);
        assert_eq!(classifier.classify(&points), classifier.classify(&points));
    }

    #[test]
    fn active_labels_lists_raised_flags() {
        let flags = GestureFlags {
            clap: true,
            calibrated: true,
            ..GestureFlags::default()
        };
        assert_eq!(flags.active_labels(), vec!["calibrated", "clap"]);
    }
}
