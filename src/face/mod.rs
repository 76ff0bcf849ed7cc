pub mod ort;

use crate::{
    config::FaceTrackerConfig,
    error::{Stage, VisionError},
    types::{FaceDetectionData, Frame, NormalizedRect},
};

/// Full-frame face rectangle detection.
pub trait FaceRectangleDetector: Send + 'static {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<NormalizedRect>>;
}

/// Where a tracked object ended up on the current frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackObservation {
    pub bbox: NormalizedRect,
    pub confidence: f32,
}

/// Sequence-based single-object tracker: follows `previous` into `frame`.
pub trait ObjectTracker: Send + 'static {
    fn track(&mut self, frame: &Frame, previous: &NormalizedRect)
    -> anyhow::Result<TrackObservation>;
}

/// Landmark pass over one face region; returns a refined box per face found.
pub trait FaceLandmarkDetector: Send + 'static {
    fn refine(&mut self, frame: &Frame, region: &NormalizedRect)
    -> anyhow::Result<Vec<NormalizedRect>>;
}

/// A per-face tracking handle carried across frames.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackRequest {
    pub id: u64,
    pub observation: NormalizedRect,
    /// Set once confidence drops; the request gets one more frame and is then
    /// dropped.
    pub is_last_frame: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceTrackerState {
    /// No active track requests; the next frame runs full detection.
    Idle,
    Tracking { active: usize },
}

/// Detect-then-track face state machine.
pub struct FaceTracker {
    detector: Box<dyn FaceRectangleDetector>,
    tracker: Box<dyn ObjectTracker>,
    landmarks: Box<dyn FaceLandmarkDetector>,
    config: FaceTrackerConfig,
    requests: Vec<TrackRequest>,
    next_id: u64,
}

impl FaceTracker {
    pub fn new(
        detector: Box<dyn FaceRectangleDetector>,
        tracker: Box<dyn ObjectTracker>,
        landmarks: Box<dyn FaceLandmarkDetector>,
        config: FaceTrackerConfig,
    ) -> Self {
        Self {
            detector,
            tracker,
            landmarks,
            config,
            requests: Vec::new(),
            next_id: 0,
        }
    }

    pub fn state(&self) -> FaceTrackerState {
        if self.requests.is_empty() {
            FaceTrackerState::Idle
        } else {
            FaceTrackerState::Tracking {
                active: self.requests.len(),
            }
        }
    }

    pub fn requests(&self) -> &[TrackRequest] {
        &self.requests
    }

    /// Advances the state machine by one frame and returns the face boxes to
    /// publish, in consumer space.
    ///
    /// Detection frames seed track requests and publish nothing. A failed
    /// detector or tracker call leaves the surviving state untouched.
    pub fn process(&mut self, frame: &Frame) -> Result<Vec<FaceDetectionData>, VisionError> {
        if self.requests.is_empty() {
            self.detect(frame)?;
            return Ok(Vec::new());
        }

        let observations = self
            .requests
            .iter()
            .map(|request| self.tracker.track(frame, &request.observation))
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|err| VisionError::inference(Stage::Face, &err))?;

        let min_confidence = self.config.min_track_confidence;
        let previous = std::mem::take(&mut self.requests);
        // Refinement always reads where the tracker saw the face this frame,
        // even on a terminal frame whose request keeps its last good box.
        let mut regions = Vec::with_capacity(previous.len());
        for (mut request, observation) in previous.into_iter().zip(observations) {
            if request.is_last_frame {
                log::debug!("dropping face track {}", request.id);
                continue;
            }
            if observation.confidence >= min_confidence {
                request.observation = observation.bbox;
            } else {
                log::debug!(
                    "face track {} fell to {:.2}, marking terminal",
                    request.id,
                    observation.confidence
                );
                request.is_last_frame = true;
            }
            regions.push((request.id, observation.bbox));
            self.requests.push(request);
        }

        if self.requests.is_empty() {
            log::debug!("no faces left to track, returning to detection");
            return Ok(Vec::new());
        }

        let mut faces = Vec::new();
        for (id, region) in regions {
            let roi = region.expanded(self.config.landmark_roi_expansion);
            match self.landmarks.refine(frame, &roi) {
                Ok(boxes) => faces.extend(boxes.iter().map(FaceDetectionData::from_detector_rect)),
                Err(err) => {
                    log::warn!("face landmark refinement failed for track {id}: {err:?}");
                }
            }
        }

        Ok(faces)
    }

    fn detect(&mut self, frame: &Frame) -> Result<(), VisionError> {
        let rects = self
            .detector
            .detect(frame)
            .map_err(|err| VisionError::inference(Stage::Face, &err))?;

        for rect in rects {
            self.requests.push(TrackRequest {
                id: self.next_id,
                observation: rect,
                is_last_frame: false,
            });
            self.next_id += 1;
        }

        if !self.requests.is_empty() {
            log::debug!("detected {} face(s), tracking", self.requests.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Instant,
    };

    struct ScriptedDetector {
        results: Arc<Mutex<VecDeque<anyhow::Result<Vec<NormalizedRect>>>>>,
        calls: Arc<Mutex<usize>>,
    }

    impl FaceRectangleDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<NormalizedRect>> {
            *self.calls.lock().unwrap() += 1;
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct ScriptedTracker {
        confidences: VecDeque<anyhow::Result<f32>>,
    }

    impl ObjectTracker for ScriptedTracker {
        fn track(
            &mut self,
            _frame: &Frame,
            previous: &NormalizedRect,
        ) -> anyhow::Result<TrackObservation> {
            let confidence = self.confidences.pop_front().unwrap_or(Ok(0.9))?;
            Ok(TrackObservation {
                bbox: NormalizedRect::new(previous.x + 0.01, previous.y, previous.width, previous.height),
                confidence,
            })
        }
    }

    struct EchoLandmarks;

    impl FaceLandmarkDetector for EchoLandmarks {
        fn refine(
            &mut self,
            _frame: &Frame,
            region: &NormalizedRect,
        ) -> anyhow::Result<Vec<NormalizedRect>> {
            Ok(vec![*region])
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0; 16], 2, 2, Instant::now())
    }

    fn tracker_with(
        detections: Vec<anyhow::Result<Vec<NormalizedRect>>>,
        confidences: Vec<anyhow::Result<f32>>,
    ) -> (FaceTracker, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let detector = ScriptedDetector {
            results: Arc::new(Mutex::new(detections.into())),
            calls: calls.clone(),
        };
        let tracker = FaceTracker::new(
            Box::new(detector),
            Box::new(ScriptedTracker {
                confidences: confidences.into(),
            }),
            Box::new(EchoLandmarks),
            FaceTrackerConfig {
                min_track_confidence: 0.3,
                landmark_roi_expansion: 1.0,
            },
        );
        (tracker, calls)
    }

    fn face_rect() -> NormalizedRect {
        NormalizedRect::new(0.2, 0.3, 0.25, 0.4)
    }

    #[test]
    fn low_confidence_track_gets_one_terminal_frame() {
        let (mut tracker, calls) =
            tracker_with(vec![Ok(vec![face_rect()])], vec![Ok(0.9), Ok(0.9), Ok(0.2), Ok(0.9)]);
        let f = frame();

        assert!(tracker.process(&f).unwrap().is_empty());
        assert_eq!(tracker.state(), FaceTrackerState::Tracking { active: 1 });

        assert_eq!(tracker.process(&f).unwrap().len(), 1);
        assert_eq!(tracker.process(&f).unwrap().len(), 1);

        // Confidence 0.2: marked terminal but kept for this frame.
        let faces = tracker.process(&f).unwrap();
        assert_eq!(faces.len(), 1);
        assert!(tracker.requests()[0].is_last_frame);

        // Terminal request is dropped; nothing left to track.
        assert!(tracker.process(&f).unwrap().is_empty());
        assert_eq!(tracker.state(), FaceTrackerState::Idle);
        assert_eq!(*calls.lock().unwrap(), 1);

        // Next frame runs detection again.
        tracker.process(&f).unwrap();
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn terminal_frame_keeps_last_good_box() {
        let (mut tracker, _) = tracker_with(vec![Ok(vec![face_rect()])], vec![Ok(0.1)]);
        let f = frame();
        tracker.process(&f).unwrap();
        let faces = tracker.process(&f).unwrap();
        assert_eq!(tracker.requests()[0].observation, face_rect());

        // The emitted box is refined from this frame's weak observation
        // (x nudged to 0.21), not from the retained box.
        assert_eq!(faces.len(), 1);
        assert!((faces[0].y - 0.21).abs() < 1e-5);

        assert!(tracker.process(&f).unwrap().is_empty());
        assert_eq!(tracker.state(), FaceTrackerState::Idle);
    }

    #[test]
    fn boxes_are_emitted_in_consumer_space() {
        let (mut tracker, _) = tracker_with(vec![Ok(vec![face_rect()])], vec![Ok(0.8)]);
        let f = frame();
        tracker.process(&f).unwrap();
        let faces = tracker.process(&f).unwrap();

        // Tracker nudged x to 0.21; consumer space swaps the axes.
        assert_eq!(faces.len(), 1);
        assert!((faces[0].x - 0.3).abs() < 1e-5);
        assert!((faces[0].y - 0.21).abs() < 1e-5);
        assert!((faces[0].width - 0.4).abs() < 1e-5);
        assert!((faces[0].height - 0.25).abs() < 1e-5);
    }

    #[test]
    fn every_detected_face_seeds_a_track() {
        let second = NormalizedRect::new(0.6, 0.3, 0.2, 0.3);
        let (mut tracker, _) = tracker_with(vec![Ok(vec![face_rect(), second])], vec![]);
        let f = frame();
        tracker.process(&f).unwrap();
        assert_eq!(tracker.state(), FaceTrackerState::Tracking { active: 2 });
        assert_eq!(tracker.process(&f).unwrap().len(), 2);
        let ids: Vec<u64> = tracker.requests().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn failures_skip_the_frame_and_keep_state() {
        let (mut tracker, calls) = tracker_with(
            vec![Err(anyhow::anyhow!("detector down")), Ok(vec![face_rect()])],
            vec![Err(anyhow::anyhow!("tracker down")), Ok(0.9)],
        );
        let f = frame();

        assert!(tracker.process(&f).is_err());
        assert_eq!(tracker.state(), FaceTrackerState::Idle);

        tracker.process(&f).unwrap();
        assert_eq!(*calls.lock().unwrap(), 2);

        assert!(matches!(
            tracker.process(&f),
            Err(VisionError::Inference {
                stage: Stage::Face,
                ..
            })
        ));
        assert_eq!(tracker.requests()[0].observation, face_rect());

        assert_eq!(tracker.process(&f).unwrap().len(), 1);
    }

    #[test]
    fn empty_detection_stays_idle() {
        let (mut tracker, calls) = tracker_with(vec![Ok(vec![])], vec![]);
        let f = frame();
        tracker.process(&f).unwrap();
        tracker.process(&f).unwrap();
        assert_eq!(tracker.state(), FaceTrackerState::Idle);
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
