use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::anyhow;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use image::{RgbaImage, imageops};

use super::hub::{DispatchHub, PreviewFrame};
use crate::{
    config::{PipelineConfig, PreviewRotation},
    error::VisionError,
    face::{
        FaceTracker,
        ort::{DetectionTracker, FaceDetectorConfig, OrtFaceDetector, OrtLandmarkDetector},
    },
    gesture::GestureClassifier,
    pose::{PoseEstimator, ort::OrtPoseEngine},
    segmentation::{OrtSegmentationEngine, Segmenter},
    types::{FormatDescription, Frame},
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The CV stages one pipeline runs. A stage left as `None` is disabled for
/// the session and its channels stay silent.
#[derive(Default)]
pub struct PipelineStages {
    pub pose: Option<PoseEstimator>,
    pub face: Option<FaceTracker>,
    pub segmentation: Option<Segmenter>,
}

impl PipelineStages {
    /// Loads every ONNX-backed stage named by `config`. A stage whose model
    /// fails to load is logged and left disabled; the others still run.
    pub fn load(config: &PipelineConfig) -> Self {
        let pose = match OrtPoseEngine::new(&config.models.pose) {
            Ok(engine) => {
                log::info!("pose model ready ({})", config.models.pose.display());
                Some(PoseEstimator::new(
                    Box::new(engine),
                    GestureClassifier::new(config.gestures.clone()),
                    config.mirror_pose,
                ))
            }
            Err(err) => {
                log::error!("{}", VisionError::setup("pose model", &err));
                None
            }
        };

        let face = match load_face_tracker(config) {
            Ok(tracker) => {
                log::info!(
                    "face tracking ready ({})",
                    config.models.face_detector.display()
                );
                Some(tracker)
            }
            Err(err) => {
                log::error!("{}", VisionError::setup("face models", &err));
                None
            }
        };

        let segmentation = if config.enable_segmentation {
            match OrtSegmentationEngine::new(&config.models.segmentation) {
                Ok(engine) => {
                    log::info!(
                        "segmentation model ready ({}), target class {}",
                        config.models.segmentation.display(),
                        config.segmentation_class
                    );
                    Some(Segmenter::new(Box::new(engine), config.segmentation_class))
                }
                Err(err) => {
                    log::error!("{}", VisionError::setup("segmentation model", &err));
                    None
                }
            }
        } else {
            None
        };

        Self {
            pose,
            face,
            segmentation,
        }
    }
}

fn load_face_tracker(config: &PipelineConfig) -> anyhow::Result<FaceTracker> {
    let models = &config.models;
    let detector = OrtFaceDetector::new(&models.face_detector, FaceDetectorConfig::default())?;
    let tracking = OrtFaceDetector::new(&models.face_detector, FaceDetectorConfig::default())?;
    let landmarks = OrtLandmarkDetector::new(&models.face_landmarks)?;

    Ok(FaceTracker::new(
        Box::new(detector),
        Box::new(DetectionTracker::new(tracking)),
        Box::new(landmarks),
        config.face.clone(),
    ))
}

/// Handle on a running frame worker (and its segmentation side worker).
#[derive(Debug)]
pub struct VisionPipeline {
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    segmentation: Option<thread::JoinHandle<()>>,
}

impl VisionPipeline {
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Waits for the worker to finish on its own, which happens once every
    /// frame sender has been dropped.
    pub fn join(mut self) {
        self.join_threads();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.join_threads();
    }

    fn join_threads(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.segmentation.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for VisionPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Starts the sequential frame worker. Pose and face run on the same frame in
/// parallel; segmentation runs beside them on its own thread and only ever
/// takes a frame when idle.
pub fn start_pipeline(
    stages: PipelineStages,
    rotation: PreviewRotation,
    frame_rx: Receiver<Frame>,
    hub: Arc<DispatchHub>,
) -> VisionPipeline {
    let stop = Arc::new(AtomicBool::new(false));
    let PipelineStages {
        mut pose,
        mut face,
        segmentation,
    } = stages;

    let (segmentation_handoff, segmentation_handle) = match segmentation {
        Some(segmenter) => {
            let (tx, rx) = bounded(1);
            let busy = Arc::new(AtomicBool::new(false));
            let handle = start_segmentation_worker(segmenter, rx, busy.clone(), hub.clone());
            (Some(SegmentationHandoff { tx, busy }), Some(handle))
        }
        None => (None, None),
    };

    let stop_flag = stop.clone();
    let worker = thread::spawn(move || {
        while let Some(frame) = recv_latest_frame(&frame_rx, &stop_flag) {
            process_frame(
                &frame,
                &mut pose,
                &mut face,
                segmentation_handoff.as_ref(),
                rotation,
                &hub,
            );
        }
        log::debug!("frame worker stopped");
    });

    VisionPipeline {
        stop,
        worker: Some(worker),
        segmentation: segmentation_handle,
    }
}

fn process_frame(
    frame: &Frame,
    pose: &mut Option<PoseEstimator>,
    face: &mut Option<FaceTracker>,
    segmentation: Option<&SegmentationHandoff>,
    rotation: PreviewRotation,
    hub: &DispatchHub,
) {
    let format = match frame.ready_format() {
        Ok(format) => format,
        Err(err) => {
            log::debug!("skipping frame: {err}");
            return;
        }
    };

    match preview_frame(frame, format, rotation) {
        Ok(preview) => hub.pixels.publish(preview),
        Err(err) => log::warn!("failed to prepare preview frame: {err:?}"),
    }

    if let Some(handoff) = segmentation {
        handoff.offer(frame);
    }

    let (pose_result, face_result) = rayon::join(
        || pose.as_mut().map(|estimator| estimator.process(frame)),
        || face.as_mut().map(|tracker| tracker.process(frame)),
    );

    match pose_result {
        Some(Ok(update)) => hub.publish_pose(update),
        Some(Err(err)) => log::warn!("{err}"),
        None => {}
    }

    match face_result {
        Some(Ok(faces)) => hub.publish_faces(faces),
        Some(Err(err)) => log::warn!("{err}"),
        None => {}
    }
}

/// Frame handoff to the segmentation thread. `busy` is raised before a frame
/// is copied and only lowered once the segmenter has finished with it, so
/// frames arriving in between are never copied or queued.
struct SegmentationHandoff {
    tx: Sender<Frame>,
    busy: Arc<AtomicBool>,
}

impl SegmentationHandoff {
    fn offer(&self, frame: &Frame) {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let sent = match frame.detached_copy() {
            Ok(copy) => self.tx.try_send(copy).is_ok(),
            Err(err) => {
                log::warn!("failed to copy frame for segmentation: {err}");
                false
            }
        };
        if !sent {
            self.busy.store(false, Ordering::Release);
        }
    }
}

fn start_segmentation_worker(
    mut segmenter: Segmenter,
    frame_rx: Receiver<Frame>,
    busy: Arc<AtomicBool>,
    hub: Arc<DispatchHub>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(frame) = frame_rx.recv() {
            match segmenter.process(&frame) {
                Ok(result) => hub.segmentation.publish(result),
                Err(err) => log::warn!("{err}"),
            }
            busy.store(false, Ordering::Release);
        }
        log::debug!("segmentation worker stopped");
    })
}

/// The buffer handed to the pixel channel, oriented for the renderer. CV
/// stages keep reading the unrotated frame.
fn preview_frame(
    frame: &Frame,
    format: FormatDescription,
    rotation: PreviewRotation,
) -> anyhow::Result<PreviewFrame> {
    match rotation {
        PreviewRotation::None => Ok(PreviewFrame {
            frame: frame.clone(),
            format,
        }),
        PreviewRotation::Left => {
            let data = frame.pixels.lock_read()?.clone();
            let image = RgbaImage::from_raw(format.width, format.height, data)
                .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", format.width, format.height))?;
            // Four bytes per pixel are moved as a unit, so the BGRA order
            // survives the rotation untouched.
            let rotated = imageops::rotate270(&image);
            let (width, height) = rotated.dimensions();

            let mut out = Frame::new(rotated.into_raw(), width, height, frame.timestamp);
            out.intrinsics = frame
                .intrinsics
                .map(|k| k.rotated_anticlockwise(format.width));
            Ok(PreviewFrame {
                frame: out,
                format: FormatDescription::bgra(width, height),
            })
        }
    }
}

fn recv_latest_frame(frame_rx: &Receiver<Frame>, stop: &AtomicBool) -> Option<Frame> {
    let mut frame = loop {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        match frame_rx.recv_timeout(POLL_INTERVAL) {
            Ok(frame) => break frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    };
    // Drop stale frames if the worker is still busy to avoid backlog.
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    Some(frame)
}
