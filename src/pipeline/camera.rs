use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use crossbeam_channel::Sender;
use nokhwa::{
    Buffer, Camera,
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
};

use super::bgra_converter::{self, SourceFormat};
use crate::{
    config::PipelineConfig,
    error::VisionError,
    types::{CameraIntrinsics, Frame},
};

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats() -> [RequestedFormat<'static>; 4] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

/// An explicitly owned capture session. Nothing runs until [`start`] and the
/// capture thread is torn down on [`stop`] or drop.
///
/// [`start`]: CaptureSession::start
/// [`stop`]: CaptureSession::stop
#[derive(Debug)]
pub struct CaptureSession {
    index: CameraIndex,
    label: String,
    frame_interval: Duration,
    fov_degrees: Option<f32>,
    stream: Option<CaptureStream>,
}

#[derive(Debug)]
struct CaptureStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CaptureStream {
    /// False once the capture thread has returned, including when it gave up
    /// on the device without being asked to stop.
    fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl CaptureSession {
    /// Opens the first capture device the platform reports, which is the
    /// user-facing camera on the devices this targets.
    pub fn open(config: &PipelineConfig) -> Result<Self, VisionError> {
        let cameras = query(ApiBackend::Auto)
            .map_err(|err| VisionError::setup("camera", &anyhow!(err)))?;
        let info = cameras
            .into_iter()
            .next()
            .ok_or_else(|| VisionError::setup("camera", &anyhow!("no capture device found")))?;

        let index = info.index().clone();
        // Fail fast before anything spawns.
        build_camera(index.clone()).map_err(|err| VisionError::setup("camera", &err))?;

        log::info!("camera ready: {}", info.human_name());
        Ok(Self {
            index,
            label: info.human_name(),
            frame_interval: config.frame_interval(),
            fov_degrees: config.camera_fov_degrees,
            stream: None,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_running(&self) -> bool {
        self.stream.as_ref().is_some_and(CaptureStream::is_alive)
    }

    /// Starts delivering frames into `frame_tx`. Frames the receiver is not
    /// ready for are discarded, never queued.
    pub fn start(&mut self, frame_tx: Sender<Frame>) -> Result<(), VisionError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let index = self.index.clone();
        let frame_interval = self.frame_interval;
        let fov_degrees = self.fov_degrees;

        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || capture_loop(index, frame_interval, fov_degrees, &stop_flag, &frame_tx))
            .map_err(|err| VisionError::setup("camera", &anyhow!(err)))?;

        self.stream = Some(CaptureStream {
            stop,
            handle: Some(handle),
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown();
            log::debug!("capture stopped");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

fn capture_loop(
    index: CameraIndex,
    frame_interval: Duration,
    fov_degrees: Option<f32>,
    stop: &AtomicBool,
    frame_tx: &Sender<Frame>,
) {
    let mut camera = match build_camera(index) {
        Ok(cam) => cam,
        Err(err) => {
            log::error!("failed to open camera: {err:?}");
            return;
        }
    };

    let mut last_sent: Option<Instant> = None;
    while !stop.load(Ordering::Relaxed) {
        let frame_start = Instant::now();
        let buffer = match camera.frame() {
            Ok(buffer) => buffer,
            Err(err) => {
                log::warn!(
                    "camera frame read failed (after {:?}): {err:?}",
                    frame_start.elapsed()
                );
                continue;
            }
        };

        let timestamp = Instant::now();
        if last_sent.is_some_and(|last| timestamp.duration_since(last) < frame_interval) {
            continue;
        }

        let frame = match decode_buffer(&buffer) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("failed to decode camera frame {err:?}");
                continue;
            }
        };

        last_sent = Some(timestamp);
        let (width, height) = (frame.width, frame.height);
        let mut out = Frame::new(frame.bgra, width, height, timestamp);
        if let Some(fov) = fov_degrees {
            out = out.with_intrinsics(CameraIntrinsics::from_horizontal_fov(width, height, fov));
        }
        // Drop if the worker is busy.
        let _ = frame_tx.try_send(out);
    }

    if let Err(err) = camera.stop_stream() {
        log::warn!("failed to stop camera stream: {err:?}");
    }
}

fn decode_buffer(buffer: &Buffer) -> Result<bgra_converter::BgraFrame> {
    let resolution = buffer.resolution();
    bgra_converter::convert_to_bgra(
        source_format(buffer.source_frame_format()),
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
    )
}

fn source_format(format: FrameFormat) -> SourceFormat {
    match format {
        FrameFormat::NV12 => SourceFormat::Nv12,
        FrameFormat::YUYV => SourceFormat::Yuyv,
        FrameFormat::MJPEG => SourceFormat::Mjpeg,
        FrameFormat::RAWRGB => SourceFormat::RawRgb,
        FrameFormat::RAWBGR => SourceFormat::RawBgr,
        FrameFormat::GRAY => SourceFormat::Gray,
    }
}
