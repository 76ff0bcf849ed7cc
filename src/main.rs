use std::{thread, time::Duration};

use anyhow::Result;
use crossbeam_channel::bounded;
use mochi_vision::{
    DispatchHub, PipelineConfig, PipelineStages, pipeline::CaptureSession, pose::Joint,
    start_pipeline,
};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    env_logger::init();

    let config = PipelineConfig::from_env();
    let (frame_tx, frame_rx) = bounded(1);

    let hub = DispatchHub::new();
    let stages = PipelineStages::load(&config);
    let pipeline = start_pipeline(stages, config.preview_rotation, frame_rx, hub.clone());

    let mut camera = match CaptureSession::open(&config) {
        Ok(camera) => camera,
        Err(err) => {
            log::error!("{err}");
            pipeline.stop();
            return Ok(());
        }
    };
    camera.start(frame_tx)?;

    let pixels = hub.pixels.subscribe();
    let gestures = hub.gestures.subscribe();
    let poses = hub.poses.subscribe();
    let faces = hub.faces.subscribe();
    let segmentation = hub.segmentation.subscribe();

    log::info!("streaming from {}", camera.label());
    while camera.is_running() {
        thread::sleep(REPORT_INTERVAL);

        if let Some(preview) = pixels.try_recv() {
            match preview.frame.intrinsics {
                Some(k) => log::debug!(
                    "preview {}x{}, focal {:.1}px",
                    preview.format.width,
                    preview.format.height,
                    k.focal_length()
                ),
                None => log::debug!(
                    "preview {}x{}",
                    preview.format.width,
                    preview.format.height
                ),
            }
        }
        if let Some(flags) = gestures.try_recv() {
            let active = flags.active_labels();
            if !active.is_empty() {
                log::info!("gestures: {}", active.join(", "));
            }
        }
        if let Some(update) = poses.try_recv() {
            let missing: Vec<&str> = update
                .points
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_none())
                .filter_map(|(i, _)| Joint::from_index(i).map(|joint| joint.label()))
                .collect();
            if missing.is_empty() {
                log::debug!("pose: all {} joints", update.points.len());
            } else {
                log::debug!("pose: missing {}", missing.join(", "));
            }
        }
        if let Some(face) = faces.try_recv() {
            log::info!(
                "face at ({:.2}, {:.2}) size {:.2}x{:.2}",
                face.x,
                face.y,
                face.width,
                face.height
            );
        }
        if let Some(mask) = segmentation.try_recv() {
            log::debug!(
                "segmentation {}x{}, {:.0}% target",
                mask.width,
                mask.height,
                mask.coverage() * 100.0
            );
        }
    }

    camera.stop();
    pipeline.stop();
    Ok(())
}
