use crate::config::Config;
use image::RgbImage;
use rollcall_core::{
    spawn_capture, AttendanceEvent, CaptureOptions, CaptureStatus, CaptureWorker,
    CascadeDetector, RecognitionService, Settings, SharedSettings, SubscriberError,
};
use rollcall_hw::Camera;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("cascade error: {0}")]
    Cascade(#[from] rollcall_core::CascadeError),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The running recognition pipeline: service plus its capture thread.
pub struct Engine {
    pub service: Arc<RecognitionService>,
    worker: CaptureWorker,
}

impl Engine {
    pub fn is_capture_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Stop the capture thread and return its final status and last frame,
    /// annotated with the overlays computed for it.
    pub fn shutdown(self) -> (CaptureStatus, Option<RgbImage>) {
        self.worker.cancel();
        let frame = self.worker.latest_frame().map(|mut frame| {
            rollcall_core::overlay::annotate(&mut frame, &self.worker.latest_overlays());
            frame
        });
        let status = self.worker.join();
        (status, frame)
    }
}

/// Open the camera, load the cascade and start capturing on a dedicated thread.
///
/// Fails fast at startup if any resource is unavailable.
pub fn spawn_engine(config: &Config, settings: Settings) -> Result<Engine, EngineError> {
    let mut camera = Camera::open(&config.camera_device)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let detector = CascadeDetector::load(&config.cascade_path.to_string_lossy())?;

    // Discard warmup frames for camera AGC/AE stabilization
    if config.warmup_frames > 0 {
        camera.warm_up(config.warmup_frames);
    }

    let service = Arc::new(RecognitionService::new(
        Box::new(detector),
        SharedSettings::new(settings),
    ));
    service.subscribe(Arc::new(log_event));

    let worker = spawn_capture(
        camera,
        Arc::clone(&service),
        CaptureOptions {
            max_consecutive_failures: config.max_read_failures,
            ..CaptureOptions::default()
        },
    )?;

    Ok(Engine { service, worker })
}

fn log_event(event: &AttendanceEvent) -> Result<(), SubscriberError> {
    match event {
        AttendanceEvent::SessionStarted {
            session_id,
            roster_size,
            ..
        } => tracing::info!(session = %session_id, roster_size, "session started"),
        AttendanceEvent::StudentDetected {
            identity_id,
            name,
            confidence,
            first_detection,
        } => tracing::info!(
            id = %identity_id,
            name = %name,
            confidence,
            first_detection,
            "student detected"
        ),
        AttendanceEvent::AttendanceUpdated(snapshot) => {
            tracing::debug!(present = snapshot.records.len(), "attendance updated")
        }
        AttendanceEvent::SessionEnded(snapshot) => tracing::info!(
            session = %snapshot.session_id,
            present = snapshot.records.len(),
            "session ended"
        ),
    }
    Ok(())
}
