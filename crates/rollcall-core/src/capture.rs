//! Frame acquisition loop on a dedicated OS thread.

use crate::service::RecognitionService;
use crate::types::FaceOverlay;
use image::RgbImage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("frame source is not open")]
    NotOpen,
    #[error("frame read failed: {0}")]
    Read(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

/// A producer of colour frames (camera, file, test fake).
///
/// `read_frame` may block until the next frame is available.
pub trait FrameSource: Send {
    fn is_open(&self) -> bool;
    fn read_frame(&mut self) -> Result<RgbImage, SourceError>;
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Consecutive failed or empty reads before the loop gives up.
    pub max_consecutive_failures: u32,
    pub failure_backoff: Duration,
    pub thread_name: String,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 100,
            failure_backoff: Duration::from_millis(10),
            thread_name: "rollcall-capture".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Running,
    /// Stopped by [`CaptureWorker::cancel`].
    Cancelled,
    /// Gave up after too many consecutive failed reads.
    Failed {
        consecutive_failures: u32,
        last_error: Option<SourceError>,
    },
}

/// State shared between the capture thread and its handle.
struct Shared {
    cancel: AtomicBool,
    status: Mutex<CaptureStatus>,
    latest_frame: Mutex<Option<RgbImage>>,
    latest_overlays: Mutex<Vec<FaceOverlay>>,
    frames_processed: AtomicU64,
}

/// Handle to a running capture thread.
pub struct CaptureWorker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    /// Ask the loop to exit before its next read.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::Acquire)
    }

    pub fn status(&self) -> CaptureStatus {
        self.shared.status.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Copy of the most recent successfully read frame.
    pub fn latest_frame(&self) -> Option<RgbImage> {
        self.shared.latest_frame.lock().clone()
    }

    pub fn latest_overlays(&self) -> Vec<FaceOverlay> {
        self.shared.latest_overlays.lock().clone()
    }

    pub fn frames_processed(&self) -> u64 {
        self.shared.frames_processed.load(Ordering::Relaxed)
    }

    /// Wait for the thread to exit and return its final status.
    pub fn join(mut self) -> CaptureStatus {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
        self.status()
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Start the capture loop for `source`, feeding every frame to `service`.
///
/// The source is owned by the thread and dropped when the loop exits.
pub fn spawn_capture<S>(
    source: S,
    service: Arc<RecognitionService>,
    options: CaptureOptions,
) -> std::io::Result<CaptureWorker>
where
    S: FrameSource + 'static,
{
    let shared = Arc::new(Shared {
        cancel: AtomicBool::new(false),
        status: Mutex::new(CaptureStatus::Running),
        latest_frame: Mutex::new(None),
        latest_overlays: Mutex::new(Vec::new()),
        frames_processed: AtomicU64::new(0),
    });

    let thread_shared = Arc::clone(&shared);
    let handle = std::thread::Builder::new()
        .name(options.thread_name.clone())
        .spawn(move || run_loop(source, &service, &thread_shared, &options))?;

    Ok(CaptureWorker {
        shared,
        handle: Some(handle),
    })
}

fn run_loop<S: FrameSource>(
    mut source: S,
    service: &RecognitionService,
    shared: &Shared,
    options: &CaptureOptions,
) {
    if !source.is_open() {
        tracing::error!("frame source is not open, capture not started");
        *shared.status.lock() = CaptureStatus::Failed {
            consecutive_failures: 0,
            last_error: Some(SourceError::NotOpen),
        };
        return;
    }

    tracing::info!("capture loop started");
    let mut failures = 0u32;
    let mut last_error = None;

    let final_status = loop {
        if shared.cancel.load(Ordering::Acquire) {
            break CaptureStatus::Cancelled;
        }

        let frame = match source.read_frame() {
            Ok(frame) if frame.width() > 0 && frame.height() > 0 => Some(frame),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, failures = failures + 1, "frame read failed");
                last_error = Some(e);
                None
            }
        };

        let Some(frame) = frame else {
            failures += 1;
            if failures >= options.max_consecutive_failures {
                tracing::error!(
                    failures,
                    error = ?last_error,
                    "too many consecutive frame failures, stopping capture"
                );
                break CaptureStatus::Failed {
                    consecutive_failures: failures,
                    last_error,
                };
            }
            std::thread::sleep(options.failure_backoff);
            continue;
        };

        failures = 0;
        last_error = None;
        *shared.latest_frame.lock() = Some(frame.clone());
        let overlays = service.process_frame(&frame);
        *shared.latest_overlays.lock() = overlays;
        shared.frames_processed.fetch_add(1, Ordering::Relaxed);
    };

    drop(source);
    tracing::info!(status = ?final_status, "capture loop exited");
    *shared.status.lock() = final_status;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, SharedSettings};
    use crate::detector::tests::FakeDetector;
    use crate::types::BoundingBox;
    use image::Rgb;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// Replays scripted reads, then keeps failing.
    struct ScriptedSource {
        reads: VecDeque<Result<RgbImage, SourceError>>,
        dropped: Arc<AtomicBool>,
    }

    impl FrameSource for ScriptedSource {
        fn is_open(&self) -> bool {
            true
        }

        fn read_frame(&mut self) -> Result<RgbImage, SourceError> {
            self.reads
                .pop_front()
                .unwrap_or_else(|| Err(SourceError::Read("end of script".into())))
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    /// Always yields the same frame, pacing like a slow camera.
    struct LoopingSource(RgbImage);

    impl FrameSource for LoopingSource {
        fn is_open(&self) -> bool {
            true
        }

        fn read_frame(&mut self) -> Result<RgbImage, SourceError> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(self.0.clone())
        }
    }

    /// Reports closed; reading it is a test failure.
    struct ClosedSource;

    impl FrameSource for ClosedSource {
        fn is_open(&self) -> bool {
            false
        }

        fn read_frame(&mut self) -> Result<RgbImage, SourceError> {
            panic!("read from a closed source");
        }
    }

    fn service() -> Arc<RecognitionService> {
        let detector = FakeDetector::new(vec![vec![BoundingBox::new(0, 0, 10, 10)]]);
        Arc::new(RecognitionService::new(
            Box::new(detector),
            SharedSettings::new(Settings::default()),
        ))
    }

    fn fast_options(max_failures: u32) -> CaptureOptions {
        CaptureOptions {
            max_consecutive_failures: max_failures,
            failure_backoff: Duration::from_millis(1),
            ..CaptureOptions::default()
        }
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(32, 24, Rgb([1, 2, 3]))
    }

    #[test]
    fn test_failures_stop_loop_and_release_source() {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource {
            reads: VecDeque::from(vec![
                Ok(frame()),
                Err(SourceError::Read("ioctl".into())),
                Ok(frame()),
            ]),
            dropped: Arc::clone(&dropped),
        };
        let worker = spawn_capture(source, service(), fast_options(5)).unwrap();
        let frames_seen = {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !worker.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(2));
            }
            worker.frames_processed()
        };
        let overlays = worker.latest_overlays();
        let latest = worker.latest_frame();
        let status = worker.join();

        assert_eq!(frames_seen, 2);
        assert_eq!(overlays.len(), 1);
        assert_eq!(latest.unwrap().dimensions(), (32, 24));
        assert_eq!(
            status,
            CaptureStatus::Failed {
                consecutive_failures: 5,
                last_error: Some(SourceError::Read("end of script".into())),
            }
        );
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_empty_frames_count_as_failures() {
        let source = ScriptedSource {
            reads: (0..3).map(|_| Ok(RgbImage::new(0, 0))).collect(),
            dropped: Arc::new(AtomicBool::new(false)),
        };
        let worker = spawn_capture(source, service(), fast_options(3)).unwrap();
        let status = worker.join();
        assert_eq!(
            status,
            CaptureStatus::Failed {
                consecutive_failures: 3,
                last_error: None,
            }
        );
    }

    #[test]
    fn test_closed_source_fails_without_reading() {
        let worker = spawn_capture(ClosedSource, service(), fast_options(100)).unwrap();
        let status = worker.join();
        assert_eq!(
            status,
            CaptureStatus::Failed {
                consecutive_failures: 0,
                last_error: Some(SourceError::NotOpen),
            }
        );
    }

    #[test]
    fn test_cancel_stops_loop() {
        let worker = spawn_capture(LoopingSource(frame()), service(), fast_options(100)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.frames_processed() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        worker.cancel();
        assert_eq!(worker.join(), CaptureStatus::Cancelled);
    }

    #[test]
    fn test_status_running_while_active() {
        let worker = spawn_capture(LoopingSource(frame()), service(), fast_options(100)).unwrap();
        assert_eq!(worker.status(), CaptureStatus::Running);
        worker.cancel();
        worker.join();
    }
}
