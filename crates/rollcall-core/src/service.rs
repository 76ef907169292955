//! Recognition service: per-frame orchestration and attendance session lifecycle.
//!
//! One [`RecognitionService`] is created per camera and shared as an `Arc`
//! between the capture thread (which feeds frames) and any number of
//! readers. Frame processing and lifecycle changes are serialised through a
//! single pipeline mutex; events are collected while it is held and
//! published after it is released, so subscribers may call back into the
//! service.

use crate::cache::{Clock, SystemClock, TtlCache};
use crate::config::{Settings, SharedSettings};
use crate::detector::{extract_region, FaceDetector, FrameSkipper};
use crate::events::{AttendanceEvent, EventBus, EventSubscriber, SubscriptionId};
use crate::liveness::LivenessChecker;
use crate::mask::MaskDetector;
use crate::recognizer::{FullFace, Recognizer, UpperFace};
use crate::session::{AttendanceSession, SessionSnapshot, UpdateOutcome};
use crate::types::{DetectedFace, FaceOverlay, FaceStatus, RecognitionResult, Roster};
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State touched by frame processing, guarded by one mutex.
struct Pipeline {
    detector: Box<dyn FaceDetector>,
    skipper: FrameSkipper,
    liveness: LivenessChecker,
    mask: MaskDetector,
    full_face: Recognizer<FullFace>,
    upper_face: Recognizer<UpperFace>,
    roster: Roster,
    session: Option<Arc<AttendanceSession>>,
    /// Confidence last announced in a `StudentDetected` event, per identity.
    emitted: HashMap<String, f32>,
}

pub struct RecognitionService {
    pipeline: Mutex<Pipeline>,
    current: RwLock<Option<Arc<AttendanceSession>>>,
    last_session: RwLock<Option<Arc<AttendanceSession>>>,
    running: AtomicBool,
    recognition_cache: TtlCache<u64, Option<RecognitionResult>>,
    mask_cache: TtlCache<u64, bool>,
    events: EventBus,
    settings: SharedSettings,
}

impl RecognitionService {
    pub fn new(detector: Box<dyn FaceDetector>, settings: SharedSettings) -> Self {
        Self::with_clock(detector, settings, Arc::new(SystemClock))
    }

    /// Construct with an explicit cache clock.
    pub fn with_clock(
        detector: Box<dyn FaceDetector>,
        settings: SharedSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pipeline: Mutex::new(Pipeline {
                detector,
                skipper: FrameSkipper::new(),
                liveness: LivenessChecker::default(),
                mask: MaskDetector::new(),
                full_face: Recognizer::new(FullFace),
                upper_face: Recognizer::new(UpperFace),
                roster: Vec::new(),
                session: None,
                emitted: HashMap::new(),
            }),
            current: RwLock::new(None),
            last_session: RwLock::new(None),
            running: AtomicBool::new(false),
            recognition_cache: TtlCache::with_clock(Arc::clone(&clock)),
            mask_cache: TtlCache::with_clock(clock),
            events: EventBus::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn current_session(&self) -> Option<Arc<AttendanceSession>> {
        self.current.read().clone()
    }

    /// The most recently ended session, if any.
    pub fn last_session(&self) -> Option<Arc<AttendanceSession>> {
        self.last_session.read().clone()
    }

    /// Snapshot of the running session, or of the last ended one.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.current_session()
            .or_else(|| self.last_session())
            .map(|s| s.snapshot())
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriptionId {
        self.events.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// A fresh channel receiving every event published from now on.
    pub fn events(&self) -> crossbeam_channel::Receiver<AttendanceEvent> {
        self.events.channel()
    }

    /// Begin a session for `roster`. Returns `false` if one is already running.
    pub fn start(&self, roster: Roster) -> bool {
        let event = {
            let mut pipeline = self.pipeline.lock();
            if pipeline.session.is_some() {
                tracing::warn!("start requested while a session is running");
                return false;
            }

            pipeline.full_face.precompute_enrollment(&roster);
            pipeline.upper_face.precompute_enrollment(&roster);
            let roster_size = roster.len();
            pipeline.roster = roster;
            pipeline.skipper.reset();
            pipeline.emitted.clear();
            self.recognition_cache.clear();
            self.mask_cache.clear();

            let session = Arc::new(AttendanceSession::new());
            pipeline.session = Some(Arc::clone(&session));
            *self.current.write() = Some(Arc::clone(&session));
            self.running.store(true, Ordering::Release);

            tracing::info!(session = %session.id(), roster_size, "attendance session started");
            AttendanceEvent::SessionStarted {
                session_id: session.id(),
                started_at: session.started_at(),
                roster_size,
            }
        };
        self.events.publish(&event);
        true
    }

    /// End the running session. Returns `false` if none was running.
    pub fn stop(&self) -> bool {
        let event = {
            let mut pipeline = self.pipeline.lock();
            let Some(session) = pipeline.session.take() else {
                return false;
            };
            session.end();

            pipeline.full_face.cleanup();
            pipeline.upper_face.cleanup();
            pipeline.roster.clear();
            pipeline.skipper.reset();
            pipeline.emitted.clear();
            self.recognition_cache.clear();
            self.mask_cache.clear();

            *self.current.write() = None;
            *self.last_session.write() = Some(Arc::clone(&session));
            self.running.store(false, Ordering::Release);

            let snapshot = session.snapshot();
            tracing::info!(
                session = %session.id(),
                present = snapshot.records.len(),
                "attendance session ended"
            );
            AttendanceEvent::SessionEnded(snapshot)
        };
        self.events.publish(&event);
        true
    }

    /// Run one frame through the pipeline and describe every face found.
    ///
    /// Without a running session only detection happens and every face is
    /// reported as [`FaceStatus::Detected`].
    pub fn process_frame(&self, frame: &RgbImage) -> Vec<FaceOverlay> {
        if frame.width() == 0 || frame.height() == 0 {
            return Vec::new();
        }
        let settings = self.settings.current();
        let mut events = Vec::new();

        let overlays = {
            let mut guard = self.pipeline.lock();
            let pipeline = &mut *guard;
            let (faces, fresh) = pipeline.skipper.detect(
                &mut *pipeline.detector,
                frame,
                &settings.detection,
                settings.frame_skip_interval,
            );
            if fresh {
                self.recognition_cache.purge_expired(settings.recognition_cache_ttl());
                self.mask_cache.purge_expired(settings.mask_cache_ttl());
            }

            match pipeline.session.clone() {
                None => faces.iter().map(detection_overlay).collect(),
                Some(session) => faces
                    .iter()
                    .map(|face| self.process_face(pipeline, &session, frame, face, &settings, &mut events))
                    .collect(),
            }
        };

        for event in &events {
            self.events.publish(event);
        }
        overlays
    }

    fn process_face(
        &self,
        pipeline: &mut Pipeline,
        session: &AttendanceSession,
        frame: &RgbImage,
        face: &DetectedFace,
        settings: &Settings,
        events: &mut Vec<AttendanceEvent>,
    ) -> FaceOverlay {
        let mut overlay = FaceOverlay {
            bbox: face.bbox,
            tracking_id: face.tracking_id,
            status: FaceStatus::Unknown,
            label: None,
            confidence: 0.0,
            masked: false,
        };

        let region = extract_region(frame, face);
        if region.width() == 0 || region.height() == 0 {
            return overlay;
        }

        if settings.liveness_enabled {
            let liveness = pipeline.liveness.check(&region);
            if !liveness.is_live {
                if settings.logging_enabled {
                    tracing::debug!(
                        tracking_id = face.tracking_id,
                        reason = %liveness.reason,
                        "liveness check failed"
                    );
                }
                overlay.status = FaceStatus::Spoof;
                return overlay;
            }
        }

        let masked = settings.mask_detection_enabled
            && self
                .mask_cache
                .get_or_insert_with(face.tracking_id, settings.mask_cache_ttl(), || {
                    pipeline.mask.detect(&region)
                });
        overlay.masked = masked;

        let roster = &pipeline.roster;
        let result = self.recognition_cache.get_or_insert_with(
            face.tracking_id,
            settings.recognition_cache_ttl(),
            || {
                if masked {
                    let probe = pipeline.upper_face.prepare(&region);
                    pipeline.upper_face.best_match(&probe, roster, face)
                } else {
                    let probe = pipeline.full_face.prepare(&region);
                    pipeline.full_face.best_match(&probe, roster, face)
                }
            },
        );

        let Some(result) = result else {
            return overlay;
        };
        let Some(identity) = result.identity else {
            return overlay;
        };
        overlay.label = Some(identity.name.clone());
        overlay.confidence = result.confidence;

        if result.confidence < settings.recognition_threshold {
            if settings.logging_enabled {
                tracing::debug!(
                    tracking_id = face.tracking_id,
                    best = %identity.id,
                    confidence = result.confidence,
                    "below recognition threshold"
                );
            }
            return overlay;
        }
        overlay.status = FaceStatus::Recognized;

        let outcome = session.update_detection(&identity, result.confidence);
        if outcome == UpdateOutcome::Ignored {
            return overlay;
        }
        if settings.logging_enabled {
            tracing::debug!(
                tracking_id = face.tracking_id,
                identity = %identity.id,
                confidence = result.confidence,
                masked,
                ?outcome,
                "face recognized"
            );
        }

        let announce = match pipeline.emitted.get(&identity.id) {
            None => true,
            Some(&last) => result.confidence - last >= settings.event_confidence_margin,
        };
        if announce {
            pipeline
                .emitted
                .insert(identity.id.clone(), result.confidence);
            events.push(AttendanceEvent::StudentDetected {
                identity_id: identity.id.clone(),
                name: identity.name.clone(),
                confidence: result.confidence,
                first_detection: outcome.is_first_detection(),
            });
            events.push(AttendanceEvent::AttendanceUpdated(session.snapshot()));
        }
        overlay
    }
}

fn detection_overlay(face: &DetectedFace) -> FaceOverlay {
    FaceOverlay {
        bbox: face.bbox,
        tracking_id: face.tracking_id,
        status: FaceStatus::Detected,
        label: None,
        confidence: face.confidence,
        masked: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::detector::tests::FakeDetector;
    use crate::recognizer::tests::{face_image, identity};
    use crate::types::BoundingBox;
    use image::Rgb;
    use std::time::Duration;

    const FACE_BOX: BoundingBox = BoundingBox {
        x: 50,
        y: 30,
        width: 96,
        height: 96,
    };

    /// A frame with `face` pasted at `FACE_BOX`.
    fn frame_containing(face: &RgbImage) -> RgbImage {
        let mut frame = RgbImage::from_pixel(200, 160, Rgb([90, 90, 90]));
        image::imageops::replace(&mut frame, face, FACE_BOX.x as i64, FACE_BOX.y as i64);
        frame
    }

    /// A frame with the synthetic face of `seed` pasted at `FACE_BOX`.
    fn frame_with_face(seed: u64) -> RgbImage {
        frame_containing(&face_image(seed))
    }

    /// Face of `seed` with the lower half covered by plain light-blue fabric.
    fn masked_face(seed: u64) -> RgbImage {
        let mut face = face_image(seed);
        for y in 48..96 {
            for x in 0..96 {
                face.put_pixel(x, y, Rgb([150, 190, 220]));
            }
        }
        face
    }

    /// Face of `seed` with its top-left quadrant taken from another face.
    fn occluded_face(seed: u64) -> RgbImage {
        let mut face = face_image(seed);
        let patch = image::imageops::crop_imm(&face_image(seed + 100), 0, 0, 48, 48).to_image();
        image::imageops::replace(&mut face, &patch, 0, 0);
        face
    }

    /// Score `face` against `student` the way a standalone recognizer would.
    fn direct_score<S: crate::recognizer::FeatureStrategy>(
        strategy: S,
        face: &RgbImage,
        student: &Arc<crate::types::EnrolledIdentity>,
    ) -> f32 {
        let mut recognizer = Recognizer::new(strategy);
        recognizer.precompute_enrollment(&[Arc::clone(student)]);
        let probe = recognizer.prepare(face);
        recognizer.compare(&probe, student)
    }

    fn detections(rx: &crossbeam_channel::Receiver<AttendanceEvent>) -> Vec<(f32, bool)> {
        rx.try_iter()
            .filter_map(|e| match e {
                AttendanceEvent::StudentDetected {
                    confidence,
                    first_detection,
                    ..
                } => Some((confidence, first_detection)),
                _ => None,
            })
            .collect()
    }

    fn settings(liveness: bool, mask: bool, skip: u32) -> SharedSettings {
        SharedSettings::new(Settings {
            liveness_enabled: liveness,
            mask_detection_enabled: mask,
            frame_skip_interval: skip,
            ..Settings::default()
        })
    }

    fn service(boxes: Vec<Vec<BoundingBox>>, settings: SharedSettings) -> RecognitionService {
        RecognitionService::new(Box::new(FakeDetector::new(boxes)), settings)
    }

    fn kinds(rx: &crossbeam_channel::Receiver<AttendanceEvent>) -> Vec<&'static str> {
        rx.try_iter().map(|e| e.kind()).collect()
    }

    #[test]
    fn test_idle_frames_are_detection_only() {
        let svc = service(vec![vec![FACE_BOX]], settings(false, false, 1));
        let rx = svc.events();
        let overlays = svc.process_frame(&frame_with_face(1));
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].status, FaceStatus::Detected);
        assert!(kinds(&rx).is_empty());
        assert!(!svc.is_running());
    }

    #[test]
    fn test_recognizes_enrolled_student_and_emits_events() {
        let svc = service(vec![vec![FACE_BOX]], settings(false, false, 1));
        let rx = svc.events();
        assert!(svc.start(vec![identity("alice", &[1]), identity("bob", &[2])]));

        let overlays = svc.process_frame(&frame_with_face(1));
        assert_eq!(overlays[0].status, FaceStatus::Recognized);
        assert_eq!(overlays[0].label.as_deref(), Some("Student alice"));
        assert!(overlays[0].confidence >= 99.0);

        assert_eq!(kinds(&rx), ["session_started", "student_detected", "attendance_updated"]);
        let session = svc.current_session().unwrap();
        assert!(session.is_detected("alice"));
        assert!(!session.is_detected("bob"));
    }

    #[test]
    fn test_repeat_sightings_do_not_spam_events() {
        let svc = service(vec![vec![FACE_BOX]], settings(false, false, 1));
        svc.start(vec![identity("alice", &[1])]);
        let rx = svc.events();
        for _ in 0..5 {
            svc.process_frame(&frame_with_face(1));
        }
        assert_eq!(kinds(&rx), ["student_detected", "attendance_updated"]);
        let record = svc.current_session().unwrap().record("alice").unwrap();
        assert_eq!(record.detection_count, 5);
    }

    #[test]
    fn test_masked_face_uses_upper_face_recognizer() {
        let shared = settings(false, true, 1);
        shared.update(|s| s.recognition_threshold = 1.0);
        let svc = service(vec![vec![FACE_BOX]], shared);
        let alice = identity("alice", &[1]);
        svc.start(vec![Arc::clone(&alice)]);

        let face = masked_face(1);
        assert!(MaskDetector::new().detect(&face));
        let upper = direct_score(UpperFace, &face, &alice);
        let full = direct_score(FullFace, &face, &alice);
        assert!((upper - full).abs() > 1e-3);

        let overlays = svc.process_frame(&frame_containing(&face));
        assert!(overlays[0].masked);
        assert_eq!(overlays[0].status, FaceStatus::Recognized);
        assert_eq!(overlays[0].label.as_deref(), Some("Student alice"));
        assert!((overlays[0].confidence - upper).abs() < 1e-4);
        assert!(svc.current_session().unwrap().is_detected("alice"));
    }

    #[test]
    fn test_mask_detection_disabled_uses_full_face_recognizer() {
        let shared = settings(false, false, 1);
        shared.update(|s| s.recognition_threshold = 1.0);
        let svc = service(vec![vec![FACE_BOX]], shared);
        let alice = identity("alice", &[1]);
        svc.start(vec![Arc::clone(&alice)]);

        let face = masked_face(1);
        let full = direct_score(FullFace, &face, &alice);
        let overlays = svc.process_frame(&frame_containing(&face));
        assert!(!overlays[0].masked);
        assert!((overlays[0].confidence - full).abs() < 1e-4);
        assert!(svc.mask_cache.is_empty());
    }

    #[test]
    fn test_confidence_rise_reannounces_student() {
        let shared = settings(false, false, 1);
        shared.update(|s| s.recognition_threshold = 10.0);
        let svc = service(vec![vec![FACE_BOX]], shared);
        svc.start(vec![identity("alice", &[1])]);
        let rx = svc.events();

        // Every fake detection carries a fresh tracking id, so nothing is served from cache.
        let low = svc.process_frame(&frame_containing(&occluded_face(1)))[0].confidence;
        let high = svc.process_frame(&frame_with_face(1))[0].confidence;
        svc.process_frame(&frame_with_face(1));
        assert!(high - low >= 1.0, "low {low}, high {high}");

        assert_eq!(detections(&rx), [(low, true), (high, false)]);
        let record = svc.current_session().unwrap().record("alice").unwrap();
        assert_eq!(record.max_confidence, high);
        assert_eq!(record.detection_count, 3);
    }

    #[test]
    fn test_confidence_rise_below_margin_stays_silent() {
        let shared = settings(false, false, 1);
        shared.update(|s| s.recognition_threshold = 10.0);
        let svc = service(vec![vec![FACE_BOX]], shared.clone());
        svc.start(vec![identity("alice", &[1])]);
        let rx = svc.events();

        let low = svc.process_frame(&frame_containing(&occluded_face(1)))[0].confidence;
        let high = direct_score(FullFace, &face_image(1), &identity("alice", &[1]));
        assert!(high > low);
        shared.update(|s| s.event_confidence_margin = high - low + 0.5);
        svc.process_frame(&frame_with_face(1));

        assert_eq!(detections(&rx), [(low, true)]);
        let record = svc.current_session().unwrap().record("alice").unwrap();
        assert!((record.max_confidence - high).abs() < 1e-4);
    }

    #[test]
    fn test_zero_faces_no_overlays_no_events() {
        let svc = service(vec![vec![]], settings(true, true, 1));
        svc.start(vec![identity("alice", &[1])]);
        let rx = svc.events();
        assert!(svc.process_frame(&frame_with_face(1)).is_empty());
        assert!(svc.process_frame(&RgbImage::new(0, 0)).is_empty());
        assert!(kinds(&rx).is_empty());
        assert_eq!(svc.snapshot().unwrap().records.len(), 0);
    }

    #[test]
    fn test_below_threshold_is_unknown_with_diagnostic_label() {
        let shared = settings(false, false, 1);
        let svc = service(vec![vec![FACE_BOX]], shared.clone());
        svc.start(vec![identity("alice", &[1])]);
        shared.update(|s| s.recognition_threshold = 100.5);

        let overlays = svc.process_frame(&frame_with_face(1));
        assert_eq!(overlays[0].status, FaceStatus::Unknown);
        assert_eq!(overlays[0].label.as_deref(), Some("Student alice"));
        assert!(!svc.current_session().unwrap().is_detected("alice"));
    }

    #[test]
    fn test_spoof_faces_are_not_recognized() {
        let svc = service(vec![vec![FACE_BOX]], settings(true, false, 1));
        svc.start(vec![identity("alice", &[1])]);
        let flat = RgbImage::from_pixel(200, 160, Rgb([120, 110, 100]));
        let overlays = svc.process_frame(&flat);
        assert_eq!(overlays[0].status, FaceStatus::Spoof);
        assert_eq!(svc.snapshot().unwrap().records.len(), 0);
    }

    #[test]
    fn test_skipped_frames_reuse_cached_recognition() {
        let clock = Arc::new(ManualClock::new());
        let svc = RecognitionService::with_clock(
            Box::new(FakeDetector::new(vec![vec![FACE_BOX]])),
            settings(false, true, 2),
            clock.clone(),
        );
        svc.start(vec![identity("alice", &[1])]);

        let first = svc.process_frame(&frame_with_face(1));
        let second = svc.process_frame(&frame_with_face(1));
        assert_eq!(first[0].tracking_id, second[0].tracking_id);
        assert_eq!(first[0].confidence, second[0].confidence);
        assert_eq!(svc.recognition_cache.len(), 1);
        assert_eq!(svc.mask_cache.len(), 1);

        // Next detection cycle after the TTLs: stale entries are purged.
        clock.advance(Duration::from_secs(5));
        svc.process_frame(&frame_with_face(1));
        assert_eq!(svc.recognition_cache.len(), 1);
        assert_eq!(svc.mask_cache.len(), 1);
    }

    #[test]
    fn test_start_twice_and_stop_twice() {
        let svc = service(vec![vec![FACE_BOX]], settings(false, false, 1));
        let rx = svc.events();
        assert!(svc.start(vec![identity("alice", &[1])]));
        assert!(!svc.start(Vec::new()));
        assert!(svc.is_running());

        svc.process_frame(&frame_with_face(1));
        assert!(svc.stop());
        assert!(!svc.stop());
        assert!(!svc.is_running());
        assert!(svc.current_session().is_none());

        let kinds = kinds(&rx);
        assert_eq!(kinds.first(), Some(&"session_started"));
        assert_eq!(kinds.last(), Some(&"session_ended"));
        assert_eq!(kinds.iter().filter(|k| **k == "session_ended").count(), 1);

        let last = svc.last_session().unwrap();
        assert!(!last.is_active());
        assert!(last.is_detected("alice"));
        assert_eq!(svc.recognition_cache.len(), 0);
    }

    #[test]
    fn test_frames_after_stop_are_detection_only() {
        let svc = service(vec![vec![FACE_BOX]], settings(false, false, 1));
        svc.start(vec![identity("alice", &[1])]);
        svc.stop();
        let overlays = svc.process_frame(&frame_with_face(1));
        assert_eq!(overlays[0].status, FaceStatus::Detected);
        assert_eq!(svc.last_session().unwrap().record("alice"), None);
    }

    #[test]
    fn test_new_session_starts_fresh() {
        let svc = service(vec![vec![FACE_BOX]], settings(false, false, 1));
        svc.start(vec![identity("alice", &[1])]);
        svc.process_frame(&frame_with_face(1));
        svc.stop();

        let rx = svc.events();
        svc.start(vec![identity("alice", &[1])]);
        svc.process_frame(&frame_with_face(1));
        assert_eq!(kinds(&rx), ["session_started", "student_detected", "attendance_updated"]);
        assert_ne!(
            svc.current_session().unwrap().id(),
            svc.last_session().unwrap().id()
        );
    }

    #[test]
    fn test_subscriber_may_call_back_into_service() {
        let svc = Arc::new(service(vec![vec![FACE_BOX]], settings(false, false, 1)));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let (inner, sink) = (Arc::downgrade(&svc), Arc::clone(&observed));
        svc.subscribe(Arc::new(
            move |_: &AttendanceEvent| -> Result<(), crate::events::SubscriberError> {
                if let Some(svc) = inner.upgrade() {
                    sink.lock().push(svc.is_running());
                }
                Ok(())
            },
        ));
        svc.start(vec![identity("alice", &[1])]);
        svc.stop();
        assert_eq!(*observed.lock(), [true, false]);
    }
}
