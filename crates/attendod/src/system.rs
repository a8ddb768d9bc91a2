//! Attendance state machine: one frame in, events and store updates out.

use crate::capture;
use crate::clock::Clock;
use crate::config::Config;
use crate::events::{AttendanceEvent, AttendanceStatus, EmployeeEventRecord, EventSink};
use attendo_core::{DetectedFace, DetectorError, FaceRecognition};
use attendo_hw::{Frame, FrameError};
use attendo_store::{format_timestamp, parse_timestamp, EmployeeRecord, EmployeeStore, StoreError};
use chrono::{NaiveDateTime, TimeDelta};
use image::RgbImage;
use parking_lot::Mutex;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("{0}")]
    Frame(#[from] FrameError),
    #[error("{0}")]
    Detector(#[from] DetectorError),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Holder of the most recent captured frame. Writers replace, readers clone
/// the `Arc`.
#[derive(Clone)]
pub struct FrameSlot {
    tx: Arc<watch::Sender<Option<Arc<Frame>>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn push(&self, frame: Frame) {
        self.tx.send_replace(Some(Arc::new(frame)));
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.tx.borrow().clone()
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing and file settings the state machine needs from [`Config`].
#[derive(Debug, Clone)]
pub struct SystemSettings {
    pub cooldown: TimeDelta,
    pub attendance_interval: TimeDelta,
    pub capture_dir: PathBuf,
    pub face_size: u32,
    /// `None` leaves store calls unbounded.
    pub store_timeout: Option<Duration>,
}

impl SystemSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cooldown: TimeDelta::seconds(config.cooldown_secs as i64),
            attendance_interval: TimeDelta::seconds(config.attendance_interval_secs as i64),
            capture_dir: config.capture_dir.clone(),
            face_size: config.face_size,
            store_timeout: (config.store_timeout_secs > 0)
                .then(|| Duration::from_secs(config.store_timeout_secs)),
        }
    }
}

/// What one call to [`AttendanceSystem::process_frame`] did.
#[derive(Debug)]
pub enum CycleOutcome {
    NoFrame,
    /// A previous cycle is still running; this one was skipped.
    Busy,
    /// Detection failed; a status event was published.
    Failed,
    Processed(CycleReport),
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub faces: usize,
    /// Identities matched in this frame, in detection order.
    pub matched: Vec<String>,
    /// Matches skipped by the cooldown.
    pub throttled: usize,
    /// Attendance checks that reached a verdict.
    pub recorded: Vec<(String, AttendanceStatus)>,
}

struct SessionState {
    last_processed: Option<String>,
    last_detection: NaiveDateTime,
    /// Set once a capture is written; cleared when attendance is marked.
    image_saved: bool,
}

/// Releases the single-flight flag on drop.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AttendanceSystem {
    recognition: Arc<Mutex<FaceRecognition>>,
    has_known_faces: bool,
    store: Arc<dyn EmployeeStore>,
    clock: Arc<dyn Clock>,
    events: EventSink,
    frames: FrameSlot,
    processing: AtomicBool,
    state: Mutex<SessionState>,
    settings: SystemSettings,
}

impl AttendanceSystem {
    pub fn new(
        recognition: FaceRecognition,
        store: Arc<dyn EmployeeStore>,
        clock: Arc<dyn Clock>,
        events: EventSink,
        settings: SystemSettings,
    ) -> Self {
        let has_known_faces = recognition.has_known_faces();
        let state = SessionState {
            last_processed: None,
            last_detection: clock.now(),
            image_saved: false,
        };
        Self {
            recognition: Arc::new(Mutex::new(recognition)),
            has_known_faces,
            store,
            clock,
            events,
            frames: FrameSlot::new(),
            processing: AtomicBool::new(false),
            state: Mutex::new(state),
            settings,
        }
    }

    /// Slot the capture loop writes into.
    pub fn frames(&self) -> FrameSlot {
        self.frames.clone()
    }

    /// Run one recognition cycle on the latest frame.
    ///
    /// At most one cycle runs at a time; overlapping calls return
    /// [`CycleOutcome::Busy`] without touching any state.
    pub async fn process_frame(&self) -> CycleOutcome {
        let Some(frame) = self.frames.latest() else {
            return CycleOutcome::NoFrame;
        };
        let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
            return CycleOutcome::Busy;
        };

        match self.run_cycle(frame).await {
            Ok(report) => CycleOutcome::Processed(report),
            Err(e) => {
                tracing::error!(error = %e, "frame processing failed");
                self.events.status(format!("Processing error: {e}"));
                CycleOutcome::Failed
            }
        }
    }

    async fn run_cycle(&self, frame: Arc<Frame>) -> Result<CycleReport, CycleError> {
        let recognition = Arc::clone(&self.recognition);
        let (snapshot, faces) = tokio::task::spawn_blocking(
            move || -> Result<(RgbImage, Vec<DetectedFace>), CycleError> {
                let rgb = frame.to_rgb()?;
                let faces = recognition.lock().detect(&rgb)?;
                Ok((rgb, faces))
            },
        )
        .await??;

        let snapshot = Arc::new(snapshot);
        let mut annotated = (*snapshot).clone();
        let mut report = CycleReport {
            faces: faces.len(),
            ..Default::default()
        };

        for face in &faces {
            if !self.has_known_faces {
                self.events.status("No encoded faces available");
                continue;
            }
            let result = self.recognition.lock().match_face(&face.embedding);
            let Some(identity) = result.identity else {
                tracing::debug!(distance = result.distance, "face did not match any known identity");
                continue;
            };

            capture::draw_highlight(&mut annotated, &face.frame_location());
            report.matched.push(identity.clone());

            if !self.admit(&identity) {
                report.throttled += 1;
                continue;
            }
            tracing::info!(identity = %identity, distance = result.distance, "recognized employee");

            if let Some(status) = self.capture_and_record(Arc::clone(&snapshot), &identity).await {
                report.recorded.push((identity, status));
            }
        }

        self.events.emit(AttendanceEvent::ProcessedFrame(annotated));
        Ok(report)
    }

    /// Cooldown check. Records `identity` as the last processed one when it
    /// passes.
    fn admit(&self, identity: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.last_processed.as_deref() == Some(identity)
            && now - state.last_detection <= self.settings.cooldown
        {
            tracing::debug!(identity, "within cooldown; skipping");
            return false;
        }
        state.last_processed = Some(identity.to_string());
        state.last_detection = now;
        true
    }

    /// Save the face capture, look the employee up and check attendance.
    /// Returns `None` when the pipeline was abandoned.
    async fn capture_and_record(&self, frame: Arc<RgbImage>, identity: &str) -> Option<AttendanceStatus> {
        let face_image = self.capture_face(frame, identity).await;

        let mut record = match self.store_call(self.store.get(identity)).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(identity, "recognized identity has no employee record");
                self.events.status(format!("Employee ID {identity} not found"));
                return None;
            }
            Err(e) => {
                tracing::error!(identity, error = %e, "employee lookup failed");
                self.events.status(format!("Database error: {e}"));
                return None;
            }
        };

        let status = match self.check_attendance(identity, &mut record).await {
            Ok(Some(status)) => status,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(identity, error = %e, "attendance update failed");
                self.events.status(format!("Database error: {e}"));
                return None;
            }
        };

        tracing::info!(identity, total = record.total_attendance, %status, "attendance checked");
        self.events.emit(AttendanceEvent::EmployeeDetected(EmployeeEventRecord {
            identity: identity.to_string(),
            name: record.name,
            major: record.major,
            total_attendance: record.total_attendance,
            face_image,
            status,
        }));
        Some(status)
    }

    async fn capture_face(&self, frame: Arc<RgbImage>, identity: &str) -> RgbImage {
        let path = capture::face_image_path(&self.settings.capture_dir, identity);
        let size = self.settings.face_size;

        let already_saved = self.state.lock().image_saved;
        if !already_saved {
            let (image, target) = (Arc::clone(&frame), path.clone());
            match tokio::task::spawn_blocking(move || capture::save_frame(&image, &target)).await {
                Ok(Ok(())) => {
                    self.state.lock().image_saved = true;
                    tracing::info!(identity, path = %path.display(), "face image saved");
                    self.events.status(format!("Face image saved for employee {identity}"));
                }
                Ok(Err(e)) => {
                    tracing::warn!(identity, error = %e, "failed to save face image");
                }
                Err(e) => {
                    tracing::warn!(identity, error = %e, "face image writer panicked");
                }
            }
        }

        let target = path.clone();
        let read = tokio::task::spawn_blocking(move || capture::load_face(&target, size))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));
        match read {
            Ok(face) => face,
            Err(error) => {
                tracing::warn!(identity, path = %path.display(), %error, "could not read face image back");
                self.events
                    .status(format!("Error: Could not read saved face image for employee {identity}"));
                capture::resize_face(&frame, size)
            }
        }
    }

    /// Mark attendance if enough time has passed since the last mark.
    /// On success `record` reflects the stored values. `None` means the
    /// counter is saturated and nothing was written.
    async fn check_attendance(
        &self,
        identity: &str,
        record: &mut EmployeeRecord,
    ) -> Result<Option<AttendanceStatus>, StoreError> {
        let now = self.clock.now();
        let last = match record.last_attendance_time.as_deref() {
            None => None,
            Some(raw) => match parse_timestamp(raw) {
                Some(at) => Some(at),
                None => {
                    tracing::warn!(identity, raw, "unparseable last attendance time; treating as now");
                    self.events.status(format!("Error parsing date: {raw}"));
                    Some(now)
                }
            },
        };

        let eligible = last.map_or(true, |at| now - at > self.settings.attendance_interval);
        if !eligible {
            return Ok(Some(AttendanceStatus::AlreadyMarked));
        }

        let Some(count) = record.total_attendance.checked_add(1) else {
            tracing::warn!(identity, total = record.total_attendance, "attendance count overflow");
            self.events
                .status(format!("Error: attendance count overflow for employee {identity}"));
            return Ok(None);
        };
        self.store_call(self.store.set_attendance_count(identity, count)).await?;
        self.store_call(self.store.set_last_attendance_time(identity, now)).await?;

        record.total_attendance = count;
        record.last_attendance_time = Some(format_timestamp(now));
        self.state.lock().image_saved = false;
        Ok(Some(AttendanceStatus::Marked))
    }

    async fn store_call<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match self.settings.store_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| StoreError::Timeout(limit))?,
            None => call.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use attendo_core::{
        DetectorError, Embedding, EmbeddingTable, EncoderError, FaceEncoder, FaceLocation,
        FaceLocator, KnownFace,
    };
    use attendo_store::MemoryEmployeeStore;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use tokio::sync::{mpsc, Notify};

    /// Returns the same locations for every frame.
    struct FixedLocator(Arc<Mutex<Vec<FaceLocation>>>);

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, _image: &RgbImage) -> Result<Vec<FaceLocation>, DetectorError> {
            Ok(self.0.lock().clone())
        }
    }

    struct FailingLocator;

    impl FaceLocator for FailingLocator {
        fn locate(&mut self, _image: &RgbImage) -> Result<Vec<FaceLocation>, DetectorError> {
            Err(DetectorError::InferenceFailed("model exploded".into()))
        }
    }

    /// Encodes every face as the same embedding.
    struct ConstEncoder(Vec<f64>);

    impl FaceEncoder for ConstEncoder {
        fn encode(&mut self, _image: &RgbImage, _face: &FaceLocation) -> Result<Embedding, EncoderError> {
            Ok(Embedding::new(self.0.clone()))
        }
    }

    /// Store whose updates always fail.
    /// Picks the embedding by the face's top edge, so each location in a
    /// frame stands for one person.
    struct KeyedEncoder(HashMap<u32, Vec<f64>>);

    impl FaceEncoder for KeyedEncoder {
        fn encode(&mut self, _image: &RgbImage, face: &FaceLocation) -> Result<Embedding, EncoderError> {
            self.0
                .get(&face.top)
                .map(|v| Embedding::new(v.clone()))
                .ok_or_else(|| EncoderError::InferenceFailed(format!("no face keyed at top={}", face.top)))
        }
    }

    struct ReadOnlyStore(MemoryEmployeeStore);

    #[async_trait]
    impl EmployeeStore for ReadOnlyStore {
        async fn get(&self, identity: &str) -> Result<Option<EmployeeRecord>, StoreError> {
            self.0.get(identity).await
        }
        async fn set_attendance_count(&self, _identity: &str, _count: u32) -> Result<(), StoreError> {
            Err(StoreError::Closed)
        }
        async fn set_last_attendance_time(&self, _identity: &str, _at: NaiveDateTime) -> Result<(), StoreError> {
            Err(StoreError::Closed)
        }
        async fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    /// Store whose lookups wait until released.
    struct GatedStore {
        inner: MemoryEmployeeStore,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl EmployeeStore for GatedStore {
        async fn get(&self, identity: &str) -> Result<Option<EmployeeRecord>, StoreError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.get(identity).await
        }
        async fn set_attendance_count(&self, identity: &str, count: u32) -> Result<(), StoreError> {
            self.inner.set_attendance_count(identity, count).await
        }
        async fn set_last_attendance_time(&self, identity: &str, at: NaiveDateTime) -> Result<(), StoreError> {
            self.inner.set_last_attendance_time(identity, at).await
        }
        async fn close(&self) -> Result<(), StoreError> {
            self.inner.close().await
        }
    }

    struct Harness {
        system: Arc<AttendanceSystem>,
        clock: Arc<ManualClock>,
        events: mpsc::UnboundedReceiver<AttendanceEvent>,
        faces: Arc<Mutex<Vec<FaceLocation>>>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn drain(&mut self) -> Vec<AttendanceEvent> {
            let mut out = Vec::new();
            while let Ok(ev) = self.events.try_recv() {
                out.push(ev);
            }
            out
        }

        fn statuses(events: &[AttendanceEvent]) -> Vec<String> {
            events
                .iter()
                .filter_map(|e| match e {
                    AttendanceEvent::StatusChanged(s) => Some(s.clone()),
                    _ => None,
                })
                .collect()
        }

        fn detections(events: &[AttendanceEvent]) -> Vec<EmployeeEventRecord> {
            events
                .iter()
                .filter_map(|e| match e {
                    AttendanceEvent::EmployeeDetected(r) => Some(r.clone()),
                    _ => None,
                })
                .collect()
        }

        fn processed_frames(events: &[AttendanceEvent]) -> usize {
            events
                .iter()
                .filter(|e| matches!(e, AttendanceEvent::ProcessedFrame(_)))
                .count()
        }

        fn push_frame(&self) {
            self.system.frames().push(Frame::from_rgb(RgbImage::new(64, 48)));
        }
    }

    fn start_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .unwrap()
    }

    fn employee(identity: &str, total: u32, last: Option<&str>) -> EmployeeRecord {
        EmployeeRecord {
            major: "Physics".into(),
            total_attendance: total,
            last_attendance_time: last.map(str::to_string),
            ..EmployeeRecord::new(identity, "Ada Lovelace")
        }
    }

    fn known(identity: &str) -> EmbeddingTable {
        EmbeddingTable::new(vec![KnownFace {
            identity: identity.into(),
            embedding: Embedding::new(vec![1.0, 0.0, 0.0]),
        }])
    }

    fn harness_with(
        store: Arc<dyn EmployeeStore>,
        table: EmbeddingTable,
        locator: Option<Box<dyn FaceLocator>>,
        store_timeout: Duration,
    ) -> Harness {
        let encoder = Box::new(ConstEncoder(vec![1.0, 0.0, 0.0]));
        harness_with_encoder(store, table, locator, encoder, store_timeout)
    }

    fn harness_with_encoder(
        store: Arc<dyn EmployeeStore>,
        table: EmbeddingTable,
        locator: Option<Box<dyn FaceLocator>>,
        encoder: Box<dyn FaceEncoder>,
        store_timeout: Duration,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let faces = Arc::new(Mutex::new(vec![FaceLocation::new(2, 8, 8, 2)]));
        let locator = locator.unwrap_or_else(|| Box::new(FixedLocator(Arc::clone(&faces))));
        let recognition = FaceRecognition::new(locator, encoder, table, 0.6);
        let clock = Arc::new(ManualClock::at(start_time()));
        let (sink, events) = EventSink::channel();
        let settings = SystemSettings {
            cooldown: TimeDelta::seconds(3),
            attendance_interval: TimeDelta::seconds(30),
            capture_dir: dir.path().to_path_buf(),
            face_size: 216,
            store_timeout: Some(store_timeout),
        };
        let system = AttendanceSystem::new(recognition, store, clock.clone(), sink, settings);
        Harness {
            system: Arc::new(system),
            clock,
            events,
            faces,
            _dir: dir,
        }
    }

    fn harness(store: Arc<dyn EmployeeStore>) -> Harness {
        harness_with(store, known("E1"), None, Duration::from_secs(5))
    }

    const E1_FACE: FaceLocation = FaceLocation { top: 2, right: 8, bottom: 8, left: 2 };
    const E2_FACE: FaceLocation = FaceLocation { top: 10, right: 14, bottom: 14, left: 10 };

    /// Two enrolled people; E1 sits at `E1_FACE`, E2 at `E2_FACE`.
    fn two_person_harness(store: Arc<dyn EmployeeStore>) -> Harness {
        let table = EmbeddingTable::new(vec![
            KnownFace {
                identity: "E1".into(),
                embedding: Embedding::new(vec![1.0, 0.0, 0.0]),
            },
            KnownFace {
                identity: "E2".into(),
                embedding: Embedding::new(vec![0.0, 1.0, 0.0]),
            },
        ]);
        let encoder = KeyedEncoder(HashMap::from([
            (E1_FACE.top, vec![1.0, 0.0, 0.0]),
            (E2_FACE.top, vec![0.0, 1.0, 0.0]),
        ]));
        harness_with_encoder(store, table, None, Box::new(encoder), Duration::from_secs(5))
    }

    fn show(h: &Harness, faces: &[FaceLocation]) {
        *h.faces.lock() = faces.to_vec();
    }

    async fn processed(h: &Harness) -> CycleReport {
        match h.system.process_frame().await {
            CycleOutcome::Processed(report) => report,
            other => panic!("expected a processed cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_frame_is_noop() {
        let store = Arc::new(MemoryEmployeeStore::new());
        let mut h = harness(store);
        assert!(matches!(h.system.process_frame().await, CycleOutcome::NoFrame));
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_marks_attendance_after_an_hour() {
        let store = Arc::new(MemoryEmployeeStore::with_records([employee(
            "E1",
            4,
            Some("2024-03-01 08:00:00"),
        )]));
        let mut h = harness(store.clone());
        h.push_frame();

        let report = processed(&h).await;
        assert_eq!(report.recorded, vec![("E1".to_string(), AttendanceStatus::Marked)]);

        let events = h.drain();
        let detected = Harness::detections(&events);
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].status, AttendanceStatus::Marked);
        assert_eq!(detected[0].total_attendance, 5);
        assert_eq!(detected[0].name, "Ada Lovelace");
        assert_eq!(detected[0].face_image.dimensions(), (216, 216));
        assert_eq!(Harness::processed_frames(&events), 1);
        assert!(Harness::statuses(&events).contains(&"Face image saved for employee E1".to_string()));

        let stored = store.snapshot("E1").unwrap();
        assert_eq!(stored.total_attendance, 5);
        assert_eq!(stored.last_attendance_time.as_deref(), Some("2024-03-01 09:00:00"));
    }

    #[tokio::test]
    async fn test_interval_boundary() {
        let store = Arc::new(MemoryEmployeeStore::with_records([
            employee("E1", 2, Some("2024-03-01 08:59:31")),
        ]));
        let h = harness(store.clone());
        h.push_frame();
        let report = processed(&h).await;
        assert_eq!(report.recorded[0].1, AttendanceStatus::AlreadyMarked);
        assert_eq!(store.write_count(), 0);

        h.clock.advance_secs(4);
        store.put(employee("E1", 2, Some("2024-03-01 08:59:33")));
        let report = processed(&h).await;
        assert_eq!(report.recorded[0].1, AttendanceStatus::Marked);
        assert_eq!(store.snapshot("E1").unwrap().total_attendance, 3);
    }

    #[tokio::test]
    async fn test_exactly_interval_is_already_marked() {
        let store = Arc::new(MemoryEmployeeStore::with_records([
            employee("E1", 2, Some("2024-03-01 08:59:30")),
        ]));
        let h = harness(store.clone());
        h.push_frame();
        let report = processed(&h).await;
        assert_eq!(report.recorded[0].1, AttendanceStatus::AlreadyMarked);
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_repeat_detection() {
        let store = Arc::new(MemoryEmployeeStore::with_records([employee(
            "E1",
            0,
            Some("2024-03-01 08:00:00"),
        )]));
        let mut h = harness(store.clone());
        h.push_frame();

        let first = processed(&h).await;
        assert_eq!(first.recorded.len(), 1);

        h.clock.advance_secs(2);
        let second = processed(&h).await;
        assert_eq!(second.throttled, 1);
        assert!(second.recorded.is_empty());

        h.clock.advance_secs(2);
        let third = processed(&h).await;
        assert_eq!(third.throttled, 0);
        assert_eq!(third.recorded, vec![("E1".to_string(), AttendanceStatus::AlreadyMarked)]);

        let events = h.drain();
        assert_eq!(Harness::detections(&events).len(), 2);
        assert_eq!(Harness::processed_frames(&events), 3);
        assert_eq!(store.snapshot("E1").unwrap().total_attendance, 1);
    }

    #[tokio::test]
    async fn test_cooldown_boundary_is_inclusive() {
        let store = Arc::new(MemoryEmployeeStore::with_records([employee("E1", 0, None)]));
        let h = harness(store);
        h.push_frame();
        processed(&h).await;
        h.clock.advance_secs(3);
        assert_eq!(processed(&h).await.throttled, 1);
    }

    #[tokio::test]
    async fn test_never_attended_is_marked() {
        let store = Arc::new(MemoryEmployeeStore::with_records([employee("E1", 0, None)]));
        let h = harness(store.clone());
        h.push_frame();
        let report = processed(&h).await;
        assert_eq!(report.recorded[0].1, AttendanceStatus::Marked);
        assert_eq!(store.snapshot("E1").unwrap().total_attendance, 1);
    }

    #[tokio::test]
    async fn test_no_face_emits_frame_only() {
        let store = Arc::new(MemoryEmployeeStore::with_records([employee("E1", 0, None)]));
        let mut h = harness(store.clone());
        h.faces.lock().clear();
        h.push_frame();

        let report = processed(&h).await;
        assert_eq!(report.faces, 0);
        let events = h.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AttendanceEvent::ProcessedFrame(_)));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_table_reports_status() {
        let store = Arc::new(MemoryEmployeeStore::with_records([employee("E1", 0, None)]));
        let mut h = harness_with(store.clone(), EmbeddingTable::default(), None, Duration::from_secs(5));
        h.push_frame();

        let report = processed(&h).await;
        assert!(report.matched.is_empty());
        let events = h.drain();
        assert_eq!(Harness::statuses(&events), vec!["No encoded faces available".to_string()]);
        assert!(Harness::detections(&events).is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_face_is_not_highlighted() {
        let store = Arc::new(MemoryEmployeeStore::new());
        let table = EmbeddingTable::new(vec![KnownFace {
            identity: "E9".into(),
            embedding: Embedding::new(vec![-1.0, 0.0, 0.0]),
        }]);
        let mut h = harness_with(store, table, None, Duration::from_secs(5));
        h.push_frame();

        let report = processed(&h).await;
        assert_eq!(report.faces, 1);
        assert!(report.matched.is_empty());
        let events = h.drain();
        match &events[..] {
            [AttendanceEvent::ProcessedFrame(frame)] => {
                assert!(frame.pixels().all(|p| p.0 == [0, 0, 0]));
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_employee_reports_not_found() {
        let store = Arc::new(MemoryEmployeeStore::new());
        let mut h = harness(store);
        h.push_frame();

        let report = processed(&h).await;
        assert_eq!(report.matched, vec!["E1".to_string()]);
        assert!(report.recorded.is_empty());
        let events = h.drain();
        assert!(Harness::statuses(&events).contains(&"Employee ID E1 not found".to_string()));
        assert!(Harness::detections(&events).is_empty());
        assert_eq!(Harness::processed_frames(&events), 1);
    }

    #[tokio::test]
    async fn test_store_write_failure_abandons_detection() {
        let inner = MemoryEmployeeStore::with_records([employee("E1", 3, None)]);
        let mut h = harness(Arc::new(ReadOnlyStore(inner)));
        h.push_frame();

        let report = processed(&h).await;
        assert!(report.recorded.is_empty());
        let events = h.drain();
        assert!(Harness::detections(&events).is_empty());
        assert!(Harness::statuses(&events)
            .iter()
            .any(|s| s.starts_with("Database error:")));
    }

    #[tokio::test]
    async fn test_unparseable_date_counts_as_now() {
        let store = Arc::new(MemoryEmployeeStore::with_records([employee(
            "E1",
            7,
            Some("last tuesday"),
        )]));
        let mut h = harness(store.clone());
        h.push_frame();

        let report = processed(&h).await;
        assert_eq!(report.recorded[0].1, AttendanceStatus::AlreadyMarked);
        let events = h.drain();
        assert!(Harness::statuses(&events).contains(&"Error parsing date: last tuesday".to_string()));
        assert_eq!(Harness::detections(&events)[0].total_attendance, 7);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_detection_failure_reports_processing_error() {
        let store = Arc::new(MemoryEmployeeStore::new());
        let mut h = harness_with(
            store,
            known("E1"),
            Some(Box::new(FailingLocator)),
            Duration::from_secs(5),
        );
        h.push_frame();

        assert!(matches!(h.system.process_frame().await, CycleOutcome::Failed));
        let events = h.drain();
        assert_eq!(events.len(), 1);
        match &events[0] {
            AttendanceEvent::StatusChanged(s) => assert!(s.starts_with("Processing error:")),
            other => panic!("unexpected event {other:?}"),
        }
        // The gate is released after a failure.
        assert!(matches!(h.system.process_frame().await, CycleOutcome::Failed));
    }

    #[tokio::test]
    async fn test_capture_saved_once_until_marked() {
        let store = Arc::new(MemoryEmployeeStore::with_records([
            employee("E1", 0, Some("2024-03-01 08:59:50")),
        ]));
        let mut h = harness(store.clone());
        h.push_frame();

        // Already marked: the image is written, the flag stays set.
        processed(&h).await;
        h.clock.advance_secs(5);
        processed(&h).await;
        let saved = |events: &[AttendanceEvent]| {
            Harness::statuses(events)
                .iter()
                .filter(|s| s.starts_with("Face image saved"))
                .count()
        };
        assert_eq!(saved(&h.drain()), 1);

        // Marked: flag resets, so the next admitted detection saves again.
        h.clock.advance_secs(30);
        let report = processed(&h).await;
        assert_eq!(report.recorded[0].1, AttendanceStatus::Marked);
        h.clock.advance_secs(5);
        processed(&h).await;
        assert_eq!(saved(&h.drain()), 1);
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_busy() {
        let store = Arc::new(GatedStore {
            inner: MemoryEmployeeStore::with_records([employee("E1", 0, None)]),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let h = harness(store.clone());
        h.push_frame();

        let system = Arc::clone(&h.system);
        let first = tokio::spawn(async move { system.process_frame().await });
        store.entered.notified().await;

        assert!(matches!(h.system.process_frame().await, CycleOutcome::Busy));

        store.release.notify_one();
        match first.await.unwrap() {
            CycleOutcome::Processed(report) => assert_eq!(report.recorded.len(), 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.inner.snapshot("E1").unwrap().total_attendance, 1);
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = Arc::new(GatedStore {
            inner: MemoryEmployeeStore::with_records([employee("E1", 0, None)]),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let mut h = harness_with(store.clone(), known("E1"), None, Duration::from_millis(50));
        h.push_frame();

        let report = processed(&h).await;
        assert!(report.recorded.is_empty());
        let events = h.drain();
        assert!(Harness::statuses(&events)
            .iter()
            .any(|s| s.starts_with("Database error:") && s.contains("timed out")));
    }

    #[tokio::test]
    async fn test_different_identity_within_cooldown_is_recorded() {
        let store = Arc::new(MemoryEmployeeStore::with_records([
            employee("E1", 0, None),
            employee("E2", 0, None),
        ]));
        let h = two_person_harness(store.clone());
        h.push_frame();

        show(&h, &[E1_FACE]);
        let first = processed(&h).await;
        assert_eq!(first.recorded, vec![("E1".to_string(), AttendanceStatus::Marked)]);

        h.clock.advance_secs(1);
        show(&h, &[E2_FACE]);
        let second = processed(&h).await;
        assert_eq!(second.throttled, 0);
        assert_eq!(second.recorded, vec![("E2".to_string(), AttendanceStatus::Marked)]);

        assert_eq!(store.snapshot("E1").unwrap().total_attendance, 1);
        assert_eq!(store.snapshot("E2").unwrap().total_attendance, 1);
    }

    #[tokio::test]
    async fn test_returning_identity_is_readmitted_after_another() {
        let store = Arc::new(MemoryEmployeeStore::with_records([
            employee("E1", 0, None),
            employee("E2", 0, None),
        ]));
        let h = two_person_harness(store.clone());
        h.push_frame();

        for (secs, face, identity) in [(0, E1_FACE, "E1"), (1, E2_FACE, "E2"), (1, E1_FACE, "E1")] {
            h.clock.advance_secs(secs);
            show(&h, &[face]);
            let report = processed(&h).await;
            assert_eq!(report.throttled, 0);
            assert_eq!(report.recorded.len(), 1);
            assert_eq!(report.recorded[0].0, identity);
        }
        // the second E1 pass lands 2 s after the first mark
        assert_eq!(store.snapshot("E1").unwrap().total_attendance, 1);
    }

    #[tokio::test]
    async fn test_faces_in_one_frame_follow_detection_order() {
        let store = Arc::new(MemoryEmployeeStore::with_records([
            employee("E1", 0, None),
            employee("E2", 7, None),
        ]));
        let mut h = two_person_harness(store.clone());
        h.push_frame();
        show(&h, &[E1_FACE, E2_FACE]);

        let report = processed(&h).await;
        assert_eq!(report.faces, 2);
        assert_eq!(report.matched, vec!["E1".to_string(), "E2".to_string()]);
        assert_eq!(
            report.recorded,
            vec![
                ("E1".to_string(), AttendanceStatus::Marked),
                ("E2".to_string(), AttendanceStatus::Marked),
            ]
        );

        let detected: Vec<_> = Harness::detections(&h.drain())
            .into_iter()
            .map(|d| (d.identity, d.total_attendance))
            .collect();
        assert_eq!(detected, vec![("E1".to_string(), 1), ("E2".to_string(), 8)]);
    }

    #[tokio::test]
    async fn test_saturated_count_reports_overflow() {
        let store = Arc::new(MemoryEmployeeStore::with_records([employee("E1", u32::MAX, None)]));
        let mut h = harness(store.clone());
        h.push_frame();

        let report = processed(&h).await;
        assert_eq!(report.matched, vec!["E1".to_string()]);
        assert!(report.recorded.is_empty());

        let events = h.drain();
        assert!(Harness::detections(&events).is_empty());
        assert!(Harness::statuses(&events)
            .contains(&"Error: attendance count overflow for employee E1".to_string()));
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.snapshot("E1").unwrap().total_attendance, u32::MAX);
    }
}
