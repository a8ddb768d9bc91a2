//! Session lifecycle: open resources, run the capture thread and the
//! processing loop, tear everything down on stop.

use crate::clock::Clock;
use crate::config::Config;
use crate::events::EventSink;
use crate::system::{AttendanceSystem, CycleOutcome, FrameSlot, SystemSettings};
use async_trait::async_trait;
use attendo_core::{
    ArcFaceEncoder, EmbeddingTable, FaceRecognition, ScrfdLocator, ARCFACE_EMBEDDING_DIM,
};
use attendo_hw::{Camera, Frame, FrameSource};
use attendo_store::{EmployeeStore, SqliteEmployeeStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session already running")]
    AlreadyRunning,
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("camera: {0}")]
    Camera(#[from] attendo_hw::CameraError),
    #[error("detector: {0}")]
    Detector(#[from] attendo_core::DetectorError),
    #[error("encoder: {0}")]
    Encoder(#[from] attendo_core::EncoderError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a running session owns.
pub struct SessionResources {
    pub store: Arc<dyn EmployeeStore>,
    pub recognition: FaceRecognition,
    pub source: Box<dyn FrameSource>,
}

/// Opens the resources for a new session.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn open(&self) -> Result<SessionResources, SessionError>;
}

/// Production backend: SQLite store, ONNX models, V4L2 camera.
pub struct DeviceBackend {
    config: Config,
}

impl DeviceBackend {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionBackend for DeviceBackend {
    async fn open(&self) -> Result<SessionResources, SessionError> {
        let config = &self.config;
        let store = SqliteEmployeeStore::open(&config.db_path).await?;

        let opened = {
            let config = config.clone();
            tokio::task::spawn_blocking(move || -> Result<_, SessionError> {
                let table = EmbeddingTable::load_or_empty_with_dimensions(
                    &config.embeddings_path,
                    ARCFACE_EMBEDDING_DIM,
                );
                let locator = ScrfdLocator::load(&config.scrfd_model_path())?;
                tracing::info!(path = %config.scrfd_model_path().display(), "SCRFD detector loaded");
                let encoder = ArcFaceEncoder::load(&config.arcface_model_path())?;
                tracing::info!(path = %config.arcface_model_path().display(), "ArcFace encoder loaded");
                let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)?;
                let recognition =
                    FaceRecognition::new(Box::new(locator), Box::new(encoder), table, config.match_tolerance);
                Ok((recognition, camera))
            })
            .await
            .map_err(|e| SessionError::Io(std::io::Error::other(e)))?
        };

        let (recognition, camera) = match opened {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(close_err) = store.close().await {
                    tracing::warn!(error = %close_err, "failed to close store after aborted start");
                }
                return Err(e);
            }
        };

        Ok(SessionResources {
            store: Arc::new(store),
            recognition,
            source: Box::new(camera),
        })
    }
}

struct RunningSession {
    id: Uuid,
    store: Arc<dyn EmployeeStore>,
    system: Arc<AttendanceSystem>,
    capture_stop: Arc<AtomicBool>,
    capture: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    processor: tokio::task::JoinHandle<()>,
}

/// Attendance service: Idle until [`start`](Self::start), Running until
/// [`stop`](Self::stop).
pub struct AttendanceService<B: SessionBackend> {
    backend: B,
    config: Config,
    clock: Arc<dyn Clock>,
    events: EventSink,
    running: Option<RunningSession>,
}

impl<B: SessionBackend> AttendanceService<B> {
    pub fn new(backend: B, config: Config, clock: Arc<dyn Clock>, events: EventSink) -> Self {
        Self {
            backend,
            config,
            clock,
            events,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Open resources and start capture and processing. On error the
    /// service stays Idle.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.running.is_some() {
            return Err(SessionError::AlreadyRunning);
        }
        self.events.status("Initializing...");

        let resources = match self.backend.open().await {
            Ok(resources) => resources,
            Err(e) => {
                tracing::error!(error = %e, "session start failed");
                self.events.status(format!("Initialization failed: {e}"));
                return Err(e);
            }
        };

        if let Err(e) = std::fs::create_dir_all(&self.config.capture_dir) {
            tracing::error!(dir = %self.config.capture_dir.display(), error = %e, "cannot create capture directory");
            self.events.status(format!("Initialization failed: {e}"));
            close_store(resources.store.as_ref()).await;
            return Err(e.into());
        }

        let id = Uuid::new_v4();
        let store = Arc::clone(&resources.store);
        let system = Arc::new(AttendanceSystem::new(
            resources.recognition,
            Arc::clone(&resources.store),
            Arc::clone(&self.clock),
            self.events.clone(),
            SystemSettings::from_config(&self.config),
        ));

        let capture_stop = Arc::new(AtomicBool::new(false));
        let capture = match spawn_capture(
            resources.source,
            system.frames(),
            Arc::clone(&capture_stop),
            Duration::from_millis(self.config.capture_interval_ms),
            self.events.clone(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                self.events.status(format!("Initialization failed: {e}"));
                close_store(store.as_ref()).await;
                return Err(e.into());
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let processor = tokio::spawn(run_processor(
            Arc::clone(&system),
            Duration::from_millis(self.config.process_interval_ms),
            shutdown_rx,
        ));

        tracing::info!(session = %id, "attendance session started");
        self.events.status("Running");
        self.running = Some(RunningSession {
            id,
            store,
            system,
            capture_stop,
            capture,
            shutdown,
            processor,
        });
        Ok(())
    }

    /// Stop capture and processing and close the store. An in-flight cycle
    /// finishes first. No-op when Idle.
    pub async fn stop(&mut self) {
        let Some(session) = self.running.take() else {
            return;
        };
        tracing::info!(session = %session.id, "stopping attendance session");

        session.capture_stop.store(true, Ordering::SeqCst);
        let _ = session.shutdown.send(true);

        if let Err(e) = session.processor.await {
            tracing::warn!(error = %e, "processing task ended abnormally");
        }
        match tokio::task::spawn_blocking(move || session.capture.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => tracing::warn!("capture thread panicked"),
            Err(e) => tracing::warn!(error = %e, "failed to join capture thread"),
        }

        close_store(session.store.as_ref()).await;
        drop(session.system);
        self.events.status("Stopped");
        tracing::info!(session = %session.id, "attendance session stopped");
    }
}

async fn close_store(store: &dyn EmployeeStore) {
    if let Err(e) = store.close().await {
        tracing::warn!(error = %e, "failed to close employee store");
    }
}

/// Run the frame source on its own thread until `stop` is set.
fn spawn_capture(
    mut source: Box<dyn FrameSource>,
    frames: FrameSlot,
    stop: Arc<AtomicBool>,
    interval: Duration,
    events: EventSink,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("attendo-capture".into())
        .spawn(move || {
            tracing::info!("capture thread started");
            let mut sink = |frame: Frame| {
                if stop.load(Ordering::SeqCst) {
                    return false;
                }
                frames.push(frame);
                std::thread::sleep(interval);
                !stop.load(Ordering::SeqCst)
            };
            if let Err(e) = source.run(&mut sink) {
                tracing::error!(error = %e, "frame capture failed");
                events.status("Error: Failed to capture frame");
            }
            tracing::info!("capture thread exiting");
        })
}

/// Tick every `period`, running one cycle per tick, until shutdown.
async fn run_processor(system: Arc<AttendanceSystem>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                match system.process_frame().await {
                    CycleOutcome::Processed(report) if !report.matched.is_empty() => {
                        tracing::debug!(
                            faces = report.faces,
                            matched = report.matched.len(),
                            throttled = report.throttled,
                            recorded = report.recorded.len(),
                            "cycle complete"
                        );
                    }
                    CycleOutcome::Busy => tracing::trace!("cycle skipped; previous cycle still running"),
                    _ => {}
                }
            }
        }
    }
    tracing::debug!("processing loop exiting");
}
