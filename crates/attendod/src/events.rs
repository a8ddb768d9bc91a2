//! Events published to the presentation layer.

use image::RgbImage;
use std::fmt;
use tokio::sync::mpsc;

/// Result of the attendance check for one recognized employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Marked,
    AlreadyMarked,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttendanceStatus::Marked => f.write_str("MARKED"),
            AttendanceStatus::AlreadyMarked => f.write_str("ALREADY_MARKED"),
        }
    }
}

/// Payload of an employee-detected event.
#[derive(Debug, Clone)]
pub struct EmployeeEventRecord {
    pub identity: String,
    pub name: String,
    pub major: String,
    /// Count after the check; incremented when `status` is `Marked`.
    pub total_attendance: u32,
    pub face_image: RgbImage,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone)]
pub enum AttendanceEvent {
    /// Copy of the processed frame with recognized faces outlined.
    ProcessedFrame(RgbImage),
    EmployeeDetected(EmployeeEventRecord),
    StatusChanged(String),
}

/// Sending half of the event stream. Sends never block; a dropped
/// receiver silently discards events.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<AttendanceEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AttendanceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: AttendanceEvent) {
        let _ = self.tx.send(event);
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(status = %message, "status changed");
        self.emit(AttendanceEvent::StatusChanged(message));
    }
}
