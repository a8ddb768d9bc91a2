//! Headless presentation: turns attendance events into log lines.

use crate::events::AttendanceEvent;
use tokio::sync::mpsc;

/// Counters kept by [`run_presenter`], returned when the stream closes.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PresenterStats {
    pub frames: u64,
    pub detections: u64,
    pub statuses: u64,
}

/// Drain events until every sender is gone.
pub async fn run_presenter(mut events: mpsc::UnboundedReceiver<AttendanceEvent>) -> PresenterStats {
    let mut stats = PresenterStats::default();
    while let Some(event) = events.recv().await {
        match event {
            AttendanceEvent::ProcessedFrame(frame) => {
                stats.frames += 1;
                tracing::trace!(width = frame.width(), height = frame.height(), "frame processed");
            }
            AttendanceEvent::EmployeeDetected(record) => {
                stats.detections += 1;
                tracing::info!(
                    identity = %record.identity,
                    name = %record.name,
                    major = %record.major,
                    total_attendance = record.total_attendance,
                    status = %record.status,
                    "employee detected"
                );
            }
            AttendanceEvent::StatusChanged(_) => {
                stats.statuses += 1;
            }
        }
    }
    stats
}
