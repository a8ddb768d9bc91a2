//! attendo-store: employee records and attendance persistence.
//!
//! The attendance pipeline talks to an [`EmployeeStore`]; the SQLite
//! implementation is used in production, the in-memory one in tests.

pub mod import;
pub mod memory;
pub mod record;
pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

pub use import::{import_roster, parse_roster, sample_roster, ImportSummary};
pub use memory::MemoryEmployeeStore;
pub use record::{format_timestamp, parse_timestamp, EmployeeRecord, TIMESTAMP_FORMAT};
pub use sqlite::SqliteEmployeeStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] tokio_rusqlite::Error),
    #[error("store closed")]
    Closed,
    #[error("employee {0} not found")]
    NotFound(String),
    #[error("store call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("roster import: {0}")]
    Import(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Key-value access to employee records.
#[async_trait]
pub trait EmployeeStore: Send + Sync {
    async fn get(&self, identity: &str) -> Result<Option<EmployeeRecord>, StoreError>;

    async fn set_attendance_count(&self, identity: &str, count: u32) -> Result<(), StoreError>;

    async fn set_last_attendance_time(&self, identity: &str, at: NaiveDateTime) -> Result<(), StoreError>;

    /// Release the underlying connection. Later calls fail.
    async fn close(&self) -> Result<(), StoreError>;
}
