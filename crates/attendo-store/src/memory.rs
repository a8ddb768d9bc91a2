//! In-process employee store.

use crate::record::{format_timestamp, EmployeeRecord};
use crate::{EmployeeStore, StoreError};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// HashMap-backed store. Counts writes so callers can assert on mutation.
#[derive(Default)]
pub struct MemoryEmployeeStore {
    records: Mutex<HashMap<String, EmployeeRecord>>,
    writes: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryEmployeeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = EmployeeRecord>) -> Self {
        let store = Self::new();
        for r in records {
            store.put(r);
        }
        store
    }

    /// Insert or replace a record without counting it as a write.
    pub fn put(&self, record: EmployeeRecord) {
        self.records.lock().insert(record.identity.clone(), record);
    }

    pub fn snapshot(&self, identity: &str) -> Option<EmployeeRecord> {
        self.records.lock().get(identity).cloned()
    }

    /// Number of successful update calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn modify(&self, identity: &str, f: impl FnOnce(&mut EmployeeRecord)) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut records = self.records.lock();
        let record = records
            .get_mut(identity)
            .ok_or_else(|| StoreError::NotFound(identity.to_string()))?;
        f(record);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl EmployeeStore for MemoryEmployeeStore {
    async fn get(&self, identity: &str) -> Result<Option<EmployeeRecord>, StoreError> {
        self.ensure_open()?;
        Ok(self.snapshot(identity))
    }

    async fn set_attendance_count(&self, identity: &str, count: u32) -> Result<(), StoreError> {
        self.modify(identity, |r| r.total_attendance = count)
    }

    async fn set_last_attendance_time(&self, identity: &str, at: NaiveDateTime) -> Result<(), StoreError> {
        self.modify(identity, |r| r.last_attendance_time = Some(format_timestamp(at)))
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
