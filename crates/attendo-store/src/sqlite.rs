//! SQLite-backed employee store.
//!
//! All statements run on tokio-rusqlite's connection thread, which serializes
//! access to the database.

use crate::record::{format_timestamp, EmployeeRecord};
use crate::{EmployeeStore, StoreError};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS employee (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_id TEXT UNIQUE NOT NULL,
    name TEXT NOT NULL,
    major TEXT,
    starting_year INTEGER,
    total_attendance INTEGER NOT NULL DEFAULT 0,
    standing TEXT DEFAULT 'G',
    year INTEGER,
    last_attendance_time TEXT
)";

const SELECT_COLUMNS: &str = "employee_id, name, major, starting_year, total_attendance, \
                              standing, year, last_attendance_time";

pub struct SqliteEmployeeStore {
    conn: Connection,
}

impl SqliteEmployeeStore {
    /// Open (or create) the database file and make sure the schema exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).await?;
        let store = Self { conn };
        store.init_schema().await?;
        tracing::info!(path = %path.display(), "employee store opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory().await?,
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|c| {
                c.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert a new employee. Fails if the identity already exists.
    pub async fn insert(&self, record: EmployeeRecord) -> Result<(), StoreError> {
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO employee (employee_id, name, major, starting_year, total_attendance, \
                     standing, year, last_attendance_time) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        record.identity,
                        record.name,
                        record.major,
                        record.starting_year,
                        record.total_attendance,
                        record.standing,
                        record.year,
                        record.last_attendance_time,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Every employee, ordered by identity.
    pub async fn list(&self) -> Result<Vec<EmployeeRecord>, StoreError> {
        let records = self
            .conn
            .call(|c| {
                let mut stmt = c.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM employee ORDER BY employee_id"
                ))?;
                let records = stmt
                    .query_map([], record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    async fn update(&self, sql: &'static str, identity: &str, value: Value) -> Result<(), StoreError> {
        let id = identity.to_string();
        let changed = self
            .conn
            .call(move |c| Ok(c.execute(sql, params![value, id])?))
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound(identity.to_string()));
        }
        Ok(())
    }
}

/// Text view of a column that may hold text, a number or NULL.
fn text_column(value: Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Blob(b) => String::from_utf8(b).ok(),
        Value::Null => None,
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<EmployeeRecord> {
    let total: i64 = row.get(4)?;
    Ok(EmployeeRecord {
        identity: row.get(0)?,
        name: row.get(1)?,
        major: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        starting_year: row.get(3)?,
        total_attendance: u32::try_from(total).unwrap_or(0),
        standing: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        year: row.get(6)?,
        last_attendance_time: text_column(row.get(7)?),
    })
}

#[async_trait]
impl EmployeeStore for SqliteEmployeeStore {
    async fn get(&self, identity: &str) -> Result<Option<EmployeeRecord>, StoreError> {
        let id = identity.to_string();
        let record = self
            .conn
            .call(move |c| {
                let record = c
                    .query_row(
                        &format!("SELECT {SELECT_COLUMNS} FROM employee WHERE employee_id = ?1"),
                        params![id],
                        record_from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    async fn set_attendance_count(&self, identity: &str, count: u32) -> Result<(), StoreError> {
        self.update(
            "UPDATE employee SET total_attendance = ?1 WHERE employee_id = ?2",
            identity,
            Value::Integer(count.into()),
        )
        .await
    }

    async fn set_last_attendance_time(&self, identity: &str, at: NaiveDateTime) -> Result<(), StoreError> {
        self.update(
            "UPDATE employee SET last_attendance_time = ?1 WHERE employee_id = ?2",
            identity,
            Value::Text(format_timestamp(at)),
        )
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.conn.clone().close().await?;
        tracing::debug!("employee store closed");
        Ok(())
    }
}
