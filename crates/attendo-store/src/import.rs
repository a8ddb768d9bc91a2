//! Bulk roster import.

use crate::record::EmployeeRecord;
use crate::sqlite::SqliteEmployeeStore;
use crate::StoreError;
use std::collections::BTreeMap;

/// Outcome of an import run.
#[derive(Debug, Default)]
pub struct ImportSummary {
    pub inserted: usize,
    pub total: usize,
    /// (identity, error) for every record that was not inserted.
    pub failures: Vec<(String, String)>,
}

/// Parse a roster JSON object keyed by identity.
pub fn parse_roster(json: &str) -> Result<Vec<EmployeeRecord>, StoreError> {
    let map: BTreeMap<String, EmployeeRecord> =
        serde_json::from_str(json).map_err(|e| StoreError::Import(e.to_string()))?;
    Ok(map
        .into_iter()
        .map(|(identity, record)| EmployeeRecord { identity, ..record })
        .collect())
}

/// Built-in demo roster used when no roster file is given.
pub fn sample_roster() -> Vec<EmployeeRecord> {
    let entry = |id: &str, name: &str, major: &str, start: i64, total: u32, standing: &str, year: i64| {
        EmployeeRecord {
            identity: id.into(),
            name: name.into(),
            major: major.into(),
            starting_year: Some(start),
            total_attendance: total,
            standing: standing.into(),
            year: Some(year),
            last_attendance_time: Some("2022-12-11 00:54:34".into()),
        }
    };
    vec![
        entry("234567", "Mandip Chowdhury", "Machine Learning", 2021, 7, "G", 4),
        entry("321654", "Jane Smith", "Computer Science", 2022, 5, "G", 3),
        entry("852741", "Emly Blunt", "Economics", 2021, 12, "B", 1),
        entry("963852", "Elon Musk", "Physics", 2020, 7, "G", 2),
    ]
}

/// Insert every record independently; one failure does not stop the rest.
pub async fn import_roster(store: &SqliteEmployeeStore, records: Vec<EmployeeRecord>) -> ImportSummary {
    let mut summary = ImportSummary {
        total: records.len(),
        ..Default::default()
    };
    for record in records {
        let identity = record.identity.clone();
        match store.insert(record).await {
            Ok(()) => {
                tracing::info!(identity = %identity, "inserted employee");
                summary.inserted += 1;
            }
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "failed to insert employee");
                summary.failures.push((identity, e.to_string()));
            }
        }
    }
    summary
}
