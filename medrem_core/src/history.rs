//! Intake history across the live log and the CSV archive.

use crate::rollup::CsvRow;
use crate::{Error, IntakeRecord, Result};
use chrono::{DateTime, Duration, Utc};
use csv::ReaderBuilder;
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

impl TryFrom<CsvRow> for IntakeRecord {
    type Error = crate::Error;

    fn try_from(row: CsvRow) -> Result<Self> {
        let parse_id = |s: &str| {
            Uuid::parse_str(s).map_err(|e| Error::Other(format!("Invalid UUID {}: {}", s, e)))
        };
        let parse_time = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::Other(format!("Invalid date {}: {}", s, e)))
        };

        Ok(IntakeRecord {
            id: parse_id(&row.id)?,
            medicine_id: parse_id(&row.medicine_id)?,
            medicine_name: row.medicine_name,
            scheduled_time: parse_time(&row.scheduled_time)?,
            taken_at: parse_time(&row.taken_at)?,
        })
    }
}

/// Intakes taken within the last `days` days before `now`, newest first
///
/// Reads the live log first, then the CSV archive, dropping records that
/// appear in both.
pub fn load_recent_intakes(
    log_path: &Path,
    csv_path: &Path,
    now: DateTime<Utc>,
    days: i64,
) -> Result<Vec<IntakeRecord>> {
    let cutoff = Duration::try_days(days)
        .filter(|_| days >= 0)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| Error::invalid(format!("history window of {} days is invalid", days)))?;

    let mut records = Vec::new();
    let mut seen_ids = HashSet::new();

    for record in crate::intake_log::read_intakes(log_path)? {
        if record.taken_at >= cutoff && seen_ids.insert(record.id) {
            records.push(record);
        }
    }

    if csv_path.exists() {
        let mut reader = ReaderBuilder::new().has_headers(true).from_path(csv_path)?;

        for (row_num, row_result) in reader.deserialize::<CsvRow>().enumerate() {
            let parsed = row_result
                .map_err(Error::from)
                .and_then(IntakeRecord::try_from);
            match parsed {
                Ok(record) => {
                    if record.taken_at >= cutoff && seen_ids.insert(record.id) {
                        records.push(record);
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping intake history row {}: {}", row_num + 2, e);
                }
            }
        }
    }

    records.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));

    tracing::debug!("Loaded {} intakes from the last {} days", records.len(), days);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake_log::{IntakeSink, JsonlSink};
    use crate::rollup::intake_log_to_csv_and_archive;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 15, 12, 0, 0).unwrap()
    }

    fn record(days_ago: i64) -> IntakeRecord {
        let at = now() - Duration::days(days_ago);
        IntakeRecord {
            id: Uuid::new_v4(),
            medicine_id: Uuid::new_v4(),
            medicine_name: "Sertraline".into(),
            scheduled_time: at,
            taken_at: at,
        }
    }

    #[test]
    fn test_merges_log_and_archive_within_window() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("intake.wal");
        let csv_path = temp_dir.path().join("intake_history.csv");

        let mut sink = JsonlSink::new(&log_path);
        sink.append(&record(20)).unwrap();
        sink.append(&record(3)).unwrap();
        intake_log_to_csv_and_archive(&log_path, &csv_path).unwrap();

        let recent = record(1);
        JsonlSink::new(&log_path).append(&recent).unwrap();

        let records = load_recent_intakes(&log_path, &csv_path, now(), 7).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, recent.id);
        assert_eq!(records[1].taken_at, now() - Duration::days(3));
    }

    #[test]
    fn test_deduplicates_records_in_both_sources() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("intake.wal");
        let csv_path = temp_dir.path().join("intake_history.csv");

        let shared = record(2);
        JsonlSink::new(&log_path).append(&shared).unwrap();
        intake_log_to_csv_and_archive(&log_path, &csv_path).unwrap();
        JsonlSink::new(&log_path).append(&shared).unwrap();

        let records = load_recent_intakes(&log_path, &csv_path, now(), 7).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_missing_sources_are_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let records = load_recent_intakes(
            &temp_dir.path().join("intake.wal"),
            &temp_dir.path().join("intake_history.csv"),
            now(),
            7,
        )
        .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_negative_window_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = load_recent_intakes(
            &temp_dir.path().join("intake.wal"),
            &temp_dir.path().join("intake_history.csv"),
            now(),
            -1,
        );
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
