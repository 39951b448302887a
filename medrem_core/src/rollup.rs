//! Roll the intake log up into a CSV archive.
//!
//! The CSV is fsynced before the log is renamed, and the log is renamed
//! (not deleted) so a failed rollup can be recovered by hand. The whole
//! rollup runs under the log lock, so appends wait for it to finish and then
//! start a fresh log.

use crate::intake_log::{acquire_log_lock, read_intakes_locked};
use crate::{IntakeRecord, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::Path;

/// A row in the intake history CSV
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub(crate) struct CsvRow {
    pub id: String,
    pub medicine_id: String,
    pub medicine_name: String,
    pub scheduled_time: String,
    pub taken_at: String,
}

impl From<&IntakeRecord> for CsvRow {
    fn from(record: &IntakeRecord) -> Self {
        CsvRow {
            id: record.id.to_string(),
            medicine_id: record.medicine_id.to_string(),
            medicine_name: record.medicine_name.clone(),
            scheduled_time: record.scheduled_time.to_rfc3339(),
            taken_at: record.taken_at.to_rfc3339(),
        }
    }
}

/// Append every logged intake to the CSV, then archive the log
///
/// Returns the number of records written. The CSV gets a header row only
/// when it is created.
pub fn intake_log_to_csv_and_archive(log_path: &Path, csv_path: &Path) -> Result<usize> {
    let lock = acquire_log_lock(log_path)?;
    let records = read_intakes_locked(log_path)?;

    if records.is_empty() {
        tracing::info!("No intakes in log to roll up");
        return Ok(0);
    }

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;
    let needs_headers = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    for record in &records {
        writer.serialize(CsvRow::from(record))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    tracing::info!("Wrote {} intakes to CSV", records.len());

    let processed_path = log_path.with_extension("wal.processed");
    std::fs::rename(log_path, &processed_path)?;

    lock.unlock()?;

    tracing::info!("Archived intake log to {:?}", processed_path);

    Ok(records.len())
}

/// Remove archived `.wal.processed` logs from `dir`
pub fn cleanup_processed_logs(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.extension().is_some_and(|ext| ext == "processed") {
            std::fs::remove_file(&path)?;
            tracing::debug!("Removed processed log: {:?}", path);
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Cleaned up {} processed intake logs", count);
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake_log::{IntakeSink, JsonlSink};
    use chrono::{Duration, TimeZone, Utc};
    use std::fs::File;
    use uuid::Uuid;

    fn record(offset_hours: i64) -> IntakeRecord {
        let at = Utc.with_ymd_and_hms(2024, 8, 1, 6, 0, 0).unwrap() + Duration::hours(offset_hours);
        IntakeRecord {
            id: Uuid::new_v4(),
            medicine_id: Uuid::new_v4(),
            medicine_name: "Omeprazole, 20mg".into(),
            scheduled_time: at,
            taken_at: at,
        }
    }

    #[test]
    fn test_rollup_creates_csv_and_archives_log() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("intake.wal");
        let csv_path = temp_dir.path().join("intake_history.csv");

        let mut sink = JsonlSink::new(&log_path);
        for i in 0..3 {
            sink.append(&record(i * 24)).unwrap();
        }

        let count = intake_log_to_csv_and_archive(&log_path, &csv_path).unwrap();
        assert_eq!(count, 3);

        assert!(csv_path.exists());
        assert!(!log_path.exists());
        assert!(log_path.with_extension("wal.processed").exists());

        let contents = std::fs::read_to_string(&csv_path).unwrap();
        assert!(contents.starts_with("id,medicine_id,medicine_name,scheduled_time,taken_at"));
        // Names containing commas are quoted
        assert!(contents.contains("\"Omeprazole, 20mg\""));
    }

    #[test]
    fn test_rollup_appends_without_repeating_header() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("intake.wal");
        let csv_path = temp_dir.path().join("intake_history.csv");

        JsonlSink::new(&log_path).append(&record(0)).unwrap();
        assert_eq!(intake_log_to_csv_and_archive(&log_path, &csv_path).unwrap(), 1);

        JsonlSink::new(&log_path).append(&record(24)).unwrap();
        assert_eq!(intake_log_to_csv_and_archive(&log_path, &csv_path).unwrap(), 1);

        let reader = csv::Reader::from_path(&csv_path).unwrap();
        assert_eq!(reader.into_records().count(), 2);
    }

    #[test]
    fn test_empty_log() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("empty.wal");
        let csv_path = temp_dir.path().join("intake_history.csv");
        File::create(&log_path).unwrap();

        assert_eq!(intake_log_to_csv_and_archive(&log_path, &csv_path).unwrap(), 0);
        assert!(!csv_path.exists());
    }

    #[test]
    fn test_appends_during_rollups_are_not_lost() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("intake.wal");
        let csv_path = temp_dir.path().join("intake_history.csv");

        let writer_path = log_path.clone();
        let writer = std::thread::spawn(move || {
            let mut sink = JsonlSink::new(&writer_path);
            for i in 0..50 {
                sink.append(&record(i)).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
        });

        let mut rolled = 0;
        for _ in 0..20 {
            rolled += intake_log_to_csv_and_archive(&log_path, &csv_path).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(3));
        }
        writer.join().unwrap();
        rolled += intake_log_to_csv_and_archive(&log_path, &csv_path).unwrap();

        assert_eq!(rolled, 50);
        let reader = csv::Reader::from_path(&csv_path).unwrap();
        assert_eq!(reader.into_records().count(), 50);
    }

    #[test]
    fn test_cleanup_processed_logs() {
        let temp_dir = tempfile::tempdir().unwrap();
        File::create(temp_dir.path().join("a.wal.processed")).unwrap();
        File::create(temp_dir.path().join("b.wal.processed")).unwrap();
        File::create(temp_dir.path().join("intake.wal")).unwrap();

        assert_eq!(cleanup_processed_logs(temp_dir.path()).unwrap(), 2);
        assert!(temp_dir.path().join("intake.wal").exists());
        assert!(!temp_dir.path().join("a.wal.processed").exists());
    }
}
