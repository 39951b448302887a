//! Append-only intake log.
//!
//! Each dose that transitions to taken is appended as one JSON line. Appends
//! and rollups serialize on an exclusive lock of a sibling `.wal.lock` file,
//! taken before the log itself is opened, so an append never lands in a log
//! that a rollup has already archived.

use crate::{Dose, IntakeRecord, Medicine, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Sink for intake records
pub trait IntakeSink {
    fn append(&mut self, record: &IntakeRecord) -> Result<()>;
}

/// JSONL-based intake sink with file locking
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IntakeSink for JsonlSink {
    fn append(&mut self, record: &IntakeRecord) -> Result<()> {
        let lock = acquire_log_lock(&self.path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        lock.unlock()?;

        tracing::debug!(
            "Logged intake of {} scheduled {}",
            record.medicine_name,
            record.scheduled_time
        );
        Ok(())
    }
}

/// Intake records for the doses that are taken in `after` but were not in `before`
///
/// Both are states of the same medicine around a take or edit.
pub fn newly_taken(before: &Medicine, after: &Medicine) -> Vec<IntakeRecord> {
    let was_taken = |dose: &Dose| {
        before
            .doses
            .iter()
            .any(|prior| prior.taken && prior.scheduled_time == dose.scheduled_time)
    };

    after
        .doses
        .iter()
        .filter(|&dose| dose.taken && !was_taken(dose))
        .filter_map(|dose| {
            dose.taken_at.map(|taken_at| IntakeRecord {
                id: Uuid::new_v4(),
                medicine_id: after.id,
                medicine_name: after.name.clone(),
                scheduled_time: dose.scheduled_time,
                taken_at,
            })
        })
        .collect()
}

/// Read every record from an intake log
///
/// Malformed lines are skipped with a warning.
pub fn read_intakes(path: &Path) -> Result<Vec<IntakeRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let lock = open_lock_file(path)?;
    lock.lock_shared()?;
    let records = read_intakes_locked(path);
    lock.unlock()?;
    records
}

/// Exclusive lock shared by appends and rollups of the log at `log_path`
///
/// Released when the returned file is unlocked or dropped.
pub(crate) fn acquire_log_lock(log_path: &Path) -> Result<File> {
    let lock = open_lock_file(log_path)?;
    lock.lock_exclusive()?;
    Ok(lock)
}

fn open_lock_file(log_path: &Path) -> Result<File> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(log_path.with_extension("wal.lock"))?;
    Ok(lock)
}

/// Read the log while the caller holds its lock
pub(crate) fn read_intakes_locked(path: &Path) -> Result<Vec<IntakeRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<IntakeRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Failed to parse intake at line {}: {}", line_num + 1, e);
            }
        }
    }

    tracing::debug!("Read {} intakes from {:?}", records.len(), path);
    Ok(records)
}
