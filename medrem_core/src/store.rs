//! Medicine persistence with file locking.
//!
//! All medicines live in one JSON document. Saves are atomic (temp file +
//! rename) and `update` serializes writers with an exclusive lock on a
//! sibling `.lock` file, so two processes editing the same store cannot
//! interleave their load-modify-save cycles.

use crate::{Error, Medicine, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// File name of the store inside the data directory
pub const STORE_FILE: &str = "medicines.json";

/// Every medicine the user has registered, active or not
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct MedicineStore {
    #[serde(default)]
    pub medicines: Vec<Medicine>,
}

impl MedicineStore {
    /// Load the store with a shared lock
    ///
    /// A missing file is an empty store. A malformed file is an error:
    /// medicine records are never silently replaced by defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No medicine store at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let file = File::open(path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        let store: MedicineStore = serde_json::from_str(&contents).map_err(|e| {
            tracing::warn!("Failed to parse medicine store {:?}: {}", path, e);
            Error::Json(e)
        })?;

        tracing::debug!(
            "Loaded {} medicines from {:?}",
            store.medicines.len(),
            path
        );
        Ok(store)
    }

    /// Save the store atomically
    ///
    /// 1. Write to a temp file in the same directory
    /// 2. Sync to disk
    /// 3. Rename over the original
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Other(format!("store path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string_pretty(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved {} medicines to {:?}", self.medicines.len(), path);
        Ok(())
    }

    /// Load, modify and save under an exclusive writer lock
    ///
    /// The closure's error aborts the save and leaves the file untouched.
    pub fn update<F, T>(path: &Path, f: F) -> Result<T>
    where
        F: FnOnce(&mut MedicineStore) -> Result<T>,
    {
        let lock = acquire_writer_lock(path)?;

        let mut store = Self::load(path)?;
        let outcome = f(&mut store)?;
        store.save(path)?;

        lock.unlock()?;
        Ok(outcome)
    }

    pub fn get(&self, id: Uuid) -> Option<&Medicine> {
        self.medicines.iter().find(|medicine| medicine.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Medicine> {
        self.medicines.iter_mut().find(|medicine| medicine.id == id)
    }

    /// Like [`get`](Self::get) but a missing id is `Error::NotFound`
    pub fn require(&self, id: Uuid) -> Result<&Medicine> {
        self.get(id)
            .ok_or_else(|| Error::NotFound(format!("medicine {}", id)))
    }

    /// Insert or replace by id
    pub fn upsert(&mut self, medicine: Medicine) {
        match self.get_mut(medicine.id) {
            Some(existing) => *existing = medicine,
            None => self.medicines.push(medicine),
        }
    }

    /// Active medicines, most recently created first
    pub fn active(&self) -> Vec<&Medicine> {
        let mut active: Vec<&Medicine> = self
            .medicines
            .iter()
            .filter(|medicine| medicine.active)
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        active
    }
}

/// Path of the store inside a data directory
pub fn store_path(data_dir: &Path) -> PathBuf {
    data_dir.join(STORE_FILE)
}

fn acquire_writer_lock(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let lock_path = path.with_extension("lock");
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    lock.lock_exclusive()?;
    Ok(lock)
}
