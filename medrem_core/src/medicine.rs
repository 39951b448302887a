//! Medicine lifecycle: create, take, edit, soft delete.
//!
//! These wrap the scheduler with the bookkeeping a stored record needs
//! (validation, `updated_at`, the active flag). The caller supplies `now`.

use crate::schedule::{generate_schedule, record_dose_taken, regenerate_schedule};
use crate::{Adherence, Error, Medicine, MedicineUpdate, NewMedicine, Result, MAX_DURATION_DAYS};
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl Medicine {
    /// Create a medicine and its initial schedule anchored at `start_time`
    ///
    /// `default_duration_days` applies when `new.duration_days` is absent.
    pub fn create(
        new: NewMedicine,
        default_duration_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let name = validate_name(&new.name)?;
        let duration_days = new.duration_days.unwrap_or(default_duration_days);
        validate_duration(duration_days)?;

        let doses = generate_schedule(new.start_time, new.frequency_hours, duration_days)?;

        let medicine = Medicine {
            id: Uuid::new_v4(),
            name,
            description: clean_description(new.description),
            frequency_hours: new.frequency_hours,
            duration_days,
            start_time: new.start_time,
            doses,
            active: true,
            created_at: now,
            updated_at: now,
        };

        tracing::info!(
            "Created medicine {} ({}) with {} doses",
            medicine.name,
            medicine.id,
            medicine.doses.len()
        );
        Ok(medicine)
    }

    /// Soft delete: the record stays but drops out of listings
    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.updated_at = now;
        tracing::info!("Deactivated medicine {} ({})", self.name, self.id);
    }

    /// Earliest untaken dose, overdue or not
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.doses
            .iter()
            .filter(|dose| !dose.taken)
            .map(|dose| dose.scheduled_time)
            .min()
    }

    pub fn adherence(&self, now: DateTime<Utc>) -> Adherence {
        let taken = self.doses.iter().filter(|dose| dose.taken).count();
        let missed = self.doses.iter().filter(|dose| dose.is_due(now)).count();
        Adherence {
            taken,
            missed,
            upcoming: self.doses.len() - taken - missed,
            next_due: self.next_due(),
        }
    }
}

/// Record a "take" action and refresh `updated_at` if anything changed
pub fn take(medicine: &Medicine, now: DateTime<Utc>, dose_index: Option<usize>) -> Result<Medicine> {
    let mut updated = record_dose_taken(medicine, now, dose_index)?;
    if updated.doses != medicine.doses {
        updated.updated_at = now;
    }
    Ok(updated)
}

/// Apply edits, then optionally regenerate the untaken schedule as of `now`
///
/// All edits are validated before any is applied; on error the input is untouched.
pub fn update(medicine: &Medicine, now: DateTime<Utc>, changes: MedicineUpdate) -> Result<Medicine> {
    let name = changes.name.as_deref().map(validate_name).transpose()?;
    if let Some(hours) = changes.frequency_hours {
        validate_frequency(hours)?;
    }
    if let Some(days) = changes.duration_days {
        validate_duration(days)?;
    }

    let mut updated = medicine.clone();
    if let Some(name) = name {
        updated.name = name;
    }
    if changes.description.is_some() {
        updated.description = clean_description(changes.description);
    }
    if let Some(hours) = changes.frequency_hours {
        updated.frequency_hours = hours;
    }
    if let Some(days) = changes.duration_days {
        updated.duration_days = days;
    }
    if let Some(start_time) = changes.start_time {
        updated.start_time = start_time;
    }
    if let Some(active) = changes.active {
        updated.active = active;
    }

    if changes.regenerate {
        updated = regenerate_schedule(&updated, now, None)?;
    }

    updated.updated_at = now;
    tracing::debug!("Updated medicine {} ({})", updated.name, updated.id);
    Ok(updated)
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid("medicine name must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn validate_frequency(hours: i64) -> Result<()> {
    if hours <= 0 {
        return Err(Error::invalid(format!(
            "frequency must be a positive number of hours, got {}",
            hours
        )));
    }
    Ok(())
}

fn validate_duration(days: i64) -> Result<()> {
    if days < 1 {
        return Err(Error::invalid(format!(
            "duration must be at least one day, got {}",
            days
        )));
    }
    if days > MAX_DURATION_DAYS {
        return Err(Error::invalid(format!(
            "duration must be at most {} days, got {}",
            MAX_DURATION_DAYS, days
        )));
    }
    Ok(())
}

/// Trim, and treat a blank description as none
fn clean_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}
