//! Core domain types for medrem.
//!
//! This module defines the data model the scheduler operates on:
//! - Medicines and their dose lists
//! - Individual dose events
//! - Intake log records and calendar rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Duration applied when a medicine is created without one
pub const DEFAULT_DURATION_DAYS: i64 = 30;

/// Longest schedule a medicine may be created or edited with (about ten years)
pub const MAX_DURATION_DAYS: i64 = 3650;

// ============================================================================
// Dose
// ============================================================================

/// One scheduled administration of a medicine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dose {
    pub scheduled_time: DateTime<Utc>,
    #[serde(default)]
    pub taken: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
}

impl Dose {
    /// A fresh, untaken dose at `scheduled_time`
    pub fn scheduled(scheduled_time: DateTime<Utc>) -> Self {
        Self {
            scheduled_time,
            taken: false,
            taken_at: None,
        }
    }

    /// Mark this dose taken at `at`. Already-taken doses keep their original `taken_at`.
    pub fn mark_taken(&mut self, at: DateTime<Utc>) -> bool {
        if self.taken {
            return false;
        }
        self.taken = true;
        self.taken_at = Some(at);
        true
    }

    /// Untaken and scheduled at or before `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.taken && self.scheduled_time <= now
    }
}

// ============================================================================
// Medicine
// ============================================================================

/// One medication tracked by the user
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Medicine {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Hours between doses
    pub frequency_hours: i64,
    /// Days the schedule extends forward from its anchor
    #[serde(default = "default_duration_days")]
    pub duration_days: i64,
    pub start_time: DateTime<Utc>,
    /// Always sorted by `scheduled_time` ascending
    #[serde(default)]
    pub doses: Vec<Dose>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_duration_days() -> i64 {
    DEFAULT_DURATION_DAYS
}

fn default_active() -> bool {
    true
}

/// Parameters for creating a medicine
#[derive(Clone, Debug)]
pub struct NewMedicine {
    pub name: String,
    pub description: Option<String>,
    pub frequency_hours: i64,
    /// Falls back to the configured default when absent
    pub duration_days: Option<i64>,
    pub start_time: DateTime<Utc>,
}

/// Optional edits applied by [`crate::medicine::update`]
#[derive(Clone, Debug, Default)]
pub struct MedicineUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub frequency_hours: Option<i64>,
    pub duration_days: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub active: Option<bool>,
    /// Rebuild the untaken part of the schedule after applying the edits
    pub regenerate: bool,
}

/// Snapshot of how a medicine's schedule stands at a point in time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Adherence {
    pub taken: usize,
    /// Untaken doses at or before `now`
    pub missed: usize,
    /// Untaken doses after `now`
    pub upcoming: usize,
    /// Earliest untaken dose, overdue or not
    pub next_due: Option<DateTime<Utc>>,
}

// ============================================================================
// Log and calendar rows
// ============================================================================

/// A dose transition to "taken", as written to the intake log
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IntakeRecord {
    pub id: Uuid,
    pub medicine_id: Uuid,
    pub medicine_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
}

/// One dose event in the calendar view
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CalendarEntry {
    pub medicine_id: Uuid,
    pub medicine_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub taken: bool,
    pub taken_at: Option<DateTime<Utc>>,
}
