//! Dose schedule generation and regeneration.
//!
//! Three operations act on a medicine's dose list:
//! - **generate**: fixed-interval doses from a start time up to an inclusive horizon
//! - **record taken**: mark the selected dose(s) taken, then rebuild the future
//!   from "now" over a 30-day rolling horizon
//! - **regenerate**: after an edit, drop every untaken dose and rebuild from
//!   "now" over the medicine's configured duration
//!
//! Every operation is a pure function of its arguments. The current time is
//! always passed in by the caller and never read from the wall clock here.

use crate::{Dose, Error, Medicine, Result, DEFAULT_DURATION_DAYS};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

/// Rolling horizon materialized after a dose is taken, regardless of `duration_days`
pub const TAKE_HORIZON_DAYS: i64 = 30;

/// Which doses a "take" action applies to
///
/// Indices refer to positions in `Medicine::doses` at selection time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DoseSelection {
    /// The caller named an existing dose (a no-op mark if it is already taken)
    Explicit(usize),
    /// Every untaken dose scheduled at or before now (never empty)
    Backlog(Vec<usize>),
    /// Nothing is due yet: the earliest untaken future dose
    Early(usize),
    /// No untaken doses exist
    Nothing,
}

impl DoseSelection {
    /// Indices of the doses to mark taken
    pub fn indices(&self) -> &[usize] {
        match self {
            DoseSelection::Explicit(index) | DoseSelection::Early(index) => {
                std::slice::from_ref(index)
            }
            DoseSelection::Backlog(indices) => indices,
            DoseSelection::Nothing => &[],
        }
    }

    /// True when there is nothing to mark
    pub fn is_empty(&self) -> bool {
        self.indices().is_empty()
    }
}

/// Generate doses at `start, start + f, start + 2f, ...` up to and including
/// `start + duration_days`.
///
/// Fails with `InvalidParameter` when `frequency_hours <= 0` or
/// `duration_days < 0`. With valid input the result always contains `start`.
pub fn generate_schedule(
    start: DateTime<Utc>,
    frequency_hours: i64,
    duration_days: i64,
) -> Result<Vec<Dose>> {
    let step = dose_interval(frequency_hours)?;
    let end = horizon_end(start, duration_days)?;

    let doses = doses_between(start, step, end);
    tracing::debug!(
        "Generated {} doses every {}h from {} through {}",
        doses.len(),
        frequency_hours,
        start,
        end
    );
    Ok(doses)
}

/// Decide which doses a "take" at `now` marks, in priority order:
///
/// 1. `explicit` if it names an existing dose, taken or not
/// 2. every due or overdue dose (bulk catch-up)
/// 3. the earliest untaken future dose (early take)
///
/// An out-of-range `explicit` index falls through to 2 and 3.
pub fn select_doses(
    medicine: &Medicine,
    now: DateTime<Utc>,
    explicit: Option<usize>,
) -> DoseSelection {
    if let Some(index) = explicit {
        if index < medicine.doses.len() {
            return DoseSelection::Explicit(index);
        }
        tracing::debug!(
            "Dose index {} out of range for {} ({} doses), selecting due doses instead",
            index,
            medicine.name,
            medicine.doses.len()
        );
    }

    let backlog: Vec<usize> = medicine
        .doses
        .iter()
        .enumerate()
        .filter(|(_, dose)| dose.is_due(now))
        .map(|(index, _)| index)
        .collect();

    if !backlog.is_empty() {
        return DoseSelection::Backlog(backlog);
    }

    medicine
        .doses
        .iter()
        .enumerate()
        .filter(|(_, dose)| !dose.taken && dose.scheduled_time > now)
        .min_by_key(|(_, dose)| dose.scheduled_time)
        .map(|(index, _)| DoseSelection::Early(index))
        .unwrap_or(DoseSelection::Nothing)
}

/// Mark dose(s) taken at `now` and rebuild the forward schedule
///
/// Selection follows [`select_doses`]. Afterwards every untaken dose scheduled
/// after `now` is discarded and a fresh run is generated from `now + frequency`
/// through `now + 30 days`. Taken doses are kept verbatim.
///
/// When no untaken dose exists the medicine is returned unchanged.
pub fn record_dose_taken(
    medicine: &Medicine,
    now: DateTime<Utc>,
    explicit: Option<usize>,
) -> Result<Medicine> {
    let step = dose_interval(medicine.frequency_hours)?;

    let selection = select_doses(medicine, now, explicit);
    if selection.is_empty() {
        tracing::debug!("No untaken doses for {}, nothing to record", medicine.name);
        return Ok(medicine.clone());
    }

    let first = anchor_after(now, step)?;
    let end = horizon_end(now, TAKE_HORIZON_DAYS)?;

    let mut updated = medicine.clone();
    for &index in selection.indices() {
        if let Some(dose) = updated.doses.get_mut(index) {
            dose.mark_taken(now);
        }
    }

    updated
        .doses
        .retain(|dose| dose.taken || dose.scheduled_time <= now);
    merge_fresh_doses(&mut updated.doses, doses_between(first, step, end));

    tracing::info!(
        "Recorded {} dose(s) of {} at {} ({:?}), next dose at {}",
        selection.indices().len(),
        medicine.name,
        now,
        SelectionKind::from(&selection),
        first
    );
    Ok(updated)
}

/// Rebuild the schedule after an edit to frequency or duration
///
/// Keeps every taken dose, discards every untaken one, and generates from
/// `as_of + frequency` through `as_of + duration`, where duration is
/// `new_duration_days`, else the medicine's own, else 30 days.
pub fn regenerate_schedule(
    medicine: &Medicine,
    as_of: DateTime<Utc>,
    new_duration_days: Option<i64>,
) -> Result<Medicine> {
    let step = dose_interval(medicine.frequency_hours)?;
    let duration_days = new_duration_days
        .or_else(|| Some(medicine.duration_days).filter(|days| *days > 0))
        .unwrap_or(DEFAULT_DURATION_DAYS);
    let end = horizon_end(as_of, duration_days)?;
    let first = anchor_after(as_of, step)?;

    let mut updated = medicine.clone();
    if let Some(days) = new_duration_days {
        updated.duration_days = days;
    }

    let discarded = updated.doses.iter().filter(|dose| !dose.taken).count();
    updated.doses.retain(|dose| dose.taken);
    merge_fresh_doses(&mut updated.doses, doses_between(first, step, end));

    tracing::info!(
        "Regenerated schedule for {}: discarded {} untaken doses, {} doses every {}h through {}",
        medicine.name,
        discarded,
        updated.doses.iter().filter(|dose| !dose.taken).count(),
        medicine.frequency_hours,
        end
    );
    Ok(updated)
}

/// Selection policy without the indices, for log output
#[derive(Debug)]
enum SelectionKind {
    Explicit,
    Backlog,
    Early,
    Nothing,
}

impl From<&DoseSelection> for SelectionKind {
    fn from(selection: &DoseSelection) -> Self {
        match selection {
            DoseSelection::Explicit(_) => SelectionKind::Explicit,
            DoseSelection::Backlog(_) => SelectionKind::Backlog,
            DoseSelection::Early(_) => SelectionKind::Early,
            DoseSelection::Nothing => SelectionKind::Nothing,
        }
    }
}

fn dose_interval(frequency_hours: i64) -> Result<Duration> {
    if frequency_hours <= 0 {
        return Err(Error::invalid(format!(
            "frequency must be a positive number of hours, got {}",
            frequency_hours
        )));
    }
    Duration::try_hours(frequency_hours).ok_or_else(|| {
        Error::invalid(format!(
            "frequency of {} hours is out of range",
            frequency_hours
        ))
    })
}

fn horizon_end(anchor: DateTime<Utc>, duration_days: i64) -> Result<DateTime<Utc>> {
    if duration_days < 0 {
        return Err(Error::invalid(format!(
            "duration must not be negative, got {} days",
            duration_days
        )));
    }
    Duration::try_days(duration_days)
        .and_then(|span| anchor.checked_add_signed(span))
        .ok_or_else(|| {
            Error::invalid(format!(
                "duration of {} days from {} is out of range",
                duration_days, anchor
            ))
        })
}

fn anchor_after(at: DateTime<Utc>, step: Duration) -> Result<DateTime<Utc>> {
    at.checked_add_signed(step)
        .ok_or_else(|| Error::invalid(format!("next dose after {} is out of range", at)))
}

/// Doses every `step` from `first` while `<= end`
fn doses_between(first: DateTime<Utc>, step: Duration, end: DateTime<Utc>) -> Vec<Dose> {
    let mut doses = Vec::new();
    let mut next = Some(first);
    while let Some(at) = next.filter(|at| *at <= end) {
        doses.push(Dose::scheduled(at));
        next = at.checked_add_signed(step);
    }
    doses
}

/// Add generated doses to the kept ones and restore ascending order.
/// A generated slot landing on a kept dose's time is dropped.
fn merge_fresh_doses(doses: &mut Vec<Dose>, fresh: Vec<Dose>) {
    let occupied: BTreeSet<DateTime<Utc>> = doses.iter().map(|dose| dose.scheduled_time).collect();
    doses.extend(
        fresh
            .into_iter()
            .filter(|dose| !occupied.contains(&dose.scheduled_time)),
    );
    doses.sort_by_key(|dose| dose.scheduled_time);
}
