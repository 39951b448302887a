//! Month calendar aggregation of dose events.

use crate::{CalendarEntry, Error, Medicine, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::BTreeMap;

/// First instant of the month through the last second of its last day (UTC)
pub fn month_bounds(year: i32, month: u32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    if !(1..=12).contains(&month) {
        return Err(Error::invalid(format!("month must be 1-12, got {}", month)));
    }

    let start = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| Error::invalid(format!("year {} is out of range", year)))?;

    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let next = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| Error::invalid(format!("year {} is out of range", next_year)))?;

    Ok((start, next - Duration::seconds(1)))
}

/// Every dose of every active medicine scheduled within the month, in time order
pub fn month_entries(medicines: &[Medicine], year: i32, month: u32) -> Result<Vec<CalendarEntry>> {
    let (start, end) = month_bounds(year, month)?;

    let mut entries: Vec<CalendarEntry> = medicines
        .iter()
        .filter(|medicine| medicine.active)
        .flat_map(|medicine| {
            medicine
                .doses
                .iter()
                .filter(|dose| dose.scheduled_time >= start && dose.scheduled_time <= end)
                .map(move |dose| CalendarEntry {
                    medicine_id: medicine.id,
                    medicine_name: medicine.name.clone(),
                    scheduled_time: dose.scheduled_time,
                    taken: dose.taken,
                    taken_at: dose.taken_at,
                })
        })
        .collect();

    entries.sort_by(|a, b| {
        a.scheduled_time
            .cmp(&b.scheduled_time)
            .then_with(|| a.medicine_name.cmp(&b.medicine_name))
    });

    tracing::debug!("{} calendar entries for {}-{:02}", entries.len(), year, month);
    Ok(entries)
}

/// Bucket entries by calendar day
pub fn group_by_day(entries: Vec<CalendarEntry>) -> BTreeMap<NaiveDate, Vec<CalendarEntry>> {
    let mut days: BTreeMap<NaiveDate, Vec<CalendarEntry>> = BTreeMap::new();
    for entry in entries {
        days.entry(entry.scheduled_time.date_naive())
            .or_default()
            .push(entry);
    }
    days
}
