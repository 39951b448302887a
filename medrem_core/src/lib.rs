#![forbid(unsafe_code)]

//! Core domain model and scheduling logic for the medrem medication reminder.
//!
//! This crate provides:
//! - Domain types (medicines, doses, intake records, calendar rows)
//! - The dose scheduler (generate, record taken, regenerate)
//! - Medicine lifecycle operations
//! - Calendar aggregation
//! - Persistence (medicine store, intake log, CSV rollup, history)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod schedule;
pub mod medicine;
pub mod calendar;
pub mod store;
pub mod intake_log;
pub mod rollup;
pub mod history;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use schedule::{
    generate_schedule, record_dose_taken, regenerate_schedule, select_doses, DoseSelection,
    TAKE_HORIZON_DAYS,
};
pub use store::MedicineStore;
pub use intake_log::{IntakeSink, JsonlSink};
pub use history::load_recent_intakes;
