use chrono::{DateTime, Datelike, Utc};
use clap::{Parser, Subcommand};
use medrem_core::intake_log::newly_taken;
use medrem_core::*;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "medrem")]
#[command(about = "Medication reminder and dose schedule tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Act as if the current time were this RFC 3339 timestamp
    #[arg(long, global = true)]
    now: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a medicine and generate its dose schedule
    Add {
        #[arg(long)]
        name: String,

        /// Hours between doses
        #[arg(long, allow_negative_numbers = true)]
        frequency_hours: i64,

        /// Days to schedule ahead (defaults to the configured duration)
        #[arg(long, allow_negative_numbers = true)]
        duration_days: Option<i64>,

        /// First dose time (RFC 3339), defaults to now
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        #[arg(long)]
        description: Option<String>,
    },

    /// List active medicines (default)
    List,

    /// Show a medicine and its full dose schedule
    Show { id: Uuid },

    /// Mark due doses taken (or the next one, if nothing is due)
    Take {
        id: Uuid,

        /// Take this specific dose (index as printed by `show`)
        #[arg(long)]
        dose: Option<usize>,
    },

    /// Edit a medicine
    Edit {
        id: Uuid,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long, allow_negative_numbers = true)]
        frequency_hours: Option<i64>,

        #[arg(long, allow_negative_numbers = true)]
        duration_days: Option<i64>,

        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Rebuild all untaken doses from now
        #[arg(long)]
        regenerate: bool,
    },

    /// Stop tracking a medicine (its history is kept)
    Remove { id: Uuid },

    /// Show dose events for a month, grouped by day
    Calendar {
        #[arg(long)]
        year: Option<i32>,

        #[arg(long)]
        month: Option<u32>,
    },

    /// Show recently taken doses
    History {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },

    /// Roll up the intake log to CSV
    Rollup {
        /// Clean up processed logs after rollup
        #[arg(long)]
        cleanup: bool,
    },
}

/// File locations inside the data directory
struct DataPaths {
    store: PathBuf,
    log_dir: PathBuf,
    intake_log: PathBuf,
    history_csv: PathBuf,
}

impl DataPaths {
    fn new(data_dir: &Path) -> Self {
        let log_dir = data_dir.join("wal");
        Self {
            store: store::store_path(data_dir),
            intake_log: log_dir.join("intake.wal"),
            log_dir,
            history_csv: data_dir.join("intake_history.csv"),
        }
    }
}

fn main() -> Result<()> {
    medrem_core::logging::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());
    let paths = DataPaths::new(&data_dir);
    let now = cli.now.unwrap_or_else(Utc::now);
    tracing::debug!("Data directory {:?}, clock {}", data_dir, now);

    match cli.command.unwrap_or(Commands::List) {
        Commands::Add {
            name,
            frequency_hours,
            duration_days,
            start,
            description,
        } => {
            let new = NewMedicine {
                name,
                description,
                frequency_hours,
                duration_days,
                start_time: start.unwrap_or(now),
            };
            cmd_add(&paths, &config, now, new)
        }
        Commands::List => cmd_list(&paths, now),
        Commands::Show { id } => cmd_show(&paths, id, now),
        Commands::Take { id, dose } => cmd_take(&paths, id, now, dose),
        Commands::Edit {
            id,
            name,
            description,
            frequency_hours,
            duration_days,
            start,
            regenerate,
        } => {
            let changes = MedicineUpdate {
                name,
                description,
                frequency_hours,
                duration_days,
                start_time: start,
                active: None,
                regenerate,
            };
            cmd_edit(&paths, id, now, changes)
        }
        Commands::Remove { id } => cmd_remove(&paths, id, now),
        Commands::Calendar { year, month } => cmd_calendar(
            &paths,
            year.unwrap_or_else(|| now.year()),
            month.unwrap_or_else(|| now.month()),
        ),
        Commands::History { days } => cmd_history(&paths, now, days),
        Commands::Rollup { cleanup } => cmd_rollup(&paths, cleanup),
    }
}

fn cmd_add(paths: &DataPaths, config: &Config, now: DateTime<Utc>, new: NewMedicine) -> Result<()> {
    let medicine = Medicine::create(new, config.schedule.default_duration_days, now)?;

    MedicineStore::update(&paths.store, |store| {
        store.upsert(medicine.clone());
        Ok(())
    })?;

    println!("✓ Added {} ({})", medicine.name, medicine.id);
    println!(
        "  Every {}h for {} days: {} doses scheduled",
        medicine.frequency_hours,
        medicine.duration_days,
        medicine.doses.len()
    );
    if let Some(first) = medicine.next_due() {
        println!("  First dose: {}", fmt_time(first));
    }

    Ok(())
}

fn cmd_list(paths: &DataPaths, now: DateTime<Utc>) -> Result<()> {
    let store = MedicineStore::load(&paths.store)?;
    let active = store.active();

    if active.is_empty() {
        println!("No active medicines.");
        return Ok(());
    }

    for medicine in active {
        let adherence = medicine.adherence(now);
        println!("{}  {}", medicine.id, medicine.name);
        println!(
            "  Every {}h · {} taken · {} overdue · {} upcoming",
            medicine.frequency_hours, adherence.taken, adherence.missed, adherence.upcoming
        );
        if let Some(next) = adherence.next_due {
            println!("  Next dose: {}", fmt_time(next));
        }
    }

    Ok(())
}

fn cmd_show(paths: &DataPaths, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    let store = MedicineStore::load(&paths.store)?;
    let medicine = store.require(id)?;

    println!("{}{}", medicine.name, if medicine.active { "" } else { " (removed)" });
    if let Some(ref description) = medicine.description {
        println!("  {}", description);
    }
    println!(
        "  Every {}h, scheduled {} days ahead, started {}",
        medicine.frequency_hours,
        medicine.duration_days,
        fmt_time(medicine.start_time)
    );
    println!();

    for (index, dose) in medicine.doses.iter().enumerate() {
        let status = match dose.taken_at {
            Some(taken_at) if dose.taken => format!("✓ taken {}", fmt_time(taken_at)),
            _ if dose.is_due(now) => "! overdue".to_string(),
            _ => "· upcoming".to_string(),
        };
        println!("  [{:>3}] {}  {}", index, fmt_time(dose.scheduled_time), status);
    }

    Ok(())
}

fn cmd_take(paths: &DataPaths, id: Uuid, now: DateTime<Utc>, dose: Option<usize>) -> Result<()> {
    // Intakes are logged before the store is saved; a failed append leaves the doses untaken
    let (after, records) = MedicineStore::update(&paths.store, |store| {
        let before = store.require(id)?;
        let after = medicine::take(before, now, dose)?;
        let records = newly_taken(before, &after);

        let mut sink = JsonlSink::new(&paths.intake_log);
        for record in &records {
            sink.append(record)?;
        }

        store.upsert(after.clone());
        Ok((after, records))
    })?;

    if records.is_empty() {
        println!("Nothing to take: no untaken dose of {} was selected.", after.name);
        return Ok(());
    }

    println!("✓ Took {} dose(s) of {}", records.len(), after.name);
    for record in &records {
        println!("  → scheduled {}", fmt_time(record.scheduled_time));
    }
    if let Some(next) = after.next_due() {
        println!("  Next dose: {}", fmt_time(next));
    }

    Ok(())
}

fn cmd_edit(paths: &DataPaths, id: Uuid, now: DateTime<Utc>, changes: MedicineUpdate) -> Result<()> {
    let regenerate = changes.regenerate;
    let updated = MedicineStore::update(&paths.store, |store| {
        let updated = medicine::update(store.require(id)?, now, changes)?;
        store.upsert(updated.clone());
        Ok(updated)
    })?;

    println!("✓ Updated {}", updated.name);
    if regenerate {
        let upcoming = updated.doses.iter().filter(|d| !d.taken).count();
        println!("  Schedule regenerated: {} upcoming doses", upcoming);
    }

    Ok(())
}

fn cmd_remove(paths: &DataPaths, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    let name = MedicineStore::update(&paths.store, |store| {
        let medicine = store
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("medicine {}", id)))?;
        medicine.deactivate(now);
        Ok(medicine.name.clone())
    })?;

    println!("✓ Removed {}", name);
    Ok(())
}

fn cmd_calendar(paths: &DataPaths, year: i32, month: u32) -> Result<()> {
    let store = MedicineStore::load(&paths.store)?;
    let entries = calendar::month_entries(&store.medicines, year, month)?;

    println!("Calendar {}-{:02}", year, month);
    if entries.is_empty() {
        println!("  No doses scheduled.");
        return Ok(());
    }

    for (day, entries) in calendar::group_by_day(entries) {
        println!();
        println!("  {}", day);
        for entry in entries {
            let mark = if entry.taken { "✓" } else { "·" };
            println!(
                "    {}  {} {}",
                entry.scheduled_time.format("%H:%M"),
                mark,
                entry.medicine_name
            );
        }
    }

    Ok(())
}

fn cmd_history(paths: &DataPaths, now: DateTime<Utc>, days: i64) -> Result<()> {
    let records = load_recent_intakes(&paths.intake_log, &paths.history_csv, now, days)?;

    if records.is_empty() {
        println!("No doses taken in the last {} days.", days);
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {} (scheduled {})",
            fmt_time(record.taken_at),
            record.medicine_name,
            fmt_time(record.scheduled_time)
        );
    }

    Ok(())
}

fn cmd_rollup(paths: &DataPaths, cleanup: bool) -> Result<()> {
    if !paths.intake_log.exists() {
        println!("No intake log found - nothing to roll up.");
        return Ok(());
    }

    let count = rollup::intake_log_to_csv_and_archive(&paths.intake_log, &paths.history_csv)?;

    println!("✓ Rolled up {} intakes to CSV", count);
    println!("  CSV: {}", paths.history_csv.display());

    if cleanup {
        let cleaned = rollup::cleanup_processed_logs(&paths.log_dir)?;
        if cleaned > 0 {
            println!("✓ Cleaned up {} processed intake logs", cleaned);
        }
    }

    Ok(())
}

fn fmt_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}
