use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use daybook_sync::{
    check_insert_dates, load_day, load_records_json, load_targets, protected_ids,
    protected_in_dump, setup_database, ApplyOutcome, Emitter, RawRecord, RawTarget,
    ReconciliationEngine, Settings, SqlScript, SqliteEmitter,
};

#[derive(Parser)]
#[command(name = "daybook-sync")]
#[command(about = "Reconcile a stored day of bank transactions with its target sequence", long_about = None)]
struct Cli {
    /// Settings JSON (table/column labels, insert defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the transactions and events tables
    InitDb {
        #[arg(long)]
        db: PathBuf,
    },

    /// Compute the plan for one day and print it without applying it
    Plan {
        #[command(flatten)]
        day: DayArgs,

        /// SQLite database holding the stored day
        #[arg(long, required_unless_present = "stored")]
        db: Option<PathBuf>,

        /// Stored day as a JSON array instead of a database
        #[arg(long, conflicts_with = "db")]
        stored: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Compute the plan and apply it in a single transaction
    Apply {
        #[command(flatten)]
        day: DayArgs,

        #[arg(long)]
        db: PathBuf,

        /// Name recorded in the audit event
        #[arg(long, default_value = "daybook-sync")]
        actor: String,
    },
}

#[derive(Args)]
struct DayArgs {
    /// Day to reconcile (value of the date column)
    #[arg(long)]
    date: String,

    /// Target sequence (.csv or .json)
    #[arg(long)]
    target: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Sql,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    init_tracing(&settings.log_level);

    match cli.cmd {
        Commands::InitDb { db } => {
            let conn = open(&db)?;
            setup_database(&conn, &settings)?;
            println!("✓ Database initialized: {}", db.display());
        }

        Commands::Plan {
            day,
            db,
            stored,
            format,
        } => {
            let targets = load_targets(&day.target)?;
            let (records, guard) = match (db, stored) {
                (Some(db), _) => {
                    let conn = open(&db)?;
                    (
                        load_day(&conn, &settings, &day.date)?,
                        protected_ids(&conn, &settings, &day.date)?,
                    )
                }
                (None, Some(path)) => {
                    let records = load_records_json(&path)?;
                    let guard = protected_in_dump(&records, &settings);
                    (records, guard)
                }
                (None, None) => bail!("either --db or --stored is required"),
            };
            check_day_len(&settings, &records, &targets)?;

            let plan = engine(&settings).reconcile(&records, &targets, &guard)?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
                OutputFormat::Sql => {
                    check_insert_dates(&plan, &day.date)?;
                    print!("{}", SqlScript::new(&settings).for_day(&day.date).render(&plan))
                }
            }
        }

        Commands::Apply { day, db, actor } => {
            let targets = load_targets(&day.target)?;
            let mut conn = open(&db)?;
            let records = load_day(&conn, &settings, &day.date)?;
            let guard = protected_ids(&conn, &settings, &day.date)?;
            check_day_len(&settings, &records, &targets)?;

            let plan = engine(&settings).reconcile(&records, &targets, &guard)?;

            let outcome = SqliteEmitter::new(&mut conn, &settings, &day.date)
                .with_actor(actor)
                .apply_all(&plan)?;

            match outcome {
                ApplyOutcome::NoChanges => println!("✓ {} already up to date", day.date),
                ApplyOutcome::Applied { .. } => println!("✅ {}: {}", day.date, plan.summary()),
            }
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn open(path: &Path) -> Result<Connection> {
    Connection::open(path).with_context(|| format!("Failed to open database: {}", path.display()))
}

fn engine(settings: &Settings) -> ReconciliationEngine {
    ReconciliationEngine::with_defaults(settings.default_attributes.clone())
}

/// Alignment is O(N·M); refuse oversized days instead of stalling
fn check_day_len(settings: &Settings, records: &[RawRecord], targets: &[RawTarget]) -> Result<()> {
    let longest = records.len().max(targets.len());
    if longest > settings.max_day_len {
        bail!(
            "Day has {} records, limit is {} (max_day_len)",
            longest,
            settings.max_day_len
        );
    }
    Ok(())
}
