use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rollcall_core::{DescriptorStream, MatchResult};
use rollcall_store::{RecordOutcome, Store};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;
use engine::spawn_engine;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity from a captured face descriptor
    Enroll {
        /// Display name of the person
        #[arg(short, long)]
        name: String,
        /// Department, class or group
        #[arg(short, long)]
        department: Option<String>,
        /// Descriptor frames, one per line (default: stdin)
        #[arg(short, long)]
        frames: Option<PathBuf>,
    },
    /// Identify a face and record attendance
    Identify {
        /// Descriptor frames, one per line (default: stdin)
        #[arg(short, long)]
        frames: Option<PathBuf>,
        /// Override the configured match threshold
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Report the decision without recording attendance
        #[arg(long)]
        dry_run: bool,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity and its attendance
    Remove {
        /// Identity ID to remove
        id: String,
    },
    /// Show attendance for a day
    Report {
        /// Day as YYYY-MM-DD (default: today, UTC)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Show configuration and catalog status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Enroll {
            name,
            department,
            frames,
        } => enroll(&config, &name, department.as_deref(), frames.as_deref()).await,
        Commands::Identify {
            frames,
            threshold,
            dry_run,
        } => identify(&config, frames.as_deref(), threshold, dry_run).await,
        Commands::List => list(&config),
        Commands::Remove { id } => remove(&config, &id),
        Commands::Report { date } => {
            report(&config, date.unwrap_or_else(|| Utc::now().date_naive()))
        }
        Commands::Status => status(&config),
    }
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))
}

fn open_frames(path: Option<&Path>) -> Result<DescriptorStream<Box<dyn BufRead + Send>>> {
    let reader: Box<dyn BufRead + Send> = match path {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("opening frames {}", path.display()))?;
            Box::new(std::io::BufReader::new(file))
        }
        None => Box::new(std::io::BufReader::new(std::io::stdin())),
    };
    Ok(DescriptorStream::new(reader))
}

async fn enroll(
    config: &Config,
    name: &str,
    department: Option<&str>,
    frames: Option<&Path>,
) -> Result<()> {
    let store = open_store(config)?;
    let engine = spawn_engine(open_frames(frames)?, config.embedding_dim)?;

    let capture = engine
        .capture(config.capture_attempts)
        .await
        .context("capturing face")?;
    tracing::debug!(attempts = capture.attempts, "face captured for enrollment");
    let record = store.enroll(name, department, &capture.embedding)?;

    println!("Enrolled {} as {}", record.identity.name, record.identity.id);
    Ok(())
}

async fn identify(
    config: &Config,
    frames: Option<&Path>,
    threshold: Option<f64>,
    dry_run: bool,
) -> Result<()> {
    let threshold = threshold.unwrap_or(config.match_threshold);
    config::validate_threshold(threshold)?;

    let store = open_store(config)?;
    let catalog = store.catalog()?;
    if !catalog.skipped.is_empty() {
        tracing::warn!(count = catalog.skipped.len(), "catalog rows with unreadable descriptors");
    }

    let engine = spawn_engine(open_frames(frames)?, config.embedding_dim)?;
    let outcome = engine
        .identify(catalog.records, threshold, config.capture_attempts)
        .await
        .context("identifying face")?;
    tracing::debug!(attempts = outcome.attempts, "identify finished");

    println!("{}", outcome.report.result);
    if dry_run {
        return Ok(());
    }
    match record_decision(&store, &outcome.report.result, Utc::now())? {
        Some(RecordOutcome::Recorded(r)) => {
            println!("Attendance recorded for {} on {}", r.name, r.attended_on)
        }
        Some(RecordOutcome::AlreadyRecorded(r)) => {
            println!("{} already marked present on {}", r.name, r.attended_on)
        }
        None => {}
    }
    Ok(())
}

/// Persist a match decision as attendance. Unrecognized faces are not recorded.
fn record_decision(
    store: &Store,
    result: &MatchResult,
    at: DateTime<Utc>,
) -> Result<Option<RecordOutcome>> {
    match result {
        MatchResult::Matched {
            identity,
            distance,
            confidence,
        } => Ok(Some(store.record_attendance(identity, *distance, *confidence, at)?)),
        MatchResult::Unmatched => Ok(None),
    }
}

fn list(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let catalog = store.catalog()?;
    for record in &catalog.records {
        let line = serde_json::json!({
            "id": record.identity.id,
            "name": record.identity.name,
            "department": record.identity.department,
            "dim": record.embedding.len(),
            "created_at": record.created_at,
        });
        println!("{line}");
    }
    for id in &catalog.skipped {
        tracing::warn!(id = %id, "identity has an unreadable descriptor");
    }
    Ok(())
}

fn remove(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config)?;
    if store.remove_identity(id)? {
        println!("Removed {id}");
        Ok(())
    } else {
        anyhow::bail!("no identity with id {id}")
    }
}

fn report(config: &Config, day: NaiveDate) -> Result<()> {
    let store = open_store(config)?;
    for record in store.attendance_on(day)? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let status = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "db_path": config.db_path,
        "match_threshold": config.match_threshold,
        "embedding_dim": config.embedding_dim,
        "capture_attempts": config.capture_attempts,
        "identities": store.count_identities()?,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
