//! bookd - operational CLI for the appointment coordination service.
//!
//! Runs the periodic batch jobs (pending-confirmation expiry, no-show risk
//! sweep) and the operator triage queries against a bookd database. The
//! marketplace side is loaded from a fixture file; wallet postings are
//! printed rather than sent.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bookd_core::appointment::{Actor, ActorRole, AppointmentService, SlotQuery};
use bookd_core::config::BookdConfig;
use bookd_core::external::{
    CreditWallet, LedgerEntryType, NullNotifier, RequestSnapshot, StaticDirectory, WalletError,
};
use bookd_core::risk::{QueueFilter, QueueStatus, RiskLevel};
use bookd_core::store::Store;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// bookd - appointment coordination operations
#[derive(Parser, Debug)]
#[command(name = "bookd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the bookd database
    #[arg(long, default_value = "bookd.db")]
    db: PathBuf,

    /// Path to the service configuration file (TOML); defaults apply when
    /// absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a marketplace fixture file (providers and requests)
    #[arg(long)]
    requests: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Expire pending appointments past their confirmation deadline
    Expire {
        /// Maximum rows to process in this run
        #[arg(long, default_value_t = 200)]
        batch_size: u32,
    },

    /// Recompute no-show risk for upcoming appointments
    RiskSweep {
        /// Maximum rows to process in this run
        #[arg(long, default_value_t = 200)]
        batch_size: u32,
    },

    /// List the no-show triage queue
    #[command(alias = "q")]
    Queue {
        /// Filter by status (open, in_progress, resolved)
        #[arg(long)]
        status: Option<String>,

        /// Filter by risk level (low, medium, high)
        #[arg(long)]
        level: Option<String>,

        /// Filter by city
        #[arg(long)]
        city: Option<String>,

        /// Filter by service category
        #[arg(long)]
        category: Option<String>,

        /// Page size
        #[arg(long, default_value_t = 50)]
        limit: u32,

        /// Page offset
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Show bookable slots for a provider
    Slots {
        /// Provider id
        #[arg(long)]
        provider: Uuid,

        /// Range start (RFC 3339, e.g. 2026-08-10T00:00:00Z)
        #[arg(long)]
        from: String,

        /// Range end (RFC 3339)
        #[arg(long)]
        to: String,

        /// Slot granularity in minutes
        #[arg(long)]
        slot_minutes: Option<u32>,
    },
}

/// Marketplace fixture: providers and request snapshots.
#[derive(Debug, serde::Deserialize, Default)]
struct Fixture {
    #[serde(default)]
    providers: Vec<Uuid>,
    #[serde(default)]
    requests: Vec<RequestSnapshot>,
}

/// Wallet that prints postings instead of reaching a real ledger.
struct PrintingWallet;

impl CreditWallet for PrintingWallet {
    fn append(
        &self,
        provider_id: Uuid,
        entry_type: LedgerEntryType,
        amount: Decimal,
        reason: &str,
    ) -> Result<(), WalletError> {
        println!("ledger: {} {} to provider {provider_id} ({reason})", entry_type.as_str(), amount);
        Ok(())
    }
}

fn parse_utc(value: &str, flag: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("--{flag} must be an RFC 3339 timestamp, got '{value}'"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    let config = match &cli.config {
        Some(path) => BookdConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => BookdConfig::default(),
    };

    let directory = Arc::new(StaticDirectory::new());
    if let Some(path) = &cli.requests {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        let fixture: Fixture =
            toml::from_str(&content).context("failed to parse marketplace fixture")?;
        for provider in fixture.providers {
            directory.add_provider(provider);
        }
        for request in fixture.requests {
            directory.add_request(request);
        }
    }

    let store = Store::open(&cli.db)
        .with_context(|| format!("failed to open database {}", cli.db.display()))?;
    let service = AppointmentService::new(
        store,
        config,
        directory,
        Arc::new(PrintingWallet),
        Arc::new(NullNotifier),
    )
    .context("failed to build the appointment service")?;

    let system = Actor::new(Uuid::nil(), ActorRole::System);
    let operator = Actor::new(Uuid::nil(), ActorRole::Admin);

    match cli.command {
        Commands::Expire { batch_size } => {
            let processed = service.expire_pending(system, Utc::now(), batch_size)?;
            println!("expired {processed} pending appointment(s)");
        }

        Commands::RiskSweep { batch_size } => {
            let processed = service.evaluate_no_show_risk(system, Utc::now(), batch_size)?;
            println!("assessed {processed} appointment(s)");
        }

        Commands::Queue { status, level, city, category, limit, offset } => {
            let status = status
                .as_deref()
                .map(|s| {
                    QueueStatus::parse(s)
                        .with_context(|| format!("unknown queue status '{s}'"))
                })
                .transpose()?;
            let level = level
                .as_deref()
                .map(|l| {
                    RiskLevel::parse(l).with_context(|| format!("unknown risk level '{l}'"))
                })
                .transpose()?;

            let page = service.list_queue(
                operator,
                &QueueFilter {
                    status,
                    risk_level: level,
                    city,
                    category,
                    limit: Some(limit),
                    offset: Some(offset),
                },
            )?;

            println!(
                "{} item(s), showing {} (offset {offset})",
                page.total,
                page.items.len()
            );
            for item in page.items {
                println!(
                    "{}  {:>6}  score {:>3}  {}  appointment {}  [{}]",
                    item.last_detected_at_utc.format("%Y-%m-%d %H:%M"),
                    item.risk_level.as_str(),
                    item.score,
                    item.status.as_str(),
                    item.appointment_id,
                    item.reasons_csv,
                );
            }
        }

        Commands::Slots { provider, from, to, slot_minutes } => {
            let from_utc = parse_utc(&from, "from")?;
            let to_utc = parse_utc(&to, "to")?;
            let slots = service.available_slots(
                operator,
                &SlotQuery { provider_id: provider, from_utc, to_utc, slot_minutes },
            )?;

            println!("{} slot(s)", slots.len());
            for slot in slots {
                println!(
                    "{} -> {}",
                    slot.window_start_utc.format("%Y-%m-%d %H:%M"),
                    slot.window_end_utc.format("%H:%M")
                );
            }
        }
    }

    Ok(())
}
