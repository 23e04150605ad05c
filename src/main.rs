use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slotguard::auth::{Credential, TOKEN_ENV};
use slotguard::booking::{BookingFlow, UnverifiedPolicy};
use slotguard::config::Config;
use slotguard::detector::ConflictDetector;
use slotguard::model::CandidateSchedule;
use slotguard::store::HttpReservationStore;

/// Check club reservations for scheduling conflicts against the booking API.
#[derive(Parser, Debug)]
#[command(name = "slotguard", version, about, long_about = None)]
struct Args {
    /// Base URL of the reservation API (overrides SLOTGUARD_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Bearer token for the session
    #[arg(long, global = true, env = TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    /// User whose reservations are checked (default: the token's own user)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Request timeout in milliseconds (overrides SLOTGUARD_TIMEOUT_MS)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a slot for conflicts without booking it
    Check {
        #[command(flatten)]
        slot: SlotArgs,
        /// Exit non-zero when the store could not be reached
        #[arg(long)]
        strict: bool,
    },
    /// Check a slot and book it if it is clear
    Book {
        #[command(flatten)]
        slot: SlotArgs,
        /// Refuse to book when the check cannot be verified
        #[arg(long)]
        block_unverified: bool,
    },
    /// Cancel an existing reservation
    Cancel {
        /// Reservation id
        reservation_id: String,
    },
}

#[derive(clap::Args, Debug)]
struct SlotArgs {
    /// Activity identifier
    activity: String,
    /// Calendar date, e.g. 2024-06-10
    date: String,
    /// Start time, HH:MM (24h)
    start: String,
    /// End time, HH:MM (24h)
    end: String,
}

impl SlotArgs {
    fn schedule(&self) -> CandidateSchedule {
        CandidateSchedule::new(&self.date, &self.start, &self.end)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(url) = args.api_url {
        config.api_url = url;
    }
    if let Some(ms) = args.timeout_ms {
        config.timeout = Duration::from_millis(ms);
    }
    slotguard::observability::init(config.metrics_port)?;

    let credential = args.token.and_then(Credential::bearer);
    let user = args.user.as_deref();

    let store = Arc::new(HttpReservationStore::new(&config.api_url, config.timeout)?);
    let detector = Arc::new(ConflictDetector::new(store.clone(), config.detector_options()));
    info!("  api: {}", store.base_url());
    info!("  status policy: {:?}", config.status_policy);

    match args.command {
        Command::Check { slot, strict } => {
            let outcome = detector
                .check_for_conflicts(&slot.activity, &slot.schedule(), user, credential.as_ref())
                .await?;
            print_json(&outcome)?;
            if strict && !outcome.is_verified() {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Book { slot, block_unverified } => {
            let policy = if block_unverified {
                UnverifiedPolicy::Block
            } else {
                config.unverified_policy
            };
            let flow = BookingFlow::new(detector, store, policy);
            let decision = flow
                .book(credential.as_ref(), user, &slot.activity, &slot.schedule())
                .await?;
            print_json(&decision)?;
        }
        Command::Cancel { reservation_id } => {
            let flow = BookingFlow::new(detector, store, config.unverified_policy);
            let record = flow.cancel(credential.as_ref(), &reservation_id).await?;
            print_json(&record)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
