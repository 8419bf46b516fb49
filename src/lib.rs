pub mod auth;
pub mod commands;
pub mod db;
pub mod export;
pub mod notify;
pub mod passes;
pub mod reports;
pub mod settings;
mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use commands::AppState;
use db::{Database, MemoryPassStore, PassStore};
use notify::PassNotifier;
use passes::{ApprovePolicy, NewPass, Outcome, PassService, VisitRequest};
use reports::DashboardRange;
use settings::{Settings, SettingsStore};

/// CarePass: visitor passes from request to check-out
#[derive(Parser, Debug)]
#[command(name = "carepass")]
#[command(about = "Local-first visitor pass management", long_about = None)]
struct Cli {
    /// Directory holding the pass database and settings (defaults to
    /// CAREPASS_DATA_DIR, then the per-user platform data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep passes in memory only; nothing is written to disk
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Demo user to act as, e.g. reception@demo
    #[arg(long = "as", global = true, env = "CAREPASS_USER")]
    user: Option<String>,

    /// Password of the demo user
    #[arg(long, global = true, env = "CAREPASS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a pass at the front desk (auto-approved)
    Create(CreateArgs),
    /// Submit a self-service visit request (no login needed)
    Request(RequestArgs),
    /// Approve a pending request
    Approve(ApproveArgs),
    /// Decline a pending request
    Decline(DeclineArgs),
    /// Check a visitor in or out from a code, id or scanned QR text
    Scan { token: String },
    /// List passes, newest first
    List(RangeArgs),
    /// Show one pass with its QR payload and timeline
    Show { token: String },
    /// Check the status of your own request by code
    Track { token: String },
    /// Delete a pass
    Delete { id: String },
    /// Dashboard metrics for a date range
    Dashboard(RangeArgs),
    /// Export passes as CSV, one row per visit
    Export(ExportArgs),
    /// Stream pass events until Ctrl-C
    Watch,
    /// Show or change settings
    Settings(SettingsArgs),
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    host: String,
    #[arg(long, default_value = "")]
    company: String,
    #[arg(long, default_value = "")]
    purpose: String,
    #[arg(long, default_value = "")]
    notes: String,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    email: Option<String>,
    /// Preferred visit time
    #[arg(long, value_parser = commands::parse_timestamp)]
    visit_at: Option<DateTime<Utc>>,
    /// Allow the visitor to leave and come back
    #[arg(long)]
    reentry: bool,
    /// Number of check-ins allowed with --reentry
    #[arg(long, default_value_t = 1)]
    max_entries: u32,
    #[arg(long, value_parser = commands::parse_timestamp)]
    valid_until: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
struct RequestArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    phone: String,
    #[arg(long)]
    host: String,
    #[arg(long)]
    purpose: String,
    #[arg(long, default_value = "")]
    company: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long, value_parser = commands::parse_timestamp)]
    visit_at: Option<DateTime<Utc>>,
    /// Ask to be allowed to step out and return
    #[arg(long)]
    reentry: bool,
}

#[derive(Args, Debug)]
struct ApproveArgs {
    id: String,
    #[arg(long)]
    reentry: bool,
    #[arg(long, default_value_t = 1)]
    max_entries: u32,
    #[arg(long, value_parser = commands::parse_timestamp)]
    valid_until: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
struct DeclineArgs {
    id: String,
    #[arg(long)]
    reason: Option<String>,
}

#[derive(Args, Debug)]
struct RangeArgs {
    #[arg(long, value_parser = commands::parse_timestamp)]
    from: Option<DateTime<Utc>>,
    #[arg(long, value_parser = commands::parse_timestamp)]
    to: Option<DateTime<Utc>>,
}

impl RangeArgs {
    fn range(&self) -> DashboardRange {
        DashboardRange::new(self.from, self.to)
    }
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[command(flatten)]
    range: RangeArgs,
    /// File to write; a directory gets a dated file name. Prints to stdout
    /// when omitted.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SettingsArgs {
    #[arg(long)]
    code_prefix: Option<String>,
    #[arg(long)]
    poll_interval_secs: Option<u64>,
    #[arg(long)]
    duplicate_window_mins: Option<i64>,
    #[arg(long)]
    max_code_attempts: Option<u32>,
    #[arg(long)]
    max_entries_cap: Option<u32>,
}

impl SettingsArgs {
    /// `None` when no field was given.
    fn merged(self, mut settings: Settings) -> Option<Settings> {
        let mut changed = false;
        if let Some(value) = self.code_prefix {
            settings.code_prefix = value;
            changed = true;
        }
        if let Some(value) = self.poll_interval_secs {
            settings.poll_interval_secs = value;
            changed = true;
        }
        if let Some(value) = self.duplicate_window_mins {
            settings.duplicate_window_mins = value;
            changed = true;
        }
        if let Some(value) = self.max_code_attempts {
            settings.max_code_attempts = value;
            changed = true;
        }
        if let Some(value) = self.max_entries_cap {
            settings.max_entries_cap = value;
            changed = true;
        }
        changed.then_some(settings)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_outcome(outcome: &Outcome) -> Result<()> {
    if let Outcome::Blocked { reason, pass } = outcome {
        log::warn!("{}: {}", pass.code, reason.message());
    }
    print_json(outcome)
}

fn open_state(cli: &Cli) -> Result<AppState> {
    let data_dir = settings::resolve_data_dir(cli.data_dir.clone());
    let settings_store = SettingsStore::new(data_dir.join("settings.json"))?;

    let store: Arc<dyn PassStore> = if cli.ephemeral {
        Arc::new(MemoryPassStore::new())
    } else {
        let db_path = data_dir.join("carepass.sqlite3");
        let database = Database::new(db_path.clone())
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        log::debug!("pass database at {}", database.path().display());
        Arc::new(database)
    };

    let service = PassService::new(store, PassNotifier::new(), settings_store.get());
    Ok(AppState {
        service,
        settings: settings_store,
    })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let state = open_state(&cli)?;
    let session = commands::resolve_session(cli.user.as_deref(), cli.password.as_deref())
        .map_err(|e| anyhow!(e))?;
    log::debug!("acting as {}", session.describe());

    match cli.command {
        Commands::Create(args) => {
            let input = NewPass {
                name: args.name,
                company: args.company,
                host: args.host,
                purpose: args.purpose,
                notes: args.notes,
                phone: args.phone,
                email: args.email,
                requested_visit_at: args.visit_at,
                allow_reentry: args.reentry,
                max_entries: args.max_entries,
                valid_until: args.valid_until,
            };
            let detail = commands::create_pass(&state, &session, input)
                .await
                .map_err(|e| anyhow!(e))?;
            print_json(&detail)
        }
        Commands::Request(args) => {
            let input = VisitRequest {
                name: args.name,
                phone: args.phone,
                email: args.email,
                company: args.company,
                host: args.host,
                purpose: args.purpose,
                requested_visit_at: args.visit_at,
                requested_reentry: args.reentry,
            };
            let detail = commands::request_visit(&state, input)
                .await
                .map_err(|e| anyhow!(e))?;
            print_json(&detail)
        }
        Commands::Approve(args) => {
            let policy = ApprovePolicy {
                allow_reentry: args.reentry,
                max_entries: args.max_entries,
                valid_until: args.valid_until,
            };
            let outcome = commands::approve_pass(&state, &session, &args.id, policy)
                .await
                .map_err(|e| anyhow!(e))?;
            print_outcome(&outcome)
        }
        Commands::Decline(args) => {
            let outcome =
                commands::decline_pass(&state, &session, &args.id, args.reason.as_deref())
                    .await
                    .map_err(|e| anyhow!(e))?;
            print_outcome(&outcome)
        }
        Commands::Scan { token } => {
            let outcome = commands::scan_pass(&state, &session, &token)
                .await
                .map_err(|e| anyhow!(e))?;
            print_outcome(&outcome)
        }
        Commands::List(args) => {
            let passes = commands::list_passes(&state, &session, &args.range())
                .await
                .map_err(|e| anyhow!(e))?;
            print_json(&passes)
        }
        Commands::Show { token } => {
            let detail = commands::show_pass(&state, &session, &token)
                .await
                .map_err(|e| anyhow!(e))?;
            print_json(&detail)
        }
        Commands::Track { token } => {
            let detail = commands::track_pass(&state, &token)
                .await
                .map_err(|e| anyhow!(e))?;
            print_json(&detail)
        }
        Commands::Delete { id } => {
            let removed = commands::delete_pass(&state, &session, &id)
                .await
                .map_err(|e| anyhow!(e))?;
            if !removed {
                log::warn!("no pass with id {id}");
            }
            print_json(&serde_json::json!({ "id": id, "deleted": removed }))
        }
        Commands::Dashboard(args) => {
            let dashboard = commands::get_dashboard(&state, &session, &args.range())
                .await
                .map_err(|e| anyhow!(e))?;
            print_json(&dashboard)
        }
        Commands::Export(args) => {
            let csv = commands::export_passes(&state, &session, &args.range.range())
                .await
                .map_err(|e| anyhow!(e))?;
            match args.output {
                None => {
                    println!("{csv}");
                    Ok(())
                }
                Some(path) => {
                    let path = if path.is_dir() {
                        path.join(export::export_file_name(Utc::now()))
                    } else {
                        path
                    };
                    std::fs::write(&path, csv)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    log::info!("exported passes to {}", path.display());
                    Ok(())
                }
            }
        }
        Commands::Watch => commands::watch_passes(&state, &session)
            .await
            .map_err(|e| anyhow!(e)),
        Commands::Settings(args) => {
            let current = commands::get_settings(&state);
            match args.merged(current.clone()) {
                None => print_json(&current),
                Some(updated) => {
                    let saved = commands::set_settings(&state, &session, updated)
                        .map_err(|e| anyhow!(e))?;
                    print_json(&saved)
                }
            }
        }
    }
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(dispatch(cli))
}
