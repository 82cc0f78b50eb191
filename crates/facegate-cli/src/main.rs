//! `facegate`: manage identities and replay recorded detection feeds
//! against the local store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::FlowKind;
use facegated::sinks::{
    AcceptAction, AccountGallery, CheckInAction, EnrollAction, LoginAction, TelemetryFanout,
    TelemetrySink, TracingTelemetry,
};
use facegated::{
    Config, FacegateStore, IdentitySource, ReplayFeed, Session, SessionDeps, SessionOptions,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facegate")]
#[command(about = "Face attendance and login gate")]
struct Cli {
    /// Database path (defaults to FACEGATE_DB_PATH or the XDG data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new identity
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        surname: String,
        /// JSON file holding the face descriptor as an array of numbers
        #[arg(long)]
        descriptor: Option<PathBuf>,
    },
    /// List registered identities
    Users,
    /// Show recent attendance records
    Logs {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show recent scan telemetry
    Events {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Run a recorded detection feed through a flow
    Replay {
        /// checkin, login or enroll
        #[arg(long, default_value = "checkin")]
        flow: FlowKind,
        /// JSON-lines detection feed
        #[arg(long)]
        feed: PathBuf,
        /// Account email, required for login and enroll
        #[arg(long)]
        account: Option<String>,
        /// Seed for the head-turn challenge
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let store = FacegateStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open store at {}", config.db_path.display()))?
        .with_check_in_cooldown(config.server_cooldown_secs);

    match cli.command {
        Commands::Register {
            email,
            name,
            surname,
            descriptor,
        } => {
            let descriptor = descriptor.as_deref().map(read_descriptor).transpose()?;
            let id = store
                .register_identity(&email, &name, &surname, descriptor.as_deref())
                .await?;
            println!("registered {email} ({id})");
            if descriptor.is_none() {
                println!("no descriptor yet: run `facegate replay --flow enroll --account {email}`");
            }
        }
        Commands::Users => {
            let users = store.list_identities().await?;
            if users.is_empty() {
                println!("no identities registered");
            }
            for user in users {
                println!(
                    "{:<32} {} {:<20} enrolled={} last_login={}",
                    user.email,
                    user.name,
                    user.surname,
                    user.has_descriptor,
                    user.last_login_at.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::Logs { limit } => {
            for log in store.recent_logs(limit).await? {
                println!("{}  {:<10} {} {}", log.timestamp, log.status, log.name, log.surname);
            }
        }
        Commands::Events { limit } => {
            for event in store.recent_events(limit).await? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        Commands::Replay {
            flow,
            feed,
            account,
            seed,
        } => {
            replay(&config, Arc::new(store), flow, &feed, account, seed).await?;
        }
    }

    Ok(())
}

fn read_descriptor(path: &Path) -> Result<Vec<f32>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let descriptor: Vec<f32> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))?;
    if descriptor.is_empty() {
        bail!("descriptor in {} is empty", path.display());
    }
    Ok(descriptor)
}

async fn replay(
    config: &Config,
    store: Arc<FacegateStore>,
    flow: FlowKind,
    feed: &Path,
    account: Option<String>,
    seed: Option<u64>,
) -> Result<()> {
    let flow_config = config.flow_config(flow)?;
    tracing::debug!(flow = %flow, feed = %feed.display(), "starting replay");
    let (capture, detector) = ReplayFeed::open(feed)?.into_parts();

    let (identity, action): (IdentitySource, Arc<dyn AcceptAction>) = match (flow, account) {
        (FlowKind::CheckIn, _) => (
            IdentitySource::Gallery(store.clone()),
            Arc::new(CheckInAction::new(store.clone())),
        ),
        (FlowKind::Login, Some(account)) => (
            IdentitySource::Gallery(Arc::new(AccountGallery::new(store.clone(), account))),
            Arc::new(LoginAction::new(store.clone())),
        ),
        (FlowKind::Enroll, Some(account)) => (
            IdentitySource::Candidate(account.trim().to_lowercase()),
            Arc::new(EnrollAction::new(store.clone())),
        ),
        (kind, None) => bail!("--account is required for the {kind} flow"),
    };

    let sinks: Vec<Arc<dyn TelemetrySink>> = vec![Arc::new(TracingTelemetry), store.clone()];
    let deps = SessionDeps {
        capture: Box::new(capture),
        detector: Arc::new(detector),
        action,
        telemetry: Arc::new(TelemetryFanout::new(sinks)),
    };

    let mut session = Session::new(
        flow_config,
        identity,
        deps,
        SessionOptions {
            tick_interval: config.tick_interval,
            seed,
        },
    );
    session.start().await?;

    let mut status = session.status();
    let printer = tokio::spawn(async move {
        let mut last = String::new();
        while status.changed().await.is_ok() {
            let message = status.borrow_and_update().message.clone();
            if message != last {
                println!("{message}");
                last = message;
            }
        }
    });

    let summary = session.wait().await?;
    drop(session);
    let _ = printer.await;

    if let Some(summary) = summary {
        println!(
            "{} ticks, accepted: [{}], duplicates: {}, failed actions: {}, ended: {:?}",
            summary.ticks,
            summary.accepted.join(", "),
            summary.duplicates,
            summary.failed_actions,
            summary.end,
        );
    }
    Ok(())
}
