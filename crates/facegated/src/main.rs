use std::sync::Arc;

use anyhow::{Context, Result};
use facegate_core::FlowKind;
use facegated::sinks::{CheckInAction, TelemetryFanout, TelemetrySink, TracingTelemetry};
use facegated::{
    Config, FacegateStore, IdentitySource, ReplayFeed, Session, SessionDeps, SessionOptions,
    SessionSummary,
};
use tracing_subscriber::EnvFilter;

enum Shutdown {
    Finished(Option<SessionSummary>),
    Signal,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::from_env();
    tracing::info!(
        db_path = %config.db_path.display(),
        tick_ms = config.tick_interval.as_millis() as u64,
        "configuration loaded"
    );

    let store = FacegateStore::open(&config.db_path)
        .await
        .context("failed to open store")?
        .with_check_in_cooldown(config.server_cooldown_secs);
    let store = Arc::new(store);

    let flow = config
        .flow_config(FlowKind::CheckIn)
        .context("failed to build check-in flow")?;

    let replay_path = config
        .replay_path
        .as_deref()
        .context("FACEGATE_REPLAY_PATH must point at a recorded detection feed")?;
    let (capture, detector) = ReplayFeed::open(replay_path)?.into_parts();

    let sinks: Vec<Arc<dyn TelemetrySink>> = vec![Arc::new(TracingTelemetry), store.clone()];
    let deps = SessionDeps {
        capture: Box::new(capture),
        detector: Arc::new(detector),
        action: Arc::new(CheckInAction::new(store.clone())),
        telemetry: Arc::new(TelemetryFanout::new(sinks)),
    };

    let mut session = Session::new(
        flow,
        IdentitySource::Gallery(store.clone()),
        deps,
        SessionOptions {
            tick_interval: config.tick_interval,
            seed: None,
        },
    );
    session.start().await?;

    let mut status = session.status();
    tokio::spawn(async move {
        let mut last = String::new();
        while status.changed().await.is_ok() {
            let message = status.borrow_and_update().message.clone();
            if message != last {
                tracing::info!(status = %message, "kiosk status");
                last = message;
            }
        }
    });

    tracing::info!("facegated ready");

    let shutdown = tokio::select! {
        res = session.wait() => Shutdown::Finished(res?),
        res = tokio::signal::ctrl_c() => {
            res?;
            Shutdown::Signal
        }
    };

    let summary = match shutdown {
        Shutdown::Finished(summary) => summary,
        Shutdown::Signal => {
            tracing::info!("facegated shutting down");
            session.stop();
            session.wait().await?
        }
    };
    if let Some(summary) = summary {
        tracing::info!(
            ticks = summary.ticks,
            checked_in = summary.accepted.len(),
            duplicates = summary.duplicates,
            end = ?summary.end,
            "session summary"
        );
    }

    Ok(())
}
