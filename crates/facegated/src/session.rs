//! Detection loop orchestrator.
//!
//! A [`Session`] owns one capture source and one [`FrameProcessor`] for the
//! lifetime of a camera session. Ticks run on a fixed interval; a tick that
//! is still awaiting the detector when the next one is due causes that next
//! tick to be skipped, never queued. Accept actions and telemetry run as
//! spawned tasks so a slow downstream never stalls detection; action
//! outcomes are folded back into the processor at the start of the next
//! tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use facegate_core::{
    FaceOutcome, FlowConfig, FrameInput, FrameProcessor, Identifier, MatchError, ProcessError,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::detector::{CaptureSource, DetectorError, FaceDetector};
use crate::sinks::{AcceptAction, ActionOutcome, GallerySource, SinkError, TelemetrySink};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to load gallery: {0}")]
    Gallery(#[source] SinkError),
    #[error("invalid gallery: {0}")]
    Match(#[from] MatchError),
    #[error("frame processing failed: {0}")]
    Process(#[from] ProcessError),
    #[error("capture failed: {0}")]
    Capture(#[from] DetectorError),
    #[error("session already started")]
    AlreadyStarted,
    #[error("session disposed")]
    Disposed,
    #[error("session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Where a session's identities come from.
pub enum IdentitySource {
    Gallery(Arc<dyn GallerySource>),
    /// Enrollment: every face is this account.
    Candidate(String),
}

/// Collaborators handed to a session at construction.
pub struct SessionDeps {
    pub capture: Box<dyn CaptureSource>,
    pub detector: Arc<dyn FaceDetector>,
    pub action: Arc<dyn AcceptAction>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub tick_interval: Duration,
    /// Seed for the challenge RNG; entropy when unset.
    pub seed: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(200),
            seed: None,
        }
    }
}

/// Latest tick's user-facing state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub tick: u64,
    pub message: String,
    pub overlay: Vec<FaceOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// `stop()` was called.
    Stopped,
    /// The capture source ran out of frames.
    CaptureEnded,
    /// A login or enrollment finished for this label.
    Completed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub ticks: u64,
    /// Labels whose accept action succeeded, in order.
    pub accepted: Vec<String>,
    pub duplicates: u32,
    pub failed_actions: u32,
    pub end: EndReason,
}

type ActionResult = (String, Result<ActionOutcome, SinkError>);

/// How long a finished session waits for in-flight accept actions.
const ACTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Session {
    config: FlowConfig,
    identity: IdentitySource,
    options: SessionOptions,
    deps: Option<SessionDeps>,
    active: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    status_tx: watch::Sender<SessionStatus>,
    handle: Option<JoinHandle<Result<SessionSummary, SessionError>>>,
    disposed: bool,
}

impl Session {
    pub fn new(
        config: FlowConfig,
        identity: IdentitySource,
        deps: SessionDeps,
        options: SessionOptions,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            config,
            identity,
            options,
            deps: Some(deps),
            active: Arc::new(AtomicBool::new(false)),
            stop_tx,
            status_tx,
            handle: None,
            disposed: false,
        }
    }

    /// Load the gallery and start ticking.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.disposed {
            return Err(SessionError::Disposed);
        }
        if self.deps.is_none() {
            return Err(SessionError::AlreadyStarted);
        }

        let identifier = match &self.identity {
            IdentitySource::Gallery(source) => {
                let references = source.load_gallery().await.map_err(SessionError::Gallery)?;
                let identifier = Identifier::gallery(references, &self.config.policy)?;
                if let Identifier::Gallery(gallery) = &identifier {
                    tracing::info!(
                        flow = %self.config.kind,
                        identities = gallery.len(),
                        dimension = gallery.dimension(),
                        "gallery loaded"
                    );
                }
                identifier
            }
            IdentitySource::Candidate(account) => Identifier::Candidate(account.clone()),
        };

        let rng = match self.options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let processor = FrameProcessor::new(self.config.clone(), identifier, rng)?;

        let Some(deps) = self.deps.take() else {
            return Err(SessionError::AlreadyStarted);
        };

        self.active.store(true, Ordering::SeqCst);
        let worker = Worker {
            processor,
            deps,
            tick_interval: self.options.tick_interval,
            active: Arc::clone(&self.active),
            stop_rx: self.stop_tx.subscribe(),
            status_tx: self.status_tx.clone(),
        };
        self.handle = Some(tokio::spawn(worker.run()));

        tracing::info!(
            flow = %self.config.kind,
            interval_ms = self.options.tick_interval.as_millis() as u64,
            "session started"
        );
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Subscribe to per-tick status updates.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Stop ticking. Any in-flight detection result is discarded.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::info!(flow = %self.config.kind, "session stopping");
        }
        self.stop_tx.send_replace(true);
    }

    /// Wait for the loop to finish. Cancel-safe: dropping the future
    /// leaves the session waitable.
    pub async fn wait(&mut self) -> Result<Option<SessionSummary>, SessionError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(None);
        };
        let result = handle.await;
        self.handle = None;
        Ok(Some(result??))
    }

    /// Stop, wait for the loop, and refuse any further use.
    pub async fn dispose(mut self) -> Result<Option<SessionSummary>, SessionError> {
        self.stop();
        self.disposed = true;
        self.deps = None;
        self.wait().await
    }
}

struct Worker {
    processor: FrameProcessor,
    deps: SessionDeps,
    tick_interval: Duration,
    active: Arc<AtomicBool>,
    stop_rx: watch::Receiver<bool>,
    status_tx: watch::Sender<SessionStatus>,
}

impl Worker {
    async fn run(mut self) -> Result<SessionSummary, SessionError> {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<ActionResult>();
        let mut summary = SessionSummary {
            ticks: 0,
            accepted: Vec::new(),
            duplicates: 0,
            failed_actions: 0,
            end: EndReason::Stopped,
        };
        let mut in_flight = 0usize;

        let result = self
            .tick_loop(&done_tx, &mut done_rx, &mut summary, &mut in_flight)
            .await;

        self.deps.capture.release();
        self.active.store(false, Ordering::SeqCst);
        self.processor.reset();

        let mut end = result?;

        // Let outstanding actions land so their outcomes are counted.
        drop(done_tx);
        let drain = async {
            while in_flight > 0 {
                let Some((label, outcome)) = done_rx.recv().await else {
                    break;
                };
                in_flight -= 1;
                let completed = self.apply_outcome(&mut summary, label, outcome);
                if end == EndReason::CaptureEnded {
                    if let Some(completed) = completed {
                        end = completed;
                    }
                }
            }
        };
        if tokio::time::timeout(ACTION_DRAIN_TIMEOUT, drain).await.is_err() {
            tracing::warn!(in_flight, "accept actions still running at session end, not waiting");
        }

        summary.end = end;
        tracing::info!(
            ticks = summary.ticks,
            accepted = summary.accepted.len(),
            failed_actions = summary.failed_actions,
            end = ?summary.end,
            "session ended"
        );
        Ok(summary)
    }

    async fn tick_loop(
        &mut self,
        done_tx: &mpsc::UnboundedSender<ActionResult>,
        done_rx: &mut mpsc::UnboundedReceiver<ActionResult>,
        summary: &mut SessionSummary,
        in_flight: &mut usize,
    ) -> Result<EndReason, SessionError> {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.stop_rx.changed() => return Ok(EndReason::Stopped),
            }
            if !self.active.load(Ordering::SeqCst) {
                return Ok(EndReason::Stopped);
            }

            while let Ok((label, outcome)) = done_rx.try_recv() {
                *in_flight -= 1;
                if let Some(end) = self.apply_outcome(summary, label, outcome) {
                    return Ok(end);
                }
            }

            summary.ticks += 1;
            let tick = summary.ticks;

            let Some(frame) = self.deps.capture.current_frame()? else {
                return Ok(EndReason::CaptureEnded);
            };

            let faces = match self.deps.detector.detect(&frame).await {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(tick, error = %e, "detection failed, skipping tick");
                    continue;
                }
            };

            if !self.active.load(Ordering::SeqCst) {
                tracing::debug!(tick, "session stopped during detection, discarding result");
                return Ok(EndReason::Stopped);
            }

            let input = FrameInput {
                width: frame.width,
                height: frame.height,
                faces,
            };
            let report = self
                .processor
                .process(&input, tokio::time::Instant::now().into_std())?;

            tracing::debug!(
                tick,
                faces = report.faces.len(),
                status = %report.status.message(),
                "tick processed"
            );

            for event in report.telemetry {
                let sink = Arc::clone(&self.deps.telemetry);
                tokio::spawn(async move {
                    if let Err(e) = sink.record(event).await {
                        tracing::warn!(error = %e, "telemetry sink failed");
                    }
                });
            }

            if let Some(accepted) = report.accepted {
                let action = Arc::clone(&self.deps.action);
                let done_tx = done_tx.clone();
                *in_flight += 1;
                tokio::spawn(async move {
                    let outcome = action.perform(&accepted).await;
                    let _ = done_tx.send((accepted.label, outcome));
                });
            }

            self.status_tx.send_replace(SessionStatus {
                tick,
                message: report.status.message(),
                overlay: report.faces,
            });
        }
    }

    /// Fold one finished accept action back into the processor. Returns an
    /// end reason when the flow is finished.
    fn apply_outcome(
        &mut self,
        summary: &mut SessionSummary,
        label: String,
        outcome: Result<ActionOutcome, SinkError>,
    ) -> Option<EndReason> {
        match outcome {
            Ok(outcome) => {
                self.processor.resolve_action(&label, true);
                tracing::info!(label = %label, ?outcome, "accept action finished");
                if outcome == ActionOutcome::Duplicate {
                    summary.duplicates += 1;
                } else {
                    summary.accepted.push(label.clone());
                }
                if self.processor.config().kind.single_face() {
                    return Some(EndReason::Completed(label));
                }
                None
            }
            Err(e) => {
                tracing::warn!(label = %label, error = %e, "accept action failed");
                self.processor.resolve_action(&label, false);
                summary.failed_actions += 1;
                None
            }
        }
    }
}
