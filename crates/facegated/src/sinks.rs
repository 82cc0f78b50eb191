//! Boundaries to the surrounding system: where galleries come from and
//! where accepted faces, enrollments and telemetry go.

use std::sync::Arc;

use async_trait::async_trait;
use facegate_core::{AcceptEvent, ReferenceIdentity, TelemetryEvent};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("unknown account '{0}'")]
    UnknownAccount(String),
    #[error("account '{0}' has no enrolled face")]
    NoDescriptor(String),
    #[error("downstream rejected the request: {0}")]
    Rejected(String),
}

// ── Sources ───────────────────────────────────────────────────────────────────

/// Supplies the reference identities for one session.
#[async_trait]
pub trait GallerySource: Send + Sync {
    async fn load_gallery(&self) -> Result<Vec<ReferenceIdentity>, SinkError>;
}

/// Looks up the stored descriptor of an already-authenticated account.
///
/// The face check is the second factor of a login. Callers verify the
/// account's credentials first and pass only an account that passed; an
/// implementation never authenticates on its own and returns the same
/// reference for any caller.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn account_reference(&self, account: &str) -> Result<ReferenceIdentity, SinkError>;
}

/// Single-identity gallery for login: exactly the account's own descriptor.
pub struct AccountGallery {
    directory: Arc<dyn AccountDirectory>,
    account: String,
}

impl AccountGallery {
    pub fn new(directory: Arc<dyn AccountDirectory>, account: impl Into<String>) -> Self {
        Self {
            directory,
            account: account.into(),
        }
    }
}

#[async_trait]
impl GallerySource for AccountGallery {
    async fn load_gallery(&self) -> Result<Vec<ReferenceIdentity>, SinkError> {
        let reference = self.directory.account_reference(&self.account).await?;
        Ok(vec![reference])
    }
}

// ── Accept sinks ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckInStatus {
    CheckIn,
}

impl CheckInStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckIn => "CHECK_IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInRequest {
    pub name: String,
    pub surname: String,
    pub status: CheckInStatus,
}

impl CheckInRequest {
    /// Split a display label at the first space: the first word is the
    /// name, the rest is the surname.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        let (name, surname) = match label.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (label, ""),
        };
        Self {
            name: name.to_string(),
            surname: surname.to_string(),
            status: CheckInStatus::CheckIn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInOutcome {
    Recorded,
    /// Suppressed by the server-side duplicate window.
    Duplicate,
}

#[async_trait]
pub trait CheckInSink: Send + Sync {
    async fn record_check_in(&self, request: CheckInRequest) -> Result<CheckInOutcome, SinkError>;
}

#[async_trait]
pub trait LoginCompletion: Send + Sync {
    async fn complete_login(&self, account: &str) -> Result<(), SinkError>;
}

#[async_trait]
pub trait EnrollmentSink: Send + Sync {
    async fn save_descriptor(&self, account: &str, descriptor: &[f32]) -> Result<(), SinkError>;
}

/// Fire-and-forget telemetry destination.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, event: TelemetryEvent) -> Result<(), SinkError>;
}

/// Logs telemetry through `tracing`.
pub struct TracingTelemetry;

#[async_trait]
impl TelemetrySink for TracingTelemetry {
    async fn record(&self, event: TelemetryEvent) -> Result<(), SinkError> {
        tracing::info!(
            kind = event.kind.as_str(),
            reason = event.reason.map(|r| r.as_str()),
            best_match = event.best_match.as_deref(),
            source = event.source.as_str(),
            "{}",
            event.message
        );
        Ok(())
    }
}

/// Sends each event to every inner sink; the first failure is reported
/// after all sinks have been tried.
pub struct TelemetryFanout {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl TelemetryFanout {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl TelemetrySink for TelemetryFanout {
    async fn record(&self, event: TelemetryEvent) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(event.clone()).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

// ── Accept actions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Recorded,
    Duplicate,
    Completed,
}

/// The one side effect run for an accepted face.
#[async_trait]
pub trait AcceptAction: Send + Sync {
    async fn perform(&self, event: &AcceptEvent) -> Result<ActionOutcome, SinkError>;
}

pub struct CheckInAction {
    sink: Arc<dyn CheckInSink>,
}

impl CheckInAction {
    pub fn new(sink: Arc<dyn CheckInSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl AcceptAction for CheckInAction {
    async fn perform(&self, event: &AcceptEvent) -> Result<ActionOutcome, SinkError> {
        let outcome = self
            .sink
            .record_check_in(CheckInRequest::from_label(&event.label))
            .await?;
        Ok(match outcome {
            CheckInOutcome::Recorded => ActionOutcome::Recorded,
            CheckInOutcome::Duplicate => ActionOutcome::Duplicate,
        })
    }
}

pub struct LoginAction {
    completion: Arc<dyn LoginCompletion>,
}

impl LoginAction {
    pub fn new(completion: Arc<dyn LoginCompletion>) -> Self {
        Self { completion }
    }
}

#[async_trait]
impl AcceptAction for LoginAction {
    async fn perform(&self, event: &AcceptEvent) -> Result<ActionOutcome, SinkError> {
        self.completion.complete_login(&event.label).await?;
        Ok(ActionOutcome::Completed)
    }
}

pub struct EnrollAction {
    sink: Arc<dyn EnrollmentSink>,
}

impl EnrollAction {
    pub fn new(sink: Arc<dyn EnrollmentSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl AcceptAction for EnrollAction {
    async fn perform(&self, event: &AcceptEvent) -> Result<ActionOutcome, SinkError> {
        self.sink.save_descriptor(&event.label, &event.descriptor).await?;
        Ok(ActionOutcome::Completed)
    }
}
