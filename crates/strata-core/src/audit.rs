//! Audit event infrastructure.
//!
//! Audit events record pipeline decisions that must survive process
//! restarts: transform invocations and their outcomes, catalog runs that
//! started or were skipped, permission denials and credential issuance.
//!
//! ## Design Principles
//!
//! 1. **Never include secrets**: credential secrets are never recorded
//! 2. **Append-only semantics**: events are immutable once written
//! 3. **Fail-open**: audit failures are logged and never block operations
//!
//! ```rust
//! use strata_core::audit::{AuditAction, AuditEvent};
//!
//! let event = AuditEvent::builder()
//!     .action(AuditAction::TransformInvoked)
//!     .actor("role:transform")
//!     .resource("arn:storage:::raw/session-001.MF4")
//!     .decision_reason("suffix:.MF4")
//!     .try_build()
//!     .unwrap();
//!
//! assert_eq!(event.action.to_string(), "TRANSFORM_INVOKED");
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::EventId;
use crate::storage::{write_json, StorageBackend, WritePrecondition, WriteResult};

/// Version of the audit event schema.
pub const AUDIT_EVENT_VERSION: u32 = 1;

/// Audited pipeline decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum AuditAction {
    /// A transform invocation was dispatched.
    TransformInvoked,
    /// A transform invocation completed.
    TransformSucceeded,
    /// A transform invocation failed.
    TransformFailed,
    /// A landing-zone event was rejected before routing.
    EventRejected,
    /// A catalog builder run started.
    CatalogRunStarted,
    /// A catalog builder trigger was dropped because a run was active.
    CatalogRunSkipped,
    /// A catalog builder run reached a terminal state.
    CatalogRunFinished,
    /// The permission layer allowed a sensitive request.
    AccessAllow,
    /// The permission layer rejected a request.
    AccessDeny,
    /// A consumer credential was issued.
    CredentialIssued,
}

impl AuditAction {
    /// Returns true if this is a denial action.
    #[must_use]
    pub const fn is_deny(&self) -> bool {
        matches!(self, Self::AccessDeny)
    }

    /// Returns the category of this action for grouping.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::TransformInvoked
            | Self::TransformSucceeded
            | Self::TransformFailed
            | Self::EventRejected => "transform",
            Self::CatalogRunStarted | Self::CatalogRunSkipped | Self::CatalogRunFinished => {
                "catalog"
            }
            Self::AccessAllow | Self::AccessDeny | Self::CredentialIssued => "access",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TransformInvoked => "TRANSFORM_INVOKED",
            Self::TransformSucceeded => "TRANSFORM_SUCCEEDED",
            Self::TransformFailed => "TRANSFORM_FAILED",
            Self::EventRejected => "EVENT_REJECTED",
            Self::CatalogRunStarted => "CATALOG_RUN_STARTED",
            Self::CatalogRunSkipped => "CATALOG_RUN_SKIPPED",
            Self::CatalogRunFinished => "CATALOG_RUN_FINISHED",
            Self::AccessAllow => "ACCESS_ALLOW",
            Self::AccessDeny => "ACCESS_DENY",
            Self::CredentialIssued => "CREDENTIAL_ISSUED",
        };
        write!(f, "{s}")
    }
}

/// An audit event.
///
/// The `resource` and `decision_reason` fields carry identifiers and reason
/// codes only. Secret-looking values are redacted on build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Schema version for evolution.
    pub event_version: u32,

    /// Unique event identifier (ULID format).
    pub event_id: EventId,

    /// When the event occurred (UTC).
    pub timestamp: DateTime<Utc>,

    /// Correlation identifier (invocation, run or query ID).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Actor identity: `role:{name}`, `user:{name}` or `system`.
    pub actor: String,

    /// The action taken.
    pub action: AuditAction,

    /// Resource the decision applies to.
    pub resource: String,

    /// Reason for the decision (statement ID, outcome code, error text).
    pub decision_reason: String,
}

impl AuditEvent {
    /// Creates a new builder for constructing audit events.
    #[must_use]
    pub fn builder() -> AuditEventBuilder {
        AuditEventBuilder::default()
    }

    /// Storage key under which the event is appended.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "audit/{}/{}.json",
            self.timestamp.format("%Y-%m-%d"),
            self.event_id
        )
    }
}

/// Patterns that indicate potential secrets in audit data.
const SECRET_PATTERNS: &[(&str, &str)] = &[
    ("Bearer ", "bearer_token"),
    ("secret=", "secret_param"),
    ("password=", "password_param"),
    ("signature=", "signature_param"),
    ("SecretAccessKey", "secret_access_key"),
    ("X-Amz-Signature", "storage_signature"),
];

fn detect_secret_pattern(value: &str) -> Option<&'static str> {
    let lower = value.to_lowercase();
    SECRET_PATTERNS
        .iter()
        .find(|(pattern, _)| lower.contains(&pattern.to_lowercase()))
        .map(|(_, name)| *name)
}

fn redact_if_secret(value: String) -> String {
    match detect_secret_pattern(&value) {
        Some(p) => format!("[REDACTED:{p}]"),
        None => value,
    }
}

/// Builder for constructing [`AuditEvent`] instances.
#[derive(Debug, Default)]
pub struct AuditEventBuilder {
    action: Option<AuditAction>,
    actor: Option<String>,
    resource: Option<String>,
    decision_reason: Option<String>,
    correlation_id: Option<String>,
}

impl AuditEventBuilder {
    /// Sets the action for this event.
    #[must_use]
    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Sets the actor identity.
    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Sets the resource the decision applies to.
    #[must_use]
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Sets the decision reason.
    #[must_use]
    pub fn decision_reason(mut self, reason: impl Into<String>) -> Self {
        self.decision_reason = Some(reason.into());
        self
    }

    /// Sets the correlation identifier.
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Builds the audit event, redacting secret-looking values.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing.
    pub fn try_build(self) -> Result<AuditEvent> {
        let missing = |field: &str| Error::InvalidInput(format!("audit event missing {field}"));
        let action = self.action.ok_or_else(|| missing("action"))?;
        let actor = self.actor.ok_or_else(|| missing("actor"))?;
        let resource = self.resource.ok_or_else(|| missing("resource"))?;
        let decision_reason = self
            .decision_reason
            .ok_or_else(|| missing("decision_reason"))?;

        Ok(AuditEvent {
            event_version: AUDIT_EVENT_VERSION,
            event_id: EventId::generate(),
            timestamp: Utc::now(),
            correlation_id: self.correlation_id,
            actor: redact_if_secret(actor),
            action,
            resource: redact_if_secret(resource),
            decision_reason: redact_if_secret(decision_reason),
        })
    }
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    /// Records one event.
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// Records an event, logging instead of failing when the sink errors.
pub async fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    let action = event.action;
    if let Err(e) = sink.record(event).await {
        tracing::warn!(%action, error = %e, "failed to record audit event");
    }
}

/// Builds and records an event in one step; build failures are logged.
pub async fn emit_with(sink: &dyn AuditSink, builder: AuditEventBuilder) {
    match builder.try_build() {
        Ok(event) => emit(sink, event).await,
        Err(e) => tracing::warn!(error = %e, "dropping malformed audit event"),
    }
}

/// Keeps events in memory; used by tests and local runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Returns recorded events with the given action.
    #[must_use]
    pub fn with_action(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| Error::internal("audit sink lock poisoned"))?
            .push(event);
        Ok(())
    }
}

/// Appends each event as an immutable JSON object in a storage backend.
#[derive(Clone)]
pub struct StorageAuditSink {
    storage: Arc<dyn StorageBackend>,
}

impl StorageAuditSink {
    /// Creates a sink writing into `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }
}

impl std::fmt::Debug for StorageAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAuditSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl AuditSink for StorageAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        let key = event.storage_key();
        match write_json(
            self.storage.as_ref(),
            &key,
            &event,
            WritePrecondition::DoesNotExist,
        )
        .await?
        {
            WriteResult::Success { .. } => Ok(()),
            WriteResult::PreconditionFailed { .. } => Err(Error::PreconditionFailed {
                message: format!("audit event already recorded: {key}"),
            }),
        }
    }
}

/// Writes events to the `audit` tracing target only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        tracing::info!(
            target: "audit",
            event_id = %event.event_id,
            action = %event.action,
            actor = %event.actor,
            resource = %event.resource,
            reason = %event.decision_reason,
            "audit"
        );
        Ok(())
    }
}
