//! Structured audit/notification sink.
//!
//! The engine emits a structured event for every observable state change a
//! downstream system might care about. Delivery is best-effort: a sink
//! failure is logged by the emitting service and never fails the operation
//! that produced it: the store write is the source of truth, the audit
//! trail is derived.
//!
//! # Implementations
//!
//! - `NoopAuditSink` (here): discards everything; the default for embedders
//!   that do not care.
//! - `RecordingAuditSink` (in `eventline-testing`): captures events for
//!   assertions.
//!
//! # Dyn Compatibility
//!
//! Like [`crate::store::RecordStore`], the trait returns
//! `Pin<Box<dyn Future>>` so it can be carried as `Arc<dyn AuditSink>`.

use crate::ids::{EventId, OrgId, RegistrationId, RequestId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors a sink may report. Callers log these and move on.
#[derive(Error, Debug, Clone)]
pub enum AuditError {
    /// The sink could not accept the event.
    #[error("audit delivery failed: {0}")]
    Delivery(String),
}

/// Structured audit events emitted by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A registration was admitted under capacity.
    RegistrationAdmitted {
        /// Target event.
        event_id: EventId,
        /// Admitted user.
        user_id: UserId,
    },
    /// A registration was waitlisted because the event was full.
    RegistrationWaitlisted {
        /// Target event.
        event_id: EventId,
        /// Waitlisted user.
        user_id: UserId,
    },
    /// A waitlisted registration was promoted after a cancellation.
    WaitlistPromoted {
        /// Target event.
        event_id: EventId,
        /// Promoted user.
        user_id: UserId,
        /// The promoted registration.
        registration_id: RegistrationId,
    },
    /// An event reached its end instant and was finished by the sweep.
    EventFinished {
        /// The finished event.
        event_id: EventId,
    },
    /// An event became publicly visible.
    EventPublished {
        /// The published event.
        event_id: EventId,
    },
    /// A pending request was approved.
    ApprovalGranted {
        /// The resolved request.
        request_id: RequestId,
        /// Reviewing administrator.
        reviewed_by: UserId,
    },
    /// A pending request was rejected.
    ApprovalRejected {
        /// The resolved request.
        request_id: RequestId,
        /// Reviewing administrator.
        reviewed_by: UserId,
    },
    /// An organization was verified.
    OrganizationVerified {
        /// The verified organization.
        organization_id: OrgId,
    },
    /// The affiliation write of the verification cascade was deferred to
    /// reconciliation ("organization verified, affiliation pending").
    AffiliationDeferred {
        /// The verified organization.
        organization_id: OrgId,
        /// The creator whose affiliation link is pending.
        user_id: UserId,
    },
    /// An account deletion was scheduled.
    DeletionScheduled {
        /// The user to delete.
        user_id: UserId,
        /// When the deletion becomes due.
        due_at: DateTime<Utc>,
    },
    /// An account deletion cascade completed.
    DeletionProcessed {
        /// The deleted user.
        user_id: UserId,
    },
    /// A repair ticket was enqueued for an incomplete cascade.
    RepairEnqueued {
        /// Human-readable ticket kind.
        #[serde(rename = "repair_kind")]
        kind: String,
    },
    /// A repair ticket was applied successfully.
    RepairApplied {
        /// Human-readable ticket kind.
        #[serde(rename = "repair_kind")]
        kind: String,
    },
}

/// Best-effort sink for [`AuditEvent`]s.
pub trait AuditSink: Send + Sync {
    /// Deliver one event.
    ///
    /// # Errors
    ///
    /// Returns `Delivery` when the sink cannot accept the event; emitters
    /// log and continue.
    fn emit(
        &self,
        event: AuditEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>>;
}

/// A sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(
        &self,
        _event: AuditEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
