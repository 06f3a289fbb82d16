//! Typed entity DTOs and their status enums.
//!
//! Every entity the engine persists has an explicit typed DTO here, and the
//! store boundary serializes exactly these shapes (see
//! [`crate::store::to_document`]). There is no dynamic normalization pass;
//! what the struct says is what the document contains.
//!
//! Cross-entity reference fields (`organization_id` on an event, `user_id`
//! on a registration) may point at records that no longer exist. The model
//! is eventually consistent and consumers skip dangling references instead
//! of failing on them.

use crate::actor::Role;
use crate::error::EngineError;
use crate::ids::{EventId, OrgId, RegistrationId, RequestId, UserId};
use crate::store::Collection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted entity: knows its collection and its document id.
///
/// This is the seam the typed environment accessors in `eventline-engine`
/// hang off: one generic load/save path per entity instead of ten.
pub trait Record: Serialize + serde::de::DeserializeOwned + Send {
    /// The collection this entity lives in.
    const COLLECTION: Collection;

    /// The document id this entity is stored under.
    fn record_id(&self) -> String;
}

// ============================================================================
// Events
// ============================================================================

/// Publication status of an event listing.
///
/// This is the canonical closed set. A legacy edit surface referenced an
/// undeclared `cancelled` value; it is deliberately not part of the enum
/// and deserializing it fails loudly rather than silently round-tripping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Created but not yet visible.
    Draft,
    /// Awaiting an administrator's direct decision.
    PendingApproval,
    /// Publicly listed.
    Published,
    /// End instant has elapsed; set by the consistency sweep. Never reversed.
    Finished,
    /// Declined by an administrator.
    Rejected,
    /// Removed from listings, kept for the record.
    Archived,
}

impl EventStatus {
    /// Whether any further transition is permitted out of this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Archived)
    }

    /// The legal transition table. `Published → Finished` belongs to the
    /// consistency sweep; everything else is an admin action.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Published)
                | (Self::Draft, Self::PendingApproval)
                | (Self::PendingApproval, Self::Published)
                | (Self::PendingApproval, Self::Rejected)
                | (Self::Published, Self::Finished)
                | (Self::Published, Self::Archived)
                | (Self::Finished, Self::Archived)
        )
    }

    /// Stable string form (matches the serde representation).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingApproval => "pending_approval",
            Self::Published => "published",
            Self::Finished => "finished",
            Self::Rejected => "rejected",
            Self::Archived => "archived",
        }
    }
}

/// An event's schedule window. The end always lies after the start; the
/// constructor is the only way to build one, so the invariant holds on
/// creation and on every edit that goes through [`ScheduleWindow::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    /// When the event starts.
    pub starts_at: DateTime<Utc>,
    /// When the event ends. Strictly after `starts_at`.
    pub ends_at: DateTime<Utc>,
}

impl ScheduleWindow {
    /// Build a validated window.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when `ends_at` is not strictly after `starts_at`.
    pub fn new(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Result<Self, EngineError> {
        if ends_at <= starts_at {
            return Err(EngineError::validation(format!(
                "event end ({ends_at}) must be after start ({starts_at})"
            )));
        }
        Ok(Self { starts_at, ends_at })
    }

    /// Whether the window has fully elapsed at `now`.
    #[must_use]
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.ends_at < now
    }
}

/// The candidate payload for an event: everything a creator supplies.
///
/// Used both for direct admin creation and as the payload stored inside an
/// [`EventCreationRequest`] until approval materializes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Event name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Validated schedule window.
    pub schedule: ScheduleWindow,
    /// Optional capacity; `None` means unlimited.
    pub capacity: Option<u32>,
    /// The owning organization.
    pub organization_id: OrgId,
    /// Whether sign-ups are accepted.
    pub allow_registration: bool,
}

impl EventDraft {
    /// Validate the fields that are not enforced by construction.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty name or a zero capacity.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::validation("event name cannot be empty"));
        }
        if self.capacity == Some(0) {
            return Err(EngineError::validation("capacity must be positive when set"));
        }
        Ok(())
    }
}

/// A stored event listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Opaque id.
    pub id: EventId,
    /// Event name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Schedule window (`ends_at > starts_at`).
    pub schedule: ScheduleWindow,
    /// Optional positive capacity.
    pub capacity: Option<u32>,
    /// Publication status.
    pub status: EventStatus,
    /// Owning organization. May dangle.
    pub organization_id: OrgId,
    /// Creator. May dangle.
    pub created_by: UserId,
    /// The creation request this event was materialized from, when it came
    /// through the approval path. Lets reconciliation detect an approved
    /// request whose event write was lost.
    pub source_request_id: Option<RequestId>,
    /// Whether sign-ups are accepted.
    pub allow_registration: bool,
    /// Denormalized mirror of registered users. The registrations
    /// collection is authoritative; this list is read convenience only.
    pub registered_users: Vec<UserId>,
    /// Denormalized mirror of waitlisted users.
    pub waitlisted_users: Vec<UserId>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

impl EventRecord {
    /// Materialize an event from a validated draft.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the draft fails [`EventDraft::validate`].
    pub fn from_draft(
        id: EventId,
        draft: EventDraft,
        created_by: UserId,
        status: EventStatus,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        draft.validate()?;
        Ok(Self {
            id,
            name: draft.name,
            description: draft.description,
            schedule: draft.schedule,
            capacity: draft.capacity,
            status,
            organization_id: draft.organization_id,
            created_by,
            source_request_id: None,
            allow_registration: draft.allow_registration,
            registered_users: Vec::new(),
            waitlisted_users: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Materialize an event from an approved creation request. Approval
    /// implies publication; the request id is kept for reconciliation.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the stored payload fails
    /// [`EventDraft::validate`].
    pub fn from_request(
        id: EventId,
        request: &EventCreationRequest,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let mut event = Self::from_draft(
            id,
            request.payload.clone(),
            request.requested_by,
            EventStatus::Published,
            now,
        )?;
        event.source_request_id = Some(request.id);
        Ok(event)
    }
}

impl Record for EventRecord {
    const COLLECTION: Collection = Collection::Events;

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

// ============================================================================
// Review workflow
// ============================================================================

/// Resolution status of an approval request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Awaiting an administrator.
    Pending,
    /// Approved; side effects applied (or queued for repair).
    Approved,
    /// Rejected with a mandatory reason.
    Rejected,
}

/// Shared review bookkeeping for both request kinds.
///
/// Terminal-once: a request leaves `Pending` exactly once, and the audit
/// fields are immutable afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewState {
    /// Current status.
    pub status: ReviewStatus,
    /// The resolving administrator, once resolved.
    pub reviewed_by: Option<UserId>,
    /// The resolution instant, once resolved.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Mandatory non-empty reason when rejected.
    pub rejection_reason: Option<String>,
}

impl ReviewState {
    /// A fresh pending review.
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            status: ReviewStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
        }
    }

    /// Whether the request is still open.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ReviewStatus::Pending
    }

    /// Stamp an approval.
    #[must_use]
    pub const fn approved(reviewed_by: UserId, reviewed_at: DateTime<Utc>) -> Self {
        Self {
            status: ReviewStatus::Approved,
            reviewed_by: Some(reviewed_by),
            reviewed_at: Some(reviewed_at),
            rejection_reason: None,
        }
    }

    /// Stamp a rejection. The caller validates the reason first.
    #[must_use]
    pub const fn rejected(
        reviewed_by: UserId,
        reviewed_at: DateTime<Utc>,
        reason: String,
    ) -> Self {
        Self {
            status: ReviewStatus::Rejected,
            reviewed_by: Some(reviewed_by),
            reviewed_at: Some(reviewed_at),
            rejection_reason: Some(reason),
        }
    }
}

/// A non-privileged creator's request to publish an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventCreationRequest {
    /// Opaque id.
    pub id: RequestId,
    /// The requesting user.
    pub requested_by: UserId,
    /// The requester's organization.
    pub organization_id: OrgId,
    /// The full candidate event payload.
    pub payload: EventDraft,
    /// Review bookkeeping. Flattened so `status` is a queryable top-level
    /// document field.
    #[serde(flatten)]
    pub review: ReviewState,
    /// Submission instant.
    pub submitted_at: DateTime<Utc>,
}

impl Record for EventCreationRequest {
    const COLLECTION: Collection = Collection::EventRequests;

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

/// Organization profile supplied with an account approval request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrganizationProfile {
    /// Proposed organization name.
    pub name: String,
    /// Proposed organization type.
    pub org_type: OrganizationType,
    /// Contact email.
    pub contact_email: String,
}

/// A user's request for an approved account / role.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserApprovalRequest {
    /// Opaque id.
    pub id: RequestId,
    /// The requesting user.
    pub requested_by: UserId,
    /// The role the user is asking for.
    pub requested_role: Role,
    /// Optional organization profile for organizer accounts.
    pub organization_profile: Option<OrganizationProfile>,
    /// Review bookkeeping. Flattened so `status` is a queryable top-level
    /// document field.
    #[serde(flatten)]
    pub review: ReviewState,
    /// Submission instant.
    pub submitted_at: DateTime<Utc>,
}

impl Record for UserApprovalRequest {
    const COLLECTION: Collection = Collection::UserRequests;

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

// ============================================================================
// Organizations and users
// ============================================================================

/// The closed set of organization types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationType {
    /// A university or faculty.
    University,
    /// A student-run club or society.
    StudentClub,
    /// A commercial company.
    Company,
    /// A nonprofit.
    Nonprofit,
    /// Anything else.
    Other,
}

/// A stored organization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    /// Opaque id.
    pub id: OrgId,
    /// Organization name.
    pub name: String,
    /// Organization type.
    pub org_type: OrganizationType,
    /// Contact email.
    pub contact_email: String,
    /// Verification flag. One-way: set by an administrator, cascades into
    /// the creator's affiliation (see the verification cascade).
    pub verified: bool,
    /// Creator. May dangle.
    pub created_by: UserId,
    /// Administrator users of this organization.
    pub admin_users: Vec<UserId>,
    /// Affiliated students.
    pub affiliated_students: Vec<UserId>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl Record for OrganizationRecord {
    const COLLECTION: Collection = Collection::Organizations;

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

/// A stored user account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Opaque id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Declared role.
    pub role: Role,
    /// Whether an administrator has approved this account.
    pub approved: bool,
    /// Whether an approval request is currently outstanding.
    pub approval_requested: bool,
    /// Set by the verification cascade when the user's organization is
    /// verified. May dangle.
    pub affiliated_organization_id: Option<OrgId>,
}

impl Record for UserRecord {
    const COLLECTION: Collection = Collection::Users;

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

// ============================================================================
// Registrations
// ============================================================================

/// Admission outcome for a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Holds a seat against capacity.
    Registered,
    /// Waiting for capacity to free up.
    Waitlisted,
}

/// A stored registration. Unique per (event, user) pair; the admission
/// controller enforces this itself because the store cannot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Opaque id.
    pub id: RegistrationId,
    /// Target event. May dangle.
    pub event_id: EventId,
    /// Registered user. May dangle.
    pub user_id: UserId,
    /// Admission outcome.
    pub status: RegistrationStatus,
    /// Admission instant; promotion order for the waitlist.
    pub registered_at: DateTime<Utc>,
}

impl Record for RegistrationRecord {
    const COLLECTION: Collection = Collection::Registrations;

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

// ============================================================================
// Scheduled deletions
// ============================================================================

/// Processing state of a scheduled account deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStatus {
    /// Waiting for the due instant.
    Scheduled,
    /// Cascade completed.
    Processed,
}

/// A time-deferred account deletion, keyed 1:1 by the target user's id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledDeletionRecord {
    /// The user to delete. Doubles as the document id.
    pub user_id: UserId,
    /// When the deletion becomes due.
    pub due_at: DateTime<Utc>,
    /// When the user requested it.
    pub scheduled_at: DateTime<Utc>,
    /// Processing state.
    pub status: DeletionStatus,
}

impl Record for ScheduledDeletionRecord {
    const COLLECTION: Collection = Collection::ScheduledDeletions;

    fn record_id(&self) -> String {
        self.user_id.to_string()
    }
}

// ============================================================================
// Deletion fan-out targets
// ============================================================================

/// A user-attributed notification; deleted wholesale with the user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Opaque id.
    pub id: Uuid,
    /// The addressed user. May dangle.
    pub user_id: UserId,
    /// Notification body.
    pub body: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl Record for NotificationRecord {
    const COLLECTION: Collection = Collection::Notifications;

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

/// A user-attributed chat message; deleted wholesale with the user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageRecord {
    /// Opaque id.
    pub id: Uuid,
    /// The author. May dangle.
    pub user_id: UserId,
    /// Message body.
    pub body: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl Record for ChatMessageRecord {
    const COLLECTION: Collection = Collection::ChatMessages;

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

// ============================================================================
// Repair queue
// ============================================================================

/// What a repair ticket fixes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "repair", rename_all = "snake_case")]
pub enum RepairKind {
    /// An approved event request whose materialization write was lost.
    MissingApprovedEvent {
        /// The approved request to re-materialize from.
        request_id: RequestId,
    },
    /// A verified organization whose creator's affiliation write failed.
    PendingAffiliation {
        /// The verified organization.
        organization_id: OrgId,
        /// The creator awaiting the affiliation link.
        user_id: UserId,
    },
    /// A resolved account request whose user-flag write failed.
    PendingUserFlags {
        /// The resolved request.
        request_id: RequestId,
        /// The user whose flags are stale.
        user_id: UserId,
        /// The approval flag the request resolution decided on.
        approved: bool,
    },
}

impl RepairKind {
    /// Short name for logs and audit events.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MissingApprovedEvent { .. } => "missing_approved_event",
            Self::PendingAffiliation { .. } => "pending_affiliation",
            Self::PendingUserFlags { .. } => "pending_user_flags",
        }
    }
}

/// A reconciliation ticket: the explicit intermediate state of an
/// incomplete two-write cascade.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepairTicket {
    /// Opaque id.
    pub id: Uuid,
    /// What to fix. Flattened so the `repair` tag and subject ids are
    /// queryable top-level document fields (used for dedupe).
    #[serde(flatten)]
    pub kind: RepairKind,
    /// When the inconsistency was observed.
    pub enqueued_at: DateTime<Utc>,
    /// How many times reconciliation has attempted this ticket.
    pub attempts: u32,
}

impl RepairTicket {
    /// Build a fresh ticket.
    #[must_use]
    pub fn new(kind: RepairKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            enqueued_at: now,
            attempts: 0,
        }
    }
}

impl Record for RepairTicket {
    const COLLECTION: Collection = Collection::RepairQueue;

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}
