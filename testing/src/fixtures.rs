//! Entity fixtures for concise test setup.
//!
//! Every builder returns a fully valid record anchored at the instant the
//! test passes in, so tests control time explicitly and stay deterministic.

use chrono::{DateTime, Duration, Utc};
use eventline_core::actor::Role;
use eventline_core::ids::{EventId, OrgId, RegistrationId, UserId};
use eventline_core::records::{
    ChatMessageRecord, EventDraft, EventRecord, EventStatus, NotificationRecord,
    OrganizationRecord, OrganizationType, RegistrationRecord, RegistrationStatus, ScheduleWindow,
    UserRecord,
};
use uuid::Uuid;

/// The instant the default test clock starts at (2025-06-01 00:00:00 UTC).
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which should never
/// happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn base_instant() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
        .expect("hardcoded timestamp should always parse")
        .with_timezone(&Utc)
}

/// A valid candidate event payload: a two-hour event starting a day from
/// `now`, unlimited capacity, registration open.
///
/// # Panics
///
/// Never panics in practice; the constructed window is always valid.
#[must_use]
#[allow(clippy::expect_used)]
pub fn draft(organization_id: OrgId, now: DateTime<Utc>) -> EventDraft {
    EventDraft {
        name: "Spring Career Fair".to_string(),
        description: "Meet employers on the main campus.".to_string(),
        schedule: ScheduleWindow::new(now + Duration::days(1), now + Duration::days(1) + Duration::hours(2))
            .expect("fixture window is always valid"),
        capacity: None,
        organization_id,
        allow_registration: true,
    }
}

/// A published event created at `now`, running tomorrow, unlimited capacity.
///
/// # Panics
///
/// Never panics in practice; the fixture draft is always valid.
#[must_use]
#[allow(clippy::expect_used)]
pub fn published_event(now: DateTime<Utc>) -> EventRecord {
    EventRecord::from_draft(
        EventId::new(),
        draft(OrgId::new(), now),
        UserId::new(),
        EventStatus::Published,
        now,
    )
    .expect("fixture draft is always valid")
}

/// A published event with the given capacity.
#[must_use]
pub fn event_with_capacity(capacity: u32, now: DateTime<Utc>) -> EventRecord {
    let mut event = published_event(now);
    event.capacity = Some(capacity);
    event
}

/// An approved user with the given role.
#[must_use]
pub fn user(role: Role) -> UserRecord {
    let id = UserId::new();
    UserRecord {
        id,
        name: format!("user-{id}"),
        email: format!("{id}@example.edu"),
        role,
        approved: true,
        approval_requested: false,
        affiliated_organization_id: None,
    }
}

/// An unverified organization created by `created_by`.
#[must_use]
pub fn organization(created_by: UserId, now: DateTime<Utc>) -> OrganizationRecord {
    OrganizationRecord {
        id: OrgId::new(),
        name: "Robotics Society".to_string(),
        org_type: OrganizationType::StudentClub,
        contact_email: "robotics@example.edu".to_string(),
        verified: false,
        created_by,
        admin_users: vec![created_by],
        affiliated_students: Vec::new(),
        created_at: now,
    }
}

/// A registration for `(event_id, user_id)` with the given status.
#[must_use]
pub fn registration(
    event_id: EventId,
    user_id: UserId,
    status: RegistrationStatus,
    now: DateTime<Utc>,
) -> RegistrationRecord {
    RegistrationRecord {
        id: RegistrationId::new(),
        event_id,
        user_id,
        status,
        registered_at: now,
    }
}

/// A notification addressed to `user_id`.
#[must_use]
pub fn notification(user_id: UserId, now: DateTime<Utc>) -> NotificationRecord {
    NotificationRecord {
        id: Uuid::new_v4(),
        user_id,
        body: "Your registration was confirmed.".to_string(),
        created_at: now,
    }
}

/// A chat message authored by `user_id`.
#[must_use]
pub fn chat_message(user_id: UserId, now: DateTime<Utc>) -> ChatMessageRecord {
    ChatMessageRecord {
        id: Uuid::new_v4(),
        user_id,
        body: "Looking forward to this!".to_string(),
        created_at: now,
    }
}
