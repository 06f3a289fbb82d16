//! Event status state machine and admin edit path.
//!
//! Two creation paths exist in parallel and both are preserved:
//!
//! - **Admin-direct**: an administrator creates the event immediately, as
//!   `draft` or `published` at their choice, and may later resolve a
//!   `pending_approval` event directly.
//! - **Request-mediated**: a non-privileged creator submits an
//!   [`eventline_core::records::EventCreationRequest`] (see
//!   [`crate::approvals`]); approval materializes the event straight into
//!   `published`.
//!
//! `published → finished` belongs exclusively to the consistency sweep and
//! is not reachable from here.

use crate::environment::{EngineEnvironment, field_value};
use chrono::{DateTime, Utc};
use eventline_core::actor::Actor;
use eventline_core::audit::AuditEvent;
use eventline_core::error::EngineError;
use eventline_core::ids::EventId;
use eventline_core::records::{EventDraft, EventRecord, EventStatus, Record, ScheduleWindow};
use eventline_core::store::Collection;

/// Partial update for an event; `None` fields are left untouched.
///
/// Schedule edits re-validate the end-after-start invariant against the
/// merged window, so a patch can never produce an inverted schedule even
/// when it only moves one endpoint.
#[derive(Clone, Debug, Default)]
pub struct EventPatch {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New start instant.
    pub starts_at: Option<DateTime<Utc>>,
    /// New end instant.
    pub ends_at: Option<DateTime<Utc>>,
    /// New capacity (`Some(None)` clears the limit).
    pub capacity: Option<Option<u32>>,
    /// Open or close registration.
    pub allow_registration: Option<bool>,
}

impl EventPatch {
    /// Whether the patch touches anything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.starts_at.is_none()
            && self.ends_at.is_none()
            && self.capacity.is_none()
            && self.allow_registration.is_none()
    }
}

/// Event creation, edits, and direct admin status transitions.
pub struct EventLifecycle {
    env: EngineEnvironment,
}

impl EventLifecycle {
    /// Creates a new `EventLifecycle` service.
    #[must_use]
    pub const fn new(env: EngineEnvironment) -> Self {
        Self { env }
    }

    /// Create an event directly. Admin only; lands in `draft` or
    /// `published` at the operator's choice.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors
    /// - `Validation` for an invalid draft
    pub async fn create_event(
        &self,
        actor: &Actor,
        draft: EventDraft,
        publish_immediately: bool,
    ) -> Result<EventRecord, EngineError> {
        actor.require_admin("create_event")?;

        let status = if publish_immediately {
            EventStatus::Published
        } else {
            EventStatus::Draft
        };
        let now = self.env.now();
        let event = EventRecord::from_draft(EventId::new(), draft, actor.user_id, status, now)?;
        self.env.save(&event).await?;

        if status == EventStatus::Published {
            self.env
                .emit(AuditEvent::EventPublished { event_id: event.id })
                .await;
        }
        tracing::info!(event_id = %event.id, ?status, "event created");

        Ok(event)
    }

    /// Apply a partial edit. Any schedule change re-validates the window.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors
    /// - `NotFound` when the event is absent
    /// - `InvalidState` when the event is in a terminal status
    /// - `Validation` for an empty patch, an empty name, a zero capacity,
    ///   or an inverted schedule
    pub async fn update_event(
        &self,
        actor: &Actor,
        event_id: EventId,
        patch: EventPatch,
    ) -> Result<EventRecord, EngineError> {
        actor.require_admin("update_event")?;

        if patch.is_empty() {
            return Err(EngineError::validation("no fields to update"));
        }

        let mut event: EventRecord = self
            .env
            .load(&event_id.to_string())
            .await?
            .ok_or_else(|| EngineError::not_found(format!("event {event_id}")))?;

        if event.status.is_terminal() {
            return Err(EngineError::invalid_state(format!(
                "event {event_id} is {} and can no longer be edited",
                event.status.as_str()
            )));
        }

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(EngineError::validation("event name cannot be empty"));
            }
            event.name = name;
        }
        if let Some(description) = patch.description {
            event.description = description;
        }
        if patch.starts_at.is_some() || patch.ends_at.is_some() {
            // Merge with the stored endpoints, then re-validate: the
            // end-after-start invariant holds on every mutation, not just
            // creation.
            event.schedule = ScheduleWindow::new(
                patch.starts_at.unwrap_or(event.schedule.starts_at),
                patch.ends_at.unwrap_or(event.schedule.ends_at),
            )?;
        }
        if let Some(capacity) = patch.capacity {
            if capacity == Some(0) {
                return Err(EngineError::validation("capacity must be positive when set"));
            }
            event.capacity = capacity;
        }
        if let Some(allow) = patch.allow_registration {
            event.allow_registration = allow;
        }

        event.updated_at = self.env.now();
        self.env.save(&event).await?;
        tracing::info!(%event_id, "event updated");

        Ok(event)
    }

    /// Move a draft into `pending_approval`. Allowed for the event's
    /// creator or an administrator.
    ///
    /// # Errors
    ///
    /// - `Forbidden` when the actor is neither creator nor admin
    /// - `NotFound` when the event is absent
    /// - `InvalidState` for an illegal transition
    pub async fn submit_for_approval(
        &self,
        actor: &Actor,
        event_id: EventId,
    ) -> Result<(), EngineError> {
        let event: EventRecord = self
            .env
            .load(&event_id.to_string())
            .await?
            .ok_or_else(|| EngineError::not_found(format!("event {event_id}")))?;

        if !actor.is_admin() && actor.user_id != event.created_by {
            return Err(EngineError::Forbidden(format!(
                "only the creator or an admin may submit event {event_id} for approval"
            )));
        }

        self.transition(event, EventStatus::PendingApproval).await
    }

    /// Admin-direct approval of a `pending_approval` event.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors
    /// - `NotFound` when the event is absent
    /// - `InvalidState` for an illegal transition
    pub async fn approve_pending_event(
        &self,
        actor: &Actor,
        event_id: EventId,
    ) -> Result<(), EngineError> {
        actor.require_admin("approve_pending_event")?;
        let event = self.load_event(event_id).await?;
        self.transition(event, EventStatus::Published).await?;
        self.env
            .emit(AuditEvent::EventPublished { event_id })
            .await;
        Ok(())
    }

    /// Admin-direct rejection of a `pending_approval` event.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors
    /// - `NotFound` when the event is absent
    /// - `InvalidState` for an illegal transition
    pub async fn reject_pending_event(
        &self,
        actor: &Actor,
        event_id: EventId,
    ) -> Result<(), EngineError> {
        actor.require_admin("reject_pending_event")?;
        let event = self.load_event(event_id).await?;
        self.transition(event, EventStatus::Rejected).await
    }

    /// Archive a published or finished event.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors
    /// - `NotFound` when the event is absent
    /// - `InvalidState` for an illegal transition
    pub async fn archive_event(&self, actor: &Actor, event_id: EventId) -> Result<(), EngineError> {
        actor.require_admin("archive_event")?;
        let event = self.load_event(event_id).await?;
        self.transition(event, EventStatus::Archived).await
    }

    /// Explicit admin delete. The only path that physically removes an
    /// event record.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors
    pub async fn delete_event(&self, actor: &Actor, event_id: EventId) -> Result<(), EngineError> {
        actor.require_admin("delete_event")?;
        self.env
            .remove(Collection::Events, event_id.to_string())
            .await?;
        tracing::info!(%event_id, "event deleted by admin");
        Ok(())
    }

    async fn load_event(&self, event_id: EventId) -> Result<EventRecord, EngineError> {
        self.env
            .load(&event_id.to_string())
            .await?
            .ok_or_else(|| EngineError::not_found(format!("event {event_id}")))
    }

    async fn transition(
        &self,
        event: EventRecord,
        next: EventStatus,
    ) -> Result<(), EngineError> {
        if !event.status.can_transition(next) {
            return Err(EngineError::invalid_state(format!(
                "event {} cannot move from {} to {}",
                event.id,
                event.status.as_str(),
                next.as_str()
            )));
        }

        let now = self.env.now();
        let mut patch = eventline_core::store::Document::new();
        patch.insert("status".to_string(), field_value(&next)?);
        patch.insert("updated_at".to_string(), field_value(&now)?);
        self.env
            .patch(Collection::Events, event.record_id(), patch)
            .await?;
        tracing::info!(
            event_id = %event.id,
            from = event.status.as_str(),
            to = next.as_str(),
            "event status transition"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use eventline_core::actor::Role;
    use eventline_core::audit::NoopAuditSink;
    use eventline_core::ids::{OrgId, UserId};
    use eventline_testing::{InMemoryRecordStore, fixtures, test_clock};
    use std::sync::Arc;

    fn service(store: Arc<InMemoryRecordStore>) -> EventLifecycle {
        EventLifecycle::new(EngineEnvironment::new(
            store,
            Arc::new(test_clock()),
            Arc::new(NoopAuditSink),
        ))
    }

    fn admin() -> Actor {
        Actor::admin(UserId::new())
    }

    #[tokio::test]
    async fn admin_creates_published_or_draft() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));
        let now = fixtures::base_instant();

        let published = service
            .create_event(&admin(), fixtures::draft(OrgId::new(), now), true)
            .await
            .unwrap();
        assert_eq!(published.status, EventStatus::Published);

        let draft = service
            .create_event(&admin(), fixtures::draft(OrgId::new(), now), false)
            .await
            .unwrap();
        assert_eq!(draft.status, EventStatus::Draft);
    }

    #[tokio::test]
    async fn non_admin_cannot_create_directly() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(store);
        let actor = Actor::new(UserId::new(), Role::Organizer);

        let err = service
            .create_event(
                &actor,
                fixtures::draft(OrgId::new(), fixtures::base_instant()),
                true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn schedule_edit_revalidates_window() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));
        let event = fixtures::published_event(fixtures::base_instant());
        store.seed(&event).unwrap();

        // Moving the end before the stored start must fail
        let err = service
            .update_event(
                &admin(),
                event.id,
                EventPatch {
                    ends_at: Some(event.schedule.starts_at - chrono::Duration::hours(1)),
                    ..EventPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // The stored record is untouched
        let stored: EventRecord = store.peek(&event.id.to_string()).unwrap().unwrap();
        assert_eq!(stored.schedule, event.schedule);
    }

    #[tokio::test]
    async fn valid_schedule_edit_lands() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));
        let event = fixtures::published_event(fixtures::base_instant());
        store.seed(&event).unwrap();

        let new_end = event.schedule.ends_at + chrono::Duration::hours(3);
        let updated = service
            .update_event(
                &admin(),
                event.id,
                EventPatch {
                    ends_at: Some(new_end),
                    ..EventPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.schedule.ends_at, new_end);
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));
        let event = fixtures::published_event(fixtures::base_instant());
        store.seed(&event).unwrap();

        let err = service
            .update_event(&admin(), event.id, EventPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn pending_event_resolves_both_ways() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));
        let now = fixtures::base_instant();

        let mut pending = fixtures::published_event(now);
        pending.status = EventStatus::PendingApproval;
        store.seed(&pending).unwrap();
        service
            .approve_pending_event(&admin(), pending.id)
            .await
            .unwrap();
        let approved: EventRecord = store.peek(&pending.id.to_string()).unwrap().unwrap();
        assert_eq!(approved.status, EventStatus::Published);

        let mut pending2 = fixtures::published_event(now);
        pending2.status = EventStatus::PendingApproval;
        store.seed(&pending2).unwrap();
        service
            .reject_pending_event(&admin(), pending2.id)
            .await
            .unwrap();
        let rejected: EventRecord = store.peek(&pending2.id.to_string()).unwrap().unwrap();
        assert_eq!(rejected.status, EventStatus::Rejected);
    }

    #[tokio::test]
    async fn illegal_transition_is_invalid_state() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));

        let mut finished = fixtures::published_event(fixtures::base_instant());
        finished.status = EventStatus::Finished;
        store.seed(&finished).unwrap();

        let err = service
            .approve_pending_event(&admin(), finished.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn creator_submits_draft_for_approval() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));
        let creator = UserId::new();

        let mut draft = fixtures::published_event(fixtures::base_instant());
        draft.status = EventStatus::Draft;
        draft.created_by = creator;
        store.seed(&draft).unwrap();

        service
            .submit_for_approval(&Actor::new(creator, Role::Organizer), draft.id)
            .await
            .unwrap();
        let stored: EventRecord = store.peek(&draft.id.to_string()).unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::PendingApproval);

        // A stranger cannot submit someone else's draft
        let mut other = fixtures::published_event(fixtures::base_instant());
        other.status = EventStatus::Draft;
        store.seed(&other).unwrap();
        let err = service
            .submit_for_approval(&Actor::new(UserId::new(), Role::Student), other.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn terminal_event_cannot_be_edited() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));

        let mut archived = fixtures::published_event(fixtures::base_instant());
        archived.status = EventStatus::Archived;
        store.seed(&archived).unwrap();

        let err = service
            .update_event(
                &admin(),
                archived.id,
                EventPatch {
                    name: Some("renamed".to_string()),
                    ..EventPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }
}
