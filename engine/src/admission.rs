//! Admission control: registered-vs-waitlisted decisions under capacity.
//!
//! The capacity check is a read-then-write sequence against a store with
//! only single-record atomicity, which makes the naive version a
//! check-then-act race: two concurrent sign-ups can both observe
//! `count < capacity` and both be admitted. The fix here is a
//! single-writer lock per event id: every admission decision for one
//! event is serialized through its lock, so for capacity C the number of
//! `registered` registrations never exceeds C.
//!
//! The authoritative record is the registration itself; the event's
//! `registered_users` / `waitlisted_users` lists are a denormalized mirror
//! kept best-effort for read convenience.

use crate::environment::{EngineEnvironment, field_value};
use eventline_core::audit::AuditEvent;
use eventline_core::error::EngineError;
use eventline_core::ids::{EventId, RegistrationId, UserId};
use eventline_core::records::{EventRecord, Record, RegistrationRecord, RegistrationStatus};
use eventline_core::store::{Collection, Document, FieldEquals};
use eventline_runtime::metrics::{
    REGISTRATIONS_ADMITTED, REGISTRATIONS_WAITLISTED, WAITLIST_PROMOTIONS, counter,
};
use std::collections::HashMap;
use std::sync::{Mutex as StdMutex, PoisonError};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Decides admission for event sign-ups and owns the per-event locks.
pub struct AdmissionController {
    env: EngineEnvironment,
    event_locks: StdMutex<HashMap<EventId, Arc<Mutex<()>>>>,
}

impl AdmissionController {
    /// Creates a new `AdmissionController`.
    #[must_use]
    pub fn new(env: EngineEnvironment) -> Self {
        Self {
            env,
            event_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// The single-writer lock for one event id.
    fn lock_for(&self, event_id: EventId) -> Arc<Mutex<()>> {
        let mut locks = self
            .event_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(event_id).or_default())
    }

    /// Register `user_id` for `event_id`.
    ///
    /// Admits as `registered` while the count of registered sign-ups stays
    /// below capacity (or capacity is unset), otherwise `waitlisted`.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the event does not exist
    /// - `InvalidState` when the event does not accept registrations
    /// - `AlreadyRegistered` when a registration exists for this pair
    pub async fn register(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<RegistrationRecord, EngineError> {
        let lock = self.lock_for(event_id);
        let _guard = lock.lock().await;

        let event: EventRecord = self
            .env
            .load(&event_id.to_string())
            .await?
            .ok_or_else(|| EngineError::not_found(format!("event {event_id}")))?;

        if !event.allow_registration {
            return Err(EngineError::invalid_state(format!(
                "event {event_id} does not accept registrations"
            )));
        }

        if self.registration_for(event_id, user_id).await?.is_some() {
            return Err(EngineError::AlreadyRegistered { event_id, user_id });
        }

        let registered_count = self.registered_count(event_id).await?;
        let status = match event.capacity {
            Some(capacity) if registered_count >= usize::try_from(capacity).unwrap_or(usize::MAX) => {
                RegistrationStatus::Waitlisted
            }
            _ => RegistrationStatus::Registered,
        };

        let registration = RegistrationRecord {
            id: RegistrationId::new(),
            event_id,
            user_id,
            status,
            registered_at: self.env.now(),
        };
        self.env.save(&registration).await?;

        self.mirror_add(&event, user_id, status).await;

        match status {
            RegistrationStatus::Registered => {
                counter!(REGISTRATIONS_ADMITTED).increment(1);
                self.env
                    .emit(AuditEvent::RegistrationAdmitted { event_id, user_id })
                    .await;
            }
            RegistrationStatus::Waitlisted => {
                counter!(REGISTRATIONS_WAITLISTED).increment(1);
                self.env
                    .emit(AuditEvent::RegistrationWaitlisted { event_id, user_id })
                    .await;
            }
        }
        tracing::info!(%event_id, %user_id, ?status, "registration persisted");

        Ok(registration)
    }

    /// Cancel the registration for `(event_id, user_id)`.
    ///
    /// When a `registered` sign-up is cancelled, the oldest waitlisted
    /// registration (by `registered_at`) is promoted in its place, under
    /// the same per-event lock as admissions. Registrations removed behind
    /// the engine's back trigger no promotion.
    ///
    /// # Errors
    ///
    /// - `NotFound` when no registration exists for this pair
    pub async fn cancel_registration(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<(), EngineError> {
        let lock = self.lock_for(event_id);
        let _guard = lock.lock().await;

        let registration = self
            .registration_for(event_id, user_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!(
                    "registration for user {user_id} on event {event_id}"
                ))
            })?;

        self.env
            .remove(Collection::Registrations, registration.record_id())
            .await?;
        self.mirror_remove(event_id, user_id).await;
        tracing::info!(%event_id, %user_id, "registration cancelled");

        if registration.status == RegistrationStatus::Registered {
            self.promote_oldest_waitlisted(event_id).await?;
        }

        Ok(())
    }

    /// Current count of registered (not waitlisted) sign-ups for an event.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn registered_count(&self, event_id: EventId) -> Result<usize, EngineError> {
        let rows = self
            .env
            .find_raw(
                Collection::Registrations,
                vec![
                    FieldEquals::new("event_id", event_id.to_string()),
                    FieldEquals::new("status", "registered"),
                ],
            )
            .await?;
        Ok(rows.len())
    }

    async fn registration_for(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Option<RegistrationRecord>, EngineError> {
        let mut matches: Vec<RegistrationRecord> = self
            .env
            .find(vec![
                FieldEquals::new("event_id", event_id.to_string()),
                FieldEquals::new("user_id", user_id.to_string()),
            ])
            .await?;
        Ok(matches.pop())
    }

    async fn promote_oldest_waitlisted(&self, event_id: EventId) -> Result<(), EngineError> {
        let waitlisted: Vec<RegistrationRecord> = self
            .env
            .find(vec![
                FieldEquals::new("event_id", event_id.to_string()),
                FieldEquals::new("status", "waitlisted"),
            ])
            .await?;

        let Some(next) = waitlisted
            .into_iter()
            .min_by_key(|registration| registration.registered_at)
        else {
            return Ok(());
        };

        let mut patch = Document::new();
        patch.insert(
            "status".to_string(),
            field_value(&RegistrationStatus::Registered)?,
        );
        self.env
            .patch(Collection::Registrations, next.record_id(), patch)
            .await?;

        self.mirror_promote(event_id, next.user_id).await;

        counter!(WAITLIST_PROMOTIONS).increment(1);
        self.env
            .emit(AuditEvent::WaitlistPromoted {
                event_id,
                user_id: next.user_id,
                registration_id: next.id,
            })
            .await;
        tracing::info!(%event_id, user_id = %next.user_id, "waitlisted registration promoted");

        Ok(())
    }

    /// Append the user to the event's mirror list. Best-effort: the
    /// registration record is authoritative, so a mirror failure is logged
    /// and swallowed.
    async fn mirror_add(&self, event: &EventRecord, user_id: UserId, status: RegistrationStatus) {
        let (field, mut list) = match status {
            RegistrationStatus::Registered => ("registered_users", event.registered_users.clone()),
            RegistrationStatus::Waitlisted => ("waitlisted_users", event.waitlisted_users.clone()),
        };
        if !list.contains(&user_id) {
            list.push(user_id);
        }
        self.write_mirror(event.id, &[(field, list)]).await;
    }

    /// Drop the user from both mirror lists after a cancellation.
    async fn mirror_remove(&self, event_id: EventId, user_id: UserId) {
        let Ok(Some(event)) = self.env.load::<EventRecord>(&event_id.to_string()).await else {
            return;
        };
        let registered: Vec<UserId> = event
            .registered_users
            .iter()
            .copied()
            .filter(|id| *id != user_id)
            .collect();
        let waitlisted: Vec<UserId> = event
            .waitlisted_users
            .iter()
            .copied()
            .filter(|id| *id != user_id)
            .collect();
        self.write_mirror(
            event_id,
            &[("registered_users", registered), ("waitlisted_users", waitlisted)],
        )
        .await;
    }

    /// Move a promoted user from the waitlist mirror to the registered one.
    async fn mirror_promote(&self, event_id: EventId, user_id: UserId) {
        let Ok(Some(event)) = self.env.load::<EventRecord>(&event_id.to_string()).await else {
            return;
        };
        let mut registered = event.registered_users.clone();
        if !registered.contains(&user_id) {
            registered.push(user_id);
        }
        let waitlisted: Vec<UserId> = event
            .waitlisted_users
            .iter()
            .copied()
            .filter(|id| *id != user_id)
            .collect();
        self.write_mirror(
            event_id,
            &[("registered_users", registered), ("waitlisted_users", waitlisted)],
        )
        .await;
    }

    async fn write_mirror(&self, event_id: EventId, fields: &[(&str, Vec<UserId>)]) {
        let mut patch = Document::new();
        for (field, list) in fields {
            match field_value(list) {
                Ok(value) => {
                    patch.insert((*field).to_string(), value);
                }
                Err(e) => {
                    tracing::warn!(%event_id, error = %e, "mirror list serialization failed");
                    return;
                }
            }
        }
        if let Err(e) = self
            .env
            .patch(Collection::Events, event_id.to_string(), patch)
            .await
        {
            tracing::warn!(%event_id, error = %e, "denormalized mirror update failed");
        }
    }
}
