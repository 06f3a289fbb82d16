//! Time-deferred account deletion and the cleanup cascade.
//!
//! A user's deletion is scheduled with a grace period, may be rescinded,
//! and is executed by a periodic processor. The cascade fans out over
//! every collection that references the user, and every step is idempotent
//! (re-deleting an absent record is a no-op, and so is re-filtering a list
//! that no longer contains the id) because a partial failure leaves
//! the schedule record in place and the next tick retries the whole
//! cascade. Each user's deletion proceeds independently: one user's
//! failure never blocks the rest of the batch.

use crate::environment::{EngineEnvironment, field_value};
use chrono::{DateTime, Utc};
use eventline_core::audit::AuditEvent;
use eventline_core::error::EngineError;
use eventline_core::ids::UserId;
use eventline_core::records::{
    DeletionStatus, EventRecord, OrganizationRecord, Record, ScheduledDeletionRecord,
};
use eventline_core::store::{Collection, Document, FieldEquals};
use eventline_runtime::metrics::{DELETION_ITEM_FAILURES, DELETIONS_PROCESSED, counter};

/// Schedules and rescinds account deletions.
pub struct DeletionScheduler {
    env: EngineEnvironment,
}

impl DeletionScheduler {
    /// Creates a new `DeletionScheduler`.
    #[must_use]
    pub const fn new(env: EngineEnvironment) -> Self {
        Self { env }
    }

    /// Create or overwrite the scheduled deletion for a user.
    ///
    /// # Errors
    ///
    /// - `Conflict` when the user's deletion has already been processed
    pub async fn schedule_deletion(
        &self,
        user_id: UserId,
        due_at: DateTime<Utc>,
    ) -> Result<ScheduledDeletionRecord, EngineError> {
        if let Some(existing) = self
            .env
            .load::<ScheduledDeletionRecord>(&user_id.to_string())
            .await?
        {
            if existing.status == DeletionStatus::Processed {
                return Err(EngineError::Conflict(format!(
                    "deletion for user {user_id} was already processed"
                )));
            }
        }

        let record = ScheduledDeletionRecord {
            user_id,
            due_at,
            scheduled_at: self.env.now(),
            status: DeletionStatus::Scheduled,
        };
        self.env.save(&record).await?;

        self.env
            .emit(AuditEvent::DeletionScheduled { user_id, due_at })
            .await;
        tracing::info!(%user_id, %due_at, "account deletion scheduled");

        Ok(record)
    }

    /// Rescind a scheduled deletion. Rescinding when nothing is scheduled
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn cancel_deletion(&self, user_id: UserId) -> Result<(), EngineError> {
        self.env
            .remove(Collection::ScheduledDeletions, user_id.to_string())
            .await?;
        tracing::info!(%user_id, "account deletion cancelled");
        Ok(())
    }
}

/// What one processor run did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Users whose cascade completed.
    pub processed: Vec<UserId>,
    /// Per-user failures, left scheduled for the next run.
    pub failures: Vec<(UserId, String)>,
}

/// Executes due deletions.
pub struct DeletionProcessor {
    env: EngineEnvironment,
}

impl DeletionProcessor {
    /// Creates a new `DeletionProcessor`.
    #[must_use]
    pub const fn new(env: EngineEnvironment) -> Self {
        Self { env }
    }

    /// Process every scheduled deletion due at `now`.
    ///
    /// # Errors
    ///
    /// Only the initial query can fail the pass; per-user cascade failures
    /// are collected in the report and retried next tick.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<DeletionReport, EngineError> {
        let scheduled: Vec<ScheduledDeletionRecord> = self
            .env
            .find(vec![FieldEquals::new("status", "scheduled")])
            .await?;

        let mut report = DeletionReport::default();

        for record in scheduled {
            if record.due_at > now {
                continue;
            }
            let user_id = record.user_id;
            match self.process_one(&record).await {
                Ok(()) => {
                    counter!(DELETIONS_PROCESSED).increment(1);
                    self.env
                        .emit(AuditEvent::DeletionProcessed { user_id })
                        .await;
                    report.processed.push(user_id);
                }
                Err(e) => {
                    counter!(DELETION_ITEM_FAILURES).increment(1);
                    tracing::warn!(
                        %user_id,
                        error = %e,
                        "deletion cascade failed partway; record stays scheduled for retry"
                    );
                    report.failures.push((user_id, e.to_string()));
                }
            }
        }

        if !report.processed.is_empty() {
            tracing::info!(processed = report.processed.len(), "deletion processor completed cascades");
        }

        Ok(report)
    }

    /// Run the cascade, then resolve the schedule record. The record is
    /// marked processed only after the cascade completes, and removed once
    /// marked. A crash in between leaves a processed (not re-runnable)
    /// record rather than a half-deleted user that never retries.
    async fn process_one(&self, record: &ScheduledDeletionRecord) -> Result<(), EngineError> {
        self.delete_user_data(record.user_id).await?;

        let mut patch = Document::new();
        patch.insert(
            "status".to_string(),
            field_value(&DeletionStatus::Processed)?,
        );
        self.env
            .patch(Collection::ScheduledDeletions, record.record_id(), patch)
            .await?;
        self.env
            .remove(Collection::ScheduledDeletions, record.record_id())
            .await
    }

    /// Delete everything that references a user. Every step tolerates
    /// already-clean state so a retried cascade converges.
    ///
    /// # Errors
    ///
    /// Propagates the first store failure; the caller leaves the schedule
    /// record in place so the next tick retries.
    pub async fn delete_user_data(&self, user_id: UserId) -> Result<(), EngineError> {
        let user_key = user_id.to_string();

        // (a) the user record itself
        self.env.remove(Collection::Users, user_key.clone()).await?;

        // (b) registrations
        self.delete_matching(Collection::Registrations, "user_id", &user_key)
            .await?;

        // (c) approval requests referencing the user
        self.delete_matching(Collection::EventRequests, "requested_by", &user_key)
            .await?;
        self.delete_matching(Collection::UserRequests, "requested_by", &user_key)
            .await?;

        // (d) notifications and chat messages attributed to the user
        self.delete_matching(Collection::Notifications, "user_id", &user_key)
            .await?;
        self.delete_matching(Collection::ChatMessages, "user_id", &user_key)
            .await?;

        // (e) event mirror lists
        let events: Vec<EventRecord> = self.env.find(vec![]).await?;
        for event in events {
            let registered: Vec<UserId> = without(&event.registered_users, user_id);
            let waitlisted: Vec<UserId> = without(&event.waitlisted_users, user_id);
            if registered.len() == event.registered_users.len()
                && waitlisted.len() == event.waitlisted_users.len()
            {
                continue;
            }
            let mut patch = Document::new();
            patch.insert("registered_users".to_string(), field_value(&registered)?);
            patch.insert("waitlisted_users".to_string(), field_value(&waitlisted)?);
            self.env
                .patch(Collection::Events, event.record_id(), patch)
                .await?;
        }

        // (f) organization membership lists
        let organizations: Vec<OrganizationRecord> = self.env.find(vec![]).await?;
        for organization in organizations {
            let admins: Vec<UserId> = without(&organization.admin_users, user_id);
            let students: Vec<UserId> = without(&organization.affiliated_students, user_id);
            if admins.len() == organization.admin_users.len()
                && students.len() == organization.affiliated_students.len()
            {
                continue;
            }
            let mut patch = Document::new();
            patch.insert("admin_users".to_string(), field_value(&admins)?);
            patch.insert("affiliated_students".to_string(), field_value(&students)?);
            self.env
                .patch(Collection::Organizations, organization.record_id(), patch)
                .await?;
        }

        tracing::info!(%user_id, "user data cascade completed");
        Ok(())
    }

    async fn delete_matching(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> Result<(), EngineError> {
        let rows = self
            .env
            .find_raw(collection, vec![FieldEquals::new(field, value)])
            .await?;
        let deletes = rows
            .into_iter()
            .map(|(id, _)| self.env.remove(collection, id));
        futures::future::try_join_all(deletes).await?;
        Ok(())
    }
}

fn without(list: &[UserId], user_id: UserId) -> Vec<UserId> {
    list.iter().copied().filter(|id| *id != user_id).collect()
}
