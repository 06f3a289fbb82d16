//! Reconciliation: detects and repairs incomplete two-write cascades.
//!
//! The approval workflow and the verification cascade favor forward
//! progress over rollback: when their second write fails, the first write
//! stands and the gap is recorded as a repair ticket. This pass is the
//! other half of that bargain:
//!
//! 1. **Audit scans** find stragglers that never got a ticket (a crash
//!    between the two writes): approved event requests with no
//!    materialized event, and resolved account requests whose user still
//!    carries a stale `approval_requested` flag.
//! 2. **The drain** applies every ticket with retry-on-transient-error,
//!    deleting tickets that succeed or turn out stale, and counting
//!    attempts on the ones that keep failing.

use crate::environment::{EngineEnvironment, field_value};
use chrono::{DateTime, Utc};
use eventline_core::audit::AuditEvent;
use eventline_core::error::EngineError;
use eventline_core::ids::{EventId, OrgId, RequestId, UserId};
use eventline_core::records::{
    EventCreationRequest, EventRecord, Record, RepairKind, RepairTicket, ReviewStatus,
    UserApprovalRequest, UserRecord,
};
use eventline_core::store::{Collection, Document, FieldEquals};
use eventline_runtime::metrics::{REPAIRS_APPLIED, counter};
use eventline_runtime::retry::{RetryPolicy, retry_with_predicate};
use eventline_runtime::transient_store_error;

/// What one reconciliation run did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Tickets newly enqueued by the audit scans.
    pub enqueued: usize,
    /// Tickets applied and removed.
    pub applied: usize,
    /// Tickets that turned out stale and were removed.
    pub discarded: usize,
    /// Tickets that failed again and stay queued.
    pub retrying: usize,
}

/// The reconciliation pass.
pub struct Reconciliation {
    env: EngineEnvironment,
    retry: RetryPolicy,
    max_attempts: u32,
}

impl Reconciliation {
    /// Creates a new `Reconciliation` pass with the given retry policy and
    /// per-ticket attempt bound.
    #[must_use]
    pub const fn new(env: EngineEnvironment, retry: RetryPolicy, max_attempts: u32) -> Self {
        Self {
            env,
            retry,
            max_attempts,
        }
    }

    /// Run one pass at the injected instant.
    ///
    /// # Errors
    ///
    /// Only the queue/audit queries can fail the pass; per-ticket failures
    /// are counted and retried on later runs.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ReconcileReport, EngineError> {
        let mut report = ReconcileReport::default();

        self.audit_event_requests(now, &mut report).await?;
        self.audit_account_requests(&mut report).await?;
        self.drain_tickets(&mut report).await?;

        if report.applied > 0 || report.enqueued > 0 {
            tracing::info!(
                enqueued = report.enqueued,
                applied = report.applied,
                discarded = report.discarded,
                retrying = report.retrying,
                "reconciliation pass completed"
            );
        }
        Ok(report)
    }

    /// Crash-window detection: an approved event request with no
    /// corresponding event must be detectable, not silently lost.
    async fn audit_event_requests(
        &self,
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        let approved: Vec<EventCreationRequest> = self
            .env
            .find(vec![FieldEquals::new("status", "approved")])
            .await?;

        for request in approved {
            if self.event_for_request(request.id).await?.is_some() {
                continue;
            }
            if self
                .ticket_exists("missing_approved_event", "request_id", &request.id.to_string())
                .await?
            {
                continue;
            }
            tracing::warn!(
                request_id = %request.id,
                "approved event request has no materialized event; enqueueing repair"
            );
            self.enqueue(
                RepairKind::MissingApprovedEvent {
                    request_id: request.id,
                },
                now,
            )
            .await?;
            report.enqueued += 1;
        }
        Ok(())
    }

    /// Resolved account requests whose user still shows a stale
    /// `approval_requested` flag are re-applied in place; the patch is
    /// idempotent so no ticket is needed.
    async fn audit_account_requests(
        &self,
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        for (status, approved) in [("approved", true), ("rejected", false)] {
            let requests: Vec<UserApprovalRequest> = self
                .env
                .find(vec![FieldEquals::new("status", status)])
                .await?;

            for request in requests {
                let user_id = request.requested_by;
                let Some(user) = self.env.load::<UserRecord>(&user_id.to_string()).await? else {
                    continue;
                };
                if !user.approval_requested && user.approved == approved {
                    continue;
                }
                let mut patch = Document::new();
                patch.insert("approved".to_string(), field_value(&approved)?);
                patch.insert("approval_requested".to_string(), field_value(&false)?);
                self.env
                    .patch(Collection::Users, user_id.to_string(), patch)
                    .await?;
                counter!(REPAIRS_APPLIED).increment(1);
                report.applied += 1;
                tracing::info!(%user_id, approved, "re-applied stale account approval flags");
            }
        }
        Ok(())
    }

    async fn drain_tickets(&self, report: &mut ReconcileReport) -> Result<(), EngineError> {
        let tickets: Vec<RepairTicket> = self.env.find(vec![]).await?;

        for ticket in tickets {
            if ticket.attempts >= self.max_attempts {
                tracing::error!(
                    ticket_id = %ticket.id,
                    repair = ticket.kind.name(),
                    attempts = ticket.attempts,
                    "repair ticket exceeded max attempts; leaving for operator"
                );
                continue;
            }
            match self.apply_ticket(&ticket).await {
                Ok(TicketOutcome::Applied) => {
                    self.remove_ticket(&ticket).await?;
                    counter!(REPAIRS_APPLIED).increment(1);
                    self.env
                        .emit(AuditEvent::RepairApplied {
                            kind: ticket.kind.name().to_string(),
                        })
                        .await;
                    report.applied += 1;
                }
                Ok(TicketOutcome::Stale) => {
                    self.remove_ticket(&ticket).await?;
                    report.discarded += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        ticket_id = %ticket.id,
                        repair = ticket.kind.name(),
                        error = %e,
                        "repair ticket failed; will retry"
                    );
                    let mut patch = Document::new();
                    patch.insert("attempts".to_string(), field_value(&(ticket.attempts + 1))?);
                    if let Err(e) = self
                        .env
                        .patch(Collection::RepairQueue, ticket.record_id(), patch)
                        .await
                    {
                        tracing::warn!(ticket_id = %ticket.id, error = %e, "could not bump ticket attempts");
                    }
                    report.retrying += 1;
                }
            }
        }
        Ok(())
    }

    async fn apply_ticket(&self, ticket: &RepairTicket) -> Result<TicketOutcome, EngineError> {
        match &ticket.kind {
            RepairKind::MissingApprovedEvent { request_id } => {
                self.repair_missing_event(*request_id).await
            }
            RepairKind::PendingAffiliation {
                organization_id,
                user_id,
            } => self.repair_affiliation(*organization_id, *user_id).await,
            RepairKind::PendingUserFlags {
                request_id: _,
                user_id,
                approved,
            } => self.repair_user_flags(*user_id, *approved).await,
        }
    }

    async fn repair_missing_event(
        &self,
        request_id: RequestId,
    ) -> Result<TicketOutcome, EngineError> {
        let Some(request) = self
            .env
            .load::<EventCreationRequest>(&request_id.to_string())
            .await?
        else {
            return Ok(TicketOutcome::Stale);
        };
        if request.review.status != ReviewStatus::Approved {
            return Ok(TicketOutcome::Stale);
        }
        if self.event_for_request(request_id).await?.is_some() {
            return Ok(TicketOutcome::Stale);
        }

        let reviewed_at = request.review.reviewed_at.unwrap_or(request.submitted_at);
        let event = EventRecord::from_request(EventId::new(), &request, reviewed_at)?;

        retry_with_predicate(
            self.retry.clone(),
            || self.env.save(&event),
            |e: &EngineError| match e {
                EngineError::Store(store_error) => transient_store_error(store_error),
                _ => false,
            },
        )
        .await?;

        self.env
            .emit(AuditEvent::EventPublished { event_id: event.id })
            .await;
        tracing::info!(%request_id, event_id = %event.id, "materialized event for approved request");
        Ok(TicketOutcome::Applied)
    }

    async fn repair_affiliation(
        &self,
        organization_id: OrgId,
        user_id: UserId,
    ) -> Result<TicketOutcome, EngineError> {
        let Some(user) = self.env.load::<UserRecord>(&user_id.to_string()).await? else {
            // The creator vanished; nothing left to link.
            return Ok(TicketOutcome::Stale);
        };
        if user.affiliated_organization_id == Some(organization_id) {
            return Ok(TicketOutcome::Stale);
        }

        let mut patch = Document::new();
        patch.insert(
            "affiliated_organization_id".to_string(),
            field_value(&Some(organization_id))?,
        );
        self.env
            .patch(Collection::Users, user_id.to_string(), patch)
            .await?;
        tracing::info!(%organization_id, %user_id, "applied pending affiliation link");
        Ok(TicketOutcome::Applied)
    }

    async fn repair_user_flags(
        &self,
        user_id: UserId,
        approved: bool,
    ) -> Result<TicketOutcome, EngineError> {
        if self
            .env
            .load::<UserRecord>(&user_id.to_string())
            .await?
            .is_none()
        {
            return Ok(TicketOutcome::Stale);
        }

        let mut patch = Document::new();
        patch.insert("approved".to_string(), field_value(&approved)?);
        patch.insert("approval_requested".to_string(), field_value(&false)?);
        self.env
            .patch(Collection::Users, user_id.to_string(), patch)
            .await?;
        Ok(TicketOutcome::Applied)
    }

    async fn event_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Option<EventRecord>, EngineError> {
        let mut events: Vec<EventRecord> = self
            .env
            .find(vec![FieldEquals::new(
                "source_request_id",
                request_id.to_string(),
            )])
            .await?;
        Ok(events.pop())
    }

    async fn ticket_exists(
        &self,
        repair: &str,
        subject_field: &str,
        subject_id: &str,
    ) -> Result<bool, EngineError> {
        let rows = self
            .env
            .find_raw(
                Collection::RepairQueue,
                vec![
                    FieldEquals::new("repair", repair),
                    FieldEquals::new(subject_field, subject_id),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn enqueue(&self, kind: RepairKind, now: DateTime<Utc>) -> Result<(), EngineError> {
        let name = kind.name().to_string();
        let ticket = RepairTicket::new(kind, now);
        self.env.save(&ticket).await?;
        self.env.emit(AuditEvent::RepairEnqueued { kind: name }).await;
        Ok(())
    }

    async fn remove_ticket(&self, ticket: &RepairTicket) -> Result<(), EngineError> {
        self.env
            .remove(Collection::RepairQueue, ticket.record_id())
            .await
    }
}

enum TicketOutcome {
    Applied,
    Stale,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::approvals::{ApprovalOutcome, Approvals};
    use crate::environment::EngineEnvironment;
    use crate::verification::Verification;
    use eventline_core::actor::{Actor, Role};
    use eventline_core::audit::NoopAuditSink;
    use eventline_core::store::RecordStore;
    use eventline_testing::{InMemoryRecordStore, fixtures, test_clock};
    use std::sync::Arc;
    use std::time::Duration;

    fn env(store: Arc<InMemoryRecordStore>) -> EngineEnvironment {
        EngineEnvironment::new(store, Arc::new(test_clock()), Arc::new(NoopAuditSink))
    }

    fn pass(store: Arc<InMemoryRecordStore>) -> Reconciliation {
        let retry = RetryPolicy::builder()
            .max_retries(1)
            .initial_delay(Duration::from_millis(1))
            .build();
        Reconciliation::new(env(store), retry, 5)
    }

    #[tokio::test]
    async fn deferred_event_materialization_is_repaired() {
        let store = Arc::new(InMemoryRecordStore::new());
        let approvals = Approvals::new(env(Arc::clone(&store)));
        let requester = Actor::new(UserId::new(), Role::Organizer);
        let org_id = eventline_core::ids::OrgId::new();

        let request = approvals
            .submit_event_request(
                &requester,
                org_id,
                fixtures::draft(org_id, fixtures::base_instant()),
            )
            .await
            .unwrap();

        store.set_failing(Collection::Events, true);
        let outcome = approvals
            .approve_event_request(&Actor::admin(UserId::new()), request.id)
            .await
            .unwrap();
        store.set_failing(Collection::Events, false);
        assert_eq!(outcome, ApprovalOutcome::Deferred);

        let report = pass(Arc::clone(&store))
            .run(fixtures::base_instant())
            .await
            .unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(store.count(Collection::RepairQueue), 0);

        let events = store.dump(Collection::Events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.get("status").unwrap(), "published");
        assert_eq!(
            events[0].1.get("source_request_id").unwrap(),
            &serde_json::json!(request.id.to_string())
        );
    }

    #[tokio::test]
    async fn crash_window_is_detected_without_a_ticket() {
        // An approved request with no event and no ticket: the write was
        // lost in a crash before the repair enqueue could happen.
        let store = Arc::new(InMemoryRecordStore::new());
        let approvals = Approvals::new(env(Arc::clone(&store)));
        let requester = Actor::new(UserId::new(), Role::Organizer);
        let org_id = eventline_core::ids::OrgId::new();

        let request = approvals
            .submit_event_request(
                &requester,
                org_id,
                fixtures::draft(org_id, fixtures::base_instant()),
            )
            .await
            .unwrap();
        let outcome = approvals
            .approve_event_request(&Actor::admin(UserId::new()), request.id)
            .await
            .unwrap();

        // Simulate the lost write
        let ApprovalOutcome::Materialized(event_id) = outcome else {
            panic!("expected materialization");
        };
        store
            .delete(Collection::Events, event_id.to_string())
            .await
            .unwrap();

        let reconciliation = pass(Arc::clone(&store));
        let first = reconciliation.run(fixtures::base_instant()).await.unwrap();
        assert_eq!(first.enqueued, 1);
        assert_eq!(first.applied, 1);
        assert_eq!(store.count(Collection::Events), 1);

        // A second run finds nothing to do
        let second = reconciliation.run(fixtures::base_instant()).await.unwrap();
        assert_eq!(second, ReconcileReport::default());
    }

    #[tokio::test]
    async fn pending_affiliation_ticket_is_applied() {
        let store = Arc::new(InMemoryRecordStore::new());
        let verification = Verification::new(env(Arc::clone(&store)));

        let creator = fixtures::user(Role::Organizer);
        store.seed(&creator).unwrap();
        let org = fixtures::organization(creator.id, fixtures::base_instant());
        store.seed(&org).unwrap();

        store.set_failing(Collection::Users, true);
        verification
            .verify_organization(&Actor::admin(UserId::new()), org.id, true)
            .await
            .unwrap();
        store.set_failing(Collection::Users, false);
        assert_eq!(store.count(Collection::RepairQueue), 1);

        let report = pass(Arc::clone(&store))
            .run(fixtures::base_instant())
            .await
            .unwrap();
        assert_eq!(report.applied, 1);

        let user: UserRecord = store.peek(&creator.id.to_string()).unwrap().unwrap();
        assert_eq!(user.affiliated_organization_id, Some(org.id));
        assert_eq!(store.count(Collection::RepairQueue), 0);
    }

    #[tokio::test]
    async fn stale_tickets_are_discarded() {
        let store = Arc::new(InMemoryRecordStore::new());

        // Ticket for a user that no longer exists
        store
            .seed(&RepairTicket::new(
                RepairKind::PendingAffiliation {
                    organization_id: eventline_core::ids::OrgId::new(),
                    user_id: UserId::new(),
                },
                fixtures::base_instant(),
            ))
            .unwrap();

        let report = pass(Arc::clone(&store))
            .run(fixtures::base_instant())
            .await
            .unwrap();
        assert_eq!(report.discarded, 1);
        assert_eq!(store.count(Collection::RepairQueue), 0);
    }

    #[tokio::test]
    async fn failing_ticket_counts_attempts_and_stays() {
        let store = Arc::new(InMemoryRecordStore::new());

        let user = fixtures::user(Role::Student);
        store.seed(&user).unwrap();
        let ticket = RepairTicket::new(
            RepairKind::PendingAffiliation {
                organization_id: eventline_core::ids::OrgId::new(),
                user_id: user.id,
            },
            fixtures::base_instant(),
        );
        store.seed(&ticket).unwrap();

        // The user patch keeps failing (but ticket bookkeeping works)
        store.set_failing_record(Collection::Users, &user.id.to_string(), true);
        let report = pass(Arc::clone(&store))
            .run(fixtures::base_instant())
            .await
            .unwrap();
        assert_eq!(report.retrying, 1);

        let stored: RepairTicket = store.peek(&ticket.id.to_string()).unwrap().unwrap();
        assert_eq!(stored.attempts, 1);

        // Once the backend recovers, the ticket applies
        store.set_failing_record(Collection::Users, &user.id.to_string(), false);
        let report = pass(Arc::clone(&store))
            .run(fixtures::base_instant())
            .await
            .unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(store.count(Collection::RepairQueue), 0);
    }

    #[tokio::test]
    async fn exhausted_tickets_are_left_for_the_operator() {
        let store = Arc::new(InMemoryRecordStore::new());
        let user = fixtures::user(Role::Student);
        store.seed(&user).unwrap();

        let mut ticket = RepairTicket::new(
            RepairKind::PendingAffiliation {
                organization_id: eventline_core::ids::OrgId::new(),
                user_id: user.id,
            },
            fixtures::base_instant(),
        );
        ticket.attempts = 5;
        store.seed(&ticket).unwrap();

        let report = pass(Arc::clone(&store))
            .run(fixtures::base_instant())
            .await
            .unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(store.count(Collection::RepairQueue), 1);
    }

    #[tokio::test]
    async fn stale_user_flags_are_reapplied() {
        let store = Arc::new(InMemoryRecordStore::new());
        let approvals = Approvals::new(env(Arc::clone(&store)));

        let mut user = fixtures::user(Role::Student);
        user.approved = false;
        store.seed(&user).unwrap();

        let request = approvals
            .submit_account_request(&Actor::new(user.id, Role::Student), Role::Organizer, None)
            .await
            .unwrap();
        approvals
            .approve_account_request(&Actor::admin(UserId::new()), request.id)
            .await
            .unwrap();

        // Roll the flags back, as if the flag write had been lost
        let mut patch = Document::new();
        patch.insert("approved".to_string(), serde_json::json!(false));
        patch.insert("approval_requested".to_string(), serde_json::json!(true));
        store
            .update(Collection::Users, user.id.to_string(), patch)
            .await
            .unwrap();

        let report = pass(Arc::clone(&store))
            .run(fixtures::base_instant())
            .await
            .unwrap();
        assert_eq!(report.applied, 1);

        let repaired: UserRecord = store.peek(&user.id.to_string()).unwrap().unwrap();
        assert!(repaired.approved);
        assert!(!repaired.approval_requested);
    }
}
