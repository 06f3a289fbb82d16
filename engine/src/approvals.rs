//! Approval workflow engine: the generic pending → approved/rejected flow
//! shared by event creation requests and account approval requests.
//!
//! Resolution is terminal-once: approving or rejecting a request that has
//! already left `pending` fails with `InvalidState` and produces no further
//! side effects. Rejection always carries a non-empty reason.
//!
//! Side effects are two independent writes with no atomicity: the request
//! resolution lands first, then the effect (event materialization or user
//! flag update). A failure on the second write does not roll back the
//! first. The inconsistency is logged, surfaced as a repair ticket, and
//! healed by the reconciliation pass. Forward progress over rollback.

use crate::environment::{EngineEnvironment, field_value};
use eventline_core::actor::{Actor, Role};
use eventline_core::audit::AuditEvent;
use eventline_core::error::EngineError;
use eventline_core::ids::{EventId, OrgId, RequestId, UserId};
use eventline_core::records::{
    EventCreationRequest, EventDraft, EventRecord, OrganizationProfile, Record, RepairKind,
    RepairTicket, ReviewState, UserApprovalRequest, UserRecord,
};
use eventline_core::store::{Collection, Document};
use eventline_runtime::metrics::{APPROVALS_GRANTED, APPROVALS_REJECTED, counter};

/// What approving an event creation request produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// The event was materialized in the same operation.
    Materialized(EventId),
    /// The request is approved but the event write failed; a repair ticket
    /// carries the intermediate state until reconciliation materializes it.
    Deferred,
}

/// The approval workflow service.
pub struct Approvals {
    env: EngineEnvironment,
}

impl Approvals {
    /// Creates a new `Approvals` service.
    #[must_use]
    pub const fn new(env: EngineEnvironment) -> Self {
        Self { env }
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit an event creation request. This is the only creation path for
    /// non-privileged creators; no event exists until an admin approves.
    ///
    /// # Errors
    ///
    /// - `Validation` for an invalid candidate payload
    pub async fn submit_event_request(
        &self,
        actor: &Actor,
        organization_id: OrgId,
        payload: EventDraft,
    ) -> Result<EventCreationRequest, EngineError> {
        payload.validate()?;

        let request = EventCreationRequest {
            id: RequestId::new(),
            requested_by: actor.user_id,
            organization_id,
            payload,
            review: ReviewState::pending(),
            submitted_at: self.env.now(),
        };
        self.env.save(&request).await?;
        tracing::info!(request_id = %request.id, requested_by = %actor.user_id, "event creation request submitted");

        Ok(request)
    }

    /// Submit an account approval request, marking the user's
    /// `approval_requested` flag. A missing user record is tolerated; the
    /// flag write is then skipped.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn submit_account_request(
        &self,
        actor: &Actor,
        requested_role: Role,
        organization_profile: Option<OrganizationProfile>,
    ) -> Result<UserApprovalRequest, EngineError> {
        let request = UserApprovalRequest {
            id: RequestId::new(),
            requested_by: actor.user_id,
            requested_role,
            organization_profile,
            review: ReviewState::pending(),
            submitted_at: self.env.now(),
        };
        self.env.save(&request).await?;

        let mut patch = Document::new();
        patch.insert("approval_requested".to_string(), field_value(&true)?);
        if let Err(e) = self
            .env
            .patch(Collection::Users, actor.user_id.to_string(), patch)
            .await
        {
            tracing::warn!(user_id = %actor.user_id, error = %e, "could not flag approval_requested");
        }
        tracing::info!(request_id = %request.id, requested_by = %actor.user_id, "account approval request submitted");

        Ok(request)
    }

    // ========================================================================
    // Event creation requests
    // ========================================================================

    /// Approve an event creation request and materialize the event with
    /// `status=published` from the stored payload.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors
    /// - `NotFound` when the request is absent
    /// - `InvalidState` when the request is already resolved
    pub async fn approve_event_request(
        &self,
        actor: &Actor,
        request_id: RequestId,
    ) -> Result<ApprovalOutcome, EngineError> {
        actor.require_admin("approve_event_request")?;

        let mut request: EventCreationRequest = self.load_pending(request_id).await?;

        let now = self.env.now();
        request.review = ReviewState::approved(actor.user_id, now);
        self.mark_resolved::<EventCreationRequest>(&request.record_id(), &request.review)
            .await?;

        counter!(APPROVALS_GRANTED).increment(1);
        self.env
            .emit(AuditEvent::ApprovalGranted {
                request_id,
                reviewed_by: actor.user_id,
            })
            .await;

        // Second, independent write. A crash or failure here leaves an
        // approved request with no corresponding event, which the repair
        // ticket makes detectable instead of silently lost.
        let event = EventRecord::from_request(EventId::new(), &request, now)?;
        match self.env.save(&event).await {
            Ok(()) => {
                self.env
                    .emit(AuditEvent::EventPublished { event_id: event.id })
                    .await;
                tracing::info!(
                    %request_id,
                    event_id = %event.id,
                    "event materialized from approved request"
                );
                Ok(ApprovalOutcome::Materialized(event.id))
            }
            Err(e) => {
                tracing::error!(
                    %request_id,
                    error = %e,
                    "approved request could not materialize its event; deferring to reconciliation"
                );
                self.enqueue_repair(RepairKind::MissingApprovedEvent { request_id })
                    .await;
                Ok(ApprovalOutcome::Deferred)
            }
        }
    }

    /// Reject an event creation request with a mandatory reason.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors
    /// - `Validation` for an empty reason (the request stays pending)
    /// - `NotFound` when the request is absent
    /// - `InvalidState` when the request is already resolved
    pub async fn reject_event_request(
        &self,
        actor: &Actor,
        request_id: RequestId,
        reason: &str,
    ) -> Result<(), EngineError> {
        actor.require_admin("reject_event_request")?;
        let reason = validated_reason(reason)?;

        let request: EventCreationRequest = self.load_pending(request_id).await?;
        let review = ReviewState::rejected(actor.user_id, self.env.now(), reason);
        self.mark_resolved::<EventCreationRequest>(&request.record_id(), &review)
            .await?;

        counter!(APPROVALS_REJECTED).increment(1);
        self.env
            .emit(AuditEvent::ApprovalRejected {
                request_id,
                reviewed_by: actor.user_id,
            })
            .await;
        tracing::info!(%request_id, "event creation request rejected");

        Ok(())
    }

    // ========================================================================
    // Account approval requests
    // ========================================================================

    /// Approve an account request: the referenced user gets
    /// `approved=true, approval_requested=false`.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors
    /// - `NotFound` when the request is absent
    /// - `InvalidState` when the request is already resolved
    pub async fn approve_account_request(
        &self,
        actor: &Actor,
        request_id: RequestId,
    ) -> Result<(), EngineError> {
        actor.require_admin("approve_account_request")?;

        let request: UserApprovalRequest = self.load_pending(request_id).await?;
        let review = ReviewState::approved(actor.user_id, self.env.now());
        self.mark_resolved::<UserApprovalRequest>(&request.record_id(), &review)
            .await?;

        counter!(APPROVALS_GRANTED).increment(1);
        self.env
            .emit(AuditEvent::ApprovalGranted {
                request_id,
                reviewed_by: actor.user_id,
            })
            .await;

        self.apply_user_flags(request_id, request.requested_by, true)
            .await;
        Ok(())
    }

    /// Reject an account request with a mandatory reason: the referenced
    /// user gets `approved=false, approval_requested=false`.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors
    /// - `Validation` for an empty reason (the request stays pending)
    /// - `NotFound` when the request is absent
    /// - `InvalidState` when the request is already resolved
    pub async fn reject_account_request(
        &self,
        actor: &Actor,
        request_id: RequestId,
        reason: &str,
    ) -> Result<(), EngineError> {
        actor.require_admin("reject_account_request")?;
        let reason = validated_reason(reason)?;

        let request: UserApprovalRequest = self.load_pending(request_id).await?;
        let review = ReviewState::rejected(actor.user_id, self.env.now(), reason);
        self.mark_resolved::<UserApprovalRequest>(&request.record_id(), &review)
            .await?;

        counter!(APPROVALS_REJECTED).increment(1);
        self.env
            .emit(AuditEvent::ApprovalRejected {
                request_id,
                reviewed_by: actor.user_id,
            })
            .await;

        self.apply_user_flags(request_id, request.requested_by, false)
            .await;
        Ok(())
    }

    // ========================================================================
    // Shared plumbing
    // ========================================================================

    /// Load a request and enforce terminal-once.
    async fn load_pending<T: Record>(&self, request_id: RequestId) -> Result<T, EngineError>
    where
        T: HasReview,
    {
        let request: T = self
            .env
            .load(&request_id.to_string())
            .await?
            .ok_or_else(|| EngineError::not_found(format!("request {request_id}")))?;

        if !request.review().is_pending() {
            return Err(EngineError::invalid_state(format!(
                "request {request_id} is already resolved"
            )));
        }
        Ok(request)
    }

    /// Persist a resolved review. The review fields are flattened into the
    /// request document, so this patches them directly.
    async fn mark_resolved<T: Record>(
        &self,
        record_id: &str,
        review: &ReviewState,
    ) -> Result<(), EngineError> {
        let patch = eventline_core::store::to_document(review)?;
        self.env
            .patch(T::COLLECTION, record_id.to_string(), patch)
            .await
    }

    /// Second write of the account-request cascade. Lenient: a missing user
    /// is a tolerated dangling reference, a store failure becomes a repair
    /// ticket.
    async fn apply_user_flags(&self, request_id: RequestId, user_id: UserId, approved: bool) {
        let exists = match self.env.load::<UserRecord>(&user_id.to_string()).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::error!(%request_id, %user_id, error = %e, "user flag cascade failed; deferring");
                self.enqueue_repair(RepairKind::PendingUserFlags {
                    request_id,
                    user_id,
                    approved,
                })
                .await;
                return;
            }
        };
        if !exists {
            tracing::warn!(%request_id, %user_id, "request references a missing user; skipping flag update");
            return;
        }

        match user_flag_patch(approved) {
            Ok(patch) => {
                if let Err(e) = self
                    .env
                    .patch(Collection::Users, user_id.to_string(), patch)
                    .await
                {
                    tracing::error!(%request_id, %user_id, error = %e, "user flag cascade failed; deferring");
                    self.enqueue_repair(RepairKind::PendingUserFlags {
                        request_id,
                        user_id,
                        approved,
                    })
                    .await;
                }
            }
            Err(e) => {
                tracing::error!(%request_id, error = %e, "user flag patch serialization failed");
            }
        }
    }

    async fn enqueue_repair(&self, kind: RepairKind) {
        let name = kind.name();
        let ticket = RepairTicket::new(kind, self.env.now());
        if let Err(e) = self.env.save(&ticket).await {
            // Both the effect and the ticket failed; the reconciliation
            // audit scan remains the backstop.
            tracing::error!(repair = name, error = %e, "repair ticket could not be enqueued");
            return;
        }
        self.env
            .emit(AuditEvent::RepairEnqueued {
                kind: name.to_string(),
            })
            .await;
    }
}

/// Access to the shared review bookkeeping of both request kinds.
trait HasReview {
    fn review(&self) -> &ReviewState;
}

impl HasReview for EventCreationRequest {
    fn review(&self) -> &ReviewState {
        &self.review
    }
}

impl HasReview for UserApprovalRequest {
    fn review(&self) -> &ReviewState {
        &self.review
    }
}

/// A rejection reason must carry content.
fn validated_reason(reason: &str) -> Result<String, EngineError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(
            "a rejection requires a non-empty reason",
        ));
    }
    Ok(trimmed.to_string())
}

/// The flag pair every account-request resolution writes.
fn user_flag_patch(approved: bool) -> Result<Document, EngineError> {
    let mut patch = Document::new();
    patch.insert("approved".to_string(), field_value(&approved)?);
    patch.insert("approval_requested".to_string(), field_value(&false)?);
    Ok(patch)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use eventline_core::audit::NoopAuditSink;
    use eventline_core::records::{EventStatus, ReviewStatus};
    use eventline_testing::{InMemoryRecordStore, fixtures, test_clock};
    use std::sync::Arc;

    fn service(store: Arc<InMemoryRecordStore>) -> Approvals {
        Approvals::new(EngineEnvironment::new(
            store,
            Arc::new(test_clock()),
            Arc::new(NoopAuditSink),
        ))
    }

    fn organizer() -> Actor {
        Actor::new(UserId::new(), Role::Organizer)
    }

    fn admin() -> Actor {
        Actor::admin(UserId::new())
    }

    async fn pending_event_request(
        service: &Approvals,
        requester: &Actor,
    ) -> EventCreationRequest {
        let org_id = OrgId::new();
        service
            .submit_event_request(
                requester,
                org_id,
                fixtures::draft(org_id, fixtures::base_instant()),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn approving_an_event_request_materializes_a_published_event() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));
        let requester = organizer();
        let reviewer = admin();

        let request = pending_event_request(&service, &requester).await;
        let outcome = service
            .approve_event_request(&reviewer, request.id)
            .await
            .unwrap();

        let ApprovalOutcome::Materialized(event_id) = outcome else {
            panic!("expected a materialized event");
        };

        let event: EventRecord = store.peek(&event_id.to_string()).unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Published);
        assert_eq!(event.created_by, requester.user_id);
        assert_eq!(event.source_request_id, Some(request.id));

        let stored: EventCreationRequest = store.peek(&request.id.to_string()).unwrap().unwrap();
        assert_eq!(stored.review.status, ReviewStatus::Approved);
        assert_eq!(stored.review.reviewed_by, Some(reviewer.user_id));
        assert!(stored.review.reviewed_at.is_some());
    }

    #[tokio::test]
    async fn resolving_twice_is_invalid_state() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));

        let request = pending_event_request(&service, &organizer()).await;
        service
            .approve_event_request(&admin(), request.id)
            .await
            .unwrap();

        let err = service
            .approve_event_request(&admin(), request.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let err = service
            .reject_event_request(&admin(), request.id, "too late")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        // No second event appeared
        assert_eq!(store.count(Collection::Events), 1);
    }

    #[tokio::test]
    async fn rejection_requires_a_reason() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));

        let request = pending_event_request(&service, &organizer()).await;
        let err = service
            .reject_event_request(&admin(), request.id, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // The request is still pending
        let stored: EventCreationRequest = store.peek(&request.id.to_string()).unwrap().unwrap();
        assert!(stored.review.is_pending());
    }

    #[tokio::test]
    async fn rejection_stamps_reviewer_time_and_reason() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));
        let reviewer = admin();

        let request = pending_event_request(&service, &organizer()).await;
        service
            .reject_event_request(&reviewer, request.id, "schedule conflicts with exams")
            .await
            .unwrap();

        let stored: EventCreationRequest = store.peek(&request.id.to_string()).unwrap().unwrap();
        assert_eq!(stored.review.status, ReviewStatus::Rejected);
        assert_eq!(stored.review.reviewed_by, Some(reviewer.user_id));
        assert_eq!(
            stored.review.rejection_reason.as_deref(),
            Some("schedule conflicts with exams")
        );
        assert_eq!(store.count(Collection::Events), 0);
    }

    #[tokio::test]
    async fn non_admin_cannot_resolve() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));

        let request = pending_event_request(&service, &organizer()).await;
        let err = service
            .approve_event_request(&organizer(), request.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let stored: EventCreationRequest = store.peek(&request.id.to_string()).unwrap().unwrap();
        assert!(stored.review.is_pending());
    }

    #[tokio::test]
    async fn account_approval_sets_user_flags() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));

        let mut user = fixtures::user(Role::Student);
        user.approved = false;
        store.seed(&user).unwrap();

        let requester = Actor::new(user.id, Role::Student);
        let request = service
            .submit_account_request(&requester, Role::Organizer, None)
            .await
            .unwrap();

        let flagged: UserRecord = store.peek(&user.id.to_string()).unwrap().unwrap();
        assert!(flagged.approval_requested);

        service
            .approve_account_request(&admin(), request.id)
            .await
            .unwrap();

        let approved: UserRecord = store.peek(&user.id.to_string()).unwrap().unwrap();
        assert!(approved.approved);
        assert!(!approved.approval_requested);
    }

    #[tokio::test]
    async fn account_rejection_clears_user_flags() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));

        let mut user = fixtures::user(Role::Student);
        user.approved = true;
        store.seed(&user).unwrap();

        let requester = Actor::new(user.id, Role::Student);
        let request = service
            .submit_account_request(&requester, Role::Organizer, None)
            .await
            .unwrap();
        service
            .reject_account_request(&admin(), request.id, "profile incomplete")
            .await
            .unwrap();

        let stored: UserRecord = store.peek(&user.id.to_string()).unwrap().unwrap();
        assert!(!stored.approved);
        assert!(!stored.approval_requested);
    }

    #[tokio::test]
    async fn failed_event_write_defers_to_reconciliation() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));

        let request = pending_event_request(&service, &organizer()).await;

        store.set_failing(Collection::Events, true);
        let outcome = service
            .approve_event_request(&admin(), request.id)
            .await
            .unwrap();
        store.set_failing(Collection::Events, false);

        assert_eq!(outcome, ApprovalOutcome::Deferred);

        // The request is approved, the event is missing, and the
        // intermediate state is explicit in the repair queue.
        let stored: EventCreationRequest = store.peek(&request.id.to_string()).unwrap().unwrap();
        assert_eq!(stored.review.status, ReviewStatus::Approved);
        assert_eq!(store.count(Collection::Events), 0);
        assert_eq!(store.count(Collection::RepairQueue), 1);
    }

    #[tokio::test]
    async fn account_request_tolerates_missing_user() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(Arc::clone(&store));

        // No user record exists for this actor at all
        let requester = Actor::new(UserId::new(), Role::Student);
        let request = service
            .submit_account_request(&requester, Role::Organizer, None)
            .await
            .unwrap();

        // Approval still resolves the request; the dangling reference is
        // tolerated and no repair ticket is enqueued.
        service
            .approve_account_request(&admin(), request.id)
            .await
            .unwrap();
        let stored: UserApprovalRequest = store.peek(&request.id.to_string()).unwrap().unwrap();
        assert_eq!(stored.review.status, ReviewStatus::Approved);
        assert_eq!(store.count(Collection::RepairQueue), 0);
    }
}
