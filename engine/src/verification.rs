//! Organization verification and its affiliation cascade.
//!
//! Verifying an organization is a two-write cascade: the organization's
//! `verified` flag, then the creator's `affiliated_organization_id`. The
//! second write is deliberately lenient: verification succeeding matters
//! more than the affiliation link landing immediately. A failed second
//! write is logged, surfaced as a `pending_affiliation` repair ticket, and
//! healed by the reconciliation pass; the first write is never rolled back.

use crate::environment::{EngineEnvironment, field_value};
use eventline_core::actor::Actor;
use eventline_core::audit::AuditEvent;
use eventline_core::error::EngineError;
use eventline_core::ids::OrgId;
use eventline_core::records::{OrganizationRecord, OrganizationType, RepairKind, RepairTicket, UserRecord};
use eventline_core::store::{Collection, Document};

/// Organization verification service.
pub struct Verification {
    env: EngineEnvironment,
}

impl Verification {
    /// Creates a new `Verification` service.
    #[must_use]
    pub const fn new(env: EngineEnvironment) -> Self {
        Self { env }
    }

    /// Create an organization. Starts unverified unless the creating actor
    /// is an administrator, in which case it is verified from birth and
    /// the affiliation cascade runs immediately.
    ///
    /// # Errors
    ///
    /// - `Validation` for an empty name
    pub async fn create_organization(
        &self,
        actor: &Actor,
        name: String,
        org_type: OrganizationType,
        contact_email: String,
    ) -> Result<OrganizationRecord, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::validation("organization name cannot be empty"));
        }

        let organization = OrganizationRecord {
            id: OrgId::new(),
            name,
            org_type,
            contact_email,
            verified: actor.is_admin(),
            created_by: actor.user_id,
            admin_users: vec![actor.user_id],
            affiliated_students: Vec::new(),
            created_at: self.env.now(),
        };
        self.env.save(&organization).await?;
        tracing::info!(
            org_id = %organization.id,
            verified = organization.verified,
            "organization created"
        );

        if organization.verified {
            self.env
                .emit(AuditEvent::OrganizationVerified {
                    organization_id: organization.id,
                })
                .await;
            self.cascade_affiliation(&organization).await;
        }

        Ok(organization)
    }

    /// Set an organization's verification flag. On the transition to
    /// `verified=true`, cascades the creator's affiliation link.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors
    /// - `NotFound` when the organization is absent
    pub async fn verify_organization(
        &self,
        actor: &Actor,
        org_id: OrgId,
        verified: bool,
    ) -> Result<(), EngineError> {
        actor.require_admin("verify_organization")?;

        let organization: OrganizationRecord = self
            .env
            .load(&org_id.to_string())
            .await?
            .ok_or_else(|| EngineError::not_found(format!("organization {org_id}")))?;

        let newly_verified = verified && !organization.verified;

        let mut patch = Document::new();
        patch.insert("verified".to_string(), field_value(&verified)?);
        self.env
            .patch(Collection::Organizations, org_id.to_string(), patch)
            .await?;

        if !newly_verified {
            tracing::info!(%org_id, verified, "organization verification flag set");
            return Ok(());
        }

        self.env
            .emit(AuditEvent::OrganizationVerified {
                organization_id: org_id,
            })
            .await;
        tracing::info!(%org_id, creator = %organization.created_by, "organization verified");

        self.cascade_affiliation(&organization).await;
        Ok(())
    }

    /// The second write of the cascade. Never fails the operation.
    async fn cascade_affiliation(&self, organization: &OrganizationRecord) {
        let user_id = organization.created_by;
        let org_id = organization.id;

        let user = match self.env.load::<UserRecord>(&user_id.to_string()).await {
            Ok(user) => user,
            Err(e) => {
                tracing::error!(%org_id, %user_id, error = %e, "affiliation cascade failed; deferring");
                self.defer_affiliation(org_id, user_id).await;
                return;
            }
        };

        if user.is_none() {
            // Dangling creator reference; tolerated, nothing to repair.
            tracing::warn!(%org_id, %user_id, "verified organization has no creator record; skipping affiliation");
            return;
        }

        let patch = match field_value(&Some(org_id)) {
            Ok(value) => {
                let mut patch = Document::new();
                patch.insert("affiliated_organization_id".to_string(), value);
                patch
            }
            Err(e) => {
                tracing::error!(%org_id, error = %e, "affiliation patch serialization failed");
                return;
            }
        };

        if let Err(e) = self
            .env
            .patch(Collection::Users, user_id.to_string(), patch)
            .await
        {
            tracing::error!(%org_id, %user_id, error = %e, "affiliation cascade failed; deferring");
            self.defer_affiliation(org_id, user_id).await;
        }
    }

    /// Record the explicit intermediate state: organization verified,
    /// affiliation pending.
    async fn defer_affiliation(&self, org_id: OrgId, user_id: eventline_core::ids::UserId) {
        let ticket = RepairTicket::new(
            RepairKind::PendingAffiliation {
                organization_id: org_id,
                user_id,
            },
            self.env.now(),
        );
        if let Err(e) = self.env.save(&ticket).await {
            tracing::error!(%org_id, %user_id, error = %e, "pending affiliation ticket could not be enqueued");
            return;
        }
        self.env
            .emit(AuditEvent::AffiliationDeferred {
                organization_id: org_id,
                user_id,
            })
            .await;
    }
}
