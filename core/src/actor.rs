//! Authenticated actor identity and role checks.
//!
//! Authentication itself is delegated to an external identity provider; the
//! engine only consumes the authenticated actor's id and declared role, and
//! gates admin-only operations on it.

use crate::error::EngineError;
use crate::ids::UserId;
use serde::{Deserialize, Serialize};

/// The closed set of roles the platform recognizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Platform administrator: resolves requests, verifies organizations,
    /// creates events directly.
    Admin,
    /// Organization member who publishes events through the request path.
    Organizer,
    /// Regular attendee.
    Student,
}

impl Role {
    /// Whether this role carries administrative privileges.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// The authenticated actor behind an engine call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Actor {
    /// The actor's user id as reported by the identity provider.
    pub user_id: UserId,
    /// The actor's declared role.
    pub role: Role,
}

impl Actor {
    /// Build an actor from an id and role.
    #[must_use]
    pub const fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Shorthand for an admin actor.
    #[must_use]
    pub const fn admin(user_id: UserId) -> Self {
        Self::new(user_id, Role::Admin)
    }

    /// Whether the actor is an administrator.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Precondition for every admin-only operation; checked before any
    /// state is touched.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` when the actor is not an administrator.
    pub fn require_admin(&self, operation: &str) -> Result<(), EngineError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "{operation} requires the admin role (actor {} is {:?})",
                self.user_id, self.role
            )))
        }
    }
}
