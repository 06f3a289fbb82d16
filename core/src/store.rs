//! Record store trait and related types.
//!
//! This module defines the core abstraction over the hosted document store
//! backing the platform: named collections of JSON documents with
//! single-record atomicity and nothing more. There are no joins, no
//! multi-collection transactions, and no referential integrity. A stored
//! reference may point at a document that no longer exists, and every
//! consumer of this trait must tolerate that.
//!
//! # Design
//!
//! The `RecordStore` trait is deliberately minimal and focused:
//!
//! - Get / put / delete a document by collection and id
//! - Update (top-level field merge) an existing document
//! - Query a collection by field-equals conditions
//!
//! # Implementations
//!
//! - `InMemoryRecordStore` (in `eventline-testing`): fast, deterministic testing
//!
//! Production backends adapt whichever hosted document store the deployment
//! uses; the engine only ever talks to this trait.
//!
//! # Dyn Compatibility
//!
//! The trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so it can be used as a trait object (`Arc<dyn RecordStore>`),
//! which is how the engine environments carry it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// A stored document: a JSON object keyed by field name.
///
/// Every entity has an explicit typed DTO (see [`crate::records`]); documents
/// are produced and consumed through [`to_document`] / [`from_document`] so
/// the serialization contract lives in exactly one place.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// The closed set of collections the engine reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Event listings.
    Events,
    /// User accounts.
    Users,
    /// Organizations.
    Organizations,
    /// Event registrations (admission results).
    Registrations,
    /// Event creation requests awaiting review.
    EventRequests,
    /// Account/organization approval requests awaiting review.
    UserRequests,
    /// Time-deferred account deletions.
    ScheduledDeletions,
    /// User notifications (deletion fan-out target).
    Notifications,
    /// Chat messages attributed to users (deletion fan-out target).
    ChatMessages,
    /// Reconciliation tickets for incomplete two-write cascades.
    RepairQueue,
}

impl Collection {
    /// The collection name as stored in the backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Users => "users",
            Self::Organizations => "organizations",
            Self::Registrations => "registrations",
            Self::EventRequests => "event_requests",
            Self::UserRequests => "user_requests",
            Self::ScheduledDeletions => "scheduled_deletions",
            Self::Notifications => "notifications",
            Self::ChatMessages => "chat_messages",
            Self::RepairQueue => "repair_queue",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field-equals condition for [`RecordStore::query`].
///
/// Queries are conjunctions: every condition must match.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldEquals {
    /// Top-level field name to compare.
    pub field: String,
    /// The value the field must equal.
    pub value: serde_json::Value,
}

impl FieldEquals {
    /// Build a condition from a field name and any JSON-convertible value.
    pub fn new(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Errors that can occur during record store operations.
#[derive(Error, Debug)]
pub enum RecordStoreError {
    /// The addressed record does not exist (returned by `update` only;
    /// `get` reports absence as `Ok(None)` and `delete` treats it as a no-op).
    #[error("record not found: {collection}/{id}")]
    NotFound {
        /// Collection the record was addressed in.
        collection: Collection,
        /// The missing record id.
        id: String,
    },

    /// Backend connection or request error.
    #[error("store backend error: {0}")]
    Backend(String),

    /// Serialization or deserialization failure at the document boundary.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A store call exceeded its bounded timeout.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Document store abstraction with single-record atomicity.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the engine shares one instance
/// across concurrent operations and background passes.
///
/// # Consistency Contract
///
/// Each call is atomic for the single record it touches and nothing else.
/// Cross-record effects (cascades, denormalized mirrors) are the engine's
/// responsibility and are explicitly *not* transactional.
pub trait RecordStore: Send + Sync {
    /// Fetch one document by id. Absence is `Ok(None)`, not an error.
    ///
    /// # Errors
    ///
    /// - `Backend` on a failed backend call
    /// - `Timeout` when the bounded call deadline elapsed
    fn get(
        &self,
        collection: Collection,
        id: String,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Document>, RecordStoreError>> + Send + '_>>;

    /// Create or fully replace one document.
    ///
    /// # Errors
    ///
    /// - `Backend` on a failed backend call
    /// - `Timeout` when the bounded call deadline elapsed
    fn put(
        &self,
        collection: Collection,
        id: String,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<(), RecordStoreError>> + Send + '_>>;

    /// Merge `patch` into an existing document at the top level.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the record is absent
    /// - `Backend` on a failed backend call
    /// - `Timeout` when the bounded call deadline elapsed
    fn update(
        &self,
        collection: Collection,
        id: String,
        patch: Document,
    ) -> Pin<Box<dyn Future<Output = Result<(), RecordStoreError>> + Send + '_>>;

    /// Delete one document. Deleting an absent document is a no-op; the
    /// deletion cascade depends on this for idempotent retries.
    ///
    /// # Errors
    ///
    /// - `Backend` on a failed backend call
    /// - `Timeout` when the bounded call deadline elapsed
    fn delete(
        &self,
        collection: Collection,
        id: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), RecordStoreError>> + Send + '_>>;

    /// Return `(id, document)` pairs matching every condition. An empty
    /// condition list returns the whole collection.
    ///
    /// # Errors
    ///
    /// - `Backend` on a failed backend call
    /// - `Timeout` when the bounded call deadline elapsed
    fn query(
        &self,
        collection: Collection,
        conditions: Vec<FieldEquals>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(String, Document)>, RecordStoreError>> + Send + '_>>;
}

/// Serialize a typed record into a [`Document`].
///
/// # Errors
///
/// Returns `Serialization` if the value does not serialize to a JSON object
/// (every entity DTO does).
pub fn to_document<T: Serialize>(record: &T) -> Result<Document, RecordStoreError> {
    match serde_json::to_value(record) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(RecordStoreError::Serialization(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(RecordStoreError::Serialization(e.to_string())),
    }
}

/// Deserialize a [`Document`] back into a typed record.
///
/// # Errors
///
/// Returns `Serialization` if the document does not match the record shape.
pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T, RecordStoreError> {
    serde_json::from_value(serde_json::Value::Object(document))
        .map_err(|e| RecordStoreError::Serialization(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn document_round_trip() {
        let sample = Sample {
            name: "concert".to_string(),
            count: 3,
        };
        let doc = to_document(&sample).unwrap();
        assert_eq!(doc.get("name").unwrap(), "concert");
        let back: Sample = from_document(doc).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn non_object_values_are_rejected() {
        let err = to_document(&42).unwrap_err();
        assert!(matches!(err, RecordStoreError::Serialization(_)));
    }

    #[test]
    fn collection_names_are_stable() {
        assert_eq!(Collection::Events.as_str(), "events");
        assert_eq!(Collection::ScheduledDeletions.to_string(), "scheduled_deletions");
    }
}
